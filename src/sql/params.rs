//! Bind `serde_json::Value` parameters to sqlx queries.

use serde_json::Value;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::Query;

/// Bind one JSON value. Strings and nulls bind as text; typed columns are cast in SQL (`$n::type`).
pub fn bind_json<'q>(
    query: Query<'q, Postgres, PgArguments>,
    v: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match v {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.clone()),
        Value::Array(_) | Value::Object(_) => query.bind(v.clone()),
    }
}

/// `sqlx::query(sql)` with every parameter bound in order.
pub fn bind_all<'q>(sql: &'q str, params: &[Value]) -> Query<'q, Postgres, PgArguments> {
    params.iter().fold(sqlx::query(sql), bind_json)
}
