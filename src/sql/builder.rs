//! Builds parameterized SELECT, INSERT, UPDATE, DELETE for an entity definition.

use crate::config::{is_identifier, EntityDef};
use crate::error::DataError;
use serde_json::{Map, Value};

/// Upper bound on rows returned by one list query.
pub const MAX_LIMIT: u32 = 1000;
pub const DEFAULT_LIMIT: u32 = 100;

/// Quote identifier for PostgreSQL.
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn qualified_table(def: &EntityDef) -> String {
    format!("{}.{}", quoted(&def.schema), quoted(&def.table))
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Push a value and return its placeholder, cast when the column type is known.
    fn placeholder(&mut self, v: Value, pg_type: Option<&str>) -> String {
        self.params.push(v);
        let n = self.params.len();
        match pg_type {
            Some(t) => format!("${}::{}", n, t),
            None => format!("${}", n),
        }
    }
}

/// Declared columns when the entity lists them; otherwise any plain identifier.
fn check_column(def: &EntityDef, column: &str) -> Result<(), DataError> {
    let known = if def.columns.is_empty() {
        is_identifier(column)
    } else {
        def.column(column).is_some()
    };
    if known {
        Ok(())
    } else {
        Err(DataError::Validation(format!(
            "unknown column '{}' on {}",
            column, def.name
        )))
    }
}

/// Projection: `*` for undeclared columns; numeric and custom types as text so they decode as strings.
fn select_column_list(def: &EntityDef) -> String {
    if def.columns.is_empty() {
        return "*".to_string();
    }
    def.columns
        .iter()
        .map(|c| {
            let q = quoted(&c.name);
            let pg_type = c.pg_type.as_deref().unwrap_or("");
            if pg_type.contains('.') || pg_type.starts_with("numeric") || pg_type.starts_with("decimal") {
                format!("{}::text AS {}", q, q)
            } else {
                q
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn where_clause(q: &mut QueryBuf, def: &EntityDef, filters: &[(String, Value)]) -> Result<String, DataError> {
    let mut parts = Vec::with_capacity(filters.len());
    for (col, val) in filters {
        check_column(def, col)?;
        let ph = q.placeholder(val.clone(), def.pg_type(col));
        parts.push(format!("{} = {}", quoted(col), ph));
    }
    Ok(if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    })
}

/// SELECT with exact-match filters, ORDER BY pk, LIMIT (default 100, max 1000) and OFFSET.
pub fn select_list(
    def: &EntityDef,
    filters: &[(String, Value)],
    limit: Option<u32>,
    offset: Option<u32>,
) -> Result<QueryBuf, DataError> {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, def, filters)?;
    let limit = limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let offset_sql = match offset {
        Some(n) if n > 0 => format!(" OFFSET {}", n),
        _ => String::new(),
    };
    q.sql = format!(
        "SELECT {} FROM {}{} ORDER BY {} LIMIT {}{}",
        select_column_list(def),
        qualified_table(def),
        where_sql,
        quoted(&def.primary_key),
        limit,
        offset_sql
    );
    Ok(q)
}

pub fn select_by_id(def: &EntityDef, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.placeholder(id.clone(), def.pg_type(&def.primary_key));
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} = {}",
        select_column_list(def),
        qualified_table(def),
        quoted(&def.primary_key),
        ph
    );
    q
}

/// `SELECT COUNT(*) AS count`; the row decodes as `{"count": n}`.
pub fn count(def: &EntityDef, filters: &[(String, Value)]) -> Result<QueryBuf, DataError> {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, def, filters)?;
    q.sql = format!("SELECT COUNT(*) AS count FROM {}{}", qualified_table(def), where_sql);
    Ok(q)
}

/// INSERT ... RETURNING. Columns come from the body in key order; omitted columns take DB defaults.
pub fn insert(def: &EntityDef, body: &Map<String, Value>) -> Result<QueryBuf, DataError> {
    let mut q = QueryBuf::new();
    let mut cols = Vec::with_capacity(body.len());
    let mut placeholders = Vec::with_capacity(body.len());
    for (name, val) in body {
        check_column(def, name)?;
        placeholders.push(q.placeholder(val.clone(), def.pg_type(name)));
        cols.push(quoted(name));
    }
    let returning = select_column_list(def);
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", qualified_table(def), returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            qualified_table(def),
            cols.join(", "),
            placeholders.join(", "),
            returning
        )
    };
    Ok(q)
}

/// UPDATE by id: SET only the body's columns, never the primary key.
/// An empty body degrades to a read of the row.
pub fn update(def: &EntityDef, id: &Value, body: &Map<String, Value>) -> Result<QueryBuf, DataError> {
    let mut q = QueryBuf::new();
    let mut sets = Vec::with_capacity(body.len());
    for (name, val) in body {
        if *name == def.primary_key {
            continue;
        }
        check_column(def, name)?;
        let ph = q.placeholder(val.clone(), def.pg_type(name));
        sets.push(format!("{} = {}", quoted(name), ph));
    }
    if sets.is_empty() {
        return Ok(select_by_id(def, id));
    }
    let id_ph = q.placeholder(id.clone(), def.pg_type(&def.primary_key));
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {} RETURNING {}",
        qualified_table(def),
        sets.join(", "),
        quoted(&def.primary_key),
        id_ph,
        select_column_list(def)
    );
    Ok(q)
}

pub fn delete(def: &EntityDef, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.placeholder(id.clone(), def.pg_type(&def.primary_key));
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {} RETURNING {}",
        qualified_table(def),
        quoted(&def.primary_key),
        ph,
        select_column_list(def)
    );
    q
}
