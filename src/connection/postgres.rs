//! PostgreSQL backend: one `PgPool` per tenant database.

use crate::config::DataConfig;
use crate::connection::{Connector, TenantConnection, Transaction};
use crate::error::{BoxError, DataError};
use crate::sql::bind_all;
use crate::target::ConnectionTarget;
use crate::tenant::TenantId;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{ConnectOptions, Postgres};
use std::str::FromStr;
use std::time::Duration;

/// SQLSTATE for `CREATE DATABASE` on a name that already exists.
const DUPLICATE_DATABASE: &str = "42P04";

#[derive(Clone, Debug)]
pub struct PgConnector {
    max_connections: u32,
    acquire_timeout: Duration,
    create_databases: bool,
}

impl PgConnector {
    pub fn new(max_connections: u32, acquire_timeout: Duration) -> Self {
        PgConnector {
            max_connections,
            acquire_timeout,
            create_databases: false,
        }
    }

    pub fn from_config(config: &DataConfig) -> Self {
        PgConnector {
            max_connections: config.pool_max_connections,
            acquire_timeout: config.connect_timeout,
            create_databases: config.create_databases,
        }
    }

    /// Create a missing tenant database before the pool connects.
    pub fn with_create_databases(mut self, enabled: bool) -> Self {
        self.create_databases = enabled;
        self
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Connection = PgTenantConnection;

    async fn connect(&self, target: &ConnectionTarget) -> Result<PgTenantConnection, BoxError> {
        if self.create_databases {
            ensure_database_exists(target).await?;
        }
        let opts = PgConnectOptions::from_str(&target.url)?;
        // connect (not connect_lazy): the first connection is opened here so failures surface now.
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect_with(opts)
            .await?;
        tracing::info!(
            tenant = %target.tenant_id,
            url = %target.redacted_url(),
            max_connections = self.max_connections,
            "tenant pool connected"
        );
        Ok(PgTenantConnection::new(target.tenant_id.clone(), pool))
    }
}

/// Connect to the server's maintenance database and `CREATE DATABASE` when the tenant's is missing.
pub async fn ensure_database_exists(target: &ConnectionTarget) -> Result<(), BoxError> {
    let opts = PgConnectOptions::from_str(&target.admin_url)?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(&target.database)
            .fetch_one(&mut conn)
            .await?;
    if !exists.0 {
        let created = sqlx::query(&format!("CREATE DATABASE {}", quote_ident(&target.database)))
            .execute(&mut conn)
            .await;
        match created {
            Ok(_) => tracing::info!(tenant = %target.tenant_id, database = %target.database, "created tenant database"),
            // Another process won the race.
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(DUPLICATE_DATABASE) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A tenant's pool. Cloning shares the pool.
#[derive(Clone, Debug)]
pub struct PgTenantConnection {
    tenant_id: TenantId,
    pool: PgPool,
}

impl PgTenantConnection {
    pub fn new(tenant_id: TenantId, pool: PgPool) -> Self {
        PgTenantConnection { tenant_id, pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn db_error(&self, e: sqlx::Error) -> DataError {
        db_error(&self.tenant_id, e)
    }
}

fn db_error(tenant_id: &TenantId, e: sqlx::Error) -> DataError {
    match e {
        sqlx::Error::PoolClosed => DataError::StaleHandle {
            tenant_id: tenant_id.clone(),
        },
        other => DataError::Db(other),
    }
}

#[async_trait]
impl TenantConnection for PgTenantConnection {
    async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>, DataError> {
        tracing::debug!(tenant = %self.tenant_id, sql = %sql, params = ?params, "query");
        let rows = bind_all(sql, params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.db_error(e))?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DataError> {
        tracing::debug!(tenant = %self.tenant_id, sql = %sql, params = ?params, "execute");
        let done = bind_all(sql, params)
            .execute(&self.pool)
            .await
            .map_err(|e| self.db_error(e))?;
        Ok(done.rows_affected())
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, DataError> {
        let tx = self.pool.begin().await.map_err(|e| self.db_error(e))?;
        Ok(Box::new(PgTransaction {
            tenant_id: self.tenant_id.clone(),
            tx,
        }))
    }

    async fn close(&self) -> Result<(), BoxError> {
        self.pool.close().await;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

struct PgTransaction {
    tenant_id: TenantId,
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn fetch_all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Value>, DataError> {
        tracing::debug!(tenant = %self.tenant_id, sql = %sql, params = ?params, "query (tx)");
        let rows = bind_all(sql, params)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error(&self.tenant_id, e))?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DataError> {
        tracing::debug!(tenant = %self.tenant_id, sql = %sql, params = ?params, "execute (tx)");
        let done = bind_all(sql, params)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error(&self.tenant_id, e))?;
        Ok(done.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), DataError> {
        let PgTransaction { tenant_id, tx } = *self;
        tx.commit().await.map_err(|e| db_error(&tenant_id, e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), DataError> {
        let PgTransaction { tenant_id, tx } = *self;
        tx.rollback().await.map_err(|e| db_error(&tenant_id, e))
    }
}

fn row_to_json(row: &PgRow) -> Value {
    use sqlx::{Column, Row, TypeInfo};
    let mut map = serde_json::Map::new();
    for (idx, col) in row.columns().iter().enumerate() {
        map.insert(col.name().to_string(), cell_to_value(row, idx, col.type_info().name()));
    }
    Value::Object(map)
}

fn cell_to_value(row: &PgRow, idx: usize, type_name: &str) -> Value {
    use sqlx::Row;
    fn get<'r, T>(row: &'r PgRow, idx: usize) -> Option<T>
    where
        T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
    {
        row.try_get::<Option<T>, _>(idx).ok().flatten()
    }

    let value = match type_name {
        "BOOL" => get::<bool>(row, idx).map(Value::Bool),
        "INT2" => get::<i16>(row, idx).map(|n| Value::Number(n.into())),
        "INT4" => get::<i32>(row, idx).map(|n| Value::Number(n.into())),
        "INT8" => get::<i64>(row, idx).map(|n| Value::Number(n.into())),
        "FLOAT4" => get::<f32>(row, idx)
            .and_then(|n| serde_json::Number::from_f64(n as f64))
            .map(Value::Number),
        "FLOAT8" => get::<f64>(row, idx)
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        "UUID" => get::<uuid::Uuid>(row, idx).map(|u| Value::String(u.to_string())),
        "TIMESTAMPTZ" => get::<chrono::DateTime<chrono::Utc>>(row, idx).map(|d| Value::String(d.to_rfc3339())),
        "TIMESTAMP" => get::<chrono::NaiveDateTime>(row, idx)
            .map(|d| Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        "DATE" => get::<chrono::NaiveDate>(row, idx).map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
        "JSON" | "JSONB" => get::<Value>(row, idx),
        _ => get::<String>(row, idx).map(Value::String),
    };
    value.unwrap_or(Value::Null)
}
