//! In-memory connector double: counts connects and closes, injects failures and
//! delays, and records every statement per database.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tenancy_sdk::error::BoxError;
use tenancy_sdk::{
    BaseTemplate, ConnectionCache, ConnectionTarget, Connector, DataAccess, DataConfig, DataError, EntityDef,
    EntityRegistry, TenantConnection, TenantId, TenantResolver, Transaction,
};

pub const BASE_URL: &str = "postgres://u:p@host:5432/tenancy";

#[derive(Default)]
struct MockState {
    connects: AtomicUsize,
    closes: AtomicUsize,
    targets: Mutex<Vec<ConnectionTarget>>,
    fail_connects: Mutex<HashMap<String, usize>>,
    fail_close: Mutex<HashSet<String>>,
    connect_delay: Mutex<Option<Duration>>,
    log: Mutex<Vec<String>>,
}

#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `times` connects for `tenant` fail with a network error.
    pub fn fail_connects(&self, tenant: &str, times: usize) {
        self.state.fail_connects.lock().insert(tenant.to_string(), times);
    }

    pub fn fail_close(&self, tenant: &str) {
        self.state.fail_close.lock().insert(tenant.to_string());
    }

    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        *self.state.connect_delay.lock() = delay;
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn targets(&self) -> Vec<ConnectionTarget> {
        self.state.targets.lock().clone()
    }

    pub fn log(&self) -> Vec<String> {
        self.state.log.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self, target: &ConnectionTarget) -> Result<MockConnection, BoxError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        self.state.targets.lock().push(target.clone());
        let delay = *self.state.connect_delay.lock();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        {
            let mut fails = self.state.fail_connects.lock();
            if let Some(remaining) = fails.get_mut(target.tenant_id.as_str()) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err("network unreachable".into());
                }
            }
        }
        Ok(MockConnection {
            tenant_id: target.tenant_id.clone(),
            database: target.database.clone(),
            closed: AtomicBool::new(false),
            state: Arc::clone(&self.state),
        })
    }
}

pub struct MockConnection {
    pub tenant_id: TenantId,
    pub database: String,
    closed: AtomicBool,
    state: Arc<MockState>,
}

impl MockConnection {
    fn check(&self) -> Result<(), DataError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DataError::StaleHandle {
                tenant_id: self.tenant_id.clone(),
            });
        }
        Ok(())
    }

    fn record(&self, entry: &str) {
        self.state.log.lock().push(format!("{}: {}", self.database, entry));
    }
}

/// Echo row: which database served the statement, plus a fixed `count` for COUNT queries.
fn echo_row(database: &str, sql: &str, params: &[Value]) -> Value {
    json!({ "database": database, "sql": sql, "params": params, "count": 3 })
}

#[async_trait]
impl TenantConnection for MockConnection {
    async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>, DataError> {
        self.check()?;
        self.record(sql);
        Ok(vec![echo_row(&self.database, sql, params)])
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<u64, DataError> {
        self.check()?;
        self.record(sql);
        Ok(1)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, DataError> {
        self.check()?;
        self.record("BEGIN");
        Ok(Box::new(MockTransaction {
            database: self.database.clone(),
            state: Arc::clone(&self.state),
        }))
    }

    async fn close(&self) -> Result<(), BoxError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_close.lock().contains(self.tenant_id.as_str()) {
            return Err("socket already torn down".into());
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockTransaction {
    database: String,
    state: Arc<MockState>,
}

impl MockTransaction {
    fn record(&self, entry: &str) {
        self.state.log.lock().push(format!("{}: {}", self.database, entry));
    }
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn fetch_all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Value>, DataError> {
        self.record(sql);
        Ok(vec![echo_row(&self.database, sql, params)])
    }

    async fn execute(&mut self, sql: &str, _params: &[Value]) -> Result<u64, DataError> {
        self.record(sql);
        Ok(1)
    }

    async fn commit(self: Box<Self>) -> Result<(), DataError> {
        self.record("COMMIT");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DataError> {
        self.record("ROLLBACK");
        Ok(())
    }
}

pub fn tenant(id: &str) -> TenantId {
    TenantId::new(id).unwrap()
}

pub fn entities() -> EntityRegistry {
    let loans: EntityDef = serde_json::from_value(json!({
        "name": "loans",
        "table": "loans",
        "columns": [
            { "name": "id", "pg_type": "uuid" },
            { "name": "amount", "pg_type": "numeric" },
            { "name": "status" }
        ]
    }))
    .unwrap();
    EntityRegistry::from_defs([loans, EntityDef::new("payments", "payments")])
}

pub fn cache(connector: &MockConnector, timeout: Duration) -> ConnectionCache<MockConnector> {
    ConnectionCache::new(connector.clone(), BaseTemplate::parse(BASE_URL).unwrap(), timeout)
}

pub fn multi_access(connector: &MockConnector) -> DataAccess<MockConnector> {
    DataAccess::multi_tenant(
        cache(connector, Duration::from_secs(2)),
        TenantResolver::default(),
        entities(),
    )
}

pub async fn single_access(connector: &MockConnector) -> DataAccess<MockConnector> {
    let config = DataConfig::default()
        .with_database_url(BASE_URL)
        .with_multi_tenant(false)
        .with_entities(entities());
    DataAccess::connect(&config, connector.clone()).await.unwrap()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("tenancy_sdk=debug"))
        .with_test_writer()
        .try_init();
}
