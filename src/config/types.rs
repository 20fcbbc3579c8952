//! Configuration types: process settings and entity definitions.

use crate::tenant::TenantId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/tenancy";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_POOL_MAX_CONNECTIONS: u32 = 5;

/// Settings read once at process start.
#[derive(Clone, Debug)]
pub struct DataConfig {
    /// Base connection template; tenant databases replace its path component.
    pub database_url: String,
    /// Route each tenant to its own database; otherwise one shared connection serves everyone.
    pub multi_tenant: bool,
    /// Tenant used when a request carries no marker.
    pub default_tenant: TenantId,
    pub connect_timeout: Duration,
    /// Size of each tenant's connection pool.
    pub pool_max_connections: u32,
    /// Create a tenant database on first connect when it does not exist.
    pub create_databases: bool,
    pub entities: EntityRegistry,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            multi_tenant: false,
            default_tenant: TenantId::default_tenant(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            pool_max_connections: DEFAULT_POOL_MAX_CONNECTIONS,
            create_databases: false,
            entities: EntityRegistry::default(),
        }
    }
}

impl DataConfig {
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    pub fn with_multi_tenant(mut self, enabled: bool) -> Self {
        self.multi_tenant = enabled;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_entities(mut self, entities: EntityRegistry) -> Self {
        self.entities = entities;
        self
    }
}

fn default_schema() -> String {
    "public".into()
}

fn default_primary_key() -> String {
    "id".into()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    /// PostgreSQL type used for `$n::type` casts (e.g. "timestamptz", "numeric").
    #[serde(default)]
    pub pg_type: Option<String>,
}

/// One logical collection the business layer reads and writes (loans, payments, ...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    /// Accessor name, e.g. `client.entity("loans")`.
    pub name: String,
    pub table: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    /// When empty, any well-formed column name is accepted and reads use `SELECT *`.
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        EntityDef {
            name: name.into(),
            table: table.into(),
            schema: default_schema(),
            primary_key: default_primary_key(),
            columns: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn pg_type(&self, column: &str) -> Option<&str> {
        self.column(column).and_then(|c| c.pg_type.as_deref())
    }
}

/// Entity definitions by accessor name.
#[derive(Clone, Debug, Default)]
pub struct EntityRegistry {
    by_name: HashMap<String, EntityDef>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later definitions with the same name replace earlier ones; use
    /// [`crate::config::validate_entities`] to reject duplicates first.
    pub fn from_defs(defs: impl IntoIterator<Item = EntityDef>) -> Self {
        EntityRegistry {
            by_name: defs.into_iter().map(|d| (d.name.clone(), d)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&EntityDef> {
        self.by_name.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityDef> {
        self.by_name.values()
    }
}
