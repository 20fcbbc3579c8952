//! Load [`DataConfig`] from environment variables and entity definitions from JSON.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `DATABASE_URL` | `postgres://localhost/tenancy` | Base connection template |
//! | `MULTI_TENANT_MODE` | `false` | One database per tenant |
//! | `DEFAULT_TENANT_ID` | `default` | Tenant for requests without a marker |
//! | `TENANT_CONNECT_TIMEOUT_SECS` | 10 | Bound on connection establishment |
//! | `TENANT_POOL_MAX_CONNECTIONS` | 5 | Pool size per tenant |
//! | `TENANT_CREATE_DATABASES` | `false` | Create missing tenant databases |
//! | `ENTITIES_PATH` | unset | JSON array of entity definitions |

use crate::config::{
    validate_entities, DataConfig, EntityDef, EntityRegistry, DEFAULT_CONNECT_TIMEOUT_SECS,
    DEFAULT_DATABASE_URL, DEFAULT_POOL_MAX_CONNECTIONS,
};
use crate::error::ConfigError;
use crate::tenant::TenantId;
use std::path::Path;
use std::time::Duration;

impl DataConfig {
    /// Read settings from the process environment. Call `dotenvy::dotenv()` first to honour `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup (environment, map, test fixture).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let default_tenant = match var("DEFAULT_TENANT_ID") {
            Some(v) => TenantId::new(&v).ok_or(ConfigError::InvalidEnv {
                key: "DEFAULT_TENANT_ID",
                value: v.clone(),
            })?,
            None => TenantId::default_tenant(),
        };
        let entities = match var("ENTITIES_PATH") {
            Some(path) => load_entities_from_path(&path)?,
            None => EntityRegistry::default(),
        };

        Ok(DataConfig {
            database_url: var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.into()),
            multi_tenant: parse_bool("MULTI_TENANT_MODE", var("MULTI_TENANT_MODE"), false)?,
            default_tenant,
            connect_timeout: Duration::from_secs(parse_num(
                "TENANT_CONNECT_TIMEOUT_SECS",
                var("TENANT_CONNECT_TIMEOUT_SECS"),
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )?),
            pool_max_connections: parse_num(
                "TENANT_POOL_MAX_CONNECTIONS",
                var("TENANT_POOL_MAX_CONNECTIONS"),
                DEFAULT_POOL_MAX_CONNECTIONS,
            )?,
            create_databases: parse_bool(
                "TENANT_CREATE_DATABASES",
                var("TENANT_CREATE_DATABASES"),
                false,
            )?,
            entities,
        })
    }
}

fn parse_bool(key: &'static str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let Some(v) = value else { return Ok(default) };
    match v.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv { key, value: v }),
    }
}

fn parse_num<T: std::str::FromStr>(
    key: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(v) => v.parse().map_err(|_| ConfigError::InvalidEnv { key, value: v }),
        None => Ok(default),
    }
}

/// Parse a JSON array of entity definitions and reject duplicates or malformed names.
pub fn load_entities_from_str(json: &str) -> Result<EntityRegistry, ConfigError> {
    let defs: Vec<EntityDef> =
        serde_json::from_str(json).map_err(|e| ConfigError::Load(format!("entities: {}", e)))?;
    validate_entities(defs.iter())?;
    Ok(EntityRegistry::from_defs(defs))
}

pub fn load_entities_from_path(path: impl AsRef<Path>) -> Result<EntityRegistry, ConfigError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    load_entities_from_str(&json)
}
