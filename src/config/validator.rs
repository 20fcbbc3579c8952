//! Startup validation. Anything rejected here stops the process before it serves traffic.

use crate::config::{DataConfig, EntityDef};
use crate::error::ConfigError;
use crate::target::BaseTemplate;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

const SUPPORTED_SCHEMES: &[&str] = &["postgres", "postgresql"];

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("static identifier regex"))
}

fn pg_type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?(\(\d+(,\s*\d+)?\))?(\[\])?$")
            .expect("static pg type regex")
    })
}

/// Plain SQL identifier: letter or underscore first, at most 63 bytes.
pub fn is_identifier(s: &str) -> bool {
    identifier_re().is_match(s)
}

/// Parse and check the base template and the process settings.
pub fn validate(config: &DataConfig) -> Result<BaseTemplate, ConfigError> {
    let base = BaseTemplate::parse(&config.database_url)?;
    if !SUPPORTED_SCHEMES.contains(&base.scheme()) {
        return Err(ConfigError::InvalidBaseUrl(format!(
            "unsupported scheme '{}' (expected postgres or postgresql)",
            base.scheme()
        )));
    }
    if config.connect_timeout.is_zero() {
        return Err(ConfigError::Validation("connect_timeout must be > 0".into()));
    }
    if config.pool_max_connections == 0 {
        return Err(ConfigError::Validation("pool_max_connections must be > 0".into()));
    }
    if config.multi_tenant {
        config
            .default_tenant
            .validate()
            .map_err(|e| ConfigError::Validation(format!("default tenant: {}", e)))?;
    }
    validate_entities(config.entities.iter())?;
    Ok(base)
}

/// Entity names unique; table, schema, key and column names plain identifiers.
pub fn validate_entities<'a>(
    defs: impl IntoIterator<Item = &'a EntityDef>,
) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for def in defs {
        if def.name.trim().is_empty() {
            return Err(ConfigError::Validation("entity name must not be empty".into()));
        }
        if !names.insert(def.name.as_str()) {
            return Err(ConfigError::Validation(format!("duplicate entity: {}", def.name)));
        }
        for (what, ident) in [
            ("table", &def.table),
            ("schema", &def.schema),
            ("primary_key", &def.primary_key),
        ] {
            if !is_identifier(ident) {
                return Err(ConfigError::Validation(format!(
                    "entity {}: invalid {} '{}'",
                    def.name, what, ident
                )));
            }
        }
        let mut columns = HashSet::new();
        for c in &def.columns {
            if !is_identifier(&c.name) {
                return Err(ConfigError::Validation(format!(
                    "entity {}: invalid column '{}'",
                    def.name, c.name
                )));
            }
            if !columns.insert(c.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "entity {}: duplicate column '{}'",
                    def.name, c.name
                )));
            }
            if let Some(t) = &c.pg_type {
                if !pg_type_re().is_match(t) {
                    return Err(ConfigError::Validation(format!(
                        "entity {}: invalid pg_type '{}' for column {}",
                        def.name, t, c.name
                    )));
                }
            }
        }
        if !def.columns.is_empty() && !columns.contains(def.primary_key.as_str()) {
            return Err(ConfigError::Validation(format!(
                "entity {}: primary key '{}' is not among its columns",
                def.name, def.primary_key
            )));
        }
    }
    Ok(())
}
