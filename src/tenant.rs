//! Tenant identity and resolution from the request context.

use crate::error::DataError;
use std::fmt;

/// Reserved tenant used when a request carries no tenant marker.
pub const DEFAULT_TENANT_ID: &str = "default";

/// Longest tenant id whose database name (`org_` + id) fits a PostgreSQL identifier (63 bytes).
pub const MAX_TENANT_ID_LEN: usize = 59;

/// Opaque, case-sensitive tenant key. Never empty.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantId(String);

impl TenantId {
    /// Trimmed, non-empty id; `None` for blank input.
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(TenantId(trimmed.to_string()))
        }
    }

    pub fn default_tenant() -> Self {
        TenantId(DEFAULT_TENANT_ID.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check the id maps to a distinct database name: ASCII letters, digits and `-` only.
    /// `_` is excluded because `-` is rewritten to `_` when building the database name.
    pub fn validate(&self) -> Result<(), DataError> {
        let invalid = |reason| DataError::InvalidTenant {
            tenant_id: self.0.clone(),
            reason,
        };
        if self.0.len() > MAX_TENANT_ID_LEN {
            return Err(invalid("longer than 59 characters"));
        }
        if !self.0.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(invalid("only ASCII letters, digits and '-' are allowed"));
        }
        Ok(())
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// What the request-handling layer knows about the caller. Built by the
/// [`crate::extractors::tenant`] extractor or by hand in non-HTTP callers.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    /// Raw tenant marker (e.g. `X-Tenant-ID`), if the request carried one.
    pub tenant: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_tenant(tenant: impl Into<String>) -> Self {
        RequestContext {
            tenant: Some(tenant.into()),
        }
    }
}

/// Maps a request context to a tenant id, falling back to a configured default.
#[derive(Clone, Debug)]
pub struct TenantResolver {
    fallback: TenantId,
}

impl Default for TenantResolver {
    fn default() -> Self {
        TenantResolver {
            fallback: TenantId::default_tenant(),
        }
    }
}

impl TenantResolver {
    pub fn with_fallback(fallback: TenantId) -> Self {
        TenantResolver { fallback }
    }

    pub fn fallback(&self) -> &TenantId {
        &self.fallback
    }

    /// Never fails: a missing or blank marker resolves to the fallback tenant.
    pub fn resolve(&self, ctx: &RequestContext) -> TenantId {
        ctx.tenant
            .as_deref()
            .and_then(TenantId::new)
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Resolve with the reserved `default` fallback.
pub fn resolve_tenant_id(ctx: &RequestContext) -> TenantId {
    TenantResolver::default().resolve(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_marker_resolves_to_default() {
        assert_eq!(resolve_tenant_id(&RequestContext::new()).as_str(), "default");
        assert_eq!(resolve_tenant_id(&RequestContext::for_tenant("   ")).as_str(), "default");
    }

    #[test]
    fn marker_is_trimmed_and_case_sensitive() {
        let id = resolve_tenant_id(&RequestContext::for_tenant(" Acme-Co "));
        assert_eq!(id.as_str(), "Acme-Co");
        assert_ne!(id, resolve_tenant_id(&RequestContext::for_tenant("acme-co")));
    }

    #[test]
    fn configured_fallback_is_used() {
        let resolver = TenantResolver::with_fallback(TenantId::new("main").unwrap());
        assert_eq!(resolver.resolve(&RequestContext::new()).as_str(), "main");
        assert_eq!(resolver.resolve(&RequestContext::for_tenant("beta")).as_str(), "beta");
    }

    #[test]
    fn validate_rejects_underscore_and_long_ids() {
        assert!(TenantId::new("acme-co").unwrap().validate().is_ok());
        assert!(TenantId::default_tenant().validate().is_ok());
        assert!(matches!(
            TenantId::new("acme_co").unwrap().validate(),
            Err(DataError::InvalidTenant { .. })
        ));
        assert!(TenantId::new("a.b").unwrap().validate().is_err());
        let long = "x".repeat(MAX_TENANT_ID_LEN + 1);
        assert!(TenantId::new(&long).unwrap().validate().is_err());
        assert!(TenantId::new(&long[..MAX_TENANT_ID_LEN]).unwrap().validate().is_ok());
    }
}
