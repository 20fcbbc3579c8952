//! Typed errors and HTTP mapping.

use crate::tenant::TenantId;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Boxed driver/backend error carried as the cause of connection and shutdown failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A connection cause handed to every caller that waited on the same attempt.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Startup configuration errors. The only errors allowed to stop the process.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid base connection url: {0}")]
    InvalidBaseUrl(String),
    #[error("invalid value for {key}: '{value}'")]
    InvalidEnv { key: &'static str, value: String },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Connection establishment exceeded the configured bound.
#[derive(Error, Debug)]
#[error("connection attempt timed out after {0:?}")]
pub struct ConnectTimeout(pub Duration);

#[derive(Error, Debug)]
pub enum DataError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cannot connect to database for tenant '{tenant_id}': {cause}")]
    Connection {
        tenant_id: TenantId,
        #[source]
        cause: SharedError,
    },
    #[error("connection for tenant '{tenant_id}' has been closed")]
    StaleHandle { tenant_id: TenantId },
    #[error("data access layer is shut down")]
    ShutDown,
    #[error("invalid tenant id '{tenant_id}': {reason}")]
    InvalidTenant {
        tenant_id: String,
        reason: &'static str,
    },
    #[error("unknown entity: {0}")]
    UnknownEntity(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
}

impl DataError {
    pub fn connection(tenant_id: &TenantId, cause: impl Into<BoxError>) -> Self {
        let cause: BoxError = cause.into();
        DataError::Connection {
            tenant_id: tenant_id.clone(),
            cause: Arc::from(cause),
        }
    }

    /// The backend error behind a `Connection` failure.
    pub fn connection_cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            DataError::Connection { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

/// Failure to close one cached connection. Collected, never thrown.
#[derive(Error, Debug)]
#[error("failed to close connection for tenant '{tenant_id}': {cause}")]
pub struct ShutdownError {
    pub tenant_id: TenantId,
    #[source]
    pub cause: BoxError,
}

/// Outcome of closing every cached connection.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub closed: Vec<TenantId>,
    pub errors: Vec<ShutdownError>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.closed.is_empty() && self.errors.is_empty()
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for DataError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            DataError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            DataError::Connection { .. } => (StatusCode::SERVICE_UNAVAILABLE, "tenant_unavailable"),
            DataError::StaleHandle { .. } | DataError::ShutDown => {
                (StatusCode::SERVICE_UNAVAILABLE, "shutting_down")
            }
            DataError::InvalidTenant { .. } => (StatusCode::BAD_REQUEST, "invalid_tenant"),
            DataError::UnknownEntity(_) => (StatusCode::NOT_FOUND, "not_found"),
            DataError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            DataError::Db(e) => {
                if let sqlx::Error::RowNotFound = e {
                    (StatusCode::NOT_FOUND, "not_found")
                } else {
                    (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
                }
            }
        };
        // Connection causes are logged by the cache, not returned.
        let (message, details) = match &self {
            DataError::Connection { tenant_id, .. } => (
                "service unavailable for this organization".to_string(),
                Some(serde_json::json!({ "tenant_id": tenant_id.as_str() })),
            ),
            _ => (self.to_string(), None),
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}
