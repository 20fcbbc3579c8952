//! axum extractors for the inbound request context.

pub mod tenant;
pub use tenant::TENANT_ID_HEADER;
