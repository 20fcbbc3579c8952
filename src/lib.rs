//! Tenancy SDK: per-tenant PostgreSQL connection routing and lifecycle.
//!
//! Requests resolve a tenant ([`tenant`]), the tenant maps to its own logical
//! database ([`target`]), and a process-wide [`cache`] keeps one live pool per
//! tenant. Business code works through a [`client::ScopedClient`], which behaves
//! the same in single- and multi-tenant mode. [`lifecycle`] closes everything on
//! shutdown.

pub mod cache;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod extractors;
pub mod lifecycle;
pub mod routes;
pub mod sql;
pub mod state;
pub mod target;
pub mod tenant;

pub use cache::ConnectionCache;
pub use client::{DataAccess, EntityHandle, ScopedClient};
pub use config::{load_entities_from_path, DataConfig, EntityDef, EntityRegistry};
pub use connection::{Connector, PgConnector, PgTenantConnection, TenantConnection, Transaction};
pub use error::{ConfigError, DataError, ShutdownError, ShutdownReport};
pub use extractors::TENANT_ID_HEADER;
pub use lifecycle::{shutdown_signal, LifecycleManager};
pub use routes::{common_routes, common_routes_with_ready};
pub use state::AppState;
pub use target::{build_target, BaseTemplate, ConnectionTarget};
pub use tenant::{resolve_tenant_id, RequestContext, TenantId, TenantResolver, DEFAULT_TENANT_ID};
