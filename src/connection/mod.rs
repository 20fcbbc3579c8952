//! Storage seam: how a tenant connection is established and what it can do.
//!
//! The cache and the scoped client only talk to these traits. [`postgres`] is the
//! production implementation; tests plug in an in-memory double.

pub mod postgres;

use crate::error::{BoxError, DataError};
use crate::target::ConnectionTarget;
use async_trait::async_trait;
use serde_json::Value;

pub use postgres::{PgConnector, PgTenantConnection};

/// Opens a live connection (or pool) for one target.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: TenantConnection;

    /// The only I/O-bound step of tenant resolution. Bounded by the cache's connect timeout.
    async fn connect(&self, target: &ConnectionTarget) -> Result<Self::Connection, BoxError>;
}

/// A live, shareable connection to one tenant database.
///
/// Rows travel as JSON objects keyed by column name; parameters bind positionally
/// to `$1..$n`.
#[async_trait]
pub trait TenantConnection: Send + Sync + 'static {
    async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>, DataError>;

    /// Returns rows affected.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DataError>;

    async fn begin(&self) -> Result<Box<dyn Transaction>, DataError>;

    async fn close(&self) -> Result<(), BoxError>;

    fn is_closed(&self) -> bool;
}

/// An open transaction on one tenant database. Dropped without commit means rolled back.
#[async_trait]
pub trait Transaction: Send {
    async fn fetch_all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Value>, DataError>;

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DataError>;

    async fn commit(self: Box<Self>) -> Result<(), DataError>;

    async fn rollback(self: Box<Self>) -> Result<(), DataError>;
}
