//! Process-wide registry of live tenant connections.
//!
//! Each tenant moves through `ABSENT -> CONNECTING -> READY -> CLOSED`. The first
//! miss for a tenant starts one connect attempt and parks it in the map as a
//! shared future; every caller that arrives while it runs awaits that same
//! attempt and gets its outcome, success or failure. The attempt itself moves
//! the slot to `READY` or back to `ABSENT`, so the next caller after a failure
//! starts fresh. `shutdown_all` drains the map and moves the cache to `CLOSED`
//! for good.

use crate::connection::{Connector, TenantConnection};
use crate::error::{ConnectTimeout, DataError, SharedError, ShutdownError, ShutdownReport};
use crate::target::{build_target, BaseTemplate, ConnectionTarget};
use crate::tenant::TenantId;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
enum AttemptError {
    Failed(SharedError),
    /// The cache shut down while the attempt was running; the new connection was closed.
    ShutDown,
}

type Attempt<T> = Shared<BoxFuture<'static, Result<Arc<T>, AttemptError>>>;

enum Slot<T> {
    Connecting(Attempt<T>),
    Ready(Arc<T>),
}

struct Entries<T> {
    slots: HashMap<TenantId, Slot<T>>,
    closed: bool,
}

pub struct ConnectionCache<C: Connector> {
    connector: Arc<C>,
    base: BaseTemplate,
    connect_timeout: Duration,
    entries: Arc<Mutex<Entries<C::Connection>>>,
}

impl<C: Connector> ConnectionCache<C> {
    pub fn new(connector: C, base: BaseTemplate, connect_timeout: Duration) -> Self {
        ConnectionCache {
            connector: Arc::new(connector),
            base,
            connect_timeout,
            entries: Arc::new(Mutex::new(Entries {
                slots: HashMap::new(),
                closed: false,
            })),
        }
    }

    pub fn base(&self) -> &BaseTemplate {
        &self.base
    }

    /// Return the tenant's live connection, establishing it on first use.
    ///
    /// Concurrent callers for an unseen tenant observe the same connection, or the
    /// same failure, from exactly one `connect`. On failure nothing stays cached and
    /// the error carries the tenant id.
    pub async fn resolve(&self, tenant_id: &TenantId) -> Result<Arc<C::Connection>, DataError> {
        let attempt = {
            let mut entries = self.entries.lock();
            if entries.closed {
                return Err(DataError::ShutDown);
            }
            tenant_id.validate()?;
            match entries.slots.get(tenant_id) {
                Some(Slot::Ready(conn)) => {
                    tracing::debug!(tenant = %tenant_id, "connection cache hit");
                    return Ok(Arc::clone(conn));
                }
                Some(Slot::Connecting(attempt)) => attempt.clone(),
                None => {
                    let attempt = self.start_attempt(tenant_id);
                    entries
                        .slots
                        .insert(tenant_id.clone(), Slot::Connecting(attempt.clone()));
                    attempt
                }
            }
        };

        attempt.await.map_err(|e| match e {
            AttemptError::Failed(cause) => DataError::Connection {
                tenant_id: tenant_id.clone(),
                cause,
            },
            AttemptError::ShutDown => DataError::ShutDown,
        })
    }

    /// One connect for `tenant_id`, settled exactly once however many callers await it.
    fn start_attempt(&self, tenant_id: &TenantId) -> Attempt<C::Connection> {
        let connector = Arc::clone(&self.connector);
        let entries = Arc::clone(&self.entries);
        let target = build_target(&self.base, tenant_id);
        let timeout = self.connect_timeout;

        async move {
            let outcome = establish(connector.as_ref(), &target, timeout).await;
            let late = {
                let mut entries = entries.lock();
                match &outcome {
                    Ok(conn) if !entries.closed => {
                        entries
                            .slots
                            .insert(target.tenant_id.clone(), Slot::Ready(Arc::clone(conn)));
                        None
                    }
                    // Shutdown drained the map while we were connecting.
                    Ok(conn) => Some(Arc::clone(conn)),
                    Err(_) => {
                        entries.slots.remove(&target.tenant_id);
                        None
                    }
                }
            };
            match late {
                Some(conn) => {
                    if let Err(cause) = conn.close().await {
                        tracing::warn!(
                            tenant = %target.tenant_id,
                            error = %cause,
                            "closing late connection failed"
                        );
                    }
                    Err(AttemptError::ShutDown)
                }
                None => outcome.map_err(AttemptError::Failed),
            }
        }
        .boxed()
        .shared()
    }

    /// Close every cached connection once and clear the cache. Safe to call repeatedly;
    /// a failed close is recorded and the rest are still closed.
    pub async fn shutdown_all(&self) -> ShutdownReport {
        let drained: Vec<(TenantId, Slot<C::Connection>)> = {
            let mut entries = self.entries.lock();
            entries.closed = true;
            entries.slots.drain().collect()
        };

        let mut report = ShutdownReport::default();
        for (tenant_id, slot) in drained {
            // In-flight attempts close their own connection when they finish.
            let Slot::Ready(conn) = slot else { continue };
            match conn.close().await {
                Ok(()) => report.closed.push(tenant_id),
                Err(cause) => {
                    tracing::warn!(tenant = %tenant_id, error = %cause, "failed to close tenant connection");
                    report.errors.push(ShutdownError { tenant_id, cause });
                }
            }
        }
        if !report.is_empty() {
            tracing::info!(
                closed = report.closed.len(),
                failed = report.errors.len(),
                "connection cache shut down"
            );
        }
        report
    }

    pub fn is_closed(&self) -> bool {
        self.entries.lock().closed
    }

    /// Whether the tenant has a READY connection.
    pub fn contains(&self, tenant_id: &TenantId) -> bool {
        matches!(self.entries.lock().slots.get(tenant_id), Some(Slot::Ready(_)))
    }

    /// Number of READY connections.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tenants with a READY connection, sorted.
    pub fn tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<TenantId> = self
            .entries
            .lock()
            .slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(id, _)| id.clone())
            .collect();
        tenants.sort();
        tenants
    }
}

async fn establish<C: Connector>(
    connector: &C,
    target: &ConnectionTarget,
    timeout: Duration,
) -> Result<Arc<C::Connection>, SharedError> {
    let tenant_id = &target.tenant_id;
    tracing::debug!(tenant = %tenant_id, url = %target.redacted_url(), "connecting tenant database");
    match tokio::time::timeout(timeout, connector.connect(target)).await {
        Ok(Ok(conn)) => {
            tracing::info!(tenant = %tenant_id, database = %target.database, "tenant connection established");
            Ok(Arc::new(conn))
        }
        Ok(Err(cause)) => {
            tracing::warn!(tenant = %tenant_id, error = %cause, "tenant connection failed");
            Err(Arc::from(cause))
        }
        Err(_) => {
            tracing::warn!(tenant = %tenant_id, timeout = ?timeout, "tenant connection timed out");
            let cause: SharedError = Arc::new(ConnectTimeout(timeout));
            Err(cause)
        }
    }
}
