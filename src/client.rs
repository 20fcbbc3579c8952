//! Request-scoped data client and the registry it is built from.
//!
//! [`DataAccess`] is constructed once at startup and cloned into whatever builds
//! request handlers. In multi-tenant mode it resolves each request's tenant through
//! the [`ConnectionCache`]; in single-tenant mode every request shares one
//! connection built from the base template. [`ScopedClient`] exposes the same
//! surface either way.

use crate::cache::ConnectionCache;
use crate::config::{validate, DataConfig, EntityDef, EntityRegistry};
use crate::connection::{Connector, TenantConnection, Transaction};
use crate::error::{ConnectTimeout, DataError, ShutdownError, ShutdownReport};
use crate::sql::{self, QueryBuf};
use crate::target::{shared_target, BaseTemplate};
use crate::tenant::{RequestContext, TenantId, TenantResolver};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// The one connection used by every request in single-tenant mode.
struct SharedConnection<T> {
    tenant_id: TenantId,
    conn: Arc<T>,
    closed: AtomicBool,
}

enum Backing<C: Connector> {
    Single(SharedConnection<C::Connection>),
    Multi(ConnectionCache<C>),
}

struct Inner<C: Connector> {
    backing: Backing<C>,
    resolver: TenantResolver,
    entities: EntityRegistry,
}

/// Startup-constructed entry point to tenant data. Cheap to clone.
pub struct DataAccess<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for DataAccess<C> {
    fn clone(&self) -> Self {
        DataAccess {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> DataAccess<C> {
    /// Validate the configuration and build the access layer for its mode.
    /// Single-tenant mode connects the shared connection immediately.
    pub async fn connect(config: &DataConfig, connector: C) -> Result<Self, DataError> {
        let base = validate(config)?;
        let resolver = TenantResolver::with_fallback(config.default_tenant.clone());
        if config.multi_tenant {
            tracing::info!(url = %base.redacted_url(), "data access in multi-tenant mode");
            let cache = ConnectionCache::new(connector, base, config.connect_timeout);
            Ok(Self::multi_tenant(cache, resolver, config.entities.clone()))
        } else {
            tracing::info!(url = %base.redacted_url(), "data access in single-tenant mode");
            Self::single_tenant(
                &connector,
                &base,
                config.connect_timeout,
                resolver,
                config.entities.clone(),
            )
            .await
        }
    }

    pub fn multi_tenant(
        cache: ConnectionCache<C>,
        resolver: TenantResolver,
        entities: EntityRegistry,
    ) -> Self {
        DataAccess {
            inner: Arc::new(Inner {
                backing: Backing::Multi(cache),
                resolver,
                entities,
            }),
        }
    }

    pub async fn single_tenant(
        connector: &C,
        base: &BaseTemplate,
        connect_timeout: Duration,
        resolver: TenantResolver,
        entities: EntityRegistry,
    ) -> Result<Self, DataError> {
        let tenant_id = resolver.fallback().clone();
        let target = shared_target(base, &tenant_id);
        let conn = match tokio::time::timeout(connect_timeout, connector.connect(&target)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(cause)) => return Err(DataError::connection(&tenant_id, cause)),
            Err(_) => {
                return Err(DataError::connection(
                    &tenant_id,
                    ConnectTimeout(connect_timeout),
                ))
            }
        };
        Ok(DataAccess {
            inner: Arc::new(Inner {
                backing: Backing::Single(SharedConnection {
                    tenant_id,
                    conn: Arc::new(conn),
                    closed: AtomicBool::new(false),
                }),
                resolver,
                entities,
            }),
        })
    }

    pub fn is_multi_tenant(&self) -> bool {
        matches!(self.inner.backing, Backing::Multi(_))
    }

    pub fn resolver(&self) -> &TenantResolver {
        &self.inner.resolver
    }

    pub fn entities(&self) -> &EntityRegistry {
        &self.inner.entities
    }

    /// The connection cache, in multi-tenant mode.
    pub fn cache(&self) -> Option<&ConnectionCache<C>> {
        match &self.inner.backing {
            Backing::Multi(cache) => Some(cache),
            Backing::Single(_) => None,
        }
    }

    pub async fn scoped(&self, ctx: &RequestContext) -> Result<ScopedClient<C>, DataError> {
        ScopedClient::new(self, ctx).await
    }

    /// Close every open connection: the whole cache, or the shared connection once.
    pub async fn shutdown_all(&self) -> ShutdownReport {
        match &self.inner.backing {
            Backing::Multi(cache) => cache.shutdown_all().await,
            Backing::Single(shared) => {
                let mut report = ShutdownReport::default();
                if shared.closed.swap(true, Ordering::SeqCst) {
                    return report;
                }
                match shared.conn.close().await {
                    Ok(()) => report.closed.push(shared.tenant_id.clone()),
                    Err(cause) => {
                        tracing::warn!(error = %cause, "failed to close shared connection");
                        report.errors.push(ShutdownError {
                            tenant_id: shared.tenant_id.clone(),
                            cause,
                        });
                    }
                }
                report
            }
        }
    }
}

/// Per-request facade over one tenant's connection. Dropping it leaves the connection open.
pub struct ScopedClient<C: Connector> {
    tenant_id: TenantId,
    conn: Arc<C::Connection>,
    access: DataAccess<C>,
}

impl<C: Connector> ScopedClient<C> {
    /// Resolve the request's tenant and its connection. The first request for a tenant
    /// in multi-tenant mode may open a connection; later ones are in-memory lookups.
    pub async fn new(access: &DataAccess<C>, ctx: &RequestContext) -> Result<Self, DataError> {
        let tenant_id = access.inner.resolver.resolve(ctx);
        let conn = match &access.inner.backing {
            Backing::Multi(cache) => cache.resolve(&tenant_id).await?,
            Backing::Single(shared) => {
                if shared.closed.load(Ordering::SeqCst) {
                    return Err(DataError::ShutDown);
                }
                Arc::clone(&shared.conn)
            }
        };
        Ok(ScopedClient {
            tenant_id,
            conn,
            access: access.clone(),
        })
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn connection(&self) -> &Arc<C::Connection> {
        &self.conn
    }

    fn live(&self) -> Result<&C::Connection, DataError> {
        if self.conn.is_closed() {
            return Err(DataError::StaleHandle {
                tenant_id: self.tenant_id.clone(),
            });
        }
        Ok(self.conn.as_ref())
    }

    /// Accessor for a configured entity, e.g. `client.entity("loans")?.find_by_id(&id)`.
    pub fn entity(&self, name: &str) -> Result<EntityHandle<'_, C>, DataError> {
        let def = self
            .access
            .inner
            .entities
            .get(name)
            .ok_or_else(|| DataError::UnknownEntity(name.to_string()))?;
        Ok(EntityHandle { client: self, def })
    }

    pub async fn raw_query(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>, DataError> {
        self.live()?.fetch_all(sql, params).await
    }

    pub async fn raw_execute(&self, sql: &str, params: &[Value]) -> Result<u64, DataError> {
        self.live()?.execute(sql, params).await
    }

    /// Run `work` atomically against this tenant's database: committed on `Ok`,
    /// rolled back on `Err`.
    ///
    /// ```rust,ignore
    /// let q = tenancy_sdk::sql::insert(loans, &body)?;
    /// client.transaction(move |tx| Box::pin(async move {
    ///     let rows = tx.fetch_all(&q.sql, &q.params).await?;
    ///     tx.execute("UPDATE treasury SET balance = balance - $1", &[amount]).await?;
    ///     Ok(rows)
    /// })).await?;
    /// ```
    pub async fn transaction<T, F>(&self, work: F) -> Result<T, DataError>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut Box<dyn Transaction>) -> BoxFuture<'t, Result<T, DataError>>
            + Send,
    {
        let mut tx = self.live()?.begin().await?;
        let result = work(&mut tx).await;
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(tenant = %self.tenant_id, error = %rollback_err, "rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn run_many(&self, q: QueryBuf) -> Result<Vec<Value>, DataError> {
        self.raw_query(&q.sql, &q.params).await
    }

    async fn run_one(&self, q: QueryBuf) -> Result<Option<Value>, DataError> {
        Ok(self.run_many(q).await?.into_iter().next())
    }
}

/// Typed handle to one entity on the client's tenant database.
pub struct EntityHandle<'a, C: Connector> {
    client: &'a ScopedClient<C>,
    def: &'a EntityDef,
}

impl<'a, C: Connector> EntityHandle<'a, C> {
    pub fn def(&self) -> &EntityDef {
        self.def
    }

    /// Rows matching every filter exactly, ordered by primary key. Limit defaults to 100, capped at 1000.
    pub async fn find_many(
        &self,
        filters: &[(String, Value)],
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Value>, DataError> {
        let q = sql::select_list(self.def, filters, limit, offset)?;
        self.client.run_many(q).await
    }

    pub async fn find_by_id(&self, id: &Value) -> Result<Option<Value>, DataError> {
        self.client.run_one(sql::select_by_id(self.def, id)).await
    }

    pub async fn count(&self, filters: &[(String, Value)]) -> Result<u64, DataError> {
        let row = self.client.run_one(sql::count(self.def, filters)?).await?;
        Ok(row
            .as_ref()
            .and_then(|r| r.get("count"))
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    /// Insert one row and return it as stored.
    pub async fn create(&self, body: &Map<String, Value>) -> Result<Value, DataError> {
        self.client
            .run_one(sql::insert(self.def, body)?)
            .await?
            .ok_or(DataError::Db(sqlx::Error::RowNotFound))
    }

    /// Update by id; `None` when no row has that id.
    pub async fn update(
        &self,
        id: &Value,
        body: &Map<String, Value>,
    ) -> Result<Option<Value>, DataError> {
        self.client.run_one(sql::update(self.def, id, body)?).await
    }

    /// Delete by id and return the deleted row.
    pub async fn delete(&self, id: &Value) -> Result<Option<Value>, DataError> {
        self.client.run_one(sql::delete(self.def, id)).await
    }
}
