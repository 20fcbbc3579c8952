//! Process shutdown: close every tenant connection exactly once.

use crate::client::DataAccess;
use crate::connection::Connector;
use crate::error::ShutdownReport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Owns the shutdown hook for a [`DataAccess`]. Clones share the once-only guard.
pub struct LifecycleManager<C: Connector> {
    data: DataAccess<C>,
    fired: Arc<AtomicBool>,
}

impl<C: Connector> Clone for LifecycleManager<C> {
    fn clone(&self) -> Self {
        LifecycleManager {
            data: self.data.clone(),
            fired: Arc::clone(&self.fired),
        }
    }
}

impl<C: Connector> LifecycleManager<C> {
    pub fn new(data: DataAccess<C>) -> Self {
        LifecycleManager {
            data,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Close all connections. Only the first call does work; later or concurrent calls
    /// return an empty report. Close failures are logged and reported, never raised.
    pub async fn on_shutdown(&self) -> ShutdownReport {
        if self.fired.swap(true, Ordering::SeqCst) {
            tracing::debug!("shutdown hook already ran");
            return ShutdownReport::default();
        }
        tracing::info!("closing tenant connections");
        let report = self.data.shutdown_all().await;
        for err in &report.errors {
            tracing::error!(tenant = %err.tenant_id, error = %err.cause, "connection not closed cleanly");
        }
        tracing::info!(
            closed = report.closed.len(),
            failed = report.errors.len(),
            "tenant connections closed"
        );
        report
    }

    pub fn has_shut_down(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM. Pass to `axum::serve(..).with_graceful_shutdown`.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, initiating graceful shutdown");
        }
    }
}
