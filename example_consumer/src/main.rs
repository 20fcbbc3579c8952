//! Example consumer: a separate Rust project that uses tenancy-sdk as a dependency.
//!
//! Run from repo root: `MULTI_TENANT_MODE=true ENTITIES_PATH=example_consumer/entities.json cargo run -p example-consumer`
//! Then: `curl -H 'X-Tenant-ID: acme-co' localhost:3000/ready` or `.../loans`.

use axum::{extract::State, routing::get, Json, Router};
use tenancy_sdk::{
    common_routes_with_ready, shutdown_signal, AppState, DataAccess, DataConfig, DataError, PgConnector,
    RequestContext,
};
use tokio::net::TcpListener;

/// First page of the caller's loans, from whichever database the tenant maps to.
async fn list_loans(
    ctx: RequestContext,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, DataError> {
    let client = state.data.scoped(&ctx).await?;
    let rows = client.entity("loans")?.find_many(&[], Some(50), None).await?;
    Ok(Json(serde_json::json!({ "data": rows, "meta": { "count": rows.len() } })))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tenancy_sdk=info,example_consumer=info")),
        )
        .init();

    let config = DataConfig::from_env()?;
    let data = DataAccess::connect(&config, PgConnector::from_config(&config)).await?;
    let state = AppState::new(data);
    let lifecycle = state.lifecycle.clone();

    let app = Router::new()
        .route("/loans", get(list_loans))
        .with_state(state.clone())
        .merge(common_routes_with_ready(state));

    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    tracing::info!("example consumer listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let report = lifecycle.on_shutdown().await;
    if !report.is_clean() {
        tracing::warn!(failed = report.errors.len(), "shutdown finished with close errors");
    }
    tracing::info!("server shutdown complete");
    Ok(())
}
