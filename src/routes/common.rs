//! Common routes: health, per-tenant readiness, version.

use crate::connection::Connector;
use crate::error::DataError;
use crate::state::AppState;
use crate::tenant::RequestContext;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyBody {
    status: &'static str,
    tenant: String,
    database: &'static str,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

/// Resolves the caller's tenant connection (opening it if needed) and runs `SELECT 1`.
async fn ready<C: Connector>(
    ctx: RequestContext,
    State(state): State<AppState<C>>,
) -> Result<Json<ReadyBody>, DataError> {
    let client = state.data.scoped(&ctx).await?;
    client.raw_query("SELECT 1", &[]).await?;
    Ok(Json(ReadyBody {
        status: "ok",
        tenant: client.tenant_id().to_string(),
        database: "ok",
    }))
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Common routes (no state): GET /health, GET /version.
pub fn common_routes() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
}

/// Common routes including per-tenant readiness. Tenant comes from `X-Tenant-ID`.
pub fn common_routes_with_ready<C: Connector>(state: AppState<C>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready::<C>))
        .route("/version", get(version))
        .with_state(state)
}
