//! System endpoints: health and catalog introspection

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;

use crate::AppState;
use crate::models::HealthResponse;

/// Service and database health.
#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, description = "Health status", body = HealthResponse)),
    tag = "System"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database_status = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => "ok".to_string(),
        Err(e) => {
            tracing::warn!("health check database probe failed: {}", e);
            "unreachable".to_string()
        },
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database_status,
    })
}

/// Catalog listing: query id → description.
#[utoipa::path(
    get,
    path = "/api/queries",
    responses((status = 200, description = "Catalog ids and descriptions")),
    tag = "System"
)]
pub async fn list_queries(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let listing: BTreeMap<&str, &str> = state.catalog.descriptions();
    Json(listing)
}
