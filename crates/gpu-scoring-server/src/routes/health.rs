use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use std::sync::Arc;

use crate::error::ServerResult;
use crate::state::ServerState;

/// Liveness probe.
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn models(State(state): State<Arc<ServerState>>) -> ServerResult<impl IntoResponse> {
    let specs: Vec<_> = state.registry.specs().cloned().collect();
    Ok(Json(specs))
}

pub async fn schema_versions() -> impl IntoResponse {
    Json(json!({
        "default": gpu_scoring_store::CURRENT_SCHEMA_VERSION,
        "supported": gpu_scoring_store::SUPPORTED_SCHEMA_VERSIONS,
    }))
}
