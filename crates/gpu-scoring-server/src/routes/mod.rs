//! HTTP route handlers, one module per area of the Query Surface.

pub mod health;
pub mod imports;
pub mod listings;

use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

pub use crate::error::not_found;

/// `GET /` — lightweight API description, unauthenticated.
pub async fn api_info() -> impl IntoResponse {
    Json(json!({
        "name": "gpu-scoring-server",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/api/health",
            "/api/models",
            "/api/listings",
            "/api/imports/csv",
            "/api/imports/from-pipeline",
            "/api/ingest/upload-artifact",
            "/api/forecast/deltas",
            "/api/schema/versions",
        ]
    }))
}
