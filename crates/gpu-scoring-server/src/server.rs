//! Router assembly and process entry point.
//!
//! Mirrors the teacher's `server.rs`: a public/protected route split (here
//! there's nothing to protect — the whole Query Surface is read/ingest, no
//! auth boundary is in scope), a fixed middleware stack, and graceful
//! shutdown on Ctrl+C/SIGTERM.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::middleware::from_fn;
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::middleware::{log_requests, request_id};
use crate::routes::{api_info, health, imports, listings, not_found};
use crate::state::ServerState;

fn build_router(state: Arc<ServerState>) -> Router {
    let cors = if state.config.enable_cors {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    let max_body_bytes = state.config.max_body_size_mb * 1024 * 1024;

    let api_routes = Router::new()
        .route("/api/health", get(health::health))
        .route("/api/models", get(health::models))
        .route("/api/listings", get(listings::list_listings))
        .route("/api/forecast/deltas", get(listings::list_deltas))
        .route("/api/schema/versions", get(health::schema_versions))
        .route("/api/imports/csv", post(imports::import_csv))
        .route(
            "/api/imports/from-pipeline",
            post(imports::import_from_pipeline),
        )
        .route(
            "/api/ingest/upload-artifact",
            post(imports::upload_artifact),
        )
        .layer(DefaultBodyLimit::max(max_body_bytes));

    Router::new()
        .route("/", get(api_info))
        .merge(api_routes)
        .fallback(not_found)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            state.config.timeout(),
        ))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(from_fn(request_id))
        .layer(from_fn(log_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .with_target(false)
        .json()
        .init();

    if config.metrics_enabled {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        builder
            .install()
            .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))?;
    }

    let addr: SocketAddr = config.socket_addr()?;
    let state = Arc::new(ServerState::new(config.clone())?);
    let app = build_router(state);

    tracing::info!(%addr, "starting gpu-scoring-server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
