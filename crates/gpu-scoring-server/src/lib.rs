//! HTTP Query Surface over the GPU listing scoring pipeline and store.
//!
//! This crate exposes the listing registry, pipeline, and persisted score
//! history over a small REST API:
//!
//! - **Imports**: upload raw or already-scored CSVs, run the pipeline, and
//!   persist the results.
//! - **Query**: filter and page through persisted scored listings and
//!   listing-to-listing price/availability deltas.
//! - **Health & schema**: liveness check, loaded canonical models, and the
//!   supported persistence schema versions.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use gpu_scoring_server::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::load()?;
//!     gpu_scoring_server::start_server(config).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Endpoints
//!
//! - `GET /` - API information
//! - `GET /api/health` - liveness probe
//! - `GET /api/models` - canonical models loaded from the registry
//! - `GET /api/schema/versions` - supported persistence schema versions
//! - `GET /api/listings` - filtered, paged scored listings
//! - `GET /api/forecast/deltas` - listing price/availability deltas
//! - `POST /api/imports/csv` - run the full pipeline over a raw CSV upload
//! - `POST /api/imports/from-pipeline` - ingest an already-scored CSV
//! - `POST /api/ingest/upload-artifact` - validate a raw CSV without persisting it
//!
//! None of these endpoints require authentication; this domain has no
//! multi-tenant or credentialed access requirement.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::start_server;
pub use state::ServerState;
