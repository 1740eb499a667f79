//! GPU Scoring Server - HTTP Query Surface over the listing scoring pipeline.
//!
//! This binary loads configuration from the environment (and an optional
//! `server.toml`/`server.yaml`), then serves the REST API until it receives
//! a shutdown signal.

use gpu_scoring_server::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::load()?;
    gpu_scoring_server::start_server(config).await?;
    Ok(())
}
