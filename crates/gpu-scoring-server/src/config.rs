use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Server configuration. Loaded from an optional `server.toml` (or
/// `.json`/`.yaml`, `config` picks by extension) plus `GPU_SCORING__*`
/// environment overrides, mirroring the teacher's `ServerConfig::load`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_body_size_mb")]
    pub max_body_size_mb: usize,

    #[serde(default = "default_true")]
    pub enable_cors: bool,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Path to the SQLite database file. `:memory:` keeps the store
    /// in-process, which is what the integration tests use.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Directory overriding the embedded registry resources, if set.
    #[serde(default)]
    pub registry_dir: Option<String>,

    #[serde(default = "default_preset")]
    pub default_preset: String,

    #[serde(default = "default_ingest_deadline_secs")]
    pub ingest_deadline_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            timeout_secs: default_timeout_secs(),
            max_body_size_mb: default_max_body_size_mb(),
            enable_cors: default_true(),
            log_level: default_log_level(),
            metrics_enabled: default_true(),
            db_path: default_db_path(),
            registry_dir: None,
            default_preset: default_preset(),
            ingest_deadline_secs: default_ingest_deadline_secs(),
        }
    }
}

impl ServerConfig {
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let builder = config::Config::builder()
            .add_source(config::File::with_name("server").required(false))
            .add_source(config::Environment::with_prefix("GPU_SCORING").separator("__"));

        let config: ServerConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.bind_addr, self.port);
        Ok(addr_str.parse()?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn ingest_deadline(&self) -> Duration {
        Duration::from_secs(self.ingest_deadline_secs)
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_body_size_mb() -> usize {
    50
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_db_path() -> String {
    "gpu-scoring.sqlite3".to_string()
}

fn default_preset() -> String {
    "balanced".to_string()
}

fn default_ingest_deadline_secs() -> u64 {
    600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.timeout_secs, 30);
        assert_eq!(cfg.default_preset, "balanced");
        assert_eq!(cfg.ingest_deadline_secs, 600);
        assert!(cfg.enable_cors);
    }

    #[test]
    fn socket_addr_parses() {
        let cfg = ServerConfig::default();
        let addr = cfg.socket_addr().unwrap();
        assert_eq!(addr.port(), 8080);
    }
}
