use std::sync::Arc;

use gpu_scoring_pipeline::PipelineConfig;
use gpu_scoring_registry::Registry;
use gpu_scoring_store::Store;

use crate::config::ServerConfig;
use crate::error::ServerResult;

/// Shared application state: the registry (immutable, loaded once), the
/// store (cheap to clone internally, wraps an `Arc<Mutex<Connection>>`),
/// and the default pipeline configuration new ingests run against unless
/// a request overrides it.
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<Registry>,
    pub store: Store,
    pub default_pipeline_config: PipelineConfig,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let registry = match &config.registry_dir {
            Some(dir) => Registry::load_from_dir(dir)?,
            None => Registry::load()?,
        };

        let store = if config.db_path == ":memory:" {
            Store::open_in_memory()?
        } else {
            Store::open(&config.db_path)?
        };

        let default_pipeline_config = PipelineConfig {
            preset: config.default_preset.clone(),
            ingest_deadline: config.ingest_deadline(),
            ..PipelineConfig::default()
        };

        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            store,
            default_pipeline_config,
        })
    }
}
