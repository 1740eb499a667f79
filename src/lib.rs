//! Workspace umbrella crate for the GPU listing scoring pipeline.
//!
//! `gpu-scoring-core` re-exports the registry, normalizer, enricher,
//! heuristics, scorer, store, pipeline, and server crates so applications
//! can drive the full pipeline — or stand up the HTTP Query Surface —
//! through a single dependency.
//!
//! ## Quick start
//!
//! ```ignore
//! use gpu_scoring_core::{Pipeline, PipelineConfig, Registry};
//!
//! # fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::load()?;
//! let pipeline = Pipeline::new(&registry, PipelineConfig::default());
//! let scored = pipeline.run_ingest(vec![])?;
//! # Ok(())
//! # }
//! ```
//!
//! To run the Query Surface, see [`gpu_scoring_server::start_server`] or the
//! `gpu-scoring-server` binary.

pub use gpu_scoring_enricher::{EnrichedListing, Enricher, HeuristicOutput, Severity, Warning};
pub use gpu_scoring_heuristics::{
    ConfigError as HeuristicConfigError, HeuristicRegistry, HeuristicResult, HeuristicStrategy,
    QuantizationCapacityStrategy,
};
pub use gpu_scoring_normalizer::{
    Condition, GpuClassifier, MatchType, Normalizer, NormalizerConfig, NormalizerError,
    NormalizedListing, RawListing, StubGpuClassifier,
};
pub use gpu_scoring_pipeline::{
    run_and_persist, CsvSourceLoader, Pipeline, PipelineConfig, PipelineError, PrescoredCsvLoader,
    PrescoredRow, SchemaError, SourceParseError,
};
pub use gpu_scoring_registry::{
    CanonicalModel, ConfigError as RegistryConfigError, FormFactor, Generation, GpuSpec,
    QuantizationConstants, Registry, WeightVector,
};
pub use gpu_scoring_scorer::{ScoredListing, Scorer, ScorerError};
pub use gpu_scoring_server::{ServerConfig, ServerError, ServerResult};
pub use gpu_scoring_store::{
    DeltaFilter, ImportResult, ListingFilter, Page, PersistedDelta, PersistedListing, Store,
    StoreError, CURRENT_SCHEMA_VERSION, SUPPORTED_SCHEMA_VERSIONS,
};

/// Unifies every stage's error type behind one `Result` for consumers
/// driving the pipeline through this umbrella crate, the way the
/// teacher's root `PipelineError` wraps its own stage errors.
#[derive(Debug, thiserror::Error)]
pub enum GpuScoringError {
    #[error("registry configuration error: {0}")]
    Registry(#[from] RegistryConfigError),
    #[error("normalization error: {0}")]
    Normalizer(#[from] NormalizerError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("scoring error: {0}")]
    Scorer(#[from] ScorerError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("server error: {0}")]
    Server(#[from] ServerError),
}
