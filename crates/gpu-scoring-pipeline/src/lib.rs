//! Orchestrates Normalizer, Enricher, Heuristic Engine, Scorer, and
//! Persistence into one ingest pipeline.
//!
//! Only the Normalizer stage runs row-parallel (via `rayon`): title
//! matching is the one stage whose per-row cost varies widely (fuzzy
//! matching scans every alias) and whose rows are independent of each
//! other. Enrichment, heuristics, and scoring are batch operations over
//! the whole, already-ordered `Vec`, so they run sequentially.

pub mod source;

use std::time::Duration;

use chrono::Utc;
use gpu_scoring_enricher::Enricher;
use gpu_scoring_heuristics::{ConfigError, HeuristicRegistry, QuantizationCapacityStrategy};
use gpu_scoring_normalizer::{GpuClassifier, Normalizer, NormalizerConfig, NormalizerError, RawListing};
use gpu_scoring_registry::{ConfigError as RegistryConfigError, Registry};
use gpu_scoring_scorer::{ScoredListing, Scorer, ScorerError};
use gpu_scoring_store::{ImportResult, Store, StoreError};
use rayon::prelude::*;
use thiserror::Error;

pub use source::{CsvSourceLoader, PrescoredCsvLoader, PrescoredRow, SchemaError, SourceParseError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("row {row_index} failed normalization: {source}")]
    Normalization {
        row_index: usize,
        #[source]
        source: NormalizerError,
    },
    #[error(transparent)]
    Heuristics(#[from] ConfigError),
    #[error(transparent)]
    Scoring(#[from] ScorerError),
    #[error(transparent)]
    Registry(#[from] RegistryConfigError),
    #[error(transparent)]
    Source(#[from] SourceParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("ingest did not complete within the configured deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

/// Tunables for one run of the pipeline. Distinct from `NormalizerConfig`
/// because the pipeline also owns heuristic enablement and the preset
/// passed to the scorer.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub preset: String,
    pub quantize_capacity: bool,
    pub fuzzy_threshold: f64,
    pub ingest_deadline: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            preset: "balanced".to_string(),
            quantize_capacity: false,
            fuzzy_threshold: NormalizerConfig::default().fuzzy_threshold,
            ingest_deadline: Duration::from_secs(600),
        }
    }
}

/// Runs the full Normalize -> Enrich -> Heuristics -> Score chain over a
/// batch of raw listings. Does not persist; callers pass the result to
/// `Store::insert_batch` themselves (the pipeline does not own a `Store`
/// because the server needs to surface warnings and scores before a
/// commit decision, e.g. dry-run imports).
pub struct Pipeline<'a> {
    registry: &'a Registry,
    config: PipelineConfig,
    classifier: Option<Box<dyn GpuClassifier>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(registry: &'a Registry, config: PipelineConfig) -> Self {
        Self {
            registry,
            config,
            classifier: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn GpuClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn run_ingest(&self, raw_rows: Vec<RawListing>) -> Result<Vec<ScoredListing>, PipelineError> {
        let span = tracing::info_span!("run_ingest", rows = raw_rows.len(), preset = %self.config.preset);
        let _enter = span.enter();

        let normalizer_config = NormalizerConfig {
            fuzzy_threshold: self.config.fuzzy_threshold,
        };

        let normalized: Vec<_> = raw_rows
            .into_par_iter()
            .enumerate()
            .map(|(row_index, raw)| {
                let normalizer = Normalizer::with_config(self.registry, normalizer_config);
                let normalizer = match &self.classifier {
                    Some(_) => normalizer.with_classifier(Box::new(gpu_scoring_normalizer::StubGpuClassifier)),
                    None => normalizer,
                };
                normalizer
                    .normalize_row(raw)
                    .map_err(|source| PipelineError::Normalization { row_index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let enricher = Enricher::new(self.registry);
        let enriched = enricher.enrich_batch(normalized);

        let mut heuristics = HeuristicRegistry::new(self.registry);
        heuristics.register(Box::new(QuantizationCapacityStrategy::new(
            self.config.quantize_capacity,
        )))?;
        let enriched = heuristics.run_batch(enriched);

        let scorer = Scorer::new(self.registry);
        let scored = scorer.score_batch(enriched, &self.config.preset)?;

        tracing::info!(rows = scored.len(), "ingest complete");
        Ok(scored)
    }
}

/// Convenience wrapper bracketing `Pipeline::run_ingest` with the
/// configured deadline and handing the result straight to the store.
/// `tokio::time::timeout` only bounds wall-clock time; it cannot cancel
/// the CPU-bound work mid-stage, so a timed-out call still finishes its
/// rayon work in the background before the error is observed.
pub async fn run_and_persist(
    registry: &Registry,
    store: &Store,
    config: PipelineConfig,
    raw_rows: Vec<RawListing>,
    source_label: &str,
    import_id: Option<String>,
) -> Result<ImportResult, PipelineError> {
    let deadline = config.ingest_deadline;
    let pipeline = Pipeline::new(registry, config);

    let scored = tokio::time::timeout(deadline, async { pipeline.run_ingest(raw_rows) })
        .await
        .map_err(|_| {
            tracing::warn!(?deadline, source_label, "ingest deadline exceeded");
            PipelineError::DeadlineExceeded(deadline)
        })??;

    let result = store.insert_batch(&scored, source_label, import_id, Utc::now())?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_scoring_normalizer::Condition;

    fn raw(title: &str, price: f64, url: &str) -> RawListing {
        RawListing {
            title: title.to_string(),
            price,
            quantity: 1,
            seller: "acme".to_string(),
            source_url: url.to_string(),
            source_type: "marketplace".to_string(),
            condition: Condition::Used,
            bulk_notes: None,
            geographic_region: "USA".to_string(),
            listing_age: "Current".to_string(),
            model: None,
        }
    }

    #[test]
    fn run_ingest_preserves_input_order() {
        let registry = Registry::load().unwrap();
        let pipeline = Pipeline::new(&registry, PipelineConfig::default());
        let rows = vec![
            raw("NVIDIA RTX A6000 48GB", 3200.0, "https://example.com/1"),
            raw("NVIDIA Tesla T4", 1200.0, "https://example.com/2"),
            raw("NVIDIA H100 SXM", 35000.0, "https://example.com/3"),
        ];
        let scored = pipeline.run_ingest(rows).unwrap();
        assert_eq!(scored.len(), 3);
        assert_eq!(scored[0].enriched.normalized.raw.source_url, "https://example.com/1");
        assert_eq!(scored[1].enriched.normalized.raw.source_url, "https://example.com/2");
        assert_eq!(scored[2].enriched.normalized.raw.source_url, "https://example.com/3");
    }

    #[test]
    fn run_ingest_with_quantization_enabled_populates_capacity() {
        let registry = Registry::load().unwrap();
        let config = PipelineConfig {
            quantize_capacity: true,
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::new(&registry, config);
        let rows = vec![raw("NVIDIA RTX A6000 48GB", 3200.0, "https://example.com/1")];
        let scored = pipeline.run_ingest(rows).unwrap();
        assert!(scored[0].enriched.quantization_capacity.is_some());
    }

    #[test]
    fn run_ingest_classifies_blank_title_row_as_unknown_instead_of_failing() {
        let registry = Registry::load().unwrap();
        let pipeline = Pipeline::new(&registry, PipelineConfig::default());
        let rows = vec![raw("   ", 10.0, "https://example.com/1")];
        let scored = pipeline.run_ingest(rows).unwrap();
        assert_eq!(scored.len(), 1);
        assert_eq!(
            scored[0].enriched.normalized.canonical_model,
            gpu_scoring_normalizer::UNKNOWN_MODEL
        );
    }

    #[tokio::test]
    async fn run_and_persist_rolls_back_fully_on_an_invalid_row() {
        let registry = Registry::load().unwrap();
        let store = Store::open_in_memory().unwrap();
        let mut rows = vec![
            raw("NVIDIA RTX A6000 48GB", 3200.0, "https://example.com/1"),
            raw("NVIDIA Tesla T4", 1200.0, "https://example.com/2"),
        ];
        rows[1].price = -1.0;

        let err = run_and_persist(
            &registry,
            &store,
            PipelineConfig::default(),
            rows,
            "test-upload",
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Store(StoreError::ValidationError { row_index: 1, .. })));

        let listings = store
            .query_listings(&gpu_scoring_store::ListingFilter::default(), gpu_scoring_store::Page::default())
            .unwrap();
        assert!(listings.is_empty());
    }
}
