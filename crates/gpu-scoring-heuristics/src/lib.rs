//! Ordered, pluggable heuristic strategies.
//!
//! Each strategy reads an [`EnrichedListing`] and contributes zero or more
//! named outputs. Contributions merge into the listing; two strategies
//! declaring the same output name is a configuration error caught at
//! registration time, not discovered mid-run.

use std::collections::{BTreeMap, HashSet};

use gpu_scoring_enricher::{EnrichedListing, HeuristicOutput, Warning};
use gpu_scoring_registry::Registry;
use thiserror::Error;

const QUANTIZATION_OUTPUT_PREFIX: &str = "quantization_capacity_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "heuristic strategy '{strategy}' declares output '{output}', which was already \
         registered by another strategy"
    )]
    DuplicateOutput { strategy: String, output: String },
}

/// The result of running one strategy against one listing.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct HeuristicResult {
    pub outputs: Vec<HeuristicOutput>,
    pub warnings: Vec<Warning>,
}

impl HeuristicResult {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// A single named heuristic contribution, registered once at startup.
pub trait HeuristicStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Output names this strategy will ever produce, given the current
    /// registry. Queried once at registration so collisions fail loudly
    /// before any listing is processed, rather than mid-batch.
    fn declared_outputs(&self, registry: &Registry) -> Vec<String>;

    fn evaluate(&self, listing: &EnrichedListing, registry: &Registry) -> HeuristicResult;
}

/// Ordered collection of registered strategies, run in registration order.
pub struct HeuristicRegistry<'a> {
    registry: &'a Registry,
    strategies: Vec<Box<dyn HeuristicStrategy>>,
    seen_outputs: HashSet<String>,
}

impl<'a> HeuristicRegistry<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            strategies: Vec::new(),
            seen_outputs: HashSet::new(),
        }
    }

    pub fn register(&mut self, strategy: Box<dyn HeuristicStrategy>) -> Result<(), ConfigError> {
        let declared = strategy.declared_outputs(self.registry);
        for output in &declared {
            if !self.seen_outputs.insert(output.clone()) {
                tracing::warn!(
                    strategy = strategy.name(),
                    output,
                    "duplicate heuristic output declared, rejecting registration"
                );
                return Err(ConfigError::DuplicateOutput {
                    strategy: strategy.name().to_string(),
                    output: output.clone(),
                });
            }
        }
        tracing::debug!(strategy = strategy.name(), outputs = declared.len(), "heuristic strategy registered");
        self.strategies.push(strategy);
        Ok(())
    }

    /// Apply every registered strategy in order, producing a new listing
    /// rather than mutating the input in place.
    pub fn run(&self, listing: EnrichedListing) -> EnrichedListing {
        let mut listing = listing;
        for strategy in &self.strategies {
            let result = strategy.evaluate(&listing, self.registry);
            listing.heuristic_outputs.extend(result.outputs);
            listing.warnings.extend(result.warnings);
        }
        listing.quantization_capacity = derive_quantization_capacity(&listing.heuristic_outputs);
        listing
    }

    pub fn run_batch(&self, rows: Vec<EnrichedListing>) -> Vec<EnrichedListing> {
        tracing::debug!(rows = rows.len(), strategies = self.strategies.len(), "running heuristic batch");
        rows.into_iter().map(|row| self.run(row)).collect()
    }
}

fn derive_quantization_capacity(outputs: &[HeuristicOutput]) -> Option<BTreeMap<String, i64>> {
    let mut capacity = BTreeMap::new();
    for output in outputs {
        if let HeuristicOutput::Int { name, value } = output {
            if let Some(model_size) = name.strip_prefix(QUANTIZATION_OUTPUT_PREFIX) {
                capacity.insert(model_size.to_string(), *value);
            }
        }
    }
    if capacity.is_empty() {
        None
    } else {
        Some(capacity)
    }
}

/// Required strategy: estimates how many instances of each model size fit
/// in a card's VRAM after reserving runtime overhead. Disabled by default;
/// callers opt in explicitly.
pub struct QuantizationCapacityStrategy {
    enabled: bool,
}

impl QuantizationCapacityStrategy {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl HeuristicStrategy for QuantizationCapacityStrategy {
    fn name(&self) -> &'static str {
        "quantization_capacity"
    }

    fn declared_outputs(&self, registry: &Registry) -> Vec<String> {
        if !self.enabled {
            return Vec::new();
        }
        registry
            .quantization_constants()
            .model_sizes
            .keys()
            .map(|name| format!("{QUANTIZATION_OUTPUT_PREFIX}{name}"))
            .collect()
    }

    fn evaluate(&self, listing: &EnrichedListing, registry: &Registry) -> HeuristicResult {
        if !self.enabled {
            return HeuristicResult::empty();
        }
        let constants = registry.quantization_constants();
        match listing.vram_gb {
            Some(vram_gb) => {
                let outputs = constants
                    .model_sizes
                    .iter()
                    .map(|(name, size_gb)| {
                        let capacity =
                            ((vram_gb as f64 - constants.overhead_gb) / size_gb).floor();
                        HeuristicOutput::Int {
                            name: format!("{QUANTIZATION_OUTPUT_PREFIX}{name}"),
                            value: capacity.max(0.0) as i64,
                        }
                    })
                    .collect();
                HeuristicResult {
                    outputs,
                    warnings: Vec::new(),
                }
            }
            None => {
                let outputs = constants
                    .model_sizes
                    .keys()
                    .map(|name| HeuristicOutput::Int {
                        name: format!("{QUANTIZATION_OUTPUT_PREFIX}{name}"),
                        value: 0,
                    })
                    .collect();
                HeuristicResult {
                    outputs,
                    warnings: vec![Warning::warn(
                        "quantization_capacity_missing_vram",
                        "cannot compute quantization capacity without a known vram_gb",
                    )],
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_scoring_enricher::{Enricher, Severity};
    use gpu_scoring_normalizer::{Condition, MatchType, NormalizedListing, RawListing};

    fn enriched_with_vram(registry: &Registry, canonical: &str) -> EnrichedListing {
        let normalized = NormalizedListing {
            raw: RawListing {
                title: "test".to_string(),
                price: 100.0,
                quantity: 1,
                seller: "s".to_string(),
                source_url: "https://example.com/1".to_string(),
                source_type: "marketplace".to_string(),
                condition: Condition::Used,
                bulk_notes: None,
                geographic_region: "USA".to_string(),
                listing_age: "Current".to_string(),
                model: None,
            },
            canonical_model: canonical.to_string(),
            match_type: MatchType::Exact,
            match_score: 1.0,
            match_notes: "alias:test".to_string(),
            ml_is_gpu: None,
            ml_score: None,
        };
        Enricher::new(registry).enrich(normalized)
    }

    #[test]
    fn quantization_capacity_matches_worked_example() {
        let registry = Registry::load().unwrap();
        let mut heuristics = HeuristicRegistry::new(&registry);
        heuristics
            .register(Box::new(QuantizationCapacityStrategy::new(true)))
            .unwrap();

        let listing = enriched_with_vram(&registry, "RTX_A6000");
        assert_eq!(listing.vram_gb, Some(48));
        let result = heuristics.run(listing);

        let capacity = result.quantization_capacity.unwrap();
        assert_eq!(capacity["7b"], 13);
        assert_eq!(capacity["13b"], 7);
        assert_eq!(capacity["70b"], 1);
    }

    #[test]
    fn missing_vram_yields_zero_capacity_and_warning() {
        let registry = Registry::load().unwrap();
        let mut heuristics = HeuristicRegistry::new(&registry);
        heuristics
            .register(Box::new(QuantizationCapacityStrategy::new(true)))
            .unwrap();

        let listing = enriched_with_vram(&registry, gpu_scoring_normalizer::UNKNOWN_MODEL);
        assert_eq!(listing.vram_gb, None);
        let result = heuristics.run(listing);

        let capacity = result.quantization_capacity.unwrap();
        assert_eq!(capacity["7b"], 0);
        assert_eq!(capacity["13b"], 0);
        assert_eq!(capacity["70b"], 0);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.code == "quantization_capacity_missing_vram" && w.severity == Severity::Warn));
    }

    #[test]
    fn disabled_strategy_produces_no_output_and_registers_cleanly() {
        let registry = Registry::load().unwrap();
        let mut heuristics = HeuristicRegistry::new(&registry);
        heuristics
            .register(Box::new(QuantizationCapacityStrategy::new(false)))
            .unwrap();

        let listing = enriched_with_vram(&registry, "RTX_A6000");
        let result = heuristics.run(listing);
        assert!(result.quantization_capacity.is_none());
        assert!(result.heuristic_outputs.is_empty());
    }

    #[test]
    fn duplicate_output_name_is_a_registration_error() {
        let registry = Registry::load().unwrap();
        let mut heuristics = HeuristicRegistry::new(&registry);
        heuristics
            .register(Box::new(QuantizationCapacityStrategy::new(true)))
            .unwrap();
        let err = heuristics
            .register(Box::new(QuantizationCapacityStrategy::new(true)))
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateOutput { .. }));
    }

    #[test]
    fn quantization_monotonicity_holds_across_vram_sizes() {
        let registry = Registry::load().unwrap();
        let mut heuristics = HeuristicRegistry::new(&registry);
        heuristics
            .register(Box::new(QuantizationCapacityStrategy::new(true)))
            .unwrap();

        let small = heuristics.run(enriched_with_vram(&registry, "RTX_A2000"));
        let large = heuristics.run(enriched_with_vram(&registry, "H100_SXM"));
        assert!(small.vram_gb.unwrap() <= large.vram_gb.unwrap());

        let small_capacity = small.quantization_capacity.unwrap();
        let large_capacity = large.quantization_capacity.unwrap();
        for key in small_capacity.keys() {
            assert!(large_capacity[key] >= small_capacity[key]);
        }
    }
}
