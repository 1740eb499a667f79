//! Weighted multi-criterion scoring over a batch of enriched listings.
//!
//! Every metric is normalized against the current batch (min-max), so
//! scoring a single listing in isolation is meaningless — the unit of
//! work is always [`Scorer::score_batch`]. Given the same batch and
//! preset, output scores are bitwise identical across runs: the
//! normalization pass makes no use of iteration order or hashing.

use std::collections::BTreeMap;

use gpu_scoring_enricher::{EnrichedListing, Warning};
use gpu_scoring_registry::{Registry, WeightVector};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScorerError {
    #[error(transparent)]
    Config(#[from] gpu_scoring_registry::ConfigError),
}

/// An `EnrichedListing` with its composite score and the preset used to
/// compute it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredListing {
    pub enriched: EnrichedListing,
    pub score: f64,
    pub preset: String,
    /// The per-metric contribution in `[0, 1]` before weighting, keyed by
    /// metric name. Lets callers audit why a listing scored the way it did
    /// without re-deriving the batch normalization.
    pub score_components: BTreeMap<String, f64>,
}

struct RawMetrics {
    price_per_vram_gb: Option<f64>,
    vram_gb: Option<f64>,
    power_ratio: Option<f64>,
    mig_capability: Option<f64>,
    form_factor: Option<f64>,
    connectivity: Option<f64>,
}

fn raw_metrics(listing: &EnrichedListing) -> RawMetrics {
    let price_per_vram_gb = listing
        .vram_gb
        .filter(|vram| *vram > 0)
        .map(|vram| listing.normalized.raw.price / vram as f64);

    let vram_gb = listing.vram_gb.map(|v| v as f64);

    let power_ratio = match (listing.cuda_cores, listing.tdp_watts, listing.vram_gb) {
        (Some(cuda_cores), Some(tdp_watts), _) => {
            Some(tdp_watts as f64 / cuda_cores.max(1) as f64)
        }
        (None, Some(tdp_watts), Some(vram_gb)) if vram_gb > 0 => {
            Some(tdp_watts as f64 / vram_gb as f64)
        }
        _ => None,
    };

    let mig_capability = listing
        .mig_support
        .map(|mig| (mig as f64 / 7.0).clamp(0.0, 1.0));

    let form_factor = listing
        .slot_width
        .map(|slots| (1.0 - (slots as f64 - 1.0) / 2.0).clamp(0.0, 1.0));

    let connectivity = match (listing.nvlink, listing.pcie_generation) {
        (Some(nvlink), Some(pcie_generation)) => {
            let nvlink_term = if nvlink { 0.5 } else { 0.0 };
            let pcie_term = (0.5 * (pcie_generation as f64 - 3.0) / 2.0).clamp(0.0, 0.5);
            Some((nvlink_term + pcie_term).clamp(0.0, 1.0))
        }
        _ => None,
    };

    RawMetrics {
        price_per_vram_gb,
        vram_gb,
        power_ratio,
        mig_capability,
        form_factor,
        connectivity,
    }
}

/// Min-max normalize a column of optional values. Missing entries are
/// skipped when computing the min/max but pass through as `None`. A
/// degenerate batch (every present value identical) normalizes to `0.5`,
/// a neutral contribution that favors neither "higher is better" nor
/// "lower is better" metrics built on top of it.
fn normalize_column(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let present: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    if present.is_empty() {
        return vec![None; values.len()];
    }
    let min = present.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = present.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    values
        .iter()
        .map(|value| {
            value.map(|v| {
                if (max - min).abs() < f64::EPSILON {
                    0.5
                } else {
                    (v - min) / (max - min)
                }
            })
        })
        .collect()
}

const METRIC_PRICE_EFFICIENCY: &str = "price_efficiency";
const METRIC_VRAM_CAPACITY: &str = "vram_capacity";
const METRIC_MIG_CAPABILITY: &str = "mig_capability";
const METRIC_POWER_EFFICIENCY: &str = "power_efficiency";
const METRIC_FORM_FACTOR: &str = "form_factor";
const METRIC_CONNECTIVITY: &str = "connectivity";

pub struct Scorer<'a> {
    registry: &'a Registry,
}

impl<'a> Scorer<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Score every listing in `rows` against the named preset. Scoring is
    /// inherently a batch operation: every metric is normalized relative
    /// to the other rows in the same call.
    pub fn score_batch(
        &self,
        rows: Vec<EnrichedListing>,
        preset_name: &str,
    ) -> Result<Vec<ScoredListing>, ScorerError> {
        tracing::debug!(rows = rows.len(), preset = preset_name, "scoring batch");
        let weights = *self.registry.weights(preset_name)?;

        let raw: Vec<RawMetrics> = rows.iter().map(raw_metrics).collect();

        let price_per_vram: Vec<_> = raw.iter().map(|m| m.price_per_vram_gb).collect();
        let vram: Vec<_> = raw.iter().map(|m| m.vram_gb).collect();
        let power_ratio: Vec<_> = raw.iter().map(|m| m.power_ratio).collect();

        let price_normalized = normalize_column(&price_per_vram);
        let vram_normalized = normalize_column(&vram);
        let power_normalized = normalize_column(&power_ratio);

        let scored: Vec<_> = rows
            .into_iter()
            .zip(raw)
            .enumerate()
            .map(|(i, (mut listing, metrics))| {
                let mut warnings = Vec::new();

                let price_efficiency = metric_or_warn(
                    price_normalized[i].map(|n| 1.0 - n),
                    METRIC_PRICE_EFFICIENCY,
                    &mut warnings,
                );
                let vram_capacity = metric_or_warn(
                    vram_normalized[i],
                    METRIC_VRAM_CAPACITY,
                    &mut warnings,
                );
                let mig_capability = metric_or_warn(
                    metrics.mig_capability,
                    METRIC_MIG_CAPABILITY,
                    &mut warnings,
                );
                let power_efficiency = metric_or_warn(
                    power_normalized[i].map(|n| 1.0 - n),
                    METRIC_POWER_EFFICIENCY,
                    &mut warnings,
                );
                let form_factor = metric_or_warn(
                    metrics.form_factor,
                    METRIC_FORM_FACTOR,
                    &mut warnings,
                );
                let connectivity = metric_or_warn(
                    metrics.connectivity,
                    METRIC_CONNECTIVITY,
                    &mut warnings,
                );

                let score = 100.0
                    * (weights.price_efficiency * price_efficiency
                        + weights.vram_capacity * vram_capacity
                        + weights.mig_capability * mig_capability
                        + weights.power_efficiency * power_efficiency
                        + weights.form_factor * form_factor
                        + weights.connectivity * connectivity);

                listing.warnings.extend(warnings);

                let score_components = BTreeMap::from([
                    (METRIC_PRICE_EFFICIENCY.to_string(), price_efficiency),
                    (METRIC_VRAM_CAPACITY.to_string(), vram_capacity),
                    (METRIC_MIG_CAPABILITY.to_string(), mig_capability),
                    (METRIC_POWER_EFFICIENCY.to_string(), power_efficiency),
                    (METRIC_FORM_FACTOR.to_string(), form_factor),
                    (METRIC_CONNECTIVITY.to_string(), connectivity),
                ]);

                ScoredListing {
                    enriched: listing,
                    score,
                    preset: preset_name.to_string(),
                    score_components,
                }
            })
            .collect();

        tracing::info!(preset = preset_name, rows = scored.len(), "batch scored");
        Ok(scored)
    }
}

fn metric_or_warn(value: Option<f64>, metric_name: &str, warnings: &mut Vec<Warning>) -> f64 {
    match value {
        Some(v) => v,
        None => {
            warnings.push(Warning::warn(
                format!("score_partial:{metric_name}"),
                format!("metric '{metric_name}' could not be computed; contributed 0 to score"),
            ));
            0.0
        }
    }
}

/// Exposed for callers (e.g. the model catalog endpoint) that want to
/// reason about which presets exist without re-deriving this from
/// `WeightVector` directly.
pub fn weights_for<'a>(registry: &'a Registry, preset_name: &str) -> Result<&'a WeightVector, ScorerError> {
    Ok(registry.weights(preset_name)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_scoring_enricher::Enricher;
    use gpu_scoring_normalizer::{Condition, MatchType, NormalizedListing, RawListing};

    fn enriched(registry: &Registry, canonical: &str, price: f64, url: &str) -> EnrichedListing {
        let normalized = NormalizedListing {
            raw: RawListing {
                title: "test".to_string(),
                price,
                quantity: 1,
                seller: "s".to_string(),
                source_url: url.to_string(),
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
    fn scenario_1_exact_alias_score_in_expected_range() {
        let registry = Registry::load().unwrap();
        let scorer = Scorer::new(&registry);
        let rows = vec![enriched(&registry, "RTX_A6000", 3200.0, "https://example.com/1")];
        let scored = scorer.score_batch(rows, "balanced").unwrap();
        assert_eq!(scored.len(), 1);
        assert!(scored[0].score >= 40.0 && scored[0].score <= 70.0);
    }

    #[test]
    fn unknown_model_scores_zero_with_partial_warnings() {
        let registry = Registry::load().unwrap();
        let scorer = Scorer::new(&registry);
        let rows = vec![enriched(
            &registry,
            gpu_scoring_normalizer::UNKNOWN_MODEL,
            350.0,
            "https://example.com/2",
        )];
        let scored = scorer.score_batch(rows, "balanced").unwrap();
        assert_eq!(scored[0].score, 0.0);
        assert!(scored[0]
            .enriched
            .warnings
            .iter()
            .any(|w| w.code == "score_partial:vram_capacity"));
    }

    #[test]
    fn score_bounds_hold_across_a_mixed_batch() {
        let registry = Registry::load().unwrap();
        let scorer = Scorer::new(&registry);
        let rows = vec![
            enriched(&registry, "RTX_A6000", 3200.0, "https://example.com/1"),
            enriched(&registry, "T4", 1200.0, "https://example.com/2"),
            enriched(&registry, "H100_SXM", 35000.0, "https://example.com/3"),
            enriched(
                &registry,
                gpu_scoring_normalizer::UNKNOWN_MODEL,
                99.0,
                "https://example.com/4",
            ),
        ];
        let scored = scorer.score_batch(rows, "balanced").unwrap();
        for row in &scored {
            assert!(row.score >= 0.0 && row.score <= 100.0);
        }
    }

    #[test]
    fn weight_conservation_holds_for_every_registry_preset() {
        let registry = Registry::load().unwrap();
        for preset in registry.preset_names() {
            let weights = registry.weights(preset).unwrap();
            let sum = weights.price_efficiency
                + weights.vram_capacity
                + weights.mig_capability
                + weights.power_efficiency
                + weights.form_factor
                + weights.connectivity;
            assert!((sum - 1.0).abs() < 1e-6, "preset {preset} sums to {sum}");
        }
    }

    #[test]
    fn scoring_is_deterministic_for_identical_batches() {
        let registry = Registry::load().unwrap();
        let scorer = Scorer::new(&registry);
        let make_rows = || {
            vec![
                enriched(&registry, "RTX_A6000", 3200.0, "https://example.com/1"),
                enriched(&registry, "RTX_3090", 1400.0, "https://example.com/2"),
            ]
        };
        let first = scorer.score_batch(make_rows(), "balanced").unwrap();
        let second = scorer.score_batch(make_rows(), "balanced").unwrap();
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.score, b.score);
        }
    }

    #[test]
    fn unknown_preset_is_rejected() {
        let registry = Registry::load().unwrap();
        let scorer = Scorer::new(&registry);
        let rows = vec![enriched(&registry, "RTX_A6000", 3200.0, "https://example.com/1")];
        assert!(scorer.score_batch(rows, "not-a-real-preset").is_err());
    }
}
