//! Resolves each raw listing's free-text title to a canonical GPU model.
//!
//! The algorithm is deterministic and tried in a fixed order: exact alias
//! lookup, then ordered regex patterns, then fuzzy similarity against every
//! known surface form, falling back to `UNKNOWN`. None of these steps can
//! fail a row — `UNKNOWN` is itself a valid, terminal result.

use gpu_scoring_registry::Registry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical value used when no match of any kind was found.
pub const UNKNOWN_MODEL: &str = "UNKNOWN";

/// Listed condition of a GPU for sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    New,
    Used,
    Refurbished,
    Unknown,
}

/// Vendor-agnostic ingest record, as produced by a Source Loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawListing {
    pub title: String,
    pub price: f64,
    pub quantity: u32,
    pub seller: String,
    pub source_url: String,
    pub source_type: String,
    pub condition: Condition,
    #[serde(default)]
    pub bulk_notes: Option<String>,
    #[serde(default = "default_region")]
    pub geographic_region: String,
    #[serde(default = "default_listing_age")]
    pub listing_age: String,
    /// Pre-tagged canonical hint from the source vendor. Carried through as
    /// metadata; the matching algorithm below is defined purely in terms of
    /// `title` and does not consult this field.
    #[serde(default)]
    pub model: Option<String>,
}

fn default_region() -> String {
    "USA".to_string()
}

fn default_listing_age() -> String {
    "Current".to_string()
}

/// How a listing's canonical model was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Regex,
    Fuzzy,
    None,
}

/// A `RawListing` annotated with its resolved canonical model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedListing {
    pub raw: RawListing,
    pub canonical_model: String,
    pub match_type: MatchType,
    pub match_score: f64,
    pub match_notes: String,
    /// Present only when an ML classifier was configured.
    pub ml_is_gpu: Option<bool>,
    pub ml_score: Option<f64>,
}

/// Optional ML signal: a secondary classifier that annotates (but never
/// overrides) the deterministic match found in steps 1-3 of the algorithm.
pub trait GpuClassifier: Send + Sync {
    fn predict_is_gpu(&self, title: &str, notes: Option<&str>) -> (bool, f64);
}

/// Deterministic stub classifier used in tests and local runs when no real
/// model is wired in. Flags a row as a GPU listing whenever its title
/// contains the substring "gpu", "rtx", "a100", "h100", or "tesla".
#[derive(Debug, Default, Clone, Copy)]
pub struct StubGpuClassifier;

impl GpuClassifier for StubGpuClassifier {
    fn predict_is_gpu(&self, title: &str, _notes: Option<&str>) -> (bool, f64) {
        let lowered = title.to_lowercase();
        const MARKERS: &[&str] = &["gpu", "rtx", "a100", "h100", "tesla", "quadro"];
        if MARKERS.iter().any(|m| lowered.contains(m)) {
            (true, 0.95)
        } else {
            (false, 0.05)
        }
    }
}

/// Reserved for normalizer failures. Matching itself never fails a row —
/// `UNKNOWN` is a valid terminal result — so this currently has no
/// constructible variants; it exists so `Normalizer::normalize_row`'s
/// signature doesn't need to change if a future stage (e.g. a classifier
/// call) introduces a genuine failure mode.
#[derive(Debug, Error)]
pub enum NormalizerError {}

/// Tunable parameters for the matching algorithm. The fuzzy threshold is
/// configuration, not a hardcoded constant, per the registry's design
/// notes on threshold tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizerConfig {
    pub fuzzy_threshold: f64,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.70,
        }
    }
}

pub struct Normalizer<'a> {
    registry: &'a Registry,
    config: NormalizerConfig,
    classifier: Option<Box<dyn GpuClassifier>>,
}

impl<'a> Normalizer<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            config: NormalizerConfig::default(),
            classifier: None,
        }
    }

    pub fn with_config(registry: &'a Registry, config: NormalizerConfig) -> Self {
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

    /// Resolve a single raw listing to its canonical model. Never fails —
    /// an empty or unmatchable title simply falls through every match
    /// strategy and lands on `UNKNOWN_MODEL`.
    #[tracing::instrument(level = "debug", skip(self, raw), fields(title = %raw.title))]
    pub fn normalize_row(&self, raw: RawListing) -> Result<NormalizedListing, NormalizerError> {
        let lowered_title = raw.title.trim().to_lowercase();

        let (canonical_model, match_type, match_score, match_notes) = self
            .match_exact(&lowered_title)
            .or_else(|| self.match_regex(&raw.title))
            .or_else(|| self.match_fuzzy(&lowered_title))
            .unwrap_or_else(|| {
                (
                    UNKNOWN_MODEL.to_string(),
                    MatchType::None,
                    0.0,
                    "no-match".to_string(),
                )
            });

        if match_type == MatchType::None {
            tracing::warn!(title = %raw.title, "no canonical match found, classifying as unknown");
        } else {
            tracing::debug!(title = %raw.title, canonical_model, ?match_type, match_score, "matched canonical model");
        }

        let (ml_is_gpu, ml_score) = match &self.classifier {
            Some(classifier) => {
                let (is_gpu, score) =
                    classifier.predict_is_gpu(&raw.title, raw.bulk_notes.as_deref());
                (Some(is_gpu), Some(score))
            }
            None => (None, None),
        };

        Ok(NormalizedListing {
            raw,
            canonical_model,
            match_type,
            match_score,
            match_notes,
            ml_is_gpu,
            ml_score,
        })
    }

    fn match_exact(&self, lowered_title: &str) -> Option<(String, MatchType, f64, String)> {
        self.registry.alias(lowered_title).map(|canonical| {
            (
                canonical.to_string(),
                MatchType::Exact,
                1.0,
                format!("alias:{lowered_title}"),
            )
        })
    }

    fn match_regex(&self, title: &str) -> Option<(String, MatchType, f64, String)> {
        let mut patterns: Vec<_> = self.registry.patterns().iter().collect();
        patterns.sort_by_key(|p| (-p.priority, p.declared_order));
        for pattern in patterns {
            if pattern.regex.is_match(title) {
                return Some((
                    pattern.canonical.clone(),
                    MatchType::Regex,
                    pattern.confidence,
                    format!("regex:{}", pattern.canonical),
                ));
            }
        }
        None
    }

    fn match_fuzzy(&self, lowered_title: &str) -> Option<(String, MatchType, f64, String)> {
        let mut best: Option<(f64, &str, &str)> = None;
        for (surface, canonical) in self.registry.aliases() {
            let similarity = strsim::normalized_levenshtein(lowered_title, surface);
            best = Some(match best {
                None => (similarity, surface, canonical),
                Some((best_sim, best_surface, best_canonical)) => {
                    if similarity > best_sim
                        || (similarity == best_sim
                            && self.prefer(canonical, best_canonical))
                    {
                        (similarity, surface, canonical)
                    } else {
                        (best_sim, best_surface, best_canonical)
                    }
                }
            });
        }

        let (similarity, _surface, canonical) = best?;
        if similarity < self.config.fuzzy_threshold {
            return None;
        }
        Some((
            canonical.to_string(),
            MatchType::Fuzzy,
            similarity,
            format!(
                "fuzzy:'{}'\u{2192}{}@{:.2}",
                lowered_title, canonical, similarity
            ),
        ))
    }

    /// Tie-break rule for fuzzy matches with equal similarity: prefer the
    /// canonical with the higher `msrp_usd`, then alphabetical order.
    fn prefer(&self, candidate: &str, incumbent: &str) -> bool {
        let candidate_msrp = self
            .registry
            .spec(candidate)
            .and_then(|spec| spec.msrp_usd)
            .unwrap_or(0.0);
        let incumbent_msrp = self
            .registry
            .spec(incumbent)
            .and_then(|spec| spec.msrp_usd)
            .unwrap_or(0.0);
        if candidate_msrp != incumbent_msrp {
            return candidate_msrp > incumbent_msrp;
        }
        candidate < incumbent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::load().unwrap()
    }

    fn row(title: &str, price: f64) -> RawListing {
        RawListing {
            title: title.to_string(),
            price,
            quantity: 1,
            seller: "acme".to_string(),
            source_url: "https://example.com/listing/1".to_string(),
            source_type: "marketplace".to_string(),
            condition: Condition::Used,
            bulk_notes: None,
            geographic_region: default_region(),
            listing_age: default_listing_age(),
            model: None,
        }
    }

    #[test]
    fn exact_alias_match() {
        let registry = registry();
        let normalizer = Normalizer::new(&registry);
        let result = normalizer
            .normalize_row(row("NVIDIA RTX A6000 48GB", 3200.00))
            .unwrap();
        assert_eq!(result.canonical_model, "RTX_A6000");
        assert_eq!(result.match_type, MatchType::Exact);
        assert_eq!(result.match_score, 1.0);
    }

    #[test]
    fn regex_match_for_blackwell_pro_sku() {
        let registry = registry();
        let normalizer = Normalizer::new(&registry);
        let result = normalizer
            .normalize_row(row("Brand new RTX PRO 6000 workstation card", 9200.00))
            .unwrap();
        assert_eq!(result.canonical_model, "RTX_PRO_6000");
        assert_eq!(result.match_type, MatchType::Regex);
        assert_eq!(result.match_notes, "regex:RTX_PRO_6000");
    }

    #[test]
    fn fuzzy_match_tie_break_prefers_higher_msrp() {
        let registry = registry();
        let normalizer = Normalizer::new(&registry);
        let result = normalizer
            .normalize_row(row("RTX a6ooo 48 gb", 3000.00))
            .unwrap();
        assert_eq!(result.match_type, MatchType::Fuzzy);
        assert!(result.match_score >= 0.70);
        let a6000_msrp = registry.spec("RTX_A6000").unwrap().msrp_usd.unwrap();
        let ada_msrp = registry.spec("RTX_6000_ADA").unwrap().msrp_usd.unwrap();
        assert!(ada_msrp > a6000_msrp);
    }

    #[test]
    fn unknown_model_below_fuzzy_threshold() {
        let registry = registry();
        let normalizer = Normalizer::new(&registry);
        let result = normalizer.normalize_row(row("Intel Arc A770", 350.00)).unwrap();
        assert_eq!(result.canonical_model, UNKNOWN_MODEL);
        assert_eq!(result.match_type, MatchType::None);
        assert_eq!(result.match_score, 0.0);
        assert_eq!(result.match_notes, "no-match");
    }

    #[test]
    fn exact_dominates_fuzzy_even_with_a_closer_fuzzy_surface_elsewhere() {
        let registry = registry();
        let normalizer = Normalizer::new(&registry);
        let result = normalizer
            .normalize_row(row("rtx a6000", 3100.00))
            .unwrap();
        assert_eq!(result.match_type, MatchType::Exact);
        assert_eq!(result.match_score, 1.0);
    }

    #[test]
    fn normalization_is_deterministic() {
        let registry = registry();
        let normalizer = Normalizer::new(&registry);
        let a = normalizer
            .normalize_row(row("NVIDIA RTX A6000 48GB", 3200.00))
            .unwrap();
        let b = normalizer
            .normalize_row(row("NVIDIA RTX A6000 48GB", 3200.00))
            .unwrap();
        assert_eq!(a.canonical_model, b.canonical_model);
        assert_eq!(a.match_type, b.match_type);
        assert_eq!(a.match_score, b.match_score);
        assert_eq!(a.match_notes, b.match_notes);
    }

    #[test]
    fn blank_title_falls_through_to_unknown() {
        let registry = registry();
        let normalizer = Normalizer::new(&registry);
        let result = normalizer.normalize_row(row("   ", 10.0)).unwrap();
        assert_eq!(result.canonical_model, UNKNOWN_MODEL);
        assert_eq!(result.match_type, MatchType::None);
    }

    #[test]
    fn ml_classifier_annotates_without_overriding_deterministic_match() {
        let registry = registry();
        let normalizer = Normalizer::new(&registry).with_classifier(Box::new(StubGpuClassifier));
        let result = normalizer
            .normalize_row(row("NVIDIA RTX A6000 48GB", 3200.00))
            .unwrap();
        assert_eq!(result.canonical_model, "RTX_A6000");
        assert_eq!(result.match_type, MatchType::Exact);
        assert_eq!(result.ml_is_gpu, Some(true));
        assert!(result.ml_score.unwrap() > 0.5);
    }
}
