//! Projects a normalized listing's canonical model onto the GPU
//! specification registry, attaching physical/capability attributes.
//!
//! Enrichment is pure: it performs no I/O and never mutates the registry
//! it reads from. Given the same `(NormalizedListing, Registry)` pair it
//! always produces the same `EnrichedListing`.

use std::collections::BTreeMap;

use gpu_scoring_normalizer::NormalizedListing;
use gpu_scoring_registry::{FormFactor, Generation, Registry};
use serde::{Deserialize, Serialize};

/// Severity of a structured warning attached to a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// A structured, ordered warning record. Replaces free-string warnings so
/// downstream consumers (the API, the CSV writer) can filter and group by
/// `code` without parsing prose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub severity: Severity,
    pub code: String,
    pub detail: String,
}

impl Warning {
    pub fn new(severity: Severity, code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.into(),
            detail: detail.into(),
        }
    }

    pub fn warn(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(Severity::Warn, code, detail)
    }
}

/// A single named contribution from a heuristic strategy. Tagged by value
/// type rather than carried as an untyped map entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HeuristicOutput {
    Bool { name: String, value: bool },
    Int { name: String, value: i64 },
    Float { name: String, value: f64 },
    Enum { name: String, value: String },
}

impl HeuristicOutput {
    pub fn name(&self) -> &str {
        match self {
            HeuristicOutput::Bool { name, .. }
            | HeuristicOutput::Int { name, .. }
            | HeuristicOutput::Float { name, .. }
            | HeuristicOutput::Enum { name, .. } => name,
        }
    }
}

/// A `NormalizedListing` joined with its GPU specification, if known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedListing {
    pub normalized: NormalizedListing,
    pub vram_gb: Option<u32>,
    pub tdp_watts: Option<u32>,
    pub slot_width: Option<u8>,
    pub mig_support: Option<u8>,
    pub nvlink: Option<bool>,
    pub generation: Option<Generation>,
    pub cuda_cores: Option<u32>,
    pub pcie_generation: Option<u8>,
    pub form_factor: Option<FormFactor>,
    pub msrp_usd: Option<f64>,
    /// Filled in by the `quantization_capacity` heuristic strategy, keyed
    /// by model size name (`"7b"`, `"13b"`, `"70b"`, ...). `None` until
    /// that strategy runs and is enabled.
    pub quantization_capacity: Option<BTreeMap<String, i64>>,
    pub heuristic_outputs: Vec<HeuristicOutput>,
    pub warnings: Vec<Warning>,
}

impl EnrichedListing {
    fn unenriched(normalized: NormalizedListing) -> Self {
        Self {
            normalized,
            vram_gb: None,
            tdp_watts: None,
            slot_width: None,
            mig_support: None,
            nvlink: None,
            generation: None,
            cuda_cores: None,
            pcie_generation: None,
            form_factor: None,
            msrp_usd: None,
            quantization_capacity: None,
            heuristic_outputs: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Stateless enrichment step. Holds only a borrow of the registry; safe to
/// share across threads.
pub struct Enricher<'a> {
    registry: &'a Registry,
}

impl<'a> Enricher<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    pub fn enrich(&self, normalized: NormalizedListing) -> EnrichedListing {
        if normalized.canonical_model == gpu_scoring_normalizer::UNKNOWN_MODEL {
            return EnrichedListing::unenriched(normalized);
        }

        match self.registry.spec(&normalized.canonical_model) {
            Some(spec) => {
                let mut listing = EnrichedListing::unenriched(normalized);
                listing.vram_gb = Some(spec.vram_gb);
                listing.tdp_watts = Some(spec.tdp_watts);
                listing.slot_width = Some(spec.slot_width);
                listing.mig_support = Some(spec.mig_support);
                listing.nvlink = Some(spec.nvlink);
                listing.generation = Some(spec.generation);
                listing.cuda_cores = spec.cuda_cores;
                listing.pcie_generation = Some(spec.pcie_generation);
                listing.form_factor = Some(spec.form_factor);
                listing.msrp_usd = spec.msrp_usd;
                listing
            }
            None => {
                let canonical = normalized.canonical_model.clone();
                let mut listing = EnrichedListing::unenriched(normalized);
                listing.warnings.push(Warning::warn(
                    "unknown_registry_model",
                    format!("Model '{canonical}' not found in GPU registry"),
                ));
                listing
            }
        }
    }

    pub fn enrich_batch(&self, rows: Vec<NormalizedListing>) -> Vec<EnrichedListing> {
        rows.into_iter().map(|row| self.enrich(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_scoring_normalizer::{Condition, MatchType, RawListing};

    fn normalized(canonical: &str) -> NormalizedListing {
        NormalizedListing {
            raw: RawListing {
                title: "NVIDIA RTX A6000 48GB".to_string(),
                price: 3200.0,
                quantity: 1,
                seller: "acme".to_string(),
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
            match_notes: "alias:nvidia rtx a6000 48gb".to_string(),
            ml_is_gpu: None,
            ml_score: None,
        }
    }

    #[test]
    fn known_canonical_projects_spec_fields() {
        let registry = Registry::load().unwrap();
        let enricher = Enricher::new(&registry);
        let enriched = enricher.enrich(normalized("RTX_A6000"));
        assert_eq!(enriched.vram_gb, Some(48));
        assert_eq!(enriched.tdp_watts, Some(300));
        assert_eq!(enriched.mig_support, Some(0));
        assert_eq!(enriched.nvlink, Some(true));
        assert_eq!(enriched.slot_width, Some(2));
        assert_eq!(enriched.pcie_generation, Some(4));
        assert_eq!(enriched.cuda_cores, Some(10752));
        assert!(enriched.warnings.is_empty());
    }

    #[test]
    fn unknown_canonical_has_no_spec_fields_and_no_warning() {
        let registry = Registry::load().unwrap();
        let enricher = Enricher::new(&registry);
        let enriched = enricher.enrich(normalized(gpu_scoring_normalizer::UNKNOWN_MODEL));
        assert_eq!(enriched.vram_gb, None);
        assert!(enriched.warnings.is_empty());
    }

    #[test]
    fn known_but_unregistered_canonical_emits_warning() {
        let registry = Registry::load().unwrap();
        let enricher = Enricher::new(&registry);
        let enriched = enricher.enrich(normalized("RTX_9999_GHOST"));
        assert_eq!(enriched.vram_gb, None);
        assert_eq!(enriched.warnings.len(), 1);
        assert_eq!(enriched.warnings[0].code, "unknown_registry_model");
        assert!(enriched.warnings[0].detail.contains("RTX_9999_GHOST"));
    }
}
