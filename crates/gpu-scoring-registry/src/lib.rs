//! Declarative GPU specification registry.
//!
//! Loads the canonical GPU catalog, the exact-match alias map, the ordered
//! structured-text match patterns, and the named scoring weight presets
//! from YAML resource files. The registry is immutable once constructed
//! and carries no hidden global state: callers build a [`Registry`] once
//! at process startup and pass it explicitly into every pipeline stage,
//! the way the teacher codebase threads `IngestConfig`/`CanonicalizeConfig`
//! through its pipeline helpers instead of reaching for a singleton.
//!
//! ```
//! use gpu_scoring_registry::Registry;
//!
//! let registry = Registry::load().expect("embedded registry is valid");
//! assert!(registry.spec("RTX_A6000").is_some());
//! assert!(registry.weights("balanced").is_ok());
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SPECS_YAML: &str = include_str!("../resources/specs.yaml");
const ALIASES_YAML: &str = include_str!("../resources/aliases.yaml");
const PATTERNS_YAML: &str = include_str!("../resources/patterns.yaml");
const WEIGHTS_YAML: &str = include_str!("../resources/weights.yaml");
const QUANTIZATION_YAML: &str = include_str!("../resources/quantization.yaml");

/// Stable machine identifier for a specific GPU SKU, e.g. `"RTX_A6000"`.
pub type CanonicalModel = String;

/// GPU microarchitecture generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Generation {
    Turing,
    Ampere,
    Ada,
    Hopper,
    Blackwell,
    Other,
}

/// Physical card form factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormFactor {
    #[serde(rename = "SFF")]
    Sff,
    Dual,
    Triple,
    FullHeight,
    LowProfile,
}

/// Registry entry describing a single canonical GPU SKU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuSpec {
    pub canonical_name: String,
    pub vram_gb: u32,
    pub tdp_watts: u32,
    pub slot_width: u8,
    pub mig_support: u8,
    pub nvlink: bool,
    pub generation: Generation,
    #[serde(default)]
    pub cuda_cores: Option<u32>,
    pub pcie_generation: u8,
    pub form_factor: FormFactor,
    #[serde(default)]
    pub msrp_usd: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A named scoring weight vector. Fields correspond to the metrics computed
/// by the Scorer; the set of fields is closed (no free-form metric names).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightVector {
    pub price_efficiency: f64,
    pub vram_capacity: f64,
    pub mig_capability: f64,
    pub power_efficiency: f64,
    pub form_factor: f64,
    pub connectivity: f64,
}

impl WeightVector {
    fn sum(&self) -> f64 {
        self.price_efficiency
            + self.vram_capacity
            + self.mig_capability
            + self.power_efficiency
            + self.form_factor
            + self.connectivity
    }
}

/// Quantization capacity constants shared by the `quantization_capacity`
/// heuristic strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizationConstants {
    pub overhead_gb: f64,
    pub model_sizes: HashMap<String, f64>,
}

/// A compiled, ordered structured-text match rule.
#[derive(Debug, Clone)]
pub struct MatchPattern {
    pub source: String,
    pub regex: Regex,
    pub canonical: CanonicalModel,
    pub priority: i32,
    pub confidence: f64,
    /// Position in the declared sequence; used as the tie-break when two
    /// patterns share both a match and a priority.
    pub declared_order: usize,
}

#[derive(Debug, Deserialize)]
struct PatternDef {
    pattern: String,
    canonical: String,
    priority: i32,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Errors produced while loading or validating the registry. All
/// validation failures are fatal at startup; there is no partial
/// registry.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read registry file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("duplicate canonical model '{0}' in spec registry")]
    DuplicateCanonical(String),
    #[error("alias '{surface}' references unknown canonical '{canonical}'")]
    UnknownCanonicalInAlias { surface: String, canonical: String },
    #[error("pattern '{pattern}' references unknown canonical '{canonical}'")]
    UnknownCanonicalInPattern { pattern: String, canonical: String },
    #[error("failed to compile pattern '{pattern}': {source}")]
    PatternCompile {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("preset '{preset}' references unknown canonical via weights is not applicable; preset weights sum to {sum}, expected 1.0 +/- 1e-6")]
    WeightsNotNormalized { preset: String, sum: f64 },
    #[error("quantization overhead_gb must be >= 0, got {0}")]
    InvalidOverhead(f64),
    #[error("quantization model size '{name}' must be > 0, got {size}")]
    InvalidModelSize { name: String, size: f64 },
    #[error("unknown scoring preset '{0}'")]
    UnknownPreset(String),
}

/// Immutable, process-wide GPU specification registry.
///
/// Construct once via [`Registry::load`] or [`Registry::load_from_dir`] and
/// share it (typically behind an `Arc`) across every pipeline stage and the
/// HTTP server. Tests construct private registries with
/// [`Registry::from_sources`] instead of relying on any shared state.
#[derive(Debug, Clone)]
pub struct Registry {
    specs: HashMap<String, GpuSpec>,
    aliases: HashMap<String, CanonicalModel>,
    patterns: Vec<MatchPattern>,
    weights: HashMap<String, WeightVector>,
    quantization: QuantizationConstants,
}

impl Registry {
    /// Load the registry embedded in the binary at compile time.
    pub fn load() -> Result<Self, ConfigError> {
        tracing::debug!("loading embedded registry resources");
        Self::from_sources(
            SPECS_YAML,
            ALIASES_YAML,
            PATTERNS_YAML,
            WEIGHTS_YAML,
            QUANTIZATION_YAML,
        )
    }

    /// Load the registry from a directory containing `specs.yaml`,
    /// `aliases.yaml`, `patterns.yaml`, `weights.yaml`, and
    /// `quantization.yaml`, overriding the embedded defaults.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        tracing::info!(dir = %dir.display(), "loading registry from directory");
        let read = |name: &str| -> Result<String, ConfigError> {
            let path = dir.join(name);
            fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })
        };
        Self::from_sources(
            &read("specs.yaml")?,
            &read("aliases.yaml")?,
            &read("patterns.yaml")?,
            &read("weights.yaml")?,
            &read("quantization.yaml")?,
        )
    }

    /// Parse and validate a registry from in-memory YAML documents. Used by
    /// both [`Registry::load`] and [`Registry::load_from_dir`], and
    /// directly by tests that want a private registry with custom data.
    pub fn from_sources(
        specs_yaml: &str,
        aliases_yaml: &str,
        patterns_yaml: &str,
        weights_yaml: &str,
        quantization_yaml: &str,
    ) -> Result<Self, ConfigError> {
        let spec_list: Vec<GpuSpec> =
            parse_yaml(specs_yaml, "specs.yaml")?;
        let mut specs = HashMap::with_capacity(spec_list.len());
        for spec in spec_list {
            let name = spec.canonical_name.clone();
            if specs.insert(name.clone(), spec).is_some() {
                return Err(ConfigError::DuplicateCanonical(name));
            }
        }

        let raw_aliases: HashMap<String, String> =
            parse_yaml(aliases_yaml, "aliases.yaml")?;
        let mut aliases = HashMap::with_capacity(raw_aliases.len());
        for (surface, canonical) in raw_aliases {
            if !specs.contains_key(&canonical) {
                return Err(ConfigError::UnknownCanonicalInAlias { surface, canonical });
            }
            aliases.insert(surface.trim().to_lowercase(), canonical);
        }

        let pattern_defs: Vec<PatternDef> =
            parse_yaml(patterns_yaml, "patterns.yaml")?;
        let mut patterns = Vec::with_capacity(pattern_defs.len());
        for (declared_order, def) in pattern_defs.into_iter().enumerate() {
            if !specs.contains_key(&def.canonical) {
                return Err(ConfigError::UnknownCanonicalInPattern {
                    pattern: def.pattern,
                    canonical: def.canonical,
                });
            }
            let regex = Regex::new(&format!("(?i){}", def.pattern)).map_err(|source| {
                ConfigError::PatternCompile {
                    pattern: def.pattern.clone(),
                    source,
                }
            })?;
            patterns.push(MatchPattern {
                source: def.pattern,
                regex,
                canonical: def.canonical,
                priority: def.priority,
                confidence: def.confidence.unwrap_or(1.0),
                declared_order,
            });
        }

        let weights: HashMap<String, WeightVector> =
            parse_yaml(weights_yaml, "weights.yaml")?;
        for (preset, vector) in &weights {
            let sum = vector.sum();
            if (sum - 1.0).abs() > 1e-6 {
                return Err(ConfigError::WeightsNotNormalized {
                    preset: preset.clone(),
                    sum,
                });
            }
        }

        let quantization: QuantizationConstants =
            parse_yaml(quantization_yaml, "quantization.yaml")?;
        if quantization.overhead_gb < 0.0 {
            return Err(ConfigError::InvalidOverhead(quantization.overhead_gb));
        }
        for (name, size) in &quantization.model_sizes {
            if *size <= 0.0 {
                return Err(ConfigError::InvalidModelSize {
                    name: name.clone(),
                    size: *size,
                });
            }
        }

        tracing::info!(
            specs = specs.len(),
            aliases = aliases.len(),
            patterns = patterns.len(),
            presets = weights.len(),
            "registry loaded"
        );

        Ok(Registry {
            specs,
            aliases,
            patterns,
            weights,
            quantization,
        })
    }

    /// Look up a GPU spec by canonical name. Absent when the canonical is
    /// unknown to the registry.
    pub fn spec(&self, canonical: &str) -> Option<&GpuSpec> {
        self.specs.get(canonical)
    }

    /// Iterate over every registered GPU spec (used by the model catalog
    /// endpoint and by the Scorer's batch normalization pass).
    pub fn specs(&self) -> impl Iterator<Item = &GpuSpec> {
        self.specs.values()
    }

    /// Iterate over (lowercased surface, canonical) alias pairs.
    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases
            .iter()
            .map(|(surface, canonical)| (surface.as_str(), canonical.as_str()))
    }

    /// Resolve a single alias lookup; the lookup is case-insensitive, with
    /// the caller expected to lowercase+trim before calling (the
    /// Normalizer does this once per row).
    pub fn alias(&self, lowercased_trimmed_title: &str) -> Option<&str> {
        self.aliases.get(lowercased_trimmed_title).map(String::as_str)
    }

    /// The ordered sequence of compiled match patterns.
    pub fn patterns(&self) -> &[MatchPattern] {
        &self.patterns
    }

    /// Resolve a named scoring preset's weight vector.
    pub fn weights(&self, preset_name: &str) -> Result<&WeightVector, ConfigError> {
        self.weights
            .get(preset_name)
            .ok_or_else(|| ConfigError::UnknownPreset(preset_name.to_string()))
    }

    /// The set of preset names declared by the registry.
    pub fn preset_names(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(String::as_str)
    }

    pub fn quantization_constants(&self) -> &QuantizationConstants {
        &self.quantization
    }
}

fn parse_yaml<T: for<'de> Deserialize<'de>>(yaml: &str, label: &str) -> Result<T, ConfigError> {
    serde_yaml::from_str(yaml).map_err(|source| ConfigError::Yaml {
        path: label.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_registry_loads_and_validates() {
        let registry = Registry::load().expect("embedded registry must be valid");
        assert!(registry.spec("RTX_A6000").is_some());
        assert!(registry.spec("RTX_6000_ADA").is_some());
        assert!(registry.spec("DOES_NOT_EXIST").is_none());
    }

    #[test]
    fn weight_presets_sum_to_one() {
        let registry = Registry::load().unwrap();
        for preset in registry.preset_names() {
            let vector = registry.weights(preset).unwrap();
            assert!(
                (vector.sum() - 1.0).abs() < 1e-6,
                "preset {preset} sums to {}",
                vector.sum()
            );
        }
    }

    #[test]
    fn unknown_preset_is_rejected() {
        let registry = Registry::load().unwrap();
        assert!(matches!(
            registry.weights("does-not-exist"),
            Err(ConfigError::UnknownPreset(_))
        ));
    }

    #[test]
    fn rejects_alias_with_unknown_canonical() {
        let err = Registry::from_sources(
            SPECS_YAML,
            "\"some title\": NOT_A_REAL_CANONICAL\n",
            PATTERNS_YAML,
            WEIGHTS_YAML,
            QUANTIZATION_YAML,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCanonicalInAlias { .. }));
    }

    #[test]
    fn rejects_unnormalized_weights() {
        let bad_weights = r#"
broken:
  price_efficiency: 0.5
  vram_capacity: 0.5
  mig_capability: 0.5
  power_efficiency: 0.0
  form_factor: 0.0
  connectivity: 0.0
"#;
        let err = Registry::from_sources(
            SPECS_YAML,
            ALIASES_YAML,
            PATTERNS_YAML,
            bad_weights,
            QUANTIZATION_YAML,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::WeightsNotNormalized { .. }));
    }

    #[test]
    fn rejects_duplicate_canonical() {
        let dup_specs = format!("{SPECS_YAML}\n- canonical_name: RTX_A6000\n  vram_gb: 1\n  tdp_watts: 1\n  slot_width: 1\n  mig_support: 0\n  nvlink: false\n  generation: Other\n  pcie_generation: 3\n  form_factor: SFF\n");
        let err = Registry::from_sources(
            &dup_specs,
            ALIASES_YAML,
            PATTERNS_YAML,
            WEIGHTS_YAML,
            QUANTIZATION_YAML,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateCanonical(_)));
    }

    #[test]
    fn patterns_are_case_insensitive_and_ordered() {
        let registry = Registry::load().unwrap();
        let patterns = registry.patterns();
        assert!(!patterns.is_empty());
        let a6000 = patterns
            .iter()
            .find(|p| p.canonical == "RTX_A6000")
            .expect("a6000 pattern present");
        assert!(a6000.regex.is_match("Brand New RTX A6000 for sale"));
        assert!(a6000.regex.is_match("brand new rtx a6000 for sale"));
    }

    #[test]
    fn load_from_dir_round_trips_embedded_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("specs.yaml"), SPECS_YAML).unwrap();
        std::fs::write(dir.path().join("aliases.yaml"), ALIASES_YAML).unwrap();
        std::fs::write(dir.path().join("patterns.yaml"), PATTERNS_YAML).unwrap();
        std::fs::write(dir.path().join("weights.yaml"), WEIGHTS_YAML).unwrap();
        std::fs::write(dir.path().join("quantization.yaml"), QUANTIZATION_YAML).unwrap();

        let registry = Registry::load_from_dir(dir.path()).unwrap();
        assert!(registry.spec("RTX_A6000").is_some());
    }
}
