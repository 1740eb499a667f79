//! Source Loader implementations.
//!
//! The core only ships loaders for the formats the Query Surface accepts
//! directly over HTTP: raw CSV uploads and already-scored CSV exports.
//! Vendor-specific scrapers are external collaborators whose output must
//! simply conform to the `RawListing` contract.

use std::collections::BTreeMap;
use std::io::Read;

use gpu_scoring_normalizer::{Condition, RawListing};
use thiserror::Error;

/// Columns required in a raw ingest CSV, in the order they are documented.
/// Extra trailing columns are tolerated; these must all be present.
const REQUIRED_RAW_COLUMNS: &[&str] = &[
    "title",
    "price",
    "quantity",
    "seller",
    "source_url",
    "source_type",
    "condition",
];

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("missing required column(s): {0:?}")]
    MissingColumns(Vec<String>),
    #[error("failed to read CSV header: {0}")]
    HeaderRead(#[source] csv::Error),
}

#[derive(Debug, Error)]
pub enum SourceParseError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("row {row_index} failed to parse: {reason}")]
    Row { row_index: usize, reason: String },
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Parses a US-format decimal, tolerating thousands-separator commas
/// (`"1,234.56"` -> `1234.56`).
fn parse_us_decimal(raw: &str) -> Result<f64, String> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    cleaned
        .parse::<f64>()
        .map_err(|_| format!("'{raw}' is not a valid decimal"))
}

fn parse_condition(raw: &str) -> Result<Condition, String> {
    match raw.trim().to_lowercase().as_str() {
        "new" => Ok(Condition::New),
        "used" => Ok(Condition::Used),
        "refurbished" => Ok(Condition::Refurbished),
        "unknown" => Ok(Condition::Unknown),
        other => Err(format!(
            "'{other}' is not one of New, Used, Refurbished, Unknown"
        )),
    }
}

/// Parses the raw ingest CSV schema: `title, price, quantity, seller,
/// source_url, source_type, condition, bulk_notes, geographic_region,
/// listing_age, model`.
pub struct CsvSourceLoader<R: Read> {
    reader: csv::Reader<R>,
    ignored_columns: Vec<String>,
}

impl<R: Read> CsvSourceLoader<R> {
    pub fn new(source: R) -> Result<Self, SourceParseError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(source);

        let headers = reader
            .headers()
            .map_err(SchemaError::HeaderRead)?
            .clone();
        let present: Vec<&str> = headers.iter().collect();

        let missing: Vec<String> = REQUIRED_RAW_COLUMNS
            .iter()
            .filter(|required| !present.contains(required))
            .map(|s| s.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(SchemaError::MissingColumns(missing).into());
        }

        let known: Vec<&str> = REQUIRED_RAW_COLUMNS
            .iter()
            .chain(["bulk_notes", "geographic_region", "listing_age", "model"].iter())
            .copied()
            .collect();
        let ignored_columns = present
            .iter()
            .filter(|c| !known.contains(c))
            .map(|s| s.to_string())
            .collect();

        Ok(Self {
            reader,
            ignored_columns,
        })
    }

    /// Columns present in the source but outside the documented schema;
    /// surfaced as a single upload-level warning, not a per-row one.
    pub fn ignored_columns(&self) -> &[String] {
        &self.ignored_columns
    }

    pub fn load(mut self) -> Result<Vec<RawListing>, SourceParseError> {
        let headers = self.reader.headers().map_err(SchemaError::HeaderRead)?.clone();
        let mut rows = Vec::new();
        for (row_index, record) in self.reader.records().enumerate() {
            let record = record?;
            let field = |name: &str| -> Option<String> {
                headers
                    .iter()
                    .position(|h| h == name)
                    .and_then(|i| record.get(i))
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
            };

            let title = field("title").ok_or_else(|| SourceParseError::Row {
                row_index,
                reason: "title must not be empty".to_string(),
            })?;
            let price_raw = field("price").ok_or_else(|| SourceParseError::Row {
                row_index,
                reason: "price is required".to_string(),
            })?;
            let price = parse_us_decimal(&price_raw).map_err(|reason| SourceParseError::Row {
                row_index,
                reason,
            })?;
            if price < 0.0 {
                return Err(SourceParseError::Row {
                    row_index,
                    reason: "price must be non-negative".to_string(),
                });
            }
            let quantity_raw = field("quantity").ok_or_else(|| SourceParseError::Row {
                row_index,
                reason: "quantity is required".to_string(),
            })?;
            let quantity: u32 = quantity_raw.parse().map_err(|_| SourceParseError::Row {
                row_index,
                reason: format!("'{quantity_raw}' is not a valid non-negative integer"),
            })?;
            let seller = field("seller").ok_or_else(|| SourceParseError::Row {
                row_index,
                reason: "seller is required".to_string(),
            })?;
            let source_url = field("source_url").ok_or_else(|| SourceParseError::Row {
                row_index,
                reason: "source_url is required".to_string(),
            })?;
            let source_type = field("source_type").ok_or_else(|| SourceParseError::Row {
                row_index,
                reason: "source_type is required".to_string(),
            })?;
            let condition_raw = field("condition").ok_or_else(|| SourceParseError::Row {
                row_index,
                reason: "condition is required".to_string(),
            })?;
            let condition = parse_condition(&condition_raw).map_err(|reason| SourceParseError::Row {
                row_index,
                reason,
            })?;

            rows.push(RawListing {
                title,
                price,
                quantity,
                seller,
                source_url,
                source_type,
                condition,
                bulk_notes: field("bulk_notes"),
                geographic_region: field("geographic_region").unwrap_or_else(|| "USA".to_string()),
                listing_age: field("listing_age").unwrap_or_else(|| "Current".to_string()),
                model: field("model"),
            });
        }
        Ok(rows)
    }
}

/// A row parsed from an already-scored CSV export, consumed by
/// `/api/imports/from-pipeline`. The pipeline stages are not re-run; this
/// loader only validates shape and type.
#[derive(Debug, Clone)]
pub struct PrescoredRow {
    pub raw: RawListing,
    pub canonical_model: String,
    pub match_type: String,
    pub match_score: f64,
    pub match_notes: String,
    pub vram_gb: Option<u32>,
    pub tdp_watts: Option<u32>,
    pub slot_width: Option<u8>,
    pub mig_support: Option<u8>,
    pub nvlink: Option<bool>,
    pub generation: Option<String>,
    pub cuda_cores: Option<u32>,
    pub pcie_generation: Option<u8>,
    pub form_factor: Option<String>,
    pub quantization_capacity: Option<BTreeMap<String, i64>>,
    pub score: f64,
}

const REQUIRED_SCORED_COLUMNS: &[&str] = &[
    "title",
    "price",
    "quantity",
    "seller",
    "source_url",
    "source_type",
    "condition",
    "canonical_model",
    "match_type",
    "match_score",
    "match_notes",
    "score",
];

pub struct PrescoredCsvLoader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> PrescoredCsvLoader<R> {
    pub fn new(source: R) -> Result<Self, SourceParseError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(source);
        let headers = reader.headers().map_err(SchemaError::HeaderRead)?.clone();
        let present: Vec<&str> = headers.iter().collect();
        let missing: Vec<String> = REQUIRED_SCORED_COLUMNS
            .iter()
            .filter(|required| !present.contains(required))
            .map(|s| s.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(SchemaError::MissingColumns(missing).into());
        }
        Ok(Self { reader })
    }

    pub fn load(mut self) -> Result<Vec<PrescoredRow>, SourceParseError> {
        let headers = self.reader.headers().map_err(SchemaError::HeaderRead)?.clone();
        let mut rows = Vec::new();
        for (row_index, record) in self.reader.records().enumerate() {
            let record = record?;
            let field = |name: &str| -> Option<String> {
                headers
                    .iter()
                    .position(|h| h == name)
                    .and_then(|i| record.get(i))
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
            };
            let require = |name: &str| -> Result<String, SourceParseError> {
                field(name).ok_or_else(|| SourceParseError::Row {
                    row_index,
                    reason: format!("{name} is required"),
                })
            };

            let price = parse_us_decimal(&require("price")?).map_err(|reason| SourceParseError::Row {
                row_index,
                reason,
            })?;
            let quantity: u32 = require("quantity")?.parse().map_err(|_| SourceParseError::Row {
                row_index,
                reason: "quantity is not a valid integer".to_string(),
            })?;
            let condition = parse_condition(&require("condition")?).map_err(|reason| {
                SourceParseError::Row { row_index, reason }
            })?;
            let score: f64 = require("score")?.parse().map_err(|_| SourceParseError::Row {
                row_index,
                reason: "score is not a valid number".to_string(),
            })?;
            let match_score: f64 = require("match_score")?.parse().map_err(|_| SourceParseError::Row {
                row_index,
                reason: "match_score is not a valid number".to_string(),
            })?;

            let raw = RawListing {
                title: require("title")?,
                price,
                quantity,
                seller: require("seller")?,
                source_url: require("source_url")?,
                source_type: require("source_type")?,
                condition,
                bulk_notes: field("bulk_notes"),
                geographic_region: field("geographic_region").unwrap_or_else(|| "USA".to_string()),
                listing_age: field("listing_age").unwrap_or_else(|| "Current".to_string()),
                model: field("model"),
            };

            rows.push(PrescoredRow {
                raw,
                canonical_model: require("canonical_model")?,
                match_type: require("match_type")?,
                match_score,
                match_notes: require("match_notes")?,
                vram_gb: field("vram_gb").and_then(|v| v.parse().ok()),
                tdp_watts: field("tdp_watts").and_then(|v| v.parse().ok()),
                slot_width: field("slot_width").and_then(|v| v.parse().ok()),
                mig_support: field("mig_support").and_then(|v| v.parse().ok()),
                nvlink: field("nvlink").and_then(|v| v.parse().ok()),
                generation: field("generation"),
                cuda_cores: field("cuda_cores").and_then(|v| v.parse().ok()),
                pcie_generation: field("pcie_generation").and_then(|v| v.parse().ok()),
                form_factor: field("form_factor"),
                quantization_capacity: field("quantization_capacity")
                    .and_then(|v| serde_json::from_str(&v).ok()),
                score,
            });
        }
        Ok(rows)
    }
}
