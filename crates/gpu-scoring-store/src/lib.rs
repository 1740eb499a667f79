//! Batch-versioned relational persistence for scored GPU listings.
//!
//! Backed by SQLite via `rusqlite`, in WAL journal mode, behind a single
//! `parking_lot::Mutex<Connection>` shared via `Arc`. Every ingest is
//! bracketed in one transaction: either every row, its snapshot, and its
//! delta land together, or none of them do.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gpu_scoring_enricher::{HeuristicOutput, Warning};
use gpu_scoring_registry::{FormFactor, Generation};
use gpu_scoring_normalizer::{Condition, MatchType, RawListing};
use gpu_scoring_scorer::ScoredListing;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, Row};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub const CURRENT_SCHEMA_VERSION: u32 = 1;
pub const SUPPORTED_SCHEMA_VERSIONS: &[u32] = &[1];

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS imports (
    import_id TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    record_count INTEGER NOT NULL,
    source_label TEXT NOT NULL,
    first_model TEXT,
    last_model TEXT
);

CREATE TABLE IF NOT EXISTS scored_listings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    import_id TEXT NOT NULL REFERENCES imports(import_id),
    import_index INTEGER NOT NULL,
    title TEXT NOT NULL,
    price REAL NOT NULL,
    quantity INTEGER NOT NULL,
    seller TEXT NOT NULL,
    source_url TEXT NOT NULL,
    source_type TEXT NOT NULL,
    condition TEXT NOT NULL,
    bulk_notes TEXT,
    geographic_region TEXT NOT NULL,
    listing_age TEXT NOT NULL,
    model_hint TEXT,
    canonical_model TEXT NOT NULL,
    match_type TEXT NOT NULL,
    match_score REAL NOT NULL,
    match_notes TEXT NOT NULL,
    ml_is_gpu INTEGER,
    ml_score REAL,
    vram_gb INTEGER,
    tdp_watts INTEGER,
    slot_width INTEGER,
    mig_support INTEGER,
    nvlink INTEGER,
    generation TEXT,
    cuda_cores INTEGER,
    pcie_generation INTEGER,
    form_factor TEXT,
    msrp_usd REAL,
    quantization_capacity_json TEXT,
    heuristic_outputs_json TEXT NOT NULL,
    warnings_json TEXT NOT NULL,
    score REAL NOT NULL,
    score_components_json TEXT NOT NULL,
    preset TEXT NOT NULL,
    seen_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scored_listings_canonical ON scored_listings(canonical_model);
CREATE INDEX IF NOT EXISTS idx_scored_listings_import ON scored_listings(import_id, import_index);
CREATE INDEX IF NOT EXISTS idx_scored_listings_score ON scored_listings(score DESC);

CREATE TABLE IF NOT EXISTS listing_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_url TEXT NOT NULL,
    canonical_model TEXT NOT NULL,
    price REAL NOT NULL,
    score REAL NOT NULL,
    quantization_capacity_json TEXT,
    seen_at TEXT NOT NULL,
    seller TEXT NOT NULL,
    region TEXT NOT NULL,
    import_id TEXT NOT NULL REFERENCES imports(import_id)
);

CREATE INDEX IF NOT EXISTS idx_listing_snapshots_source_seen
    ON listing_snapshots(source_url, seen_at DESC);

CREATE TABLE IF NOT EXISTS listing_deltas (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    prev_snapshot_id INTEGER NOT NULL REFERENCES listing_snapshots(id),
    curr_snapshot_id INTEGER NOT NULL REFERENCES listing_snapshots(id),
    source_url TEXT NOT NULL,
    canonical_model TEXT NOT NULL,
    region TEXT NOT NULL,
    price_delta REAL NOT NULL,
    price_delta_pct REAL NOT NULL,
    score_delta REAL NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_listing_deltas_timestamp ON listing_deltas(timestamp DESC);

CREATE TABLE IF NOT EXISTS gpu_specs (
    canonical_name TEXT PRIMARY KEY,
    spec_json TEXT NOT NULL
);
"#;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("row {row_index} failed validation: {detail}")]
    ValidationError { row_index: usize, detail: String },
    #[error("import id '{0}' already exists")]
    DuplicateImport(String),
    #[error("schema version {0} is not supported by this build")]
    UnsupportedSchemaVersion(u32),
}

/// Result of a successful `insert_batch` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportResult {
    pub import_id: String,
    pub record_count: usize,
    pub first_model: Option<String>,
    pub last_model: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub warnings: Vec<Warning>,
}

/// A fully reconstituted persisted listing, as returned by `query_listings`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedListing {
    pub import_id: String,
    pub import_index: i64,
    pub raw: RawListing,
    pub canonical_model: String,
    pub match_type: MatchType,
    pub match_score: f64,
    pub match_notes: String,
    pub ml_is_gpu: Option<bool>,
    pub ml_score: Option<f64>,
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
    pub quantization_capacity: Option<BTreeMap<String, i64>>,
    pub heuristic_outputs: Vec<HeuristicOutput>,
    pub warnings: Vec<Warning>,
    pub score: f64,
    pub score_components: BTreeMap<String, f64>,
    pub preset: String,
    pub seen_at: DateTime<Utc>,
}

/// A derived price/score movement between two snapshots of the same
/// `source_url`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedDelta {
    pub source_url: String,
    pub canonical_model: String,
    pub region: String,
    pub price_delta: f64,
    pub price_delta_pct: f64,
    pub score_delta: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    pub canonical_model: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_score: Option<f64>,
    pub region: Option<String>,
    pub after: Option<DateTime<Utc>>,
    pub import_id: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

impl Page {
    /// Clamp `limit` to the documented `[1, 1000]` range.
    pub fn normalized(self) -> Self {
        Self {
            limit: self.limit.clamp(1, 1000),
            offset: self.offset,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeltaFilter {
    pub canonical_model: Option<String>,
    pub min_abs_price_delta_pct: Option<f64>,
    pub after: Option<DateTime<Utc>>,
    pub region: Option<String>,
    pub limit: Option<u32>,
}

/// The persistence layer. Cheap to clone (wraps an `Arc`); safe to share
/// across async request handlers.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
            params![CURRENT_SCHEMA_VERSION.to_string()],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn schema_version(&self) -> Result<u32, StoreError> {
        let conn = self.conn.lock();
        let raw: String = conn.query_row(
            "SELECT value FROM schema_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )?;
        let version: u32 = raw.parse().unwrap_or(CURRENT_SCHEMA_VERSION);
        if !SUPPORTED_SCHEMA_VERSIONS.contains(&version) {
            return Err(StoreError::UnsupportedSchemaVersion(version));
        }
        Ok(version)
    }

    /// Insert a scored batch atomically. `import_id` is allocated if not
    /// supplied by the caller; if supplied and already present, the
    /// request is rejected wholesale with no transaction opened.
    pub fn insert_batch(
        &self,
        rows: &[ScoredListing],
        source_label: &str,
        import_id: Option<String>,
        seen_at: DateTime<Utc>,
    ) -> Result<ImportResult, StoreError> {
        let import_id = import_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        tracing::info!(import_id, rows = rows.len(), source_label, "inserting batch");

        let conn = self.conn.lock();

        let existing: i64 = conn.query_row(
            "SELECT COUNT(*) FROM imports WHERE import_id = ?1",
            params![import_id],
            |row| row.get(0),
        )?;
        if existing > 0 {
            return Err(StoreError::DuplicateImport(import_id));
        }

        for (index, row) in rows.iter().enumerate() {
            validate_row(index, row)?;
        }

        let first_model = rows.first().map(|r| r.enriched.normalized.canonical_model.clone());
        let last_model = rows.last().map(|r| r.enriched.normalized.canonical_model.clone());

        let run = || -> Result<(), StoreError> {
            conn.execute("BEGIN IMMEDIATE", [])?;

            conn.execute(
                "INSERT INTO imports (import_id, timestamp, record_count, source_label, first_model, last_model)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    import_id,
                    seen_at.to_rfc3339(),
                    rows.len() as i64,
                    source_label,
                    first_model,
                    last_model,
                ],
            )?;

            for (index, row) in rows.iter().enumerate() {
                insert_scored_listing(&conn, &import_id, index as i64, row, seen_at)?;

                let source_url = &row.enriched.normalized.raw.source_url;
                let prior: Option<(i64, f64, f64)> = conn
                    .query_row(
                        "SELECT id, price, score FROM listing_snapshots
                         WHERE source_url = ?1
                         ORDER BY seen_at DESC, id DESC
                         LIMIT 1",
                        params![source_url],
                        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                    )
                    .ok();

                let region = &row.enriched.normalized.raw.geographic_region;
                let quantization_capacity_json = row
                    .enriched
                    .quantization_capacity
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;

                conn.execute(
                    "INSERT INTO listing_snapshots
                         (source_url, canonical_model, price, score, quantization_capacity_json,
                          seen_at, seller, region, import_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        source_url,
                        row.enriched.normalized.canonical_model,
                        row.enriched.normalized.raw.price,
                        row.score,
                        quantization_capacity_json,
                        seen_at.to_rfc3339(),
                        row.enriched.normalized.raw.seller,
                        region,
                        import_id,
                    ],
                )?;
                let curr_snapshot_id = conn.last_insert_rowid();

                if let Some((prev_id, prev_price, prev_score)) = prior {
                    let price_delta = row.enriched.normalized.raw.price - prev_price;
                    let price_delta_pct = if prev_price.abs() > f64::EPSILON {
                        (price_delta / prev_price) * 100.0
                    } else {
                        0.0
                    };
                    let score_delta = row.score - prev_score;

                    conn.execute(
                        "INSERT INTO listing_deltas
                             (prev_snapshot_id, curr_snapshot_id, source_url, canonical_model,
                              region, price_delta, price_delta_pct, score_delta, timestamp)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                        params![
                            prev_id,
                            curr_snapshot_id,
                            source_url,
                            row.enriched.normalized.canonical_model,
                            region,
                            price_delta,
                            price_delta_pct,
                            score_delta,
                            seen_at.to_rfc3339(),
                        ],
                    )?;
                }
            }

            conn.execute("COMMIT", [])?;
            Ok(())
        };

        if let Err(err) = run() {
            tracing::warn!(import_id, error = %err, "rolling back batch insert");
            let _ = conn.execute("ROLLBACK", []);
            return Err(err);
        }

        tracing::info!(import_id, rows = rows.len(), "batch committed");

        let warnings = rows
            .iter()
            .flat_map(|row| row.enriched.warnings.clone())
            .collect();

        Ok(ImportResult {
            import_id,
            record_count: rows.len(),
            first_model,
            last_model,
            timestamp: seen_at,
            warnings,
        })
    }

    pub fn query_listings(
        &self,
        filter: &ListingFilter,
        page: Page,
    ) -> Result<Vec<PersistedListing>, StoreError> {
        let page = page.normalized();
        let conn = self.conn.lock();

        let mut sql = String::from("SELECT * FROM scored_listings WHERE 1=1");
        let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(canonical) = &filter.canonical_model {
            sql.push_str(" AND LOWER(canonical_model) LIKE LOWER(?) || '%'");
            binds.push(Box::new(canonical.clone()));
        }
        if let Some(min_price) = filter.min_price {
            sql.push_str(" AND price >= ?");
            binds.push(Box::new(min_price));
        }
        if let Some(max_price) = filter.max_price {
            sql.push_str(" AND price <= ?");
            binds.push(Box::new(max_price));
        }
        if let Some(min_score) = filter.min_score {
            sql.push_str(" AND score >= ?");
            binds.push(Box::new(min_score));
        }
        if let Some(region) = &filter.region {
            sql.push_str(" AND LOWER(geographic_region) = LOWER(?)");
            binds.push(Box::new(region.clone()));
        }
        if let Some(after) = filter.after {
            sql.push_str(" AND seen_at >= ?");
            binds.push(Box::new(after.to_rfc3339()));
        }
        if let Some(import_id) = &filter.import_id {
            sql.push_str(" AND import_id = ?");
            binds.push(Box::new(import_id.clone()));
        }

        sql.push_str(" ORDER BY score DESC, seen_at DESC, import_id ASC, import_index ASC LIMIT ? OFFSET ?");
        binds.push(Box::new(page.limit));
        binds.push(Box::new(page.offset));

        let mut stmt = conn.prepare_cached(&sql)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> = binds.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(params_ref.as_slice(), row_to_listing)?;

        let mut listings = Vec::new();
        for row in rows {
            listings.push(row??);
        }
        Ok(listings)
    }

    pub fn query_deltas(&self, filter: &DeltaFilter) -> Result<Vec<PersistedDelta>, StoreError> {
        let conn = self.conn.lock();

        let mut sql = String::from("SELECT source_url, canonical_model, region, price_delta, price_delta_pct, score_delta, timestamp FROM listing_deltas WHERE 1=1");
        let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(canonical) = &filter.canonical_model {
            sql.push_str(" AND LOWER(canonical_model) LIKE LOWER(?) || '%'");
            binds.push(Box::new(canonical.clone()));
        }
        if let Some(min_abs) = filter.min_abs_price_delta_pct {
            sql.push_str(" AND ABS(price_delta_pct) >= ?");
            binds.push(Box::new(min_abs));
        }
        if let Some(after) = filter.after {
            sql.push_str(" AND timestamp >= ?");
            binds.push(Box::new(after.to_rfc3339()));
        }
        if let Some(region) = &filter.region {
            sql.push_str(" AND LOWER(region) = LOWER(?)");
            binds.push(Box::new(region.clone()));
        }

        sql.push_str(" ORDER BY timestamp DESC LIMIT ?");
        binds.push(Box::new(filter.limit.unwrap_or(100).clamp(1, 1000)));

        let mut stmt = conn.prepare_cached(&sql)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> = binds.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(params_ref.as_slice(), |row| {
            let timestamp: String = row.get(6)?;
            Ok(PersistedDelta {
                source_url: row.get(0)?,
                canonical_model: row.get(1)?,
                region: row.get(2)?,
                price_delta: row.get(3)?,
                price_delta_pct: row.get(4)?,
                score_delta: row.get(5)?,
                timestamp: parse_timestamp(&timestamp),
            })
        })?;

        let mut deltas = Vec::new();
        for row in rows {
            deltas.push(row?);
        }
        Ok(deltas)
    }
}

fn validate_row(row_index: usize, row: &ScoredListing) -> Result<(), StoreError> {
    let raw = &row.enriched.normalized.raw;
    if raw.price < 0.0 {
        return Err(StoreError::ValidationError {
            row_index,
            detail: format!("price must be non-negative, got {}", raw.price),
        });
    }
    if raw.source_url.trim().is_empty() {
        return Err(StoreError::ValidationError {
            row_index,
            detail: "source_url must not be empty".to_string(),
        });
    }
    if !(0.0..=100.0).contains(&row.score) {
        return Err(StoreError::ValidationError {
            row_index,
            detail: format!("score must be in [0, 100], got {}", row.score),
        });
    }
    Ok(())
}

fn insert_scored_listing(
    conn: &Connection,
    import_id: &str,
    import_index: i64,
    row: &ScoredListing,
    seen_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let raw = &row.enriched.normalized.raw;
    let quantization_capacity_json = row
        .enriched
        .quantization_capacity
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let heuristic_outputs_json = serde_json::to_string(&row.enriched.heuristic_outputs)?;
    let warnings_json = serde_json::to_string(&row.enriched.warnings)?;
    let score_components_json = serde_json::to_string(&row.score_components)?;

    conn.execute(
        "INSERT INTO scored_listings (
            import_id, import_index, title, price, quantity, seller, source_url, source_type,
            condition, bulk_notes, geographic_region, listing_age, model_hint, canonical_model,
            match_type, match_score, match_notes, ml_is_gpu, ml_score, vram_gb, tdp_watts,
            slot_width, mig_support, nvlink, generation, cuda_cores, pcie_generation, form_factor,
            msrp_usd, quantization_capacity_json, heuristic_outputs_json, warnings_json, score,
            score_components_json, preset, seen_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19,
            ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32, ?33, ?34, ?35, ?36
        )",
        params![
            import_id,
            import_index,
            raw.title,
            raw.price,
            raw.quantity,
            raw.seller,
            raw.source_url,
            raw.source_type,
            serde_json::to_string(&raw.condition)?,
            raw.bulk_notes,
            raw.geographic_region,
            raw.listing_age,
            raw.model,
            row.enriched.normalized.canonical_model,
            serde_json::to_string(&row.enriched.normalized.match_type)?,
            row.enriched.normalized.match_score,
            row.enriched.normalized.match_notes,
            row.enriched.normalized.ml_is_gpu,
            row.enriched.normalized.ml_score,
            row.enriched.vram_gb,
            row.enriched.tdp_watts,
            row.enriched.slot_width,
            row.enriched.mig_support,
            row.enriched.nvlink,
            row.enriched.generation.map(|g| serde_json::to_string(&g)).transpose()?,
            row.enriched.cuda_cores,
            row.enriched.pcie_generation,
            row.enriched.form_factor.map(|f| serde_json::to_string(&f)).transpose()?,
            row.enriched.msrp_usd,
            quantization_capacity_json,
            heuristic_outputs_json,
            warnings_json,
            row.score,
            score_components_json,
            row.preset,
            seen_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn row_to_listing(row: &Row) -> rusqlite::Result<Result<PersistedListing, StoreError>> {
    Ok(try_row_to_listing(row))
}

fn try_row_to_listing(row: &Row) -> Result<PersistedListing, StoreError> {
    let condition_json: String = row.get("condition")?;
    let match_type_json: String = row.get("match_type")?;
    let generation_json: Option<String> = row.get("generation")?;
    let form_factor_json: Option<String> = row.get("form_factor")?;
    let quantization_capacity_json: Option<String> = row.get("quantization_capacity_json")?;
    let heuristic_outputs_json: String = row.get("heuristic_outputs_json")?;
    let warnings_json: String = row.get("warnings_json")?;
    let score_components_json: String = row.get("score_components_json")?;
    let seen_at: String = row.get("seen_at")?;

    let raw = RawListing {
        title: row.get("title")?,
        price: row.get("price")?,
        quantity: row.get("quantity")?,
        seller: row.get("seller")?,
        source_url: row.get("source_url")?,
        source_type: row.get("source_type")?,
        condition: serde_json::from_str(&condition_json)?,
        bulk_notes: row.get("bulk_notes")?,
        geographic_region: row.get("geographic_region")?,
        listing_age: row.get("listing_age")?,
        model: row.get("model_hint")?,
    };

    Ok(PersistedListing {
        import_id: row.get("import_id")?,
        import_index: row.get("import_index")?,
        canonical_model: row.get("canonical_model")?,
        match_type: serde_json::from_str(&match_type_json)?,
        match_score: row.get("match_score")?,
        match_notes: row.get("match_notes")?,
        ml_is_gpu: row.get("ml_is_gpu")?,
        ml_score: row.get("ml_score")?,
        vram_gb: row.get("vram_gb")?,
        tdp_watts: row.get("tdp_watts")?,
        slot_width: row.get("slot_width")?,
        mig_support: row.get("mig_support")?,
        nvlink: row.get("nvlink")?,
        generation: generation_json.map(|g| serde_json::from_str(&g)).transpose()?,
        cuda_cores: row.get("cuda_cores")?,
        pcie_generation: row.get("pcie_generation")?,
        form_factor: form_factor_json.map(|f| serde_json::from_str(&f)).transpose()?,
        msrp_usd: row.get("msrp_usd")?,
        quantization_capacity: quantization_capacity_json
            .map(|c| serde_json::from_str(&c))
            .transpose()?,
        heuristic_outputs: serde_json::from_str(&heuristic_outputs_json)?,
        warnings: serde_json::from_str(&warnings_json)?,
        score: row.get("score")?,
        score_components: serde_json::from_str(&score_components_json)?,
        preset: row.get("preset")?,
        seen_at: parse_timestamp(&seen_at),
        raw,
    })
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_scoring_enricher::Enricher;
    use gpu_scoring_normalizer::NormalizedListing;
    use gpu_scoring_registry::Registry;
    use gpu_scoring_scorer::Scorer;

    fn scored_row(registry: &Registry, url: &str, price: f64, canonical: &str) -> ScoredListing {
        let normalized = NormalizedListing {
            raw: RawListing {
                title: "test listing".to_string(),
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
            },
            canonical_model: canonical.to_string(),
            match_type: MatchType::Exact,
            match_score: 1.0,
            match_notes: "alias:test".to_string(),
            ml_is_gpu: None,
            ml_score: None,
        };
        let enriched = Enricher::new(registry).enrich(normalized);
        Scorer::new(registry)
            .score_batch(vec![enriched], "balanced")
            .unwrap()
            .remove(0)
    }

    #[test]
    fn insert_and_query_round_trip() {
        let registry = Registry::load().unwrap();
        let store = Store::open_in_memory().unwrap();
        let rows = vec![scored_row(&registry, "https://example.com/1", 3200.0, "RTX_A6000")];

        let result = store
            .insert_batch(&rows, "test-batch", None, Utc::now())
            .unwrap();
        assert_eq!(result.record_count, 1);
        assert_eq!(result.first_model.as_deref(), Some("RTX_A6000"));

        let listings = store
            .query_listings(&ListingFilter::default(), Page::default())
            .unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].canonical_model, "RTX_A6000");
        assert_eq!(listings[0].vram_gb, Some(48));
    }

    #[test]
    fn duplicate_import_id_is_rejected() {
        let registry = Registry::load().unwrap();
        let store = Store::open_in_memory().unwrap();
        let rows = vec![scored_row(&registry, "https://example.com/1", 3200.0, "RTX_A6000")];

        store
            .insert_batch(&rows, "batch-a", Some("fixed-id".to_string()), Utc::now())
            .unwrap();
        let err = store
            .insert_batch(&rows, "batch-b", Some("fixed-id".to_string()), Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateImport(id) if id == "fixed-id"));
    }

    #[test]
    fn invalid_row_rolls_back_entire_batch() {
        let registry = Registry::load().unwrap();
        let store = Store::open_in_memory().unwrap();
        let mut rows = vec![
            scored_row(&registry, "https://example.com/1", 3200.0, "RTX_A6000"),
            scored_row(&registry, "https://example.com/2", 1200.0, "T4"),
        ];
        rows[1].enriched.normalized.raw.price = -50.0;

        let err = store
            .insert_batch(&rows, "bad-batch", None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::ValidationError { row_index: 1, .. }));

        let listings = store
            .query_listings(&ListingFilter::default(), Page::default())
            .unwrap();
        assert!(listings.is_empty());
    }

    #[test]
    fn delta_is_computed_on_second_ingest_of_same_source_url() {
        let registry = Registry::load().unwrap();
        let store = Store::open_in_memory().unwrap();

        let mut first = scored_row(&registry, "https://example.com/u", 1000.0, "RTX_A6000");
        first.score = 55.0;
        store
            .insert_batch(&[first], "batch-1", None, Utc::now())
            .unwrap();

        let mut second = scored_row(&registry, "https://example.com/u", 900.0, "RTX_A6000");
        second.score = 58.0;
        store
            .insert_batch(&[second], "batch-2", None, Utc::now())
            .unwrap();

        let deltas = store.query_deltas(&DeltaFilter::default()).unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].price_delta, -100.0);
        assert!((deltas[0].price_delta_pct - (-10.0)).abs() < 1e-9);
        assert_eq!(deltas[0].score_delta, 3.0);
    }

    #[test]
    fn pagination_is_idempotent_under_concatenation() {
        let registry = Registry::load().unwrap();
        let store = Store::open_in_memory().unwrap();
        let rows: Vec<ScoredListing> = (0..10)
            .map(|i| {
                scored_row(
                    &registry,
                    &format!("https://example.com/{i}"),
                    1000.0 + i as f64,
                    "RTX_A6000",
                )
            })
            .collect();
        store.insert_batch(&rows, "paged-batch", None, Utc::now()).unwrap();

        let page_a = store
            .query_listings(&ListingFilter::default(), Page { limit: 4, offset: 0 })
            .unwrap();
        let page_b = store
            .query_listings(&ListingFilter::default(), Page { limit: 4, offset: 4 })
            .unwrap();
        let page_c = store
            .query_listings(&ListingFilter::default(), Page { limit: 4, offset: 8 })
            .unwrap();
        let combined: Vec<_> = page_a
            .into_iter()
            .chain(page_b)
            .chain(page_c)
            .map(|l| l.raw.source_url)
            .collect();

        let whole = store
            .query_listings(&ListingFilter::default(), Page { limit: 12, offset: 0 })
            .unwrap();
        let whole_urls: Vec<_> = whole.into_iter().map(|l| l.raw.source_url).collect();

        assert_eq!(combined, whole_urls);
    }

    #[test]
    fn schema_version_is_reported_and_supported() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
    }
}
