use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use gpu_scoring_enricher::EnrichedListing;
use gpu_scoring_normalizer::{MatchType, NormalizedListing};
use gpu_scoring_pipeline::{run_and_persist, CsvSourceLoader, PrescoredCsvLoader};
use gpu_scoring_scorer::ScoredListing;
use serde::Serialize;
use serde_json::json;

use crate::error::{ServerError, ServerResult};
use crate::state::ServerState;

/// The preset label attached to listings imported already-scored, since no
/// local scoring pass ran against a named weight preset.
const EXTERNAL_PRESET: &str = "external";

async fn read_file_field(mut multipart: Multipart) -> ServerResult<Vec<u8>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            return field
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| ServerError::BadRequest(format!("failed to read upload: {e}")));
        }
    }
    Err(ServerError::BadRequest(
        "multipart body must contain a 'file' field".to_string(),
    ))
}

/// `POST /api/imports/csv` — runs the full pipeline over an uploaded raw
/// CSV and persists the result atomically.
pub async fn import_csv(
    State(state): State<Arc<ServerState>>,
    multipart: Multipart,
) -> ServerResult<impl IntoResponse> {
    let bytes = read_file_field(multipart).await?;
    let loader = CsvSourceLoader::new(Cursor::new(bytes))?;
    let ignored_columns = loader.ignored_columns().to_vec();
    let rows = loader.load()?;

    let result = run_and_persist(
        &state.registry,
        &state.store,
        state.default_pipeline_config.clone(),
        rows,
        "api:imports/csv",
        None,
    )
    .await?;

    let mut body = serde_json::to_value(&result).map_err(|e| ServerError::Internal(e.to_string()))?;
    if !ignored_columns.is_empty() {
        body["ignored_columns"] = json!(ignored_columns);
    }
    Ok(Json(body))
}

fn prescored_row_to_scored_listing(row: gpu_scoring_pipeline::PrescoredRow) -> ScoredListing {
    let match_type = match row.match_type.to_lowercase().as_str() {
        "exact" => MatchType::Exact,
        "regex" => MatchType::Regex,
        "fuzzy" => MatchType::Fuzzy,
        _ => MatchType::None,
    };

    let generation = row.generation.as_deref().and_then(|g| {
        serde_json::from_value(json!(g)).ok()
    });
    let form_factor = row.form_factor.as_deref().and_then(|f| {
        serde_json::from_value(json!(f)).ok()
    });

    let normalized = NormalizedListing {
        raw: row.raw,
        canonical_model: row.canonical_model,
        match_type,
        match_score: row.match_score,
        match_notes: row.match_notes,
        ml_is_gpu: None,
        ml_score: None,
    };

    let enriched = EnrichedListing {
        normalized,
        vram_gb: row.vram_gb,
        tdp_watts: row.tdp_watts,
        slot_width: row.slot_width,
        mig_support: row.mig_support,
        nvlink: row.nvlink,
        generation,
        cuda_cores: row.cuda_cores,
        pcie_generation: row.pcie_generation,
        form_factor,
        msrp_usd: None,
        quantization_capacity: row.quantization_capacity,
        heuristic_outputs: Vec::new(),
        warnings: Vec::new(),
    };

    ScoredListing {
        enriched,
        score: row.score,
        preset: EXTERNAL_PRESET.to_string(),
        score_components: BTreeMap::new(),
    }
}

/// `POST /api/imports/from-pipeline` — accepts a CSV produced by an
/// upstream, already-scored pipeline run. Re-validates shape but does not
/// re-run Normalizer/Enricher/Heuristics/Scorer.
pub async fn import_from_pipeline(
    State(state): State<Arc<ServerState>>,
    multipart: Multipart,
) -> ServerResult<impl IntoResponse> {
    let bytes = read_file_field(multipart).await?;
    let loader = PrescoredCsvLoader::new(Cursor::new(bytes))?;
    let rows = loader.load()?;
    let scored: Vec<ScoredListing> = rows.into_iter().map(prescored_row_to_scored_listing).collect();

    let result = state
        .store
        .insert_batch(&scored, "api:imports/from-pipeline", None, Utc::now())?;
    Ok(Json(result))
}

#[derive(Debug, Serialize)]
struct ArtifactValidation {
    valid: bool,
    #[serde(rename = "type")]
    artifact_type: &'static str,
    schema_version: u32,
    rows: usize,
    errors: Vec<String>,
    warnings: Vec<String>,
}

/// `POST /api/ingest/upload-artifact` — validates a raw ingest CSV without
/// persisting it. The Source Loader's own errors become the `errors` list
/// rather than a hard 422, since the whole point of this endpoint is to let
/// a caller check a file before committing to an import.
pub async fn upload_artifact(multipart: Multipart) -> ServerResult<impl IntoResponse> {
    let bytes = read_file_field(multipart).await?;

    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut row_count = 0usize;

    match CsvSourceLoader::new(Cursor::new(bytes.clone())) {
        Ok(loader) => {
            for column in loader.ignored_columns() {
                warnings.push(format!("unrecognized column '{column}' ignored"));
            }
            match loader.load() {
                Ok(rows) => row_count = rows.len(),
                Err(e) => errors.push(e.to_string()),
            }
        }
        Err(e) => errors.push(e.to_string()),
    }

    let body = ArtifactValidation {
        valid: errors.is_empty(),
        artifact_type: "raw_csv",
        schema_version: gpu_scoring_store::CURRENT_SCHEMA_VERSION,
        rows: row_count,
        errors,
        warnings,
    };
    Ok(Json(body))
}
