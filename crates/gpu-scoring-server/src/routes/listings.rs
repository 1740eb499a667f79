use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use gpu_scoring_store::{ListingFilter, Page};
use serde::Deserialize;

use crate::error::{ServerError, ServerResult};
use crate::state::ServerState;

/// Raw query parameters as they arrive over the wire, before being parsed
/// into a [`ListingFilter`]. Kept as strings so a malformed numeric or
/// timestamp value produces a 400 with a specific message instead of axum's
/// generic query-rejection body.
#[derive(Debug, Deserialize)]
pub struct ListingQueryParams {
    pub canonical_model: Option<String>,
    pub min_price: Option<String>,
    pub max_price: Option<String>,
    pub min_score: Option<String>,
    pub region: Option<String>,
    pub after: Option<String>,
    pub import_id: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

fn parse_f64(field: &str, value: &Option<String>) -> ServerResult<Option<f64>> {
    value
        .as_ref()
        .map(|v| {
            v.parse::<f64>()
                .map_err(|_| ServerError::BadRequest(format!("'{field}' is not a valid number: '{v}'")))
        })
        .transpose()
}

fn parse_u32(field: &str, value: &Option<String>) -> ServerResult<Option<u32>> {
    value
        .as_ref()
        .map(|v| {
            v.parse::<u32>()
                .map_err(|_| ServerError::BadRequest(format!("'{field}' is not a valid integer: '{v}'")))
        })
        .transpose()
}

fn parse_timestamp(field: &str, value: &Option<String>) -> ServerResult<Option<DateTime<Utc>>> {
    value
        .as_ref()
        .map(|v| {
            DateTime::parse_from_rfc3339(v)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| ServerError::BadRequest(format!("'{field}' is not RFC3339: '{v}'")))
        })
        .transpose()
}

impl ListingQueryParams {
    fn into_filter_and_page(self) -> ServerResult<(ListingFilter, Page)> {
        let filter = ListingFilter {
            canonical_model: self.canonical_model,
            min_price: parse_f64("min_price", &self.min_price)?,
            max_price: parse_f64("max_price", &self.max_price)?,
            min_score: parse_f64("min_score", &self.min_score)?,
            region: self.region,
            after: parse_timestamp("after", &self.after)?,
            import_id: self.import_id,
        };
        let page = Page {
            limit: parse_u32("limit", &self.limit)?.unwrap_or(100),
            offset: parse_u32("offset", &self.offset)?.unwrap_or(0),
        };
        Ok((filter, page))
    }
}

pub async fn list_listings(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<ListingQueryParams>,
) -> ServerResult<impl IntoResponse> {
    let (filter, page) = params.into_filter_and_page()?;
    let listings = state.store.query_listings(&filter, page)?;
    Ok(Json(listings))
}

#[derive(Debug, Deserialize)]
pub struct DeltaQueryParams {
    pub canonical_model: Option<String>,
    pub min_abs_price_delta_pct: Option<String>,
    pub after: Option<String>,
    pub region: Option<String>,
    pub limit: Option<String>,
}

pub async fn list_deltas(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<DeltaQueryParams>,
) -> ServerResult<impl IntoResponse> {
    let filter = gpu_scoring_store::DeltaFilter {
        canonical_model: params.canonical_model,
        min_abs_price_delta_pct: parse_f64("min_abs_price_delta_pct", &params.min_abs_price_delta_pct)?,
        after: parse_timestamp("after", &params.after)?,
        region: params.region,
        limit: parse_u32("limit", &params.limit)?,
    };
    let deltas = state.store.query_deltas(&filter)?;
    Ok(Json(deltas))
}
