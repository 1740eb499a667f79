use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

pub type ServerResult<T> = Result<T, ServerError>;

/// Server-level error taxonomy. Wraps every stage error the pipeline can
/// produce plus transport-level concerns (bad multipart, unknown routes).
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("row {row_index} failed validation: {detail}")]
    RowValidation { row_index: usize, detail: String },

    #[error("import id already exists: {0}")]
    DuplicateImport(String),

    #[error("unknown scoring preset: {0}")]
    UnknownPreset(String),

    #[error("unsupported schema version: {0}")]
    UnsupportedSchemaVersion(u32),

    #[error(transparent)]
    Registry(#[from] gpu_scoring_registry::ConfigError),

    #[error(transparent)]
    Pipeline(#[from] gpu_scoring_pipeline::PipelineError),

    #[error(transparent)]
    Source(#[from] gpu_scoring_pipeline::SourceParseError),

    #[error(transparent)]
    Store(#[from] gpu_scoring_store::StoreError),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("not found")]
    NotFound,

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    row_index: Option<usize>,
}

impl ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::RowValidation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::DuplicateImport(_) => StatusCode::CONFLICT,
            ServerError::UnknownPreset(_) => StatusCode::BAD_REQUEST,
            ServerError::UnsupportedSchemaVersion(_) => StatusCode::BAD_REQUEST,
            ServerError::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Pipeline(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Source(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Store(gpu_scoring_store::StoreError::ValidationError { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ServerError::Store(gpu_scoring_store::StoreError::DuplicateImport(_)) => {
                StatusCode::CONFLICT
            }
            ServerError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ServerError::BadRequest(_) => "bad_request",
            ServerError::RowValidation { .. } => "validation_error",
            ServerError::DuplicateImport(_) => "duplicate_import",
            ServerError::UnknownPreset(_) => "unknown_preset",
            ServerError::UnsupportedSchemaVersion(_) => "unsupported_schema_version",
            ServerError::Registry(_) => "config_error",
            ServerError::Pipeline(_) => "pipeline_error",
            ServerError::Source(_) => "schema_error",
            ServerError::Store(gpu_scoring_store::StoreError::ValidationError { .. }) => {
                "validation_error"
            }
            ServerError::Store(gpu_scoring_store::StoreError::DuplicateImport(_)) => {
                "duplicate_import"
            }
            ServerError::Store(_) => "store_error",
            ServerError::ServiceUnavailable(_) => "service_unavailable",
            ServerError::NotFound => "not_found",
            ServerError::Internal(_) => "internal_error",
        }
    }

    fn row_index(&self) -> Option<usize> {
        match self {
            ServerError::RowValidation { row_index, .. } => Some(*row_index),
            ServerError::Store(gpu_scoring_store::StoreError::ValidationError {
                row_index,
                ..
            }) => Some(*row_index),
            ServerError::Pipeline(gpu_scoring_pipeline::PipelineError::Normalization {
                row_index,
                ..
            }) => Some(*row_index),
            ServerError::Source(gpu_scoring_pipeline::SourceParseError::Row {
                row_index, ..
            }) => Some(*row_index),
            _ => None,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.kind().to_string();
        let message = self.to_string();
        let row_index = self.row_index();

        let body = Json(ErrorBody {
            kind,
            message,
            details: None,
            row_index,
        });

        (status, body).into_response()
    }
}

pub async fn not_found() -> ServerError {
    ServerError::NotFound
}
