use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that abort a whole ingestion call. Per-event problems (unparseable
/// payloads, malformed identifiers, duplicates) are reported as outcomes instead.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to parse request: {0}")]
    RequestParsingError(#[from] serde_json::Error),

    #[error("timed out waiting for the scan log, nothing was written, please retry")]
    LockTimeout,
    #[error("scan log unavailable: {0}")]
    StoreUnavailable(String),
}

impl IngestError {
    pub fn to_metric_tag(&self) -> &'static str {
        match self {
            IngestError::RequestParsingError(_) => "req_parsing",
            IngestError::LockTimeout => "lock_timeout",
            IngestError::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        match self {
            IngestError::RequestParsingError(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            IngestError::LockTimeout => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            IngestError::StoreUnavailable(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        }
        .into_response()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    Ok,
    InvalidId,
    /// Only produced by the single-event path.
    Duplicate,
    /// Never persisted.
    InvalidJson,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Ok => "OK",
            ScanStatus::InvalidId => "INVALID_ID",
            ScanStatus::Duplicate => "DUPLICATE",
            ScanStatus::InvalidJson => "INVALID_JSON",
        }
    }
}

/// Whether a payload was a bare identifier or a structured JSON object.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum PayloadMode {
    #[serde(rename = "ID_ONLY")]
    IdOnly,
    #[serde(rename = "JSON")]
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub grade: String,
    pub grad_year: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutcome {
    pub correlation_id: Option<String>,
    pub ok: bool,
    pub status: ScanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student: Option<Student>,
    pub payload_mode: Option<PayloadMode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct IngestResponse {
    pub appended: usize,
    pub results: Vec<ScanOutcome>,
}

impl IntoResponse for IngestResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Settings published to stations so they can pre-filter scans before submitting.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedConfig {
    pub id_pattern: String,
    pub grad_year_digits: usize,
    pub dedup_window_ms: u64,
    pub max_batch_size: usize,
}
