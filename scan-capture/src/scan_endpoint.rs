use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use tracing::{error, instrument, Span};

use crate::{
    api::{IngestError, IngestResponse, PublishedConfig},
    event::{BatchRequest, ScanEvent, SessionContext},
    prometheus::report_dropped_events,
    router,
};

/// Header carrying the station operator, as reported by the kiosk.
pub const OPERATOR_HEADER: &str = "x-operator";

fn operator(headers: &HeaderMap) -> Option<String> {
    headers
        .get(OPERATOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

#[instrument(skip_all, fields(operator, batch_size))]
pub async fn batch(
    state: State<router::State>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<IngestResponse, IngestError> {
    let request: BatchRequest = serde_json::from_slice(&body).map_err(|e| {
        error!("batch: request payload parsing error: {}", e);
        report_dropped_events("req_parsing", 1);
        IngestError::from(e)
    })?;

    let context = SessionContext {
        session_id: request.session_id,
        operator: operator(&headers),
    };
    Span::current().record("operator", context.operator.as_deref());
    Span::current().record("batch_size", request.events.len());

    state.service.ingest(&context, request.events).await
}

#[instrument(skip_all, fields(operator))]
pub async fn scan(
    state: State<router::State>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<IngestResponse, IngestError> {
    let event: ScanEvent = serde_json::from_slice(&body).map_err(|e| {
        error!("scan: request payload parsing error: {}", e);
        report_dropped_events("req_parsing", 1);
        IngestError::from(e)
    })?;

    let context = SessionContext {
        session_id: event.session_id.clone(),
        operator: operator(&headers),
    };
    Span::current().record("operator", context.operator.as_deref());

    state.service.ingest_single(&context, event).await
}

pub async fn config(state: State<router::State>) -> Json<PublishedConfig> {
    Json(state.service.published_config())
}
