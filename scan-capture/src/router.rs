use std::future::ready;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::ingest::IngestionService;
use crate::prometheus::{setup_metrics_recorder, track_metrics};
use crate::scan_endpoint;

#[derive(Clone)]
pub struct State {
    pub service: Arc<IngestionService>,
}

async fn index() -> &'static str {
    "scan-capture"
}

pub fn router(service: Arc<IngestionService>, metrics: bool) -> Router {
    let state = State { service };

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/config", get(scan_endpoint::config))
        .route("/scan", post(scan_endpoint::scan))
        .route("/scan/batch", post(scan_endpoint::batch))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Don't install metrics unless asked to
    // Installing a global recorder when used as a library (during tests etc)
    // does not work well.
    if !metrics {
        return router;
    }

    match setup_metrics_recorder() {
        Ok(recorder_handle) => {
            router.route("/metrics", get(move || ready(recorder_handle.render())))
        }
        Err(e) => {
            error!("failed to install prometheus recorder: {}", e);
            router
        }
    }
}
