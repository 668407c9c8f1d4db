#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use scan_capture::api::IngestError;
use scan_capture::commit::BatchCommitter;
use scan_capture::dedup::DedupGate;
use scan_capture::event::ScanRecord;
use scan_capture::ingest::{IngestionService, DEFAULT_MAX_BATCH_SIZE};
use scan_capture::resolver::FieldResolver;
use scan_capture::sinks::LogStore;
use scan_capture::time::TimeSource;
use scan_capture::validator::IdentifierFormat;
use serde_json::Value;
use time::macros::datetime;
use time::OffsetDateTime;
use tower::ServiceExt;

#[derive(Clone)]
pub struct FixedTime {
    pub time: OffsetDateTime,
}

impl TimeSource for FixedTime {
    fn current_time(&self) -> OffsetDateTime {
        self.time
    }
}

pub fn fixed_time() -> FixedTime {
    FixedTime {
        time: datetime!(2025-10-01 09:00 UTC),
    }
}

#[derive(Clone, Default)]
pub struct MemoryLog {
    rows: Arc<Mutex<Vec<ScanRecord>>>,
    append_delay: Option<Duration>,
}

impl MemoryLog {
    pub fn slow(append_delay: Duration) -> Self {
        MemoryLog {
            append_delay: Some(append_delay),
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn rows(&self) -> Vec<ScanRecord> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogStore for MemoryLog {
    async fn append(&self, rows: Vec<ScanRecord>) -> Result<usize, IngestError> {
        if let Some(delay) = self.append_delay {
            tokio::time::sleep(delay).await;
        }
        let count = rows.len();
        self.rows.lock().unwrap().extend(rows);
        Ok(count)
    }
}

/// A log whose backing file has gone away.
pub struct MissingLog;

#[async_trait]
impl LogStore for MissingLog {
    async fn append(&self, _rows: Vec<ScanRecord>) -> Result<usize, IngestError> {
        Err(IngestError::StoreUnavailable("no such table: scans".to_string()))
    }
}

pub struct ServiceBuilder {
    pub dedup_window: Duration,
    pub lock_timeout: Duration,
    pub max_batch_size: usize,
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        ServiceBuilder {
            dedup_window: Duration::from_secs(20),
            lock_timeout: Duration::from_secs(10),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl ServiceBuilder {
    pub fn build(self, store: Arc<dyn LogStore + Send + Sync>) -> IngestionService {
        IngestionService::new(
            IdentifierFormat::default(),
            FieldResolver::default(),
            DedupGate::new(self.dedup_window, 1000),
            BatchCommitter::new(store, self.lock_timeout),
            fixed_time(),
            self.max_batch_size,
        )
    }
}

pub async fn post_json(
    app: Router,
    path: &str,
    body: Value,
    operator: Option<&str>,
) -> (StatusCode, String) {
    let mut req = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    if let Some(operator) = operator {
        req = req.header("X-Operator", operator);
    }
    let req = req.body(Body::from(body.to_string())).unwrap();

    let res = app.oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = res.into_body().collect().await.unwrap().to_bytes();

    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

pub async fn get(app: Router, path: &str) -> (StatusCode, String) {
    let req = Request::builder().uri(path).body(Body::empty()).unwrap();

    let res = app.oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = res.into_body().collect().await.unwrap().to_bytes();

    (status, String::from_utf8(bytes.to_vec()).unwrap())
}
