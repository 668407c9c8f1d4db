use async_trait::async_trait;

use metrics::{counter, histogram};
use tracing::info;

use crate::api::IngestError;
use crate::event::ScanRecord;
use crate::sinks::LogStore;

/// Logs rows instead of storing them, for local debugging only.
pub struct PrintLog {}

#[async_trait]
impl LogStore for PrintLog {
    async fn append(&self, rows: Vec<ScanRecord>) -> Result<usize, IngestError> {
        let span = tracing::span!(tracing::Level::INFO, "batch of scans");
        let _enter = span.enter();

        histogram!("scan_capture_print_batch_size").record(rows.len() as f64);
        counter!("scan_capture_rows_appended_total").increment(rows.len() as u64);
        for row in &rows {
            info!("scan: {row:?}");
        }

        Ok(rows.len())
    }
}
