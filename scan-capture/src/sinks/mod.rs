use async_trait::async_trait;

use crate::api::IngestError;
use crate::event::ScanRecord;

pub mod print;
pub mod sqlite;

/// Append-only store backing the scan log.
///
/// `append` is all-or-nothing: either every row becomes visible, in order,
/// and the row count is returned, or none does and an error is returned.
#[async_trait]
pub trait LogStore {
    async fn append(&self, rows: Vec<ScanRecord>) -> Result<usize, IngestError>;
}
