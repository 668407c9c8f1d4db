use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{instrument, warn};

use crate::api::IngestError;
use crate::event::ScanRecord;
use crate::sinks::LogStore;

/// Serializes appends to the shared scan log.
///
/// Concurrent ingestion calls do all of their parsing and validation on their
/// own, and only queue up here for the append itself. Waiting is bounded:
/// past `lock_timeout` the call fails with [`IngestError::LockTimeout`]
/// without having written anything, so retrying the whole batch is safe.
pub struct BatchCommitter {
    store: Arc<dyn LogStore + Send + Sync>,
    lock: Mutex<()>,
    lock_timeout: Duration,
}

/// Exclusive access to the log, held until dropped or consumed by [`CommitSection::append`].
pub struct CommitSection<'a> {
    _guard: MutexGuard<'a, ()>,
    store: &'a (dyn LogStore + Send + Sync),
}

impl BatchCommitter {
    pub fn new(store: Arc<dyn LogStore + Send + Sync>, lock_timeout: Duration) -> Self {
        BatchCommitter {
            store,
            lock: Mutex::new(()),
            lock_timeout,
        }
    }

    pub async fn acquire(&self) -> Result<CommitSection<'_>, IngestError> {
        let start = Instant::now();

        match tokio::time::timeout(self.lock_timeout, self.lock.lock()).await {
            Ok(guard) => {
                histogram!("scan_capture_commit_lock_wait_seconds")
                    .record(start.elapsed().as_secs_f64());
                Ok(CommitSection {
                    _guard: guard,
                    store: self.store.as_ref(),
                })
            }
            Err(_) => {
                counter!("scan_capture_commit_lock_timeouts_total").increment(1);
                warn!(
                    "gave up waiting for the scan log after {:?}",
                    self.lock_timeout
                );
                Err(IngestError::LockTimeout)
            }
        }
    }

    /// Appends all rows as one unit, in order. Returns the number of rows written.
    #[instrument(skip_all, fields(rows = rows.len()))]
    pub async fn commit(&self, rows: Vec<ScanRecord>) -> Result<usize, IngestError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let section = self.acquire().await?;
        section.append(rows).await
    }
}

impl CommitSection<'_> {
    pub async fn append(self, rows: Vec<ScanRecord>) -> Result<usize, IngestError> {
        histogram!("scan_capture_commit_batch_size").record(rows.len() as f64);
        self.store.append(rows).await
    }
}
