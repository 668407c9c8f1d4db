//! Scan ingestion
//!
//! Turns submitted scan events into log rows and per-event outcomes. Every
//! event is parsed, resolved and validated before the log is touched. The rows
//! of a call are then committed in a single append, so a call either lands
//! entirely or not at all.

use std::sync::Arc;

use metrics::counter;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn, Span};
use uuid::Uuid;

use crate::{
    api::{IngestError, IngestResponse, PublishedConfig, ScanOutcome, ScanStatus, Student},
    commit::BatchCommitter,
    dedup::DedupGate,
    event::{ScanEvent, ScanRecord, SessionContext},
    payload::parse_payload,
    prometheus::report_dropped_events,
    resolver::{FieldResolver, Overrides},
    time::{format_timestamp, TimeSource},
    validator::{IdentifierFormat, GRAD_YEAR_DIGITS},
};

pub const UNKNOWN_OPERATOR: &str = "Unknown";
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;
const DUPLICATE_MESSAGE: &str = "duplicate scan within the dedup window";

/// Outcome of one event, plus the row to write for it, if any.
#[derive(Debug)]
struct Processed {
    outcome: ScanOutcome,
    row: Option<ScanRecord>,
}

/// Values shared by every event of one call.
struct CallContext {
    session_id: String,
    operator: String,
    now: OffsetDateTime,
    timestamp: String,
}

pub struct IngestionService {
    format: IdentifierFormat,
    resolver: FieldResolver,
    dedup: DedupGate,
    committer: BatchCommitter,
    timesource: Arc<dyn TimeSource + Send + Sync>,
    max_batch_size: usize,
}

impl IngestionService {
    pub fn new<TZ: TimeSource + Send + Sync + 'static>(
        format: IdentifierFormat,
        resolver: FieldResolver,
        dedup: DedupGate,
        committer: BatchCommitter,
        timesource: TZ,
        max_batch_size: usize,
    ) -> Self {
        IngestionService {
            format,
            resolver,
            dedup,
            committer,
            timesource: Arc::new(timesource),
            max_batch_size,
        }
    }

    pub fn published_config(&self) -> PublishedConfig {
        PublishedConfig {
            id_pattern: self.format.pattern().to_string(),
            grad_year_digits: GRAD_YEAR_DIGITS,
            dedup_window_ms: u64::try_from(self.dedup.window().as_millis()).unwrap_or(u64::MAX),
            max_batch_size: self.max_batch_size,
        }
    }

    fn call_context(&self, context: &SessionContext) -> CallContext {
        let now = self.timesource.current_time();
        CallContext {
            session_id: context
                .session_id
                .clone()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| Uuid::now_v7().to_string()),
            operator: context
                .operator
                .clone()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_OPERATOR.to_string()),
            now,
            timestamp: format_timestamp(now),
        }
    }

    fn process_event(&self, event: &ScanEvent, call: &CallContext) -> Processed {
        let (fragment, mode) = match parse_payload(&event.payload, &self.format) {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!("dropping unparseable scan: {}", err);
                return Processed {
                    outcome: ScanOutcome {
                        correlation_id: event.correlation_id.clone(),
                        ok: false,
                        status: ScanStatus::InvalidJson,
                        message: Some(err.to_string()),
                        student: None,
                        payload_mode: None,
                    },
                    row: None,
                };
            }
        };

        let fields = self.resolver.resolve(
            &fragment,
            Overrides {
                grade: event.grade.as_deref(),
                grad_year: event.grad_year.as_deref(),
            },
            call.now,
        );

        let (status, message) = match self.format.check(&fragment.identifier) {
            Ok(()) => (ScanStatus::Ok, None),
            Err(reason) => (ScanStatus::InvalidId, Some(reason.to_string())),
        };

        let student = Student {
            id: fragment.identifier,
            first_name: fragment.first_name.unwrap_or_default(),
            last_name: fragment.last_name.unwrap_or_default(),
            grade: fields.grade,
            grad_year: fields.grad_year,
        };

        let row = ScanRecord {
            timestamp: call.timestamp.clone(),
            session_id: event
                .session_id
                .clone()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| call.session_id.clone()),
            club: event.club.clone(),
            operator: call.operator.clone(),
            row_number: event.row,
            row_position: event.position,
            student_id: student.id.clone(),
            first_name: student.first_name.clone(),
            last_name: student.last_name.clone(),
            grade: student.grade.clone(),
            grad_year: student.grad_year.clone(),
            raw_payload: event.payload.clone(),
            status,
            note: event.note.clone(),
        };

        Processed {
            outcome: ScanOutcome {
                correlation_id: event.correlation_id.clone(),
                ok: status == ScanStatus::Ok,
                status,
                message,
                student: Some(student),
                payload_mode: Some(mode),
            },
            row: Some(row),
        }
    }

    fn prepare(&self, context: &SessionContext, events: &[ScanEvent]) -> Vec<Processed> {
        let call = self.call_context(context);
        Span::current().record("session_id", call.session_id.as_str());

        events
            .iter()
            .map(|event| self.process_event(event, &call))
            .collect()
    }

    async fn commit(&self, processed: Vec<Processed>) -> Result<IngestResponse, IngestError> {
        let mut results = Vec::with_capacity(processed.len());
        let mut rows = Vec::with_capacity(processed.len());
        for Processed { outcome, row } in processed {
            counter!("scan_capture_outcomes_total", "status" => outcome.status.as_str())
                .increment(1);
            if outcome.status == ScanStatus::InvalidJson {
                report_dropped_events("invalid_json", 1);
            }
            results.push(outcome);
            rows.extend(row);
        }

        let row_count = rows.len();
        let appended = self.committer.commit(rows).await.map_err(|err| {
            report_dropped_events(err.to_metric_tag(), row_count as u64);
            warn!("scan batch rejected: {}", err);
            err
        })?;

        Ok(IngestResponse { appended, results })
    }

    /// Ingests a batch of scans. Events past the batch cap are dropped without
    /// an outcome, callers are expected to chunk. No duplicate suppression is
    /// applied here.
    #[instrument(skip_all, fields(events = events.len(), session_id))]
    pub async fn ingest(
        &self,
        context: &SessionContext,
        mut events: Vec<ScanEvent>,
    ) -> Result<IngestResponse, IngestError> {
        counter!("scan_capture_events_received_total").increment(events.len() as u64);

        if events.len() > self.max_batch_size {
            let excess = events.len() - self.max_batch_size;
            warn!(
                "truncating batch of {} scans to {}",
                events.len(),
                self.max_batch_size
            );
            report_dropped_events("batch_truncated", excess as u64);
            events.truncate(self.max_batch_size);
        }

        let processed = self.prepare(context, &events);
        self.commit(processed).await
    }

    /// Legacy single-scan entry point: a one-event batch, with repeat scans of
    /// the same id in the same session recorded as `DUPLICATE`.
    #[instrument(skip_all, fields(session_id))]
    pub async fn ingest_single(
        &self,
        context: &SessionContext,
        event: ScanEvent,
    ) -> Result<IngestResponse, IngestError> {
        counter!("scan_capture_events_received_total").increment(1);

        let mut processed = self.prepare(context, std::slice::from_ref(&event));

        let mut mark = None;
        if let Some(Processed {
            outcome,
            row: Some(row),
        }) = processed.first_mut()
        {
            if row.status == ScanStatus::Ok {
                let (session_id, student_id) = row.dedup_key();
                mark = self.dedup.mark_pending(session_id, student_id);
                if mark.is_none() {
                    row.status = ScanStatus::Duplicate;
                    outcome.status = ScanStatus::Duplicate;
                    outcome.message = Some(DUPLICATE_MESSAGE.to_string());
                }
            }
        }

        // The mark only outlives this call once the row is in the log. A
        // failed commit, or this future being dropped mid-commit, releases it.
        let res = self.commit(processed).await?;
        if let Some(mark) = mark {
            mark.keep();
        }
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use time::macros::datetime;

    use super::*;
    use crate::api::PayloadMode;
    use crate::sinks::LogStore;

    #[derive(Clone)]
    struct FixedTime {
        time: OffsetDateTime,
    }

    impl TimeSource for FixedTime {
        fn current_time(&self) -> OffsetDateTime {
            self.time
        }
    }

    #[derive(Default)]
    struct MemoryLog {
        rows: Mutex<Vec<ScanRecord>>,
        fail: bool,
    }

    #[async_trait]
    impl LogStore for MemoryLog {
        async fn append(&self, rows: Vec<ScanRecord>) -> Result<usize, IngestError> {
            if self.fail {
                return Err(IngestError::StoreUnavailable("gone".to_string()));
            }
            let count = rows.len();
            self.rows.lock().unwrap().extend(rows);
            Ok(count)
        }
    }

    fn service(log: Arc<MemoryLog>, max_batch_size: usize) -> IngestionService {
        IngestionService::new(
            IdentifierFormat::default(),
            FieldResolver::default(),
            DedupGate::new(Duration::from_secs(20), 1000),
            BatchCommitter::new(log, Duration::from_secs(1)),
            FixedTime {
                time: datetime!(2025-10-01 09:00 UTC),
            },
            max_batch_size,
        )
    }

    fn scan(payload: &str, correlation_id: &str) -> ScanEvent {
        ScanEvent {
            payload: payload.to_string(),
            correlation_id: Some(correlation_id.to_string()),
            club: "Robotics".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn builds_rows_from_context() {
        let log = Arc::new(MemoryLog::default());
        let service = service(log.clone(), DEFAULT_MAX_BATCH_SIZE);
        let context = SessionContext {
            session_id: Some("s-1".to_string()),
            operator: Some("gate-a".to_string()),
        };

        let res = service
            .ingest(&context, vec![scan("2026001", "c1")])
            .await
            .unwrap();

        assert_eq!(res.appended, 1);
        let rows = log.rows.lock().unwrap();
        assert_eq!(
            rows[0],
            ScanRecord {
                timestamp: "2025-10-01T09:00:00Z".to_string(),
                session_id: "s-1".to_string(),
                club: "Robotics".to_string(),
                operator: "gate-a".to_string(),
                row_number: None,
                row_position: None,
                student_id: "2026001".to_string(),
                first_name: String::new(),
                last_name: String::new(),
                grade: "12".to_string(),
                grad_year: "2026".to_string(),
                raw_payload: "2026001".to_string(),
                status: ScanStatus::Ok,
                note: String::new(),
            }
        );
        assert_eq!(res.results[0].payload_mode, Some(PayloadMode::IdOnly));
    }

    #[tokio::test]
    async fn defaults_operator_and_generates_one_session_per_call() {
        let log = Arc::new(MemoryLog::default());
        let service = service(log.clone(), DEFAULT_MAX_BATCH_SIZE);

        service
            .ingest(
                &SessionContext::default(),
                vec![scan("2026001", "c1"), scan("2026002", "c2")],
            )
            .await
            .unwrap();

        let rows = log.rows.lock().unwrap();
        assert_eq!(rows[0].operator, UNKNOWN_OPERATOR);
        assert!(!rows[0].session_id.is_empty());
        assert_eq!(rows[0].session_id, rows[1].session_id);
    }

    #[tokio::test]
    async fn event_session_wins_over_context() {
        let log = Arc::new(MemoryLog::default());
        let service = service(log.clone(), DEFAULT_MAX_BATCH_SIZE);
        let mut event = scan("2026001", "c1");
        event.session_id = Some("station-7".to_string());

        service
            .ingest(
                &SessionContext {
                    session_id: Some("s-1".to_string()),
                    operator: None,
                },
                vec![event],
            )
            .await
            .unwrap();

        assert_eq!(log.rows.lock().unwrap()[0].session_id, "station-7");
    }

    #[tokio::test]
    async fn truncates_oversized_batches() {
        let log = Arc::new(MemoryLog::default());
        let service = service(log.clone(), 2);

        let res = service
            .ingest(
                &SessionContext::default(),
                vec![
                    scan("2026001", "c1"),
                    scan("2026002", "c2"),
                    scan("2026003", "c3"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(res.appended, 2);
        assert_eq!(res.results.len(), 2);
        assert_eq!(res.results[1].correlation_id.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn batch_path_does_not_dedup() {
        let log = Arc::new(MemoryLog::default());
        let service = service(log.clone(), DEFAULT_MAX_BATCH_SIZE);
        let context = SessionContext {
            session_id: Some("s-1".to_string()),
            operator: None,
        };

        service
            .ingest(&context, vec![scan("2026001", "c1"), scan("2026001", "c2")])
            .await
            .unwrap();
        let res = service
            .ingest(&context, vec![scan("2026001", "c3")])
            .await
            .unwrap();

        assert_eq!(res.results[0].status, ScanStatus::Ok);
        assert_eq!(log.rows.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn single_path_dedups_valid_ids_only() {
        let log = Arc::new(MemoryLog::default());
        let service = service(log.clone(), DEFAULT_MAX_BATCH_SIZE);
        let context = SessionContext {
            session_id: Some("s-1".to_string()),
            operator: None,
        };

        let first = service
            .ingest_single(&context, scan("2026001", "c1"))
            .await
            .unwrap();
        let second = service
            .ingest_single(&context, scan("2026001", "c2"))
            .await
            .unwrap();
        let invalid = service
            .ingest_single(&context, scan("\"bogus\"", "c3"))
            .await
            .unwrap();
        let invalid_again = service
            .ingest_single(&context, scan("\"bogus\"", "c4"))
            .await
            .unwrap();

        assert_eq!(first.results[0].status, ScanStatus::Ok);
        assert_eq!(second.results[0].status, ScanStatus::Duplicate);
        assert!(second.results[0].ok);
        assert_eq!(
            second.results[0].message.as_deref(),
            Some(DUPLICATE_MESSAGE)
        );
        assert_eq!(second.appended, 1);
        assert_eq!(invalid.results[0].status, ScanStatus::InvalidId);
        assert_eq!(invalid_again.results[0].status, ScanStatus::InvalidId);

        let statuses: Vec<ScanStatus> =
            log.rows.lock().unwrap().iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                ScanStatus::Ok,
                ScanStatus::Duplicate,
                ScanStatus::InvalidId,
                ScanStatus::InvalidId
            ]
        );
    }

    #[tokio::test]
    async fn failed_single_commit_releases_dedup_mark() {
        let failing = Arc::new(MemoryLog {
            fail: true,
            ..Default::default()
        });
        let dedup = DedupGate::new(Duration::from_secs(20), 1000);
        let service = IngestionService::new(
            IdentifierFormat::default(),
            FieldResolver::default(),
            dedup.clone(),
            BatchCommitter::new(failing, Duration::from_secs(1)),
            FixedTime {
                time: datetime!(2025-10-01 09:00 UTC),
            },
            DEFAULT_MAX_BATCH_SIZE,
        );
        let context = SessionContext {
            session_id: Some("s-1".to_string()),
            operator: None,
        };

        let res = service.ingest_single(&context, scan("2026001", "c1")).await;

        assert!(matches!(res, Err(IngestError::StoreUnavailable(_))));
        assert!(!dedup.check_and_mark("s-1", "2026001"));
    }

    #[tokio::test]
    async fn publishes_config() {
        let service = service(Arc::new(MemoryLog::default()), 25);

        assert_eq!(
            service.published_config(),
            PublishedConfig {
                id_pattern: r"^20\d{5}$".to_string(),
                grad_year_digits: 4,
                dedup_window_ms: 20_000,
                max_batch_size: 25,
            }
        );
    }

    #[tokio::test]
    async fn publishes_sub_second_dedup_window() {
        let service = IngestionService::new(
            IdentifierFormat::default(),
            FieldResolver::default(),
            DedupGate::new(Duration::from_millis(1500), 1000),
            BatchCommitter::new(Arc::new(MemoryLog::default()), Duration::from_secs(1)),
            FixedTime {
                time: datetime!(2025-10-01 09:00 UTC),
            },
            DEFAULT_MAX_BATCH_SIZE,
        );

        assert_eq!(service.published_config().dedup_window_ms, 1500);
    }
}
