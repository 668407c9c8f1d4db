use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{error, info, instrument};

use crate::api::IngestError;
use crate::event::ScanRecord;
use crate::sinks::LogStore;

const MAX_CONNECTIONS: u32 = 4;

// SQLITE_BUSY and SQLITE_LOCKED, primary codes
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Durable scan log in a single SQLite table. Rows of one append share a
/// transaction.
#[derive(Clone)]
pub struct SqliteLog {
    pool: SqlitePool,
}

impl SqliteLog {
    /// `busy_timeout` bounds how long a write waits on another process
    /// holding the database file. It adds to the commit lock wait, keep it
    /// short.
    pub async fn new(path: &str, busy_timeout: Duration) -> anyhow::Result<SqliteLog> {
        info!("Initializing SQLite scan log with path: {}", path);

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                session_id TEXT NOT NULL,
                club TEXT NOT NULL,
                operator TEXT NOT NULL,
                row_no INTEGER,
                row_pos INTEGER,
                student_id TEXT NOT NULL,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                grade TEXT NOT NULL,
                grad_year TEXT NOT NULL,
                raw_payload TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('OK', 'INVALID_ID', 'DUPLICATE')),
                note TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(SqliteLog { pool })
    }
}

fn store_error(e: sqlx::Error) -> IngestError {
    if let sqlx::Error::Database(db) = &e {
        let primary = db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| code & 0xff);
        if matches!(primary, Some(SQLITE_BUSY) | Some(SQLITE_LOCKED)) {
            error!("scan log database is locked: {}", e);
            return IngestError::LockTimeout;
        }
    }

    error!("failed to append to scan log: {}", e);
    IngestError::StoreUnavailable(e.to_string())
}

#[async_trait]
impl LogStore for SqliteLog {
    #[instrument(skip_all, fields(rows = rows.len()))]
    async fn append(&self, rows: Vec<ScanRecord>) -> Result<usize, IngestError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        for row in &rows {
            sqlx::query(
                r#"
                INSERT INTO scans (
                    timestamp, session_id, club, operator, row_no, row_pos, student_id,
                    first_name, last_name, grade, grad_year, raw_payload, status, note
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(row.timestamp.as_str())
            .bind(row.session_id.as_str())
            .bind(row.club.as_str())
            .bind(row.operator.as_str())
            .bind(row.row_number)
            .bind(row.row_position)
            .bind(row.student_id.as_str())
            .bind(row.first_name.as_str())
            .bind(row.last_name.as_str())
            .bind(row.grade.as_str())
            .bind(row.grad_year.as_str())
            .bind(row.raw_payload.as_str())
            .bind(row.status.as_str())
            .bind(row.note.as_str())
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        }

        // Dropping the transaction on any error above rolls it back
        tx.commit().await.map_err(store_error)?;

        counter!("scan_capture_rows_appended_total").increment(rows.len() as u64);
        Ok(rows.len())
    }
}
