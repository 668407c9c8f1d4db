use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::commit::BatchCommitter;
use crate::config::Config;
use crate::dedup::DedupGate;
use crate::ingest::IngestionService;
use crate::router;
use crate::sinks::print::PrintLog;
use crate::sinks::sqlite::SqliteLog;
use crate::sinks::LogStore;

async fn create_store(config: &Config) -> anyhow::Result<Arc<dyn LogStore + Send + Sync>> {
    if config.print_sink {
        // Print sink is only used for local debug
        tracing::warn!("scans will be printed, not stored");
        Ok(Arc::new(PrintLog {}))
    } else {
        let log = SqliteLog::new(&config.log_path, config.log_busy_timeout()).await?;
        Ok(Arc::new(log))
    }
}

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let format = config
        .identifier_format()
        .expect("invalid SCAN_ID_PATTERN");
    let resolver = config
        .field_resolver()
        .expect("invalid SCHOOL_YEAR_ROLLOVER_MONTH");

    let store = create_store(&config)
        .await
        .expect("failed to open scan log");

    let service = IngestionService::new(
        format,
        resolver,
        DedupGate::new(config.dedup_window(), config.dedup_max_capacity),
        BatchCommitter::new(store, config.lock_timeout()),
        crate::time::SystemTime {},
        config.max_batch_size,
    );

    let app = router::router(Arc::new(service), config.export_prometheus);

    tracing::info!("listening on {:?}", listener.local_addr());
    tracing::info!(
        "config: id_pattern == {:?} ; dedup_window_ms == {} ; lock_timeout_ms == {} ; log_busy_timeout_ms == {} ; max_batch_size == {}",
        config.scan_id_pattern,
        config.dedup_window_ms,
        config.lock_timeout_ms,
        config.log_busy_timeout_ms,
        config.max_batch_size
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("failed to serve");

    tracing::info!("HTTP server graceful shutdown completed");
}
