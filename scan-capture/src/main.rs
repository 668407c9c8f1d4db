use std::time::Duration;

use envconfig::Envconfig;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{BatchConfig, RandomIdGenerator, Sampler, Tracer};
use opentelemetry_sdk::{runtime, Resource};
use tokio::signal::unix::{signal, SignalKind};
use tracing::level_filters::LevelFilter;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use scan_capture::config::Config;
use scan_capture::server::serve;

async fn shutdown() {
    let mut term = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    let mut interrupt =
        signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

    let received = tokio::select! {
        _ = term.recv() => "SIGTERM",
        _ = interrupt.recv() => "SIGINT",
    };

    tracing::info!("{received} received, draining in-flight scans");
}

/// OTLP exporter tagged with this service's name and version.
fn init_tracer(config: &Config, collector: &str) -> Tracer {
    let resource = Resource::new(vec![
        KeyValue::new("service.name", config.otel_service_name.clone()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]);

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                    config.otel_sampling_rate,
                ))))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource),
        )
        .with_batch_config(BatchConfig::default())
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(collector)
                .with_timeout(Duration::from_millis(config.otel_export_timeout_ms)),
        )
        .install_batch(runtime::Tokio)
        .expect("failed to start OTLP exporter")
}

/// Stdout defaults to `LOG_LEVEL` unless `RUST_LOG` says otherwise. Spans go
/// to the collector only when `OTEL_URL` is set.
fn init_tracing(config: &Config) {
    let level = LevelFilter::from_level(config.log_level);

    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy(),
    );
    let otel_layer = config
        .otel_url
        .as_deref()
        .map(|collector| OpenTelemetryLayer::new(init_tracer(config, collector)))
        .with_filter(level);

    tracing_subscriber::registry()
        .with(log_layer)
        .with(otel_layer)
        .init();
}

#[tokio::main]
async fn main() {
    let config = Config::init_from_env().expect("Invalid configuration:");
    init_tracing(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_path = %config.log_path,
        print_sink = config.print_sink,
        "starting scan-capture"
    );

    let listener = tokio::net::TcpListener::bind(config.address)
        .await
        .expect("could not bind port");
    serve(config, listener, shutdown()).await
}
