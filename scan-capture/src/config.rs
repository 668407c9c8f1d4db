use std::net::SocketAddr;
use std::time::Duration;

use envconfig::Envconfig;
use tracing::Level;

use crate::resolver::FieldResolver;
use crate::validator::IdentifierFormat;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(default = "127.0.0.1:3000")]
    pub address: SocketAddr,

    #[envconfig(default = "scans.db")]
    pub log_path: String,

    // Used for integration tests
    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(default = "^20\\d{5}$")]
    pub scan_id_pattern: String,

    #[envconfig(default = "20000")]
    pub dedup_window_ms: u64,

    #[envconfig(default = "100000")]
    pub dedup_max_capacity: u64,

    #[envconfig(default = "10000")]
    pub lock_timeout_ms: u64,

    // How long an append waits on another process writing the same file,
    // on top of lock_timeout_ms
    #[envconfig(default = "2000")]
    pub log_busy_timeout_ms: u64,

    #[envconfig(default = "50")]
    pub max_batch_size: usize,

    #[envconfig(default = "7")]
    pub school_year_rollover_month: u8, // first month of the next school year

    pub otel_url: Option<String>,

    #[envconfig(default = "1.0")]
    pub otel_sampling_rate: f64,

    #[envconfig(default = "scan-capture")]
    pub otel_service_name: String,

    #[envconfig(default = "3000")]
    pub otel_export_timeout_ms: u64,

    #[envconfig(default = "info")]
    pub log_level: Level,
}

impl Config {
    pub fn identifier_format(&self) -> Result<IdentifierFormat, regex::Error> {
        IdentifierFormat::new(&self.scan_id_pattern)
    }

    pub fn field_resolver(&self) -> Result<FieldResolver, time::error::ComponentRange> {
        FieldResolver::new(self.school_year_rollover_month)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn log_busy_timeout(&self) -> Duration {
        Duration::from_millis(self.log_busy_timeout_ms)
    }
}
