pub mod api;
pub mod commit;
pub mod config;
pub mod dedup;
pub mod event;
pub mod ingest;
pub mod payload;
pub mod prometheus;
pub mod resolver;
pub mod router;
pub mod scan_endpoint;
pub mod server;
pub mod sinks;
pub mod time;
pub mod validator;
