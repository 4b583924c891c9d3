// Infrastructure layer - External dependencies and adapters
pub mod batched_source;
pub mod config;
pub mod influx_fetcher;
pub mod ndjson;
pub mod static_source;
