// Main entry point - Dependency injection and server setup
use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{routing::get, Router};
use tower_http::compression::predicate::{DefaultPredicate, NotForContentType, Predicate};
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use series_charts::application::chart_service::ChartService;
use series_charts::application::clock::SystemClock;
use series_charts::application::external_source::{ExternalDataSource, ExternalDataSources};
use series_charts::application::query_batcher::QueryBatcher;
use series_charts::infrastructure::batched_source::BatchedInfluxSource;
use series_charts::infrastructure::config::{load_chart_definitions, load_server_config};
use series_charts::infrastructure::influx_fetcher::InfluxBatchFetcher;
use series_charts::infrastructure::ndjson::NDJSON_CONTENT_TYPE;
use series_charts::infrastructure::static_source::StaticSource;
use series_charts::presentation::app_state::AppState;
use series_charts::presentation::handlers::{chart_state, health_check, list_charts, stream_chart};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,series_charts=debug")),
        )
        .init();

    // Load configuration
    let config = load_server_config()?;
    let definitions = load_chart_definitions(&config.charts.definitions_path)?;

    // Create data sources (infrastructure layer)
    let fetcher = Arc::new(InfluxBatchFetcher::new(&config.influx));
    let batcher = QueryBatcher::new(fetcher.clone()).with_accumulation_time(config.batching.accumulation_time());
    let influx_source = BatchedInfluxSource::new(
        batcher.clone(),
        fetcher.clone(),
        config.influx.default_aggregator.clone(),
    );

    let mut sources = ExternalDataSources::new();
    sources.insert("influx".to_string(), Arc::new(influx_source) as Arc<dyn ExternalDataSource>);
    if let Some(path) = &config.charts.static_series_path {
        let static_source = StaticSource::from_json_file(path)?;
        sources.insert("static".to_string(), Arc::new(static_source));
    }

    // Create services (application layer)
    let chart_service = ChartService::new(
        definitions,
        sources,
        config.charts.resolution_specs(),
        Arc::new(SystemClock),
    )
    .with_live_timestamp_offset(config.charts.live_timestamp_offset);

    // Create application state
    let state = Arc::new(AppState { chart_service });

    // Build router (presentation layer)
    // Live streams are left uncompressed so every state is flushed right away
    let compression = CompressionLayer::new()
        .compress_when(DefaultPredicate::new().and(NotForContentType::new(NDJSON_CONTENT_TYPE)));
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/charts", get(list_charts))
        .route("/charts/:id", get(chart_state))
        .route("/charts/:id/live", get(stream_chart))
        .layer(compression)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = config
        .server
        .bind_address
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind_address))?;
    tracing::info!("Starting series-charts service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router).await?;

    batcher.destroy();
    Ok(())
}
