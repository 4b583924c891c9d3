// HTTP request handlers
use crate::application::chart_configuration::ViewParameters;
use crate::infrastructure::ndjson::stream_from_receiver;
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartQuery {
    pub resolution: Option<i64>,
    pub last_window_timestamp: Option<i64>,
    pub live: Option<bool>,
}

impl From<ChartQuery> for ViewParameters {
    fn from(query: ChartQuery) -> Self {
        ViewParameters {
            live: query.live,
            last_window_timestamp: query.last_window_timestamp,
            time_resolution: query.resolution,
        }
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// List all charts
pub async fn list_charts(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.chart_service.list_charts())
}

/// Current state of one chart
pub async fn chart_state(
    Path(id): Path<String>,
    Query(query): Query<ChartQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.chart_service.chart_state(&id, query.into()).await {
        Some(chart_state) => Json(chart_state).into_response(),
        None => chart_not_found(&id),
    }
}

/// Stream chart states, one per live update
pub async fn stream_chart(
    Path(id): Path<String>,
    Query(query): Query<ChartQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.chart_service.stream_chart(&id, query.into()) {
        Some(rx) => stream_from_receiver(rx).into_response(),
        None => chart_not_found(&id),
    }
}

fn chart_not_found(id: &str) -> Response {
    tracing::debug!("Requested unknown chart {}", id);
    (StatusCode::NOT_FOUND, format!("unknown chart {}", id)).into_response()
}
