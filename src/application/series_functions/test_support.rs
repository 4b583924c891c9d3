// Helpers shared by series function tests
use crate::application::external_source::{
    ExternalDataSource, ExternalDataSources, SeriesFetchParams,
};
use crate::application::series_context::SeriesContext;
use crate::domain::point::RawPoint;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Returns fixed samples and records every fetch.
#[derive(Default)]
pub struct RecordingSource {
    pub points: Vec<RawPoint>,
    pub fail: bool,
    pub fetches: Mutex<Vec<(SeriesFetchParams, Value)>>,
}

impl RecordingSource {
    pub fn with_points(points: &[(i64, f64)]) -> Self {
        Self {
            points: points
                .iter()
                .map(|(timestamp, value)| RawPoint::new(*timestamp, Some(*value)))
                .collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ExternalDataSource for RecordingSource {
    async fn fetch_series(
        &self,
        params: SeriesFetchParams,
        source_parameters: &Value,
    ) -> anyhow::Result<Vec<RawPoint>> {
        self.fetches
            .lock()
            .unwrap()
            .push((params, source_parameters.clone()));
        if self.fail {
            anyhow::bail!("backend unavailable");
        }
        Ok(self.points.clone())
    }
}

pub fn context_with(
    sources: Vec<(&str, Arc<RecordingSource>)>,
    last_window_timestamp: Option<i64>,
) -> SeriesContext {
    let sources: ExternalDataSources = sources
        .into_iter()
        .map(|(name, source)| (name.to_string(), source as Arc<dyn ExternalDataSource>))
        .collect();
    SeriesContext::new(60, 3, last_window_timestamp, 1000, Arc::new(sources))
}
