// Data source traits consumed by the series evaluator
use crate::domain::point::RawPoint;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// What `loadSeries` asks an external source for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesFetchParams {
    /// Newest window to return, `None` means "up to now".
    pub last_window_timestamp: Option<i64>,
    pub time_resolution: i64,
    pub windows_count: usize,
}

#[async_trait]
pub trait ExternalDataSource: Send + Sync {
    /// Fetch raw points of one series. Points may come unsorted and sparse.
    async fn fetch_series(
        &self,
        params: SeriesFetchParams,
        source_parameters: &Value,
    ) -> anyhow::Result<Vec<RawPoint>>;

    /// Configs used to instantiate dynamic series. Sources without dynamic
    /// series return nothing.
    async fn fetch_dynamic_series_configs(
        &self,
        _source_parameters: &Value,
    ) -> anyhow::Result<Vec<Value>> {
        Ok(Vec::new())
    }
}

/// Named sources available to chart definitions (e.g. `"store"`).
pub type ExternalDataSources = HashMap<String, Arc<dyn ExternalDataSource>>;
