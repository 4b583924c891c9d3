// In-memory external data source, loaded from a JSON file
use crate::application::external_source::{ExternalDataSource, SeriesFetchParams};
use crate::domain::point::RawPoint;
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Samples per series id. Samples are aggregated (mean) into windows of the
/// requested resolution.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    series: HashMap<String, Vec<RawPoint>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StaticSeriesParameters {
    series_id: String,
}

impl StaticSource {
    pub fn new(series: HashMap<String, Vec<RawPoint>>) -> Self {
        Self { series }
    }

    /// The file maps series ids to `[timestamp, value]` pairs.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read static series from {}", path.display()))?;
        let raw: HashMap<String, Vec<(i64, Option<f64>)>> = serde_json::from_str(&content)
            .with_context(|| format!("Invalid static series in {}", path.display()))?;

        let series = raw
            .into_iter()
            .map(|(id, samples)| {
                let points = samples
                    .into_iter()
                    .map(|(timestamp, value)| RawPoint::new(timestamp, value))
                    .collect();
                (id, points)
            })
            .collect();
        Ok(Self::new(series))
    }
}

#[async_trait]
impl ExternalDataSource for StaticSource {
    async fn fetch_series(
        &self,
        params: SeriesFetchParams,
        source_parameters: &Value,
    ) -> anyhow::Result<Vec<RawPoint>> {
        let parameters: StaticSeriesParameters = serde_json::from_value(source_parameters.clone())
            .with_context(|| format!("Invalid static series parameters: {}", source_parameters))?;
        let Some(samples) = self.series.get(&parameters.series_id) else {
            return Ok(Vec::new());
        };
        Ok(aggregate_windows(samples, params))
    }

    async fn fetch_dynamic_series_configs(&self, _source_parameters: &Value) -> anyhow::Result<Vec<Value>> {
        let mut ids: Vec<&String> = self.series.keys().collect();
        ids.sort();
        Ok(ids
            .into_iter()
            .map(|id| {
                json!({
                    "id": id,
                    "name": id,
                    "sourceParameters": { "seriesId": id },
                })
            })
            .collect())
    }
}

/// Newest `windows_count` windows up to `last_window_timestamp`, newest first.
fn aggregate_windows(samples: &[RawPoint], params: SeriesFetchParams) -> Vec<RawPoint> {
    if params.time_resolution <= 0 {
        return Vec::new();
    }
    let mut windows: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
    for sample in samples {
        let window = sample.timestamp - sample.timestamp.rem_euclid(params.time_resolution);
        if params.last_window_timestamp.is_some_and(|last| window > last) {
            continue;
        }
        let entry = windows.entry(window).or_insert((0.0, 0));
        if let Some(value) = sample.value {
            entry.0 += value;
            entry.1 += 1;
        }
    }

    windows
        .into_iter()
        .rev()
        .take(params.windows_count)
        .map(|(timestamp, (sum, count))| {
            let value = (count > 0).then(|| sum / count as f64);
            RawPoint::new(timestamp, value)
        })
        .collect()
}
