// External data source backed by the query batcher
//
// Every series of a chart asks for its own points; the batcher folds those
// requests into one backend query per (collection, start, limit).
use crate::application::external_source::{ExternalDataSource, SeriesFetchParams};
use crate::application::query_batcher::{QueryBatcher, SeriesQuery};
use crate::domain::point::RawPoint;
use crate::infrastructure::influx_fetcher::InfluxBatchFetcher;
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Lists the series available for dynamic series.
#[async_trait]
pub trait SeriesCatalog: Send + Sync {
    async fn list_series_ids(&self, collection_id: Option<&str>) -> anyhow::Result<Vec<String>>;
}

#[async_trait]
impl SeriesCatalog for InfluxBatchFetcher {
    async fn list_series_ids(&self, collection_id: Option<&str>) -> anyhow::Result<Vec<String>> {
        InfluxBatchFetcher::list_series_ids(self, collection_id).await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeriesParameters {
    #[serde(default)]
    collection_id: Option<String>,
    series_id: String,
    #[serde(default)]
    aggregator: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogParameters {
    #[serde(default)]
    collection_id: Option<String>,
}

#[derive(Clone)]
pub struct BatchedInfluxSource {
    batcher: QueryBatcher,
    catalog: Arc<dyn SeriesCatalog>,
    default_aggregator: String,
}

impl BatchedInfluxSource {
    pub fn new(batcher: QueryBatcher, catalog: Arc<dyn SeriesCatalog>, default_aggregator: String) -> Self {
        Self {
            batcher,
            catalog,
            default_aggregator,
        }
    }
}

#[async_trait]
impl ExternalDataSource for BatchedInfluxSource {
    async fn fetch_series(
        &self,
        params: SeriesFetchParams,
        source_parameters: &Value,
    ) -> anyhow::Result<Vec<RawPoint>> {
        let parameters: SeriesParameters = serde_json::from_value(source_parameters.clone())
            .with_context(|| format!("Invalid series parameters: {}", source_parameters))?;
        let aggregator = parameters
            .aggregator
            .as_deref()
            .unwrap_or(&self.default_aggregator);

        let query = SeriesQuery {
            collection_id: parameters.collection_id,
            metric_id: format!("{}:{}", aggregator, params.time_resolution),
            series_id: parameters.series_id,
            start_timestamp: params.last_window_timestamp,
            limit: params.windows_count,
        };
        Ok(self.batcher.query(query).await?)
    }

    async fn fetch_dynamic_series_configs(&self, source_parameters: &Value) -> anyhow::Result<Vec<Value>> {
        let parameters: CatalogParameters = if source_parameters.is_null() {
            CatalogParameters::default()
        } else {
            serde_json::from_value(source_parameters.clone())
                .with_context(|| format!("Invalid catalog parameters: {}", source_parameters))?
        };

        let series_ids = self
            .catalog
            .list_series_ids(parameters.collection_id.as_deref())
            .await?;

        Ok(series_ids
            .into_iter()
            .map(|series_id| {
                let mut source_parameters = json!({ "seriesId": series_id });
                if let Some(collection_id) = &parameters.collection_id {
                    source_parameters["collectionId"] = json!(collection_id);
                }
                json!({
                    "id": series_id,
                    "name": series_id,
                    "sourceParameters": source_parameters,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::query_batcher::{BatchFetcher, BatchedQuery, BatchedQueryResult};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeBackend {
        queries: Mutex<Vec<BatchedQuery>>,
    }

    #[async_trait]
    impl BatchFetcher for FakeBackend {
        async fn fetch_data(&self, query: &BatchedQuery) -> anyhow::Result<BatchedQueryResult> {
            self.queries.lock().unwrap().push(query.clone());
            Ok(query
                .metrics
                .iter()
                .map(|(series_id, metric_ids)| {
                    let metrics: HashMap<String, Vec<RawPoint>> = metric_ids
                        .iter()
                        .map(|metric_id| {
                            (
                                metric_id.clone(),
                                vec![RawPoint::new(query.start_timestamp.unwrap_or(0), Some(1.0))],
                            )
                        })
                        .collect();
                    (series_id.clone(), metrics)
                })
                .collect())
        }
    }

    #[async_trait]
    impl SeriesCatalog for FakeBackend {
        async fn list_series_ids(&self, collection_id: Option<&str>) -> anyhow::Result<Vec<String>> {
            anyhow::ensure!(collection_id == Some("reef"), "unknown collection");
            Ok(vec!["ph".to_string(), "temp".to_string()])
        }
    }

    fn source(backend: &Arc<FakeBackend>) -> BatchedInfluxSource {
        let batcher = QueryBatcher::new(backend.clone()).with_accumulation_time(Duration::from_millis(5));
        BatchedInfluxSource::new(batcher, backend.clone(), "mean".to_string())
    }

    fn params() -> SeriesFetchParams {
        SeriesFetchParams {
            last_window_timestamp: Some(600),
            time_resolution: 60,
            windows_count: 4,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_series_share_one_backend_query() {
        let backend = Arc::new(FakeBackend::default());
        let source = source(&backend);

        let ph = json!({ "collectionId": "reef", "seriesId": "ph" });
        let temp = json!({ "collectionId": "reef", "seriesId": "temp", "aggregator": "max" });
        let (ph, temp) = tokio::join!(
            source.fetch_series(params(), &ph),
            source.fetch_series(params(), &temp)
        );

        assert_eq!(ph.unwrap(), vec![RawPoint::new(600, Some(1.0))]);
        assert_eq!(temp.unwrap().len(), 1);
        let queries = backend.queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].collection_id.as_deref(), Some("reef"));
        assert_eq!(queries[0].limit, 4);
        assert_eq!(queries[0].metrics["ph"], vec!["mean:60".to_string()]);
        assert_eq!(queries[0].metrics["temp"], vec!["max:60".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_parameters_are_rejected() {
        let backend = Arc::new(FakeBackend::default());
        let result = source(&backend)
            .fetch_series(params(), &json!({ "collectionId": "reef" }))
            .await;
        assert!(result.is_err());
        assert!(backend.queries.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dynamic_series_configs() {
        let backend = Arc::new(FakeBackend::default());

        let configs = source(&backend)
            .fetch_dynamic_series_configs(&json!({ "collectionId": "reef" }))
            .await
            .unwrap();

        assert_eq!(
            configs[0],
            json!({
                "id": "ph",
                "name": "ph",
                "sourceParameters": { "seriesId": "ph", "collectionId": "reef" }
            })
        );
        assert_eq!(configs.len(), 2);
        assert!(source(&backend)
            .fetch_dynamic_series_configs(&Value::Null)
            .await
            .is_err());
    }
}
