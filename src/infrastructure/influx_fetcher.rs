// InfluxDB batch fetcher - one HTTP request per query batch
use crate::application::query_batcher::{BatchFetcher, BatchedQuery, BatchedQueryResult};
use crate::domain::point::RawPoint;
use crate::infrastructure::config::InfluxSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

const AGGREGATORS: &[&str] = &["mean", "median", "sum", "min", "max", "first", "last", "count"];

#[derive(Debug, Clone)]
pub struct InfluxBatchFetcher {
    client: reqwest::Client,
    host: String,
    token: String,
    database: String,
    retention_policy: String,
    measurement: String,
    collection_tag: String,
    series_tag: String,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResponse {
    #[serde(default)]
    results: Vec<InfluxQLResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResult {
    #[serde(default)]
    statement_id: usize,
    #[serde(default)]
    series: Option<Vec<InfluxQLSeries>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLSeries {
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// A metric id has the form `<aggregator>:<resolution seconds>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricSpec<'a> {
    pub aggregator: &'a str,
    pub time_resolution: i64,
}

impl<'a> MetricSpec<'a> {
    pub fn parse(metric_id: &'a str) -> Option<Self> {
        let (aggregator, resolution) = metric_id.split_once(':')?;
        let time_resolution: i64 = resolution.parse().ok()?;
        if time_resolution <= 0 || !AGGREGATORS.contains(&aggregator) {
            return None;
        }
        Some(Self {
            aggregator,
            time_resolution,
        })
    }
}

/// Which (series, metric) a statement of a multi-statement query answers.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StatementTarget {
    series_id: String,
    metric_id: String,
}

impl InfluxBatchFetcher {
    pub fn new(settings: &InfluxSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: settings.host.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
            database: settings.database.clone(),
            retention_policy: settings.retention_policy.clone(),
            measurement: settings.measurement.clone(),
            collection_tag: settings.collection_tag.clone(),
            series_tag: settings.series_tag.clone(),
        }
    }

    fn build_query_url(&self, query: &str) -> String {
        format!(
            "{}/query?db={}&rp={}&epoch=s&q={}",
            self.host,
            urlencoding::encode(&self.database),
            urlencoding::encode(&self.retention_policy),
            urlencoding::encode(query)
        )
    }

    async fn execute_query(&self, query: &str) -> Result<InfluxQLResponse> {
        let url = self.build_query_url(query);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to send request to InfluxDB")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("InfluxDB query failed with status {}: {}", status, body);
        }

        let data = response
            .json::<InfluxQLResponse>()
            .await
            .context("Failed to parse InfluxDB response")?;

        if let Some(error) = &data.error {
            anyhow::bail!("InfluxDB query error: {}", error);
        }

        Ok(data)
    }

    /// One statement per requested metric. Metrics with unsupported ids are
    /// left out (and later resolve to no points).
    fn build_statements(&self, query: &BatchedQuery) -> Vec<(StatementTarget, String)> {
        let mut statements = Vec::new();
        for (series_id, metric_ids) in &query.metrics {
            for metric_id in metric_ids {
                let Some(metric) = MetricSpec::parse(metric_id) else {
                    tracing::warn!("Unsupported metric id {} for series {}", metric_id, series_id);
                    continue;
                };
                statements.push((
                    StatementTarget {
                        series_id: series_id.clone(),
                        metric_id: metric_id.clone(),
                    },
                    self.build_statement(query, series_id, metric),
                ));
            }
        }
        statements
    }

    fn build_statement(&self, query: &BatchedQuery, series_id: &str, metric: MetricSpec<'_>) -> String {
        let resolution = metric.time_resolution;
        let span = resolution * query.limit.max(1) as i64;

        let mut conditions = vec![format!(
            "{} = '{}'",
            quote_identifier(&self.series_tag),
            escape_literal(series_id)
        )];
        if let Some(collection_id) = &query.collection_id {
            conditions.push(format!(
                "{} = '{}'",
                quote_identifier(&self.collection_tag),
                escape_literal(collection_id)
            ));
        }
        match query.start_timestamp {
            Some(start) => {
                let end = start + resolution;
                conditions.push(format!("time >= {}s AND time < {}s", end - span, end));
            }
            None => conditions.push(format!("time >= now() - {}s", span)),
        }

        format!(
            "SELECT {}(\"value\") AS \"value\" FROM {} WHERE {} GROUP BY time({}s) fill(none) ORDER BY time DESC LIMIT {}",
            metric.aggregator,
            quote_identifier(&self.measurement),
            conditions.join(" AND "),
            resolution,
            query.limit
        )
    }

    /// Distinct series ids of a collection (or of the whole measurement).
    pub async fn list_series_ids(&self, collection_id: Option<&str>) -> Result<Vec<String>> {
        let mut query = format!(
            "SHOW TAG VALUES FROM {} WITH KEY = {}",
            quote_identifier(&self.measurement),
            quote_identifier(&self.series_tag)
        );
        if let Some(collection_id) = collection_id {
            query.push_str(&format!(
                " WHERE {} = '{}'",
                quote_identifier(&self.collection_tag),
                escape_literal(collection_id)
            ));
        }
        let response = self.execute_query(&query).await?;

        let mut ids = Vec::new();
        for result in &response.results {
            if let Some(error) = &result.error {
                anyhow::bail!("InfluxDB query error: {}", error);
            }
            for series in result.series.iter().flatten() {
                for row in &series.values {
                    if let Some(id) = row.get(1).and_then(|v| v.as_str()) {
                        ids.push(id.to_string());
                    }
                }
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl BatchFetcher for InfluxBatchFetcher {
    async fn fetch_data(&self, query: &BatchedQuery) -> Result<BatchedQueryResult> {
        let statements = self.build_statements(query);
        if statements.is_empty() {
            return Ok(BatchedQueryResult::new());
        }

        let joined = statements
            .iter()
            .map(|(_, statement)| statement.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        tracing::debug!(
            "Executing {} statements for collection {:?}",
            statements.len(),
            query.collection_id
        );

        let response = self.execute_query(&joined).await?;
        let targets: Vec<StatementTarget> = statements.into_iter().map(|(target, _)| target).collect();
        Ok(map_results(response, &targets))
    }
}

fn map_results(response: InfluxQLResponse, targets: &[StatementTarget]) -> BatchedQueryResult {
    let mut result = BatchedQueryResult::new();
    for statement_result in response.results {
        let Some(target) = targets.get(statement_result.statement_id) else {
            continue;
        };
        if let Some(error) = &statement_result.error {
            tracing::error!(
                "InfluxDB statement for series {} ({}) failed: {}",
                target.series_id,
                target.metric_id,
                error
            );
            continue;
        }

        let points: Vec<RawPoint> = statement_result
            .series
            .iter()
            .flatten()
            .flat_map(series_points)
            .collect();
        result
            .entry(target.series_id.clone())
            .or_insert_with(HashMap::new)
            .insert(target.metric_id.clone(), points);
    }
    result
}

fn series_points(series: &InfluxQLSeries) -> Vec<RawPoint> {
    let time_idx = series.columns.iter().position(|c| c == "time").unwrap_or(0);
    let value_idx = series.columns.iter().position(|c| c == "value").unwrap_or(1);

    series
        .values
        .iter()
        .filter_map(|row| {
            let timestamp = row.get(time_idx)?.as_i64()?;
            let value = row.get(value_idx).and_then(|v| v.as_f64());
            Some(RawPoint::new(timestamp, value))
        })
        .collect()
}

fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('\\', "\\\\").replace('"', "\\\""))
}

fn escape_literal(literal: &str) -> String {
    literal.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn fetcher() -> InfluxBatchFetcher {
        InfluxBatchFetcher::new(&InfluxSettings {
            host: "http://localhost:8086/".to_string(),
            token: "secret".to_string(),
            database: "metrics".to_string(),
            retention_policy: "autogen".to_string(),
            measurement: "series".to_string(),
            collection_tag: "host".to_string(),
            series_tag: "name".to_string(),
            default_aggregator: "mean".to_string(),
        })
    }

    fn batched_query(start_timestamp: Option<i64>) -> BatchedQuery {
        BatchedQuery {
            collection_id: Some("reef".to_string()),
            metrics: BTreeMap::from([
                ("ph".to_string(), vec!["mean:60".to_string(), "bogus".to_string()]),
                ("temp".to_string(), vec!["max:3600".to_string()]),
            ]),
            start_timestamp,
            limit: 4,
        }
    }

    #[test]
    fn test_parse_metric_spec() {
        assert_eq!(
            MetricSpec::parse("sum:60"),
            Some(MetricSpec {
                aggregator: "sum",
                time_resolution: 60
            })
        );
        assert_eq!(MetricSpec::parse("sum"), None);
        assert_eq!(MetricSpec::parse("drop:60"), None);
        assert_eq!(MetricSpec::parse("mean:0"), None);
    }

    #[test]
    fn test_build_statements_for_anchored_batch() {
        let statements = fetcher().build_statements(&batched_query(Some(600)));

        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[0].0,
            StatementTarget {
                series_id: "ph".to_string(),
                metric_id: "mean:60".to_string()
            }
        );
        assert_eq!(
            statements[0].1,
            "SELECT mean(\"value\") AS \"value\" FROM \"series\" WHERE \"name\" = 'ph' AND \"host\" = 'reef' \
             AND time >= 420s AND time < 660s GROUP BY time(60s) fill(none) ORDER BY time DESC LIMIT 4"
        );
        assert_eq!(statements[1].0.series_id, "temp");
    }

    #[test]
    fn test_build_statement_for_live_batch_escapes_literals() {
        let mut query = batched_query(None);
        query.collection_id = None;
        query.metrics = BTreeMap::from([("o'clock".to_string(), vec!["last:5".to_string()])]);

        let statements = fetcher().build_statements(&query);

        assert_eq!(
            statements[0].1,
            "SELECT last(\"value\") AS \"value\" FROM \"series\" WHERE \"name\" = 'o\\'clock' \
             AND time >= now() - 20s GROUP BY time(5s) fill(none) ORDER BY time DESC LIMIT 4"
        );
    }

    #[test]
    fn test_query_url() {
        let url = fetcher().build_query_url("SHOW DATABASES");
        assert_eq!(
            url,
            "http://localhost:8086/query?db=metrics&rp=autogen&epoch=s&q=SHOW%20DATABASES"
        );
    }

    #[test]
    fn test_map_results_by_statement_id() {
        let response: InfluxQLResponse = serde_json::from_value(json!({
            "results": [
                {
                    "statement_id": 1,
                    "series": [{
                        "name": "series",
                        "columns": ["time", "value"],
                        "values": [[3600, 21.5], [0, null]]
                    }]
                },
                { "statement_id": 0 },
                { "statement_id": 2, "error": "boom" }
            ]
        }))
        .unwrap();
        let targets = vec![
            StatementTarget {
                series_id: "ph".to_string(),
                metric_id: "mean:60".to_string(),
            },
            StatementTarget {
                series_id: "temp".to_string(),
                metric_id: "max:3600".to_string(),
            },
            StatementTarget {
                series_id: "orp".to_string(),
                metric_id: "mean:60".to_string(),
            },
        ];

        let result = map_results(response, &targets);

        assert_eq!(result["ph"]["mean:60"], Vec::new());
        assert_eq!(
            result["temp"]["max:3600"],
            vec![RawPoint::new(3600, Some(21.5)), RawPoint::new(0, None)]
        );
        assert!(!result.contains_key("orp"));
    }
}
