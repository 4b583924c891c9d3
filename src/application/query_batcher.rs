// Query batcher - coalescing point-range queries into shared backend requests
//
// The backend can serve many metrics in one request as long as the collection,
// `start_timestamp` and `limit` are the same. Queries sharing that key are
// accumulated for `accumulation_time` (counted from the first query of the
// batch) and then dispatched as one `BatchedQuery`. Results are routed back to
// each caller; a failed fetch fails every query of that batch.
use crate::domain::point::RawPoint;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const DEFAULT_ACCUMULATION_TIME: Duration = Duration::from_millis(5);

/// A request for one metric of one series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesQuery {
    /// Absent when there is only one collection.
    pub collection_id: Option<String>,
    pub series_id: String,
    pub metric_id: String,
    /// Newest window to return, `None` means the newest available.
    pub start_timestamp: Option<i64>,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchedQuery {
    pub collection_id: Option<String>,
    /// Series id -> metric ids, deduplicated.
    pub metrics: BTreeMap<String, Vec<String>>,
    pub start_timestamp: Option<i64>,
    pub limit: usize,
}

/// Series id -> metric id -> points.
pub type BatchedQueryResult = HashMap<String, HashMap<String, Vec<RawPoint>>>;

#[async_trait]
pub trait BatchFetcher: Send + Sync {
    async fn fetch_data(&self, query: &BatchedQuery) -> anyhow::Result<BatchedQueryResult>;
}

#[derive(Debug, Clone, Error)]
pub enum QueryError {
    #[error("batched fetch failed: {0:#}")]
    Fetch(Arc<anyhow::Error>),
    #[error("query batcher was destroyed before the batch was dispatched")]
    Cancelled,
}

type QueryResult = Result<Vec<RawPoint>, QueryError>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BatchKey {
    collection_id: Option<String>,
    start_timestamp: Option<i64>,
    limit: usize,
}

impl From<&SeriesQuery> for BatchKey {
    fn from(query: &SeriesQuery) -> Self {
        Self {
            collection_id: query.collection_id.clone(),
            start_timestamp: query.start_timestamp,
            limit: query.limit,
        }
    }
}

struct Waiter {
    series_id: String,
    metric_id: String,
    result_tx: oneshot::Sender<QueryResult>,
}

struct PendingBatch {
    metrics: BTreeMap<String, Vec<String>>,
    waiters: Vec<Waiter>,
    flush_timer: JoinHandle<()>,
}

struct Inner {
    fetcher: Arc<dyn BatchFetcher>,
    pending: Mutex<HashMap<BatchKey, PendingBatch>>,
    destroyed: AtomicBool,
}

#[derive(Clone)]
pub struct QueryBatcher {
    inner: Arc<Inner>,
    accumulation_time: Duration,
}

impl QueryBatcher {
    pub fn new(fetcher: Arc<dyn BatchFetcher>) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                pending: Mutex::new(HashMap::new()),
                destroyed: AtomicBool::new(false),
            }),
            accumulation_time: DEFAULT_ACCUMULATION_TIME,
        }
    }

    pub fn with_accumulation_time(mut self, accumulation_time: Duration) -> Self {
        self.accumulation_time = accumulation_time;
        self
    }

    pub fn accumulation_time(&self) -> Duration {
        self.accumulation_time
    }

    /// Registers the query immediately and resolves once its batch has been
    /// fetched. Must be called within a tokio runtime.
    pub fn query(&self, query: SeriesQuery) -> impl Future<Output = QueryResult> + Send + 'static + use<> {
        let (result_tx, result_rx) = oneshot::channel();
        self.enqueue(query, result_tx);
        async move { result_rx.await.unwrap_or(Err(QueryError::Cancelled)) }
    }

    /// Cancels every batch which has not been dispatched yet. Its queries
    /// fail with `QueryError::Cancelled`; dispatched batches complete
    /// normally. No batch is created afterwards.
    pub fn destroy(&self) {
        let cancelled: Vec<PendingBatch> = {
            let mut pending = self.inner.lock_pending();
            self.inner.destroyed.store(true, Ordering::Release);
            pending.drain().map(|(_, batch)| batch).collect()
        };
        if !cancelled.is_empty() {
            tracing::debug!("Cancelling {} pending query batches", cancelled.len());
        }
        for batch in cancelled {
            batch.flush_timer.abort();
        }
    }

    fn enqueue(&self, query: SeriesQuery, result_tx: oneshot::Sender<QueryResult>) {
        let key = BatchKey::from(&query);
        let mut pending = self.inner.lock_pending();
        // Read under the lock, so no batch opens after `destroy` drained the map.
        if self.inner.destroyed.load(Ordering::Acquire) {
            let _ = result_tx.send(Err(QueryError::Cancelled));
            return;
        }
        let batch = pending.entry(key.clone()).or_insert_with(|| {
            tracing::debug!(
                "Opening query batch for collection {:?}, start {:?}, limit {}",
                key.collection_id,
                key.start_timestamp,
                key.limit
            );
            PendingBatch {
                metrics: BTreeMap::new(),
                waiters: Vec::new(),
                flush_timer: self.spawn_flush_timer(key.clone()),
            }
        });

        let metric_ids = batch.metrics.entry(query.series_id.clone()).or_default();
        if !metric_ids.contains(&query.metric_id) {
            metric_ids.push(query.metric_id.clone());
        }
        batch.waiters.push(Waiter {
            series_id: query.series_id,
            metric_id: query.metric_id,
            result_tx,
        });
    }

    fn spawn_flush_timer(&self, key: BatchKey) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let accumulation_time = self.accumulation_time;
        tokio::spawn(async move {
            tokio::time::sleep(accumulation_time).await;
            inner.flush(key).await;
        })
    }
}

impl Inner {
    fn lock_pending(&self) -> MutexGuard<'_, HashMap<BatchKey, PendingBatch>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn flush(&self, key: BatchKey) {
        // Removing the batch closes it; later queries with the same key open a
        // new one.
        let Some(batch) = self.lock_pending().remove(&key) else {
            return;
        };

        let query = BatchedQuery {
            collection_id: key.collection_id,
            metrics: batch.metrics,
            start_timestamp: key.start_timestamp,
            limit: key.limit,
        };
        tracing::debug!(
            "Dispatching query batch with {} series for {} queries",
            query.metrics.len(),
            batch.waiters.len()
        );

        let result = self
            .fetcher
            .fetch_data(&query)
            .await
            .map_err(|e| QueryError::Fetch(Arc::new(e)));
        if let Err(e) = &result {
            tracing::error!("Query batch for collection {:?} failed: {}", query.collection_id, e);
        }

        for waiter in batch.waiters {
            let outcome = match &result {
                Ok(data) => Ok(data
                    .get(&waiter.series_id)
                    .and_then(|metrics| metrics.get(&waiter.metric_id))
                    .cloned()
                    .unwrap_or_default()),
                Err(e) => Err(e.clone()),
            };
            // The caller may have gone away in the meantime.
            let _ = waiter.result_tx.send(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCUMULATION: Duration = Duration::from_millis(5);

    /// Answers every metric with one point whose value encodes the series and
    /// metric ids ("s2" + "m3" -> 23). Fails when `fail` is set.
    #[derive(Default)]
    struct RecordingFetcher {
        calls: Mutex<Vec<BatchedQuery>>,
        fail: bool,
        delay: Option<Duration>,
        skip_metric: Option<String>,
    }

    fn id_digit(id: &str) -> f64 {
        id.trim_start_matches(|c: char| c.is_alphabetic())
            .parse()
            .unwrap_or(0.0)
    }

    #[async_trait]
    impl BatchFetcher for RecordingFetcher {
        async fn fetch_data(&self, query: &BatchedQuery) -> anyhow::Result<BatchedQueryResult> {
            self.calls.lock().unwrap().push(query.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                anyhow::bail!("backend unavailable");
            }
            let mut result = BatchedQueryResult::new();
            for (series_id, metric_ids) in &query.metrics {
                let metrics = result.entry(series_id.clone()).or_default();
                for metric_id in metric_ids {
                    if self.skip_metric.as_deref() == Some(metric_id.as_str()) {
                        continue;
                    }
                    let value = id_digit(series_id) * 10.0 + id_digit(metric_id);
                    metrics.insert(
                        metric_id.clone(),
                        vec![RawPoint::new(query.limit as i64, Some(value))],
                    );
                }
            }
            Ok(result)
        }
    }

    impl RecordingFetcher {
        fn calls(&self) -> Vec<BatchedQuery> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn batcher(fetcher: &Arc<RecordingFetcher>) -> QueryBatcher {
        QueryBatcher::new(fetcher.clone()).with_accumulation_time(ACCUMULATION)
    }

    fn query(series_id: &str, metric_id: &str) -> SeriesQuery {
        SeriesQuery {
            collection_id: Some("c1".to_string()),
            series_id: series_id.to_string(),
            metric_id: metric_id.to_string(),
            start_timestamp: Some(100),
            limit: 10,
        }
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_fetch_without_queries() {
        let fetcher = Arc::new(RecordingFetcher::default());
        let _batcher = batcher(&fetcher);

        sleep_ms(10).await;

        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_fetch_before_accumulation_time() {
        let fetcher = Arc::new(RecordingFetcher::default());
        let batcher = batcher(&fetcher);

        let _pending = tokio::spawn(batcher.query(query("s1", "m1")));
        sleep_ms(2).await;

        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queries_with_same_key_share_one_fetch() {
        let fetcher = Arc::new(RecordingFetcher::default());
        let batcher = batcher(&fetcher);

        let first = batcher.query(query("s1", "m1"));
        let second = batcher.query(query("s2", "m1"));
        let third = batcher.query(query("s2", "m2"));
        let (first, second, third) = tokio::join!(first, second, third);

        assert_eq!(first.unwrap(), vec![RawPoint::new(10, Some(11.0))]);
        assert_eq!(second.unwrap(), vec![RawPoint::new(10, Some(21.0))]);
        assert_eq!(third.unwrap(), vec![RawPoint::new(10, Some(22.0))]);

        let calls = fetcher.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            BatchedQuery {
                collection_id: Some("c1".to_string()),
                metrics: BTreeMap::from([
                    ("s1".to_string(), vec!["m1".to_string()]),
                    ("s2".to_string(), vec!["m1".to_string(), "m2".to_string()]),
                ]),
                start_timestamp: Some(100),
                limit: 10,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_queries_fetch_metric_once() {
        let fetcher = Arc::new(RecordingFetcher::default());
        let batcher = batcher(&fetcher);

        let (first, second) = tokio::join!(
            batcher.query(query("s1", "m1")),
            batcher.query(query("s1", "m1"))
        );

        assert_eq!(first.unwrap(), second.unwrap());
        let calls = fetcher.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].metrics["s1"], vec!["m1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_keys_are_never_merged() {
        let fetcher = Arc::new(RecordingFetcher::default());
        let batcher = batcher(&fetcher);

        let base = query("s1", "m1");
        let other_start = SeriesQuery {
            start_timestamp: Some(200),
            ..query("s1", "m1")
        };
        let other_limit = SeriesQuery {
            limit: 20,
            ..query("s1", "m1")
        };
        let other_collection = SeriesQuery {
            collection_id: None,
            ..query("s1", "m1")
        };
        let results = futures::future::join_all(vec![
            batcher.query(base),
            batcher.query(other_start),
            batcher.query(other_limit),
            batcher.query(other_collection),
        ])
        .await;

        assert!(results.iter().all(Result::is_ok));
        let calls = fetcher.calls();
        assert_eq!(calls.len(), 4);
        let mut keys: Vec<(Option<String>, Option<i64>, usize)> = calls
            .iter()
            .map(|c| (c.collection_id.clone(), c.start_timestamp, c.limit))
            .collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                (None, Some(100), 10),
                (Some("c1".to_string()), Some(100), 10),
                (Some("c1".to_string()), Some(100), 20),
                (Some("c1".to_string()), Some(200), 10),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_accumulation_window_is_not_restarted() {
        let fetcher = Arc::new(RecordingFetcher::default());
        let batcher = batcher(&fetcher);

        let first = tokio::spawn(batcher.query(query("s1", "m1")));
        sleep_ms(3).await;
        let second = tokio::spawn(batcher.query(query("s2", "m1")));
        sleep_ms(3).await;

        // Dispatched 5 ms after the first query, with both queries inside.
        let calls = fetcher.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].metrics.len(), 2);
        assert!(first.await.unwrap().is_ok());
        assert!(second.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_after_dispatch_opens_new_batch() {
        let fetcher = Arc::new(RecordingFetcher::default());
        let batcher = batcher(&fetcher);

        batcher.query(query("s1", "m1")).await.unwrap();
        batcher.query(query("s2", "m1")).await.unwrap();

        let calls = fetcher.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].metrics.contains_key("s1"));
        assert!(calls[1].metrics.contains_key("s2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_sub_result_resolves_empty() {
        let fetcher = Arc::new(RecordingFetcher {
            skip_metric: Some("m2".to_string()),
            ..RecordingFetcher::default()
        });
        let batcher = batcher(&fetcher);

        let (present, missing) = tokio::join!(
            batcher.query(query("s1", "m1")),
            batcher.query(query("s1", "m2"))
        );

        assert_eq!(present.unwrap().len(), 1);
        assert!(missing.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_fails_every_query_of_batch() {
        let fetcher = Arc::new(RecordingFetcher {
            fail: true,
            ..RecordingFetcher::default()
        });
        let batcher = batcher(&fetcher);

        let (first, second) = tokio::join!(
            batcher.query(query("s1", "m1")),
            batcher.query(query("s2", "m2"))
        );

        match (first, second) {
            (Err(QueryError::Fetch(a)), Err(QueryError::Fetch(b))) => {
                assert!(Arc::ptr_eq(&a, &b));
                assert_eq!(a.to_string(), "backend unavailable");
            }
            other => panic!("expected shared fetch failure, got {:?}", other),
        }
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_cancels_pending_batches() {
        let fetcher = Arc::new(RecordingFetcher::default());
        let batcher = batcher(&fetcher);

        let pending = batcher.query(query("s1", "m1"));
        batcher.destroy();
        sleep_ms(10).await;

        assert!(matches!(pending.await, Err(QueryError::Cancelled)));
        assert!(matches!(
            batcher.query(query("s1", "m1")).await,
            Err(QueryError::Cancelled)
        ));
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_batch_outlives_concurrent_destroy() {
        let fetcher = Arc::new(RecordingFetcher::default());
        let batcher = QueryBatcher::new(fetcher.clone()).with_accumulation_time(Duration::from_secs(3600));

        let workers: Vec<_> = (0..4i64)
            .map(|worker| {
                let batcher = batcher.clone();
                tokio::spawn(async move {
                    (0..200i64)
                        .map(|i| {
                            batcher.query(SeriesQuery {
                                start_timestamp: Some(worker * 1000 + i),
                                ..query("s1", "m1")
                            })
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        batcher.destroy();

        let mut pending = Vec::new();
        for worker in workers {
            pending.extend(worker.await.unwrap());
        }
        assert!(batcher.inner.lock_pending().is_empty());
        for result in pending {
            assert!(matches!(result.await, Err(QueryError::Cancelled)));
        }
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_keeps_dispatched_batches() {
        let fetcher = Arc::new(RecordingFetcher {
            delay: Some(Duration::from_millis(20)),
            ..RecordingFetcher::default()
        });
        let batcher = batcher(&fetcher);

        let dispatched = tokio::spawn(batcher.query(query("s1", "m1")));
        sleep_ms(6).await;
        assert_eq!(fetcher.calls().len(), 1);

        batcher.destroy();

        assert_eq!(
            dispatched.await.unwrap().unwrap(),
            vec![RawPoint::new(10, Some(11.0))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_caller_does_not_affect_others() {
        let fetcher = Arc::new(RecordingFetcher::default());
        let batcher = batcher(&fetcher);

        drop(batcher.query(query("s1", "m1")));
        let kept = batcher.query(query("s1", "m2"));

        assert_eq!(kept.await.unwrap(), vec![RawPoint::new(10, Some(12.0))]);
        assert_eq!(fetcher.calls()[0].metrics["s1"].len(), 2);
    }
}
