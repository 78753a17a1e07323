//! Query Executors
//!
//! [`QueryExecutor`] runs one instant query end to end: cache lookup,
//! admission through a process-wide concurrency gate, retry with quadratic
//! backoff, cache population and outcome accounting.
//!
//! [`ParallelQueryExecutor`] fans a batch of widget queries out to the
//! single-query path and collects one result per widget.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, instrument, warn};

use super::cache::{CacheKey, MetricCache};
use super::config::ExecutorConfig;
use crate::domain::{IdentifiableGatherer, MetricSeries, Query, TimeRange};
use crate::error::{Error, Result};
use crate::fault;
use crate::telemetry;

// =============================================================================
// Execution Metrics
// =============================================================================

/// Query outcome counters of an executor
#[derive(Debug, Default)]
pub struct ExecutionMetrics {
    total_queries: AtomicU64,
    cache_hits: AtomicU64,
    errors: AtomicU64,
    successes: AtomicU64,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        telemetry::record_query_outcome("cache_hit");
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        telemetry::record_query_outcome("error");
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        telemetry::record_query_outcome("success");
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ExecutionStats {
        ExecutionStats {
            total_queries: self.total_queries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`ExecutionMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionStats {
    pub total_queries: u64,
    pub cache_hits: u64,
    pub errors: u64,
    pub successes: u64,
}

// =============================================================================
// Query Executor
// =============================================================================

/// Executes instant queries with caching, bounded concurrency and retry.
pub struct QueryExecutor {
    config: ExecutorConfig,
    cache: Arc<MetricCache>,
    semaphore: Option<Arc<Semaphore>>,
    metrics: ExecutionMetrics,
}

impl QueryExecutor {
    pub fn new(config: ExecutorConfig, cache: Arc<MetricCache>) -> Self {
        let semaphore = config
            .max_concurrent_queries
            .map(|permits| Arc::new(Semaphore::new(permits.max(1))));

        Self {
            config,
            cache,
            semaphore,
            metrics: ExecutionMetrics::new(),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<MetricCache> {
        &self.cache
    }

    pub fn stats(&self) -> ExecutionStats {
        self.metrics.stats()
    }

    /// Free concurrency slots, `None` when unbounded.
    pub fn available_slots(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }

    /// Execute `query` at instant `at` through `gatherer`.
    #[instrument(skip(self, gatherer), fields(datasource = %gatherer.id()))]
    pub async fn execute_query(
        &self,
        gatherer: &dyn IdentifiableGatherer,
        query: &Query,
        at: DateTime<Utc>,
    ) -> Result<Vec<MetricSeries>> {
        let key = CacheKey::new(gatherer.id(), &query.expr, &TimeRange::instant(at));

        if self.config.enable_caching {
            if let Some(cached) = self.cache.get(&key) {
                debug!(query = %query, "Cache hit");
                self.metrics.record_cache_hit();
                return Ok(cached);
            }
        }

        match self.execute_uncached(gatherer, query, at).await {
            Ok(series) => {
                if self.config.enable_caching {
                    self.cache.set(key, series.clone());
                }
                self.metrics.record_success();
                Ok(series)
            }
            Err(e) => {
                self.metrics.record_error();
                Err(e)
            }
        }
    }

    async fn execute_uncached(
        &self,
        gatherer: &dyn IdentifiableGatherer,
        query: &Query,
        at: DateTime<Utc>,
    ) -> Result<Vec<MetricSeries>> {
        let deadline = self.config.query_timeout.map(|t| Instant::now() + t);

        let _permit = match &self.semaphore {
            Some(semaphore) => {
                let acquire = Arc::clone(semaphore).acquire_owned();
                let permit = match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, acquire)
                        .await
                        .map_err(|_| {
                            Error::RateLimitTimeout(format!(
                                "no free slot for {} before deadline",
                                query
                            ))
                        })?,
                    None => acquire.await,
                };
                Some(permit.map_err(|e| Error::Internal(format!("query gate closed: {}", e)))?)
            }
            None => None,
        };

        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.with_retry(gatherer, query, at))
                .await
                .map_err(|_| Error::DeadlineExceeded(format!("query {} timed out", query)))?,
            None => self.with_retry(gatherer, query, at).await,
        }
    }

    async fn with_retry(
        &self,
        gatherer: &dyn IdentifiableGatherer,
        query: &Query,
        at: DateTime<Utc>,
    ) -> Result<Vec<MetricSeries>> {
        let attempts = self.config.attempts();
        let mut last_err = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.config.backoff_unit * (attempt * attempt)).await;
            }

            match gatherer.gather_single(query, at).await {
                Ok(series) => return Ok(series),
                Err(e) if e.is_context() => return Err(e),
                Err(e) => {
                    debug!(query = %query, attempt = attempt + 1, "Query attempt failed: {}", e);
                    last_err = Some(e);
                }
            }
        }

        let last = last_err
            .unwrap_or_else(|| Error::Internal("retry loop finished without attempts".into()));
        Err(Error::exhausted(attempts, last))
    }
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("config", &self.config)
            .field("available_slots", &self.available_slots())
            .finish()
    }
}

// =============================================================================
// Parallel Query Executor
// =============================================================================

/// One query of a batch, tagged with the ID its result is reported under.
#[derive(Clone)]
pub struct WidgetQuery {
    pub id: String,
    pub gatherer: Arc<dyn IdentifiableGatherer>,
    pub query: Query,
    pub at: DateTime<Utc>,
}

/// Outcome of one [`WidgetQuery`]
#[derive(Debug)]
pub struct WidgetResult {
    pub id: String,
    pub result: Result<Vec<MetricSeries>>,
}

impl WidgetResult {
    pub fn metrics(&self) -> Option<&[MetricSeries]> {
        self.result.as_deref().ok()
    }

    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }
}

/// Runs batches of widget queries concurrently.
#[derive(Debug, Clone)]
pub struct ParallelQueryExecutor {
    executor: Arc<QueryExecutor>,
    task_timeout: Duration,
}

impl ParallelQueryExecutor {
    /// Each task gets the executor's query timeout (5s when unbounded).
    pub fn new(executor: Arc<QueryExecutor>) -> Self {
        let task_timeout = executor
            .config()
            .query_timeout
            .unwrap_or(Duration::from_secs(5));
        Self {
            executor,
            task_timeout,
        }
    }

    pub fn with_task_timeout(mut self, task_timeout: Duration) -> Self {
        self.task_timeout = task_timeout;
        self
    }

    /// Execute every query concurrently, returning one result per ID.
    ///
    /// A panicking or failing task only affects its own entry. Workers are
    /// owned by the call: dropping the returned future aborts them and frees
    /// their concurrency slots.
    #[instrument(skip(self, widgets), fields(batch = widgets.len()))]
    pub async fn execute_widget_queries(
        &self,
        widgets: Vec<WidgetQuery>,
    ) -> HashMap<String, WidgetResult> {
        let (tx, mut rx) = mpsc::channel(widgets.len().max(1));
        let mut workers = JoinSet::new();

        for widget in widgets {
            let tx = tx.clone();
            let executor = Arc::clone(&self.executor);
            let timeout = self.task_timeout;

            workers.spawn(async move {
                let WidgetQuery {
                    id,
                    gatherer,
                    query,
                    at,
                } = widget;

                let result = fault::isolate(async {
                    tokio::time::timeout(
                        timeout,
                        executor.execute_query(gatherer.as_ref(), &query, at),
                    )
                    .await
                    .map_err(|_| {
                        Error::DeadlineExceeded(format!("widget query {} timed out", id))
                    })?
                })
                .await;

                if let Err(e) = &result {
                    warn!(widget = %id, "Widget query failed: {}", e);
                }
                if tx.send(WidgetResult { id, result }).await.is_err() {
                    debug!("Batch receiver gone, dropping widget result");
                }
            });
        }
        // The channel closes once every worker has dropped its sender.
        drop(tx);

        let mut results = HashMap::new();
        while let Some(result) = rx.recv().await {
            results.insert(result.id.clone(), result);
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Widget query worker aborted: {}", e);
            }
        }
        results
    }
}
