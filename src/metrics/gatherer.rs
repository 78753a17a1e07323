//! Resilient Gatherer
//!
//! Wraps one backend gatherer with a bounded per-call timeout, retry with
//! linear backoff for transient errors, and outcome counters.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::config::GathererConfig;
use crate::domain::{Gatherer, IdentifiableGatherer, MetricSeries, Query};
use crate::error::{Error, Result};
use crate::telemetry;

// =============================================================================
// Statistics
// =============================================================================

/// Performance statistics for one gatherer
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GathererStats {
    pub total_queries: u64,
    pub successful_queries: u64,
    pub failed_queries: u64,
    pub timeout_queries: u64,
    /// Two-sample blend of the execution times, see [`ResilientGatherer`]
    pub average_exec_time: Duration,
    pub last_execution_time: Duration,
    pub current_timeout: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    successful: u64,
    failed: u64,
    timeout: u64,
    average_exec_time: Duration,
    last_exec_time: Duration,
}

/// Terminal outcome of one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    Timeout,
}

impl Outcome {
    fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Outcome::Success,
            Err(e) if e.is_context() => Outcome::Timeout,
            Err(_) => Outcome::Failure,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Timeout => "timeout",
        }
    }
}

// =============================================================================
// Resilient Gatherer
// =============================================================================

/// Timeout and retry aware wrapper around a backend gatherer.
///
/// Every terminal call increments exactly one of the success, failure and
/// timeout counters. The average execution time is `(previous + sample) / 2`
/// once any call has succeeded, and the raw sample before that; it follows
/// the recent trend rather than the mean over all calls.
pub struct ResilientGatherer {
    id: String,
    inner: Arc<dyn Gatherer>,
    config: GathererConfig,
    timeout: RwLock<Duration>,
    counters: Mutex<Counters>,
}

impl ResilientGatherer {
    pub fn new(id: impl Into<String>, inner: Arc<dyn Gatherer>, config: GathererConfig) -> Self {
        let timeout = config.default_timeout;
        Self {
            id: id.into(),
            inner,
            config,
            timeout: RwLock::new(timeout),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Set the base timeout, clamped to the configured bounds.
    ///
    /// A zero duration selects the default timeout.
    pub fn set_timeout(&self, duration: Duration) {
        let duration = if duration.is_zero() {
            self.config.default_timeout
        } else {
            duration
        };
        let clamped = duration
            .min(self.config.max_timeout)
            .max(self.config.min_timeout);

        *self.timeout.write() = clamped;
    }

    /// Current base timeout.
    pub fn timeout_duration(&self) -> Duration {
        *self.timeout.read()
    }

    /// Timeout for a range query.
    ///
    /// Ranges longer than one hour scale the base timeout by `range / 1h`,
    /// capped at the maximum timeout.
    pub fn calculate_range_timeout(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Duration {
        let base = self.timeout_duration();
        let range = (end - start).to_std().unwrap_or(Duration::ZERO);
        let scale = range.as_secs_f64() / 3600.0;

        if scale > 1.0 {
            base.mul_f64(scale).min(self.config.max_timeout)
        } else {
            base
        }
    }

    /// Average execution time, see the type-level docs.
    pub fn average_execution_time(&self) -> Duration {
        self.counters.lock().average_exec_time
    }

    /// Duration of the most recent call.
    pub fn last_execution_time(&self) -> Duration {
        self.counters.lock().last_exec_time
    }

    pub fn stats(&self) -> GathererStats {
        let counters = self.counters.lock();
        GathererStats {
            total_queries: counters.total,
            successful_queries: counters.successful,
            failed_queries: counters.failed,
            timeout_queries: counters.timeout,
            average_exec_time: counters.average_exec_time,
            last_execution_time: counters.last_exec_time,
            current_timeout: self.timeout_duration(),
        }
    }

    fn record(&self, outcome: Outcome, elapsed: Duration) {
        let mut counters = self.counters.lock();
        counters.total += 1;
        match outcome {
            Outcome::Success => counters.successful += 1,
            Outcome::Failure => counters.failed += 1,
            Outcome::Timeout => counters.timeout += 1,
        }

        counters.average_exec_time = if counters.successful > 0 {
            (counters.average_exec_time + elapsed) / 2
        } else {
            elapsed
        };
        counters.last_exec_time = elapsed;
        drop(counters);

        telemetry::record_gather_outcome(&self.id, outcome.label());
    }

    async fn bounded<'a, F>(
        &'a self,
        kind: &'static str,
        timeout: Duration,
        backoff_step: Duration,
        attempt_fn: F,
    ) -> Result<Vec<MetricSeries>>
    where
        F: FnMut() -> BoxFuture<'a, Result<Vec<MetricSeries>>>,
    {
        let started = Instant::now();
        let result =
            match tokio::time::timeout(timeout, self.with_retry(kind, backoff_step, attempt_fn))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::DeadlineExceeded(format!(
                    "{} query on {} exceeded {:?}",
                    kind, self.id, timeout
                ))),
            };

        self.record(Outcome::of(&result), started.elapsed());
        result
    }

    async fn with_retry<'a, F>(
        &'a self,
        kind: &'static str,
        backoff_step: Duration,
        mut attempt_fn: F,
    ) -> Result<Vec<MetricSeries>>
    where
        F: FnMut() -> BoxFuture<'a, Result<Vec<MetricSeries>>>,
    {
        let attempts = self.config.max_attempts.max(1);
        let mut last_err = None;

        for attempt in 0..attempts {
            match attempt_fn().await {
                Ok(series) => return Ok(series),
                Err(e) if e.is_context() => {
                    debug!(datasource = %self.id, kind, "Not retrying context error: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        datasource = %self.id,
                        kind,
                        attempt = attempt + 1,
                        attempts,
                        "Gather attempt failed: {}",
                        e
                    );
                    last_err = Some(e);
                    if attempt + 1 < attempts {
                        tokio::time::sleep(backoff_step * (attempt + 1)).await;
                    }
                }
            }
        }

        let last = last_err
            .unwrap_or_else(|| Error::Internal("retry loop finished without attempts".into()));
        Err(Error::exhausted(attempts, last))
    }
}

impl std::fmt::Debug for ResilientGatherer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientGatherer")
            .field("id", &self.id)
            .field("timeout", &self.timeout_duration())
            .finish()
    }
}

#[async_trait]
impl Gatherer for ResilientGatherer {
    #[instrument(skip(self), fields(datasource = %self.id))]
    async fn gather_single(&self, query: &Query, at: DateTime<Utc>) -> Result<Vec<MetricSeries>> {
        let timeout = self.timeout_duration();
        self.bounded("instant", timeout, self.config.single_backoff_step, || {
            self.inner.gather_single(query, at)
        })
        .await
    }

    #[instrument(skip(self), fields(datasource = %self.id))]
    async fn gather_range(
        &self,
        query: &Query,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<MetricSeries>> {
        let timeout = self.calculate_range_timeout(start, end);
        self.bounded("range", timeout, self.config.range_backoff_step, || {
            self.inner.gather_range(query, start, end, step)
        })
        .await
    }
}

impl IdentifiableGatherer for ResilientGatherer {
    fn id(&self) -> &str {
        &self.id
    }
}
