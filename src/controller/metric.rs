//! Metric controller backed by the router and the query executor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::instrument;

use super::Controller;
use crate::domain::{Gatherer, MetricPoint, MetricSeries, Query};
use crate::error::{Error, Result};
use crate::metrics::{DatasourceRouter, QueryExecutor};

/// Serves widget metric requests.
///
/// Instant queries go through the [`QueryExecutor`] (cache, concurrency
/// gate, retry); range queries go straight to the router.
#[derive(Debug, Clone)]
pub struct MetricController {
    router: Arc<DatasourceRouter>,
    executor: Arc<QueryExecutor>,
}

impl MetricController {
    pub fn new(router: Arc<DatasourceRouter>, executor: Arc<QueryExecutor>) -> Self {
        Self { router, executor }
    }

    pub fn router(&self) -> &Arc<DatasourceRouter> {
        &self.router
    }

    pub fn executor(&self) -> &Arc<QueryExecutor> {
        &self.executor
    }
}

#[async_trait]
impl Controller for MetricController {
    #[instrument(skip(self), fields(query = %query))]
    async fn get_single_metric(&self, query: &Query, at: DateTime<Utc>) -> Result<MetricPoint> {
        let gatherer = self.router.resolve(&query.datasource_id)?;
        let series = self
            .executor
            .execute_query(gatherer.as_ref(), query, at)
            .await?;

        series
            .first()
            .and_then(|s| s.latest())
            .copied()
            .ok_or_else(|| Error::NoMetrics(query.to_string()))
    }

    #[instrument(skip(self), fields(query = %query))]
    async fn get_range_metrics(
        &self,
        query: &Query,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<MetricSeries>> {
        self.router.gather_range(query, start, end, step).await
    }
}
