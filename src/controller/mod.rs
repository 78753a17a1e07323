//! Controller module
//!
//! The seam between widgets and the gathering engine. Widgets ask for a
//! single value or a set of series; the controller routes the query and
//! runs it through the executor.

mod metric;

pub use metric::MetricController;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{MetricPoint, MetricSeries, Query};
use crate::error::Result;

/// Metric access used by widgets.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Newest value of the first series `query` returns at `at`.
    async fn get_single_metric(&self, query: &Query, at: DateTime<Utc>) -> Result<MetricPoint>;

    /// Every series `query` returns over `[start, end]`.
    async fn get_range_metrics(
        &self,
        query: &Query,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<MetricSeries>>;
}
