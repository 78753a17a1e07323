//! Domain Ports (Port/Adapter Pattern)
//!
//! This module defines the metric value objects and the gatherer port that
//! the engine depends on. Backend adapters implement the port to provide
//! concrete metric sources.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Engine Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │        Gatherer  │  IdentifiableGatherer             │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Backend Layer                              │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  Prometheus │ Graphite │ InfluxDB │ Fake            │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

// =============================================================================
// Value Objects
// =============================================================================

/// A query issued against one datasource.
///
/// Immutable once issued; the expression is opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    /// Backend-specific query expression
    pub expr: String,
    /// ID of the datasource that must answer the query
    pub datasource_id: String,
}

impl Query {
    pub fn new(expr: impl Into<String>, datasource_id: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            datasource_id: datasource_id.into(),
        }
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.expr, self.datasource_id)
    }
}

/// A measured value in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl MetricPoint {
    pub fn new(value: f64, timestamp: DateTime<Utc>) -> Self {
        Self { value, timestamp }
    }
}

/// A group of points identified by an ID and a set of labels.
///
/// Points are ordered by ascending timestamp. Backends return them ordered
/// and nothing downstream reorders them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricSeries {
    pub id: String,
    pub labels: BTreeMap<String, String>,
    pub points: Vec<MetricPoint>,
}

impl MetricSeries {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_points(mut self, points: Vec<MetricPoint>) -> Self {
        self.points = points;
        self
    }

    /// Most recent point of the series.
    pub fn latest(&self) -> Option<&MetricPoint> {
        self.points.last()
    }

    /// True when the points are in ascending timestamp order.
    pub fn is_time_ordered(&self) -> bool {
        self.points
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp)
    }
}

/// Time range for queries. `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Create a range, swapping the bounds if they arrive reversed.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// Zero-width range used for instant queries.
    pub fn instant(at: DateTime<Utc>) -> Self {
        Self { start: at, end: at }
    }

    pub fn duration(&self) -> Duration {
        (self.end - self.start).to_std().unwrap_or(Duration::ZERO)
    }
}

// =============================================================================
// Gatherer Port
// =============================================================================

/// Port for gathering metrics from a backend.
///
/// Implemented by every backend client, by the resilient wrapper and by the
/// datasource router, so the layers compose transparently.
#[async_trait]
pub trait Gatherer: Send + Sync {
    /// Gather the series values at one point in time.
    async fn gather_single(&self, query: &Query, at: DateTime<Utc>) -> Result<Vec<MetricSeries>>;

    /// Gather the series between `start` and `end` at `step` resolution.
    ///
    /// Points of every returned series are ordered by timestamp.
    async fn gather_range(
        &self,
        query: &Query,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<MetricSeries>>;
}

/// A gatherer with a stable identity, used for cache keys and tracking.
pub trait IdentifiableGatherer: Gatherer {
    /// Unique identifier, typically the datasource ID.
    fn id(&self) -> &str;
}
