//! Fake Adapter
//!
//! Deterministic synthetic backend. Every expression maps to its own sine
//! wave between 0 and 100 with a one hour period, so the same query at the
//! same instant always yields the same value.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::domain::{Gatherer, MetricPoint, MetricSeries, Query};
use crate::error::Result;

const PERIOD_SECS: f64 = 3600.0;
/// Upper bound on points produced by a range query.
const MAX_RANGE_POINTS: usize = 11_000;

#[derive(Debug, Default, Clone, Copy)]
pub struct FakeGatherer;

impl FakeGatherer {
    pub fn new() -> Self {
        Self
    }

    /// Value of the wave for `expr` at `t`.
    pub fn value_at(expr: &str, t: DateTime<Utc>) -> f64 {
        let secs = t.timestamp_millis() as f64 / 1000.0;
        let angle = (secs / PERIOD_SECS + phase(expr)) * std::f64::consts::TAU;
        50.0 + 50.0 * angle.sin()
    }
}

/// Phase offset in `[0, 1)` derived from the expression.
fn phase(expr: &str) -> f64 {
    let digest = Sha256::digest(expr.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) >> 11) as f64 / (1u64 << 53) as f64
}

#[async_trait]
impl Gatherer for FakeGatherer {
    async fn gather_single(&self, query: &Query, at: DateTime<Utc>) -> Result<Vec<MetricSeries>> {
        Ok(vec![MetricSeries::new(query.expr.clone())
            .with_label("datasource", query.datasource_id.clone())
            .with_points(vec![MetricPoint::new(
                Self::value_at(&query.expr, at),
                at,
            )])])
    }

    async fn gather_range(
        &self,
        query: &Query,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<MetricSeries>> {
        let step = chrono::Duration::from_std(step.max(Duration::from_secs(1)))
            .unwrap_or_else(|_| chrono::Duration::seconds(1));

        let mut points = Vec::new();
        let mut t = start;
        while t <= end && points.len() < MAX_RANGE_POINTS {
            points.push(MetricPoint::new(Self::value_at(&query.expr, t), t));
            t += step;
        }

        Ok(vec![MetricSeries::new(query.expr.clone())
            .with_label("datasource", query.datasource_id.clone())
            .with_points(points)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_single_is_deterministic() {
        let g = FakeGatherer::new();
        let q = Query::new("cpu", "synthetic");

        let a = g.gather_single(&q, at(1_700_000_000)).await.unwrap();
        let b = g.gather_single(&q, at(1_700_000_000)).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].id, "cpu");
        assert_eq!(a[0].labels["datasource"], "synthetic");
    }

    #[tokio::test]
    async fn test_range_steps_and_ordering() {
        let g = FakeGatherer::new();
        let series = g
            .gather_range(
                &Query::new("cpu", "synthetic"),
                at(1_700_000_000),
                at(1_700_000_300),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        assert_eq!(series[0].points.len(), 6);
        assert!(series[0].is_time_ordered());
        assert_eq!(series[0].latest().unwrap().timestamp, at(1_700_000_300));
    }

    proptest! {
        #[test]
        fn prop_values_in_bounds(expr in "[a-z_]{1,16}", secs in 0i64..4_000_000_000) {
            let v = FakeGatherer::value_at(&expr, at(secs));
            prop_assert!((0.0..=100.0).contains(&v));
        }
    }
}
