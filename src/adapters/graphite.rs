//! Graphite Adapter
//!
//! Gathers metrics through the Graphite render API (`/render?format=json`).
//! Null datapoints are gaps and are skipped.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{base_url, check_status, http_client, timestamp_from_secs};
use crate::domain::{Gatherer, MetricPoint, MetricSeries, Query};
use crate::error::{Error, Result};

/// Lookback window of instant queries; the newest non-null point wins.
const INSTANT_LOOKBACK_MINUTES: i64 = 5;

#[derive(Debug, Deserialize)]
struct RenderSeries {
    target: String,
    #[serde(default)]
    tags: BTreeMap<String, serde_json::Value>,
    datapoints: Vec<(Option<f64>, f64)>,
}

/// Graphite backend client
pub struct GraphiteGatherer {
    datasource: String,
    address: String,
    client: Client,
}

impl GraphiteGatherer {
    pub fn new(datasource: &str, address: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            datasource: datasource.to_string(),
            address: base_url(address)?,
            client: http_client(Some(timeout), false)?,
        })
    }

    async fn render(
        &self,
        expr: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<MetricSeries>> {
        let url = format!(
            "{}/render?target={}&from={}&until={}&format=json",
            self.address,
            urlencoding::encode(expr),
            from.timestamp(),
            until.timestamp()
        );
        debug!(url = %url, "Querying Graphite");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Error::BackendConnection)?;
        let response = check_status(&self.datasource, response).await?;

        let body: Vec<RenderSeries> = response
            .json()
            .await
            .map_err(|e| Error::BackendResponseParse(e.to_string()))?;

        to_series(body)
    }
}

impl std::fmt::Debug for GraphiteGatherer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphiteGatherer")
            .field("datasource", &self.datasource)
            .field("address", &self.address)
            .finish()
    }
}

#[async_trait]
impl Gatherer for GraphiteGatherer {
    #[instrument(skip(self), fields(datasource = %self.datasource))]
    async fn gather_single(&self, query: &Query, at: DateTime<Utc>) -> Result<Vec<MetricSeries>> {
        let from = at - chrono::Duration::minutes(INSTANT_LOOKBACK_MINUTES);
        let series = self.render(&query.expr, from, at).await?;
        Ok(series.into_iter().map(keep_latest).collect())
    }

    #[instrument(skip(self), fields(datasource = %self.datasource))]
    async fn gather_range(
        &self,
        query: &Query,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        _step: Duration,
    ) -> Result<Vec<MetricSeries>> {
        self.render(&query.expr, start, end).await
    }
}

fn to_series(body: Vec<RenderSeries>) -> Result<Vec<MetricSeries>> {
    body.into_iter()
        .map(|s| {
            let points = s
                .datapoints
                .iter()
                .filter_map(|(value, ts)| value.map(|v| (v, *ts)))
                .map(|(v, ts)| Ok(MetricPoint::new(v, timestamp_from_secs(ts)?)))
                .collect::<Result<Vec<_>>>()?;

            let mut series = MetricSeries::new(s.target).with_points(points);
            for (key, value) in s.tags {
                let value = match value {
                    serde_json::Value::String(v) => v,
                    other => other.to_string(),
                };
                series = series.with_label(key, value);
            }
            Ok(series)
        })
        .collect()
}

fn keep_latest(mut series: MetricSeries) -> MetricSeries {
    if series.points.len() > 1 {
        series.points = series.points.split_off(series.points.len() - 1);
    }
    series
}
