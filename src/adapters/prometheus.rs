//! Prometheus Adapter
//!
//! Gathers metrics through the Prometheus HTTP API (`/api/v1/query` and
//! `/api/v1/query_range`).

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::IgnoredAny;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{base_url, check_status, http_client, timestamp_from_secs, unix_secs};
use crate::domain::{Gatherer, MetricPoint, MetricSeries, Query};
use crate::error::{Error, Result};

// =============================================================================
// Prometheus Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct PrometheusResponse {
    status: String,
    #[serde(default)]
    data: Option<PrometheusData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum PrometheusData {
    Vector(Vec<VectorSample>),
    Matrix(Vec<MatrixSample>),
    Scalar((f64, String)),
    String(IgnoredAny),
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    value: (f64, String),
}

#[derive(Debug, Deserialize)]
struct MatrixSample {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    values: Vec<(f64, String)>,
}

// =============================================================================
// Gatherer
// =============================================================================

/// Prometheus backend client
pub struct PrometheusGatherer {
    datasource: String,
    address: String,
    client: Client,
}

impl PrometheusGatherer {
    pub fn new(datasource: &str, address: &str) -> Result<Self> {
        Ok(Self {
            datasource: datasource.to_string(),
            address: base_url(address)?,
            client: http_client(None, false)?,
        })
    }

    async fn api_query(&self, path_and_query: String) -> Result<PrometheusData> {
        let url = format!("{}{}", self.address, path_and_query);
        debug!(url = %url, "Querying Prometheus");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Error::BackendConnection)?;
        let response = check_status(&self.datasource, response).await?;

        let body: PrometheusResponse = response
            .json()
            .await
            .map_err(|e| Error::BackendResponseParse(e.to_string()))?;

        into_data(&self.datasource, body)
    }
}

impl std::fmt::Debug for PrometheusGatherer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusGatherer")
            .field("datasource", &self.datasource)
            .field("address", &self.address)
            .finish()
    }
}

#[async_trait]
impl Gatherer for PrometheusGatherer {
    #[instrument(skip(self), fields(datasource = %self.datasource))]
    async fn gather_single(&self, query: &Query, at: DateTime<Utc>) -> Result<Vec<MetricSeries>> {
        let data = self
            .api_query(format!(
                "/api/v1/query?query={}&time={}",
                urlencoding::encode(&query.expr),
                unix_secs(at)
            ))
            .await?;
        to_series(&query.expr, data)
    }

    #[instrument(skip(self), fields(datasource = %self.datasource))]
    async fn gather_range(
        &self,
        query: &Query,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<MetricSeries>> {
        let data = self
            .api_query(format!(
                "/api/v1/query_range?query={}&start={}&end={}&step={}",
                urlencoding::encode(&query.expr),
                unix_secs(start),
                unix_secs(end),
                step.as_secs().max(1)
            ))
            .await?;
        to_series(&query.expr, data)
    }
}

// =============================================================================
// Decoding
// =============================================================================

fn into_data(datasource: &str, body: PrometheusResponse) -> Result<PrometheusData> {
    if body.status != "success" {
        return Err(Error::Backend {
            datasource: datasource.to_string(),
            message: format!(
                "{}: {}",
                body.error_type.as_deref().unwrap_or("error"),
                body.error.as_deref().unwrap_or("unknown error")
            ),
        });
    }
    body.data
        .ok_or_else(|| Error::BackendResponseParse("success response without data".into()))
}

fn to_series(expr: &str, data: PrometheusData) -> Result<Vec<MetricSeries>> {
    match data {
        PrometheusData::Vector(samples) => samples
            .into_iter()
            .map(|s| Ok(labeled_series(expr, s.metric).with_points(vec![point(&s.value)?])))
            .collect(),
        PrometheusData::Matrix(samples) => samples
            .into_iter()
            .map(|s| {
                let points = s.values.iter().map(point).collect::<Result<Vec<_>>>()?;
                Ok(labeled_series(expr, s.metric).with_points(points))
            })
            .collect(),
        PrometheusData::Scalar(value) => {
            Ok(vec![MetricSeries::new(expr).with_points(vec![point(&value)?])])
        }
        PrometheusData::String(_) => Err(Error::BackendResponseParse(
            "string results are not metrics".into(),
        )),
    }
}

/// Series ID in the `name{label="value"}` notation.
fn labeled_series(expr: &str, mut labels: BTreeMap<String, String>) -> MetricSeries {
    let name = labels.remove("__name__").unwrap_or_default();
    let id = if labels.is_empty() && name.is_empty() {
        expr.to_string()
    } else {
        let pairs: Vec<_> = labels
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, v))
            .collect();
        format!("{}{{{}}}", name, pairs.join(","))
    };

    let mut series = MetricSeries::new(id);
    series.labels = labels;
    series
}

fn point((ts, raw): &(f64, String)) -> Result<MetricPoint> {
    let value = raw
        .parse::<f64>()
        .map_err(|_| Error::BackendResponseParse(format!("invalid sample value: {}", raw)))?;
    Ok(MetricPoint::new(value, timestamp_from_secs(*ts)?))
}
