//! InfluxDB Adapter
//!
//! Gathers metrics from InfluxDB 1.x through `/query` (InfluxQL).
//!
//! Queries may reference `$timeFilter`, replaced with the requested time
//! bounds, and `$interval`, replaced with the range step. A series with
//! several value columns yields one [`MetricSeries`] per column.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{base_url, check_status, http_client, timestamp_from_secs};
use crate::config::InfluxDbDatasource;
use crate::domain::{Gatherer, MetricPoint, MetricSeries, Query};
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<InfluxSeries>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfluxSeries {
    name: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// InfluxDB backend client
pub struct InfluxDbGatherer {
    datasource: String,
    address: String,
    database: String,
    credentials: Option<(String, Option<String>)>,
    client: Client,
}

impl InfluxDbGatherer {
    pub fn new(datasource: &str, config: &InfluxDbDatasource) -> Result<Self> {
        Ok(Self {
            datasource: datasource.to_string(),
            address: base_url(&config.address)?,
            database: config.database.clone(),
            credentials: config
                .username
                .clone()
                .map(|user| (user, config.password.clone())),
            client: http_client(None, config.insecure)?,
        })
    }

    async fn query(&self, influxql: &str) -> Result<Vec<MetricSeries>> {
        let url = format!(
            "{}/query?db={}&q={}&epoch=ms",
            self.address,
            urlencoding::encode(&self.database),
            urlencoding::encode(influxql)
        );
        debug!(query = %influxql, "Querying InfluxDB");

        let mut request = self.client.get(&url);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_deref());
        }

        let response = request.send().await.map_err(Error::BackendConnection)?;
        let response = check_status(&self.datasource, response).await?;
        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| Error::BackendResponseParse(e.to_string()))?;

        to_series(&self.datasource, body)
    }
}

impl std::fmt::Debug for InfluxDbGatherer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxDbGatherer")
            .field("datasource", &self.datasource)
            .field("address", &self.address)
            .field("database", &self.database)
            .finish()
    }
}

#[async_trait]
impl Gatherer for InfluxDbGatherer {
    #[instrument(skip(self), fields(datasource = %self.datasource))]
    async fn gather_single(&self, query: &Query, at: DateTime<Utc>) -> Result<Vec<MetricSeries>> {
        let filter = format!("time <= {}ms", at.timestamp_millis());
        let influxql = expand(&query.expr, &filter, None);
        let series = self.query(&influxql).await?;
        Ok(series
            .into_iter()
            .map(|mut s| {
                if let Some(last) = s.points.pop() {
                    s.points = vec![last];
                }
                s
            })
            .collect())
    }

    #[instrument(skip(self), fields(datasource = %self.datasource))]
    async fn gather_range(
        &self,
        query: &Query,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<MetricSeries>> {
        let filter = format!(
            "time >= {}ms and time <= {}ms",
            start.timestamp_millis(),
            end.timestamp_millis()
        );
        let influxql = expand(&query.expr, &filter, Some(step));
        self.query(&influxql).await
    }
}

fn expand(expr: &str, time_filter: &str, step: Option<Duration>) -> String {
    let interval = format!("{}s", step.map(|s| s.as_secs().max(1)).unwrap_or(60));
    expr.replace("$timeFilter", time_filter)
        .replace("$interval", &interval)
}

fn to_series(datasource: &str, body: QueryResponse) -> Result<Vec<MetricSeries>> {
    let backend_error = |message: String| Error::Backend {
        datasource: datasource.to_string(),
        message,
    };

    if let Some(err) = body.error {
        return Err(backend_error(err));
    }

    let mut out = Vec::new();
    for statement in body.results {
        if let Some(err) = statement.error {
            return Err(backend_error(err));
        }
        for series in statement.series {
            let time_col = series
                .columns
                .iter()
                .position(|c| c == "time")
                .ok_or_else(|| Error::BackendResponseParse("series without time column".into()))?;

            for (col, column) in series.columns.iter().enumerate() {
                if col == time_col {
                    continue;
                }
                let mut points = Vec::with_capacity(series.values.len());
                for row in &series.values {
                    let (Some(ts), Some(value)) = (
                        row.get(time_col).and_then(|v| v.as_f64()),
                        row.get(col).and_then(|v| v.as_f64()),
                    ) else {
                        continue;
                    };
                    points.push(MetricPoint::new(value, timestamp_from_secs(ts / 1000.0)?));
                }

                let mut metric = MetricSeries::new(format!("{}.{}", series.name, column))
                    .with_points(points);
                metric.labels = series.tags.clone();
                out.push(metric);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn decode(json: &str) -> Result<Vec<MetricSeries>> {
        to_series("influx", serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_one_series_per_value_column() {
        let series = decode(
            r#"{"results":[{"statement_id":0,"series":[
                {"name":"cpu","tags":{"host":"a"},"columns":["time","mean","max"],
                 "values":[[1700000000000,1.5,2],[1700000060000,null,4],[1700000120000,2.5,5]]}
            ]}]}"#,
        )
        .unwrap();

        assert_eq!(series.len(), 2);
        assert_eq!(series[0].id, "cpu.mean");
        assert_eq!(series[0].labels.get("host").map(String::as_str), Some("a"));
        let means: Vec<_> = series[0].points.iter().map(|p| p.value).collect();
        assert_eq!(means, vec![1.5, 2.5]);
        assert_eq!(series[1].id, "cpu.max");
        assert_eq!(series[1].points.len(), 3);
        assert_eq!(series[1].points[1].timestamp.timestamp(), 1_700_000_060);
    }

    #[test]
    fn test_statement_error() {
        let result = decode(r#"{"results":[{"statement_id":0,"error":"database not found: x"}]}"#);
        assert_matches!(result, Err(Error::Backend { ref message, .. }) if message.contains("database not found"));
    }

    #[test]
    fn test_placeholders_expanded() {
        let q = expand(
            "SELECT mean(v) FROM cpu WHERE $timeFilter GROUP BY time($interval)",
            "time >= 1ms and time <= 2ms",
            Some(Duration::from_secs(30)),
        );
        assert_eq!(
            q,
            "SELECT mean(v) FROM cpu WHERE time >= 1ms and time <= 2ms GROUP BY time(30s)"
        );
    }
}
