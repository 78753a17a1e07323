//! Backend Adapters
//!
//! Raw [`Gatherer`] implementations for each supported datasource kind, and
//! the [`BackendFactory`] that builds them from configuration.
//!
//! ```text
//! Datasource ──▶ BackendFactory ──▶ PrometheusGatherer
//!                                   GraphiteGatherer
//!                                   InfluxDbGatherer
//!                                   FakeGatherer
//! ```
//!
//! Adapters perform a single HTTP attempt per call. Retry, timeout and
//! outcome accounting are layered on top by the resilient gatherer.

mod fake;
mod graphite;
mod influxdb;
mod prometheus;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;

use crate::config::{Datasource, DatasourceKind};
use crate::domain::Gatherer;
use crate::error::{Error, Result};
use crate::metrics::GathererFactory;

pub use self::fake::FakeGatherer;
pub use self::graphite::GraphiteGatherer;
pub use self::influxdb::InfluxDbGatherer;
pub use self::prometheus::PrometheusGatherer;

/// HTTP client timeout of Graphite backends.
pub const GRAPHITE_CLIENT_TIMEOUT: Duration = Duration::from_secs(7);

/// Builds the real backend clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct BackendFactory;

impl GathererFactory for BackendFactory {
    fn create(&self, datasource: &Datasource) -> Result<Arc<dyn Gatherer>> {
        let gatherer: Arc<dyn Gatherer> = match &datasource.kind {
            DatasourceKind::Prometheus(cfg) => {
                Arc::new(PrometheusGatherer::new(&datasource.id, &cfg.address)?)
            }
            DatasourceKind::Graphite(cfg) => Arc::new(GraphiteGatherer::new(
                &datasource.id,
                &cfg.address,
                GRAPHITE_CLIENT_TIMEOUT,
            )?),
            DatasourceKind::InfluxDb(cfg) => Arc::new(InfluxDbGatherer::new(&datasource.id, cfg)?),
            DatasourceKind::Fake(_) => Arc::new(FakeGatherer::new()),
        };
        Ok(gatherer)
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

fn http_client(timeout: Option<Duration>, insecure: bool) -> Result<Client> {
    let mut builder = Client::builder().danger_accept_invalid_certs(insecure);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))
}

fn base_url(address: &str) -> Result<String> {
    let address = address.trim().trim_end_matches('/');
    if address.is_empty() {
        return Err(Error::Config("datasource address is empty".into()));
    }
    Ok(address.to_string())
}

/// Unix seconds with a fractional part to a UTC timestamp.
fn timestamp_from_secs(secs: f64) -> Result<DateTime<Utc>> {
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    Utc.timestamp_opt(whole as i64, nanos)
        .single()
        .ok_or_else(|| Error::BackendResponseParse(format!("invalid timestamp: {}", secs)))
}

fn unix_secs(t: DateTime<Utc>) -> String {
    let millis = t.timestamp_millis();
    if millis % 1000 == 0 {
        (millis / 1000).to_string()
    } else {
        format!("{:.3}", millis as f64 / 1000.0)
    }
}

async fn check_status(datasource: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Backend {
        datasource: datasource.to_string(),
        message: format!("request failed with status {}: {}", status, body.trim()),
    })
}
