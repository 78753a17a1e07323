//! Process metrics
//!
//! Prometheus collectors for the gathering engine, registered in the
//! default registry and served by the binary on `/metrics`.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use tracing::warn;

use crate::error::{Error, Result};

struct Collectors {
    cache_lookups: IntCounterVec,
    gathers: IntCounterVec,
    queries: IntCounterVec,
    sync_errors: IntCounterVec,
    sync_duration: HistogramVec,
}

impl Collectors {
    fn register() -> prometheus::Result<Self> {
        Ok(Self {
            cache_lookups: register_int_counter_vec!(
                "termgauge_cache_lookups_total",
                "Metric cache lookups by result",
                &["result"]
            )?,
            gathers: register_int_counter_vec!(
                "termgauge_gather_total",
                "Resilient gatherer calls by datasource and outcome",
                &["datasource", "outcome"]
            )?,
            queries: register_int_counter_vec!(
                "termgauge_queries_total",
                "Executor query outcomes",
                &["outcome"]
            )?,
            sync_errors: register_int_counter_vec!(
                "termgauge_sync_errors_total",
                "Failed sync passes by scheduler level",
                &["level"]
            )?,
            sync_duration: register_histogram_vec!(
                "termgauge_sync_duration_seconds",
                "Sync pass duration by scheduler level",
                &["level"],
                vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 3.0, 5.0, 8.0]
            )?,
        })
    }
}

static COLLECTORS: Lazy<Option<Collectors>> = Lazy::new(|| match Collectors::register() {
    Ok(collectors) => Some(collectors),
    Err(e) => {
        warn!("Telemetry disabled, failed to register collectors: {}", e);
        None
    }
});

fn with_collectors(f: impl FnOnce(&Collectors)) {
    if let Some(collectors) = COLLECTORS.as_ref() {
        f(collectors);
    }
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    with_collectors(|c| c.cache_lookups.with_label_values(&[result]).inc());
}

pub fn record_gather_outcome(datasource: &str, outcome: &str) {
    with_collectors(|c| c.gathers.with_label_values(&[datasource, outcome]).inc());
}

pub fn record_query_outcome(outcome: &str) {
    with_collectors(|c| c.queries.with_label_values(&[outcome]).inc());
}

pub fn record_sync(level: &str, seconds: f64, failed: bool) {
    with_collectors(|c| {
        c.sync_duration.with_label_values(&[level]).observe(seconds);
        if failed {
            c.sync_errors.with_label_values(&[level]).inc();
        }
    });
}

/// Encode every registered metric in the text exposition format.
pub fn render() -> Result<(String, Vec<u8>)> {
    Lazy::force(&COLLECTORS);

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| Error::Internal(format!("Failed to encode metrics: {}", e)))?;
    Ok((encoder.format_type().to_string(), buffer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_exposes_engine_metrics() {
        record_cache_lookup(true);
        record_gather_outcome("prometheus", "success");
        record_query_outcome("error");
        record_sync("widget", 0.02, true);

        let (content_type, body) = render().unwrap();
        let text = String::from_utf8(body).unwrap();

        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("termgauge_cache_lookups_total{result=\"hit\"}"));
        assert!(text.contains("termgauge_gather_total{datasource=\"prometheus\",outcome=\"success\"}"));
        assert!(text.contains("termgauge_queries_total{outcome=\"error\"}"));
        assert!(text.contains("termgauge_sync_errors_total{level=\"widget\"}"));
        assert!(text.contains("termgauge_sync_duration_seconds_bucket"));
    }
}
