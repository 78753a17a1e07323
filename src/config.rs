//! Dashboard and user configuration
//!
//! Serde data model for the datasource and widget declarations the engine
//! consumes. Files are YAML; a datasource is exactly one backend kind.
//!
//! ```yaml
//! title: API overview
//! datasources:
//!   - id: prometheus
//!     prometheus:
//!       address: http://127.0.0.1:9090
//! widgets:
//!   - id: error-rate
//!     title: Error rate
//!     singlestat:
//!       query:
//!         expr: sum(rate(http_errors_total[5m]))
//!         datasource_id: prometheus
//!       decimals: 2
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::Query;
use crate::error::{Error, Result};

// =============================================================================
// Datasources
// =============================================================================

/// A configured backend endpoint identified by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datasource {
    pub id: String,
    #[serde(flatten)]
    pub kind: DatasourceKind,
}

impl Datasource {
    pub fn new(id: impl Into<String>, kind: DatasourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// The supported backend kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasourceKind {
    Prometheus(PrometheusDatasource),
    Graphite(GraphiteDatasource),
    #[serde(rename = "influxdb")]
    InfluxDb(InfluxDbDatasource),
    Fake(FakeDatasource),
}

impl DatasourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            DatasourceKind::Prometheus(_) => "prometheus",
            DatasourceKind::Graphite(_) => "graphite",
            DatasourceKind::InfluxDb(_) => "influxdb",
            DatasourceKind::Fake(_) => "fake",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrometheusDatasource {
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphiteDatasource {
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfluxDbDatasource {
    pub address: String,
    pub database: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub insecure: bool,
}

/// Synthetic backend producing deterministic waves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FakeDatasource {}

// =============================================================================
// Widgets
// =============================================================================

/// A color that applies from `start_value` upwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub start_value: f64,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetSpec {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(flatten)]
    pub kind: WidgetKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetKind {
    Gauge(GaugeSpec),
    Singlestat(SinglestatSpec),
    Graph(GraphSpec),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeSpec {
    pub query: Query,
    #[serde(default)]
    pub percent_value: bool,
    #[serde(default)]
    pub min: f64,
    #[serde(default)]
    pub max: f64,
    #[serde(default)]
    pub thresholds: Vec<Threshold>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinglestatSpec {
    pub query: Query,
    #[serde(default)]
    pub decimals: Option<usize>,
    #[serde(default)]
    pub thresholds: Vec<Threshold>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSpec {
    pub queries: Vec<Query>,
    /// Resolution of the range query; derived from the range when absent
    #[serde(default)]
    pub step_seconds: Option<u64>,
}

// =============================================================================
// Files
// =============================================================================

/// A dashboard: its datasources, static variables and widgets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardSpec {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub datasources: Vec<Datasource>,
    /// Static values merged into every sync request of this dashboard
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub widgets: Vec<WidgetSpec>,
}

impl DashboardSpec {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let spec: Self = serde_yaml::from_str(text)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for widget in &self.widgets {
            if !seen.insert(widget.id.as_str()) {
                return Err(Error::Config(format!("duplicate widget id: {}", widget.id)));
            }
        }
        Ok(())
    }
}

/// User-level datasources that override or alias the dashboard ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub datasources: Vec<Datasource>,
}

impl UserConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }
}

/// Parse a `dashboardID=userID` alias.
pub fn parse_alias(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((from, to)) if !from.trim().is_empty() && !to.trim().is_empty() => {
            Ok((from.trim().to_string(), to.trim().to_string()))
        }
        _ => Err(Error::Config(format!(
            "invalid alias '{}', expected dashboardID=userID",
            raw
        ))),
    }
}
