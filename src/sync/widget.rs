//! Widget level of the sync cascade.
//!
//! Every widget owns a [`SyncGuard`]: a sync arriving while another is in
//! flight returns `Ok(())` at once. Widgets hold locks and are shared as
//! `Arc`s; they are never cloned.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use super::{SyncGuard, SyncRequest, Syncer};
use crate::config::{GaugeSpec, GraphSpec, SinglestatSpec, Threshold};
use crate::controller::Controller;
use crate::domain::Query;
use crate::error::{Error, Result};
use crate::render::{GaugeView, GraphView, SinglestatView};

/// Graph step when none is configured: range / 100, at least 1s.
const GRAPH_POINTS: u32 = 100;

#[derive(Debug, Clone)]
pub struct WidgetConfig {
    /// Deadline of the metric fetch of one sync
    pub fetch_timeout: Duration,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(2),
        }
    }
}

/// Color of the highest threshold whose start value `value` reaches.
///
/// `thresholds` must be sorted ascending. Values below the first threshold
/// take its color.
pub fn threshold_color(thresholds: &[Threshold], value: f64) -> Option<&str> {
    let first = thresholds.first()?;
    let color = thresholds
        .iter()
        .take_while(|t| value >= t.start_value)
        .last()
        .unwrap_or(first);
    Some(color.color.as_str())
}

fn sorted(mut thresholds: Vec<Threshold>) -> Vec<Threshold> {
    thresholds.sort_by(|a, b| a.start_value.total_cmp(&b.start_value));
    thresholds
}

fn templated(query: &Query, request: &SyncRequest) -> Query {
    Query {
        expr: request.template_data.render(&query.expr),
        datasource_id: query.datasource_id.clone(),
    }
}

/// Last applied color; the view is only told about changes.
#[derive(Debug, Default)]
struct ColorState {
    current: Mutex<Option<String>>,
}

impl ColorState {
    fn apply(
        &self,
        thresholds: &[Threshold],
        value: f64,
        set_color: impl FnOnce(&str) -> Result<()>,
    ) -> Result<()> {
        let Some(color) = threshold_color(thresholds, value) else {
            return Ok(());
        };

        let mut current = self.current.lock();
        if current.as_deref() == Some(color) {
            return Ok(());
        }
        set_color(color)?;
        *current = Some(color.to_string());
        Ok(())
    }
}

async fn fetch_single(
    controller: &dyn Controller,
    widget: &str,
    query: &Query,
    request: &SyncRequest,
    timeout: Duration,
) -> Result<f64> {
    let point = tokio::time::timeout(
        timeout,
        controller.get_single_metric(query, request.time_range_end),
    )
    .await
    .map_err(|_| Error::DeadlineExceeded(format!("widget {} fetch timed out", widget)))??;
    Ok(point.value)
}

// =============================================================================
// Gauge
// =============================================================================

/// Single value, optionally as a percentage of `[min, max]`.
pub struct Gauge {
    id: String,
    spec: GaugeSpec,
    config: WidgetConfig,
    controller: Arc<dyn Controller>,
    view: Arc<dyn GaugeView>,
    guard: SyncGuard,
    color: ColorState,
}

impl Gauge {
    pub fn new(
        id: impl Into<String>,
        mut spec: GaugeSpec,
        config: WidgetConfig,
        controller: Arc<dyn Controller>,
        view: Arc<dyn GaugeView>,
    ) -> Arc<Self> {
        spec.thresholds = sorted(spec.thresholds);
        Arc::new(Self {
            id: id.into(),
            spec,
            config,
            controller,
            view,
            guard: SyncGuard::new(),
            color: ColorState::default(),
        })
    }

    /// Percentage of `value` within `[min, max]`, clamped to 0..=100.
    /// Without a max the value is taken as a percentage already.
    pub fn percent_value(&self, value: f64) -> f64 {
        let mut value = value;
        if self.spec.max != 0.0 {
            value = (value - self.spec.min) / (self.spec.max - self.spec.min) * 100.0;
        }
        value.clamp(0.0, 100.0)
    }
}

#[async_trait]
impl Syncer for Gauge {
    #[instrument(skip_all, fields(widget = %self.id))]
    async fn sync(&self, request: &SyncRequest) -> Result<()> {
        let Some(_permit) = self.guard.enter() else {
            debug!("Gauge already syncing, skipping");
            return Ok(());
        };

        let query = templated(&self.spec.query, request);
        let mut value = fetch_single(
            self.controller.as_ref(),
            &self.id,
            &query,
            request,
            self.config.fetch_timeout,
        )
        .await?;

        if self.spec.percent_value {
            value = self.percent_value(value);
        }

        self.color
            .apply(&self.spec.thresholds, value, |c| self.view.set_color(c))?;
        self.view.sync(self.spec.percent_value, value)
    }
}

// =============================================================================
// Singlestat
// =============================================================================

/// Single value rendered as text.
pub struct Singlestat {
    id: String,
    spec: SinglestatSpec,
    config: WidgetConfig,
    controller: Arc<dyn Controller>,
    view: Arc<dyn SinglestatView>,
    guard: SyncGuard,
    color: ColorState,
}

impl Singlestat {
    pub fn new(
        id: impl Into<String>,
        mut spec: SinglestatSpec,
        config: WidgetConfig,
        controller: Arc<dyn Controller>,
        view: Arc<dyn SinglestatView>,
    ) -> Arc<Self> {
        spec.thresholds = sorted(spec.thresholds);
        Arc::new(Self {
            id: id.into(),
            spec,
            config,
            controller,
            view,
            guard: SyncGuard::new(),
            color: ColorState::default(),
        })
    }

    pub fn format_value(&self, value: f64) -> String {
        match self.spec.decimals {
            Some(decimals) => format!("{:.*}", decimals, value),
            None => value.to_string(),
        }
    }
}

#[async_trait]
impl Syncer for Singlestat {
    #[instrument(skip_all, fields(widget = %self.id))]
    async fn sync(&self, request: &SyncRequest) -> Result<()> {
        let Some(_permit) = self.guard.enter() else {
            debug!("Singlestat already syncing, skipping");
            return Ok(());
        };

        let query = templated(&self.spec.query, request);
        let value = fetch_single(
            self.controller.as_ref(),
            &self.id,
            &query,
            request,
            self.config.fetch_timeout,
        )
        .await?;

        self.color
            .apply(&self.spec.thresholds, value, |c| self.view.set_color(c))?;
        self.view.sync(&self.format_value(value))
    }
}

// =============================================================================
// Graph
// =============================================================================

/// Series over the request's time range, one range query per configured
/// query.
pub struct Graph {
    id: String,
    spec: GraphSpec,
    config: WidgetConfig,
    controller: Arc<dyn Controller>,
    view: Arc<dyn GraphView>,
    guard: SyncGuard,
}

impl Graph {
    pub fn new(
        id: impl Into<String>,
        spec: GraphSpec,
        config: WidgetConfig,
        controller: Arc<dyn Controller>,
        view: Arc<dyn GraphView>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            spec,
            config,
            controller,
            view,
            guard: SyncGuard::new(),
        })
    }

    pub fn step(&self, request: &SyncRequest) -> Duration {
        if let Some(secs) = self.spec.step_seconds {
            return Duration::from_secs(secs.max(1));
        }
        let range = (request.time_range_end - request.time_range_start)
            .to_std()
            .unwrap_or(Duration::ZERO);
        (range / GRAPH_POINTS).max(Duration::from_secs(1))
    }
}

#[async_trait]
impl Syncer for Graph {
    #[instrument(skip_all, fields(widget = %self.id))]
    async fn sync(&self, request: &SyncRequest) -> Result<()> {
        let Some(_permit) = self.guard.enter() else {
            debug!("Graph already syncing, skipping");
            return Ok(());
        };

        let step = self.step(request);
        let fetches = self.spec.queries.iter().map(|q| {
            let query = templated(q, request);
            async move {
                tokio::time::timeout(
                    self.config.fetch_timeout,
                    self.controller.get_range_metrics(
                        &query,
                        request.time_range_start,
                        request.time_range_end,
                        step,
                    ),
                )
                .await
                .map_err(|_| {
                    Error::DeadlineExceeded(format!("widget {} range fetch timed out", self.id))
                })?
            }
        });

        let mut series = Vec::new();
        let mut first_err = None;
        for result in join_all(fetches).await {
            match result {
                Ok(mut s) => series.append(&mut s),
                Err(e) => {
                    warn!("Graph query failed: {}", e);
                    first_err.get_or_insert(e);
                }
            }
        }

        if !series.is_empty() || first_err.is_none() {
            self.view.sync(&series)?;
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
