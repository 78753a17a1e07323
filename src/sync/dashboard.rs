//! Dashboard level of the sync cascade.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument};

use super::widget::{Gauge, Graph, Singlestat, WidgetConfig};
use super::{SyncRequest, Syncer, TemplateData};
use crate::config::{DashboardSpec, WidgetKind};
use crate::controller::Controller;
use crate::error::{Error, Result};
use crate::render::Renderer;
use crate::{fault, telemetry};

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Deadline of one widget wave
    pub widget_timeout: Duration,
    pub widget: WidgetConfig,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            widget_timeout: Duration::from_secs(3),
            widget: WidgetConfig::default(),
        }
    }
}

/// Syncs every widget concurrently once per request.
///
/// Widget failures, timeouts and panics are logged after the wave; the
/// dashboard itself always reports success.
pub struct Dashboard {
    config: DashboardConfig,
    variables: TemplateData,
    widgets: Vec<(String, Arc<dyn Syncer>)>,
}

impl Dashboard {
    pub fn new(
        config: DashboardConfig,
        variables: TemplateData,
        widgets: Vec<(String, Arc<dyn Syncer>)>,
    ) -> Self {
        Self {
            config,
            variables,
            widgets,
        }
    }

    /// Build the widgets declared in `spec`, each backed by a view from
    /// `renderer`.
    pub fn from_spec(
        spec: &DashboardSpec,
        config: DashboardConfig,
        controller: Arc<dyn Controller>,
        renderer: &dyn Renderer,
    ) -> Result<Self> {
        let mut widgets: Vec<(String, Arc<dyn Syncer>)> = Vec::with_capacity(spec.widgets.len());
        for widget in &spec.widgets {
            let syncer: Arc<dyn Syncer> = match &widget.kind {
                WidgetKind::Gauge(g) => Gauge::new(
                    &widget.id,
                    g.clone(),
                    config.widget.clone(),
                    Arc::clone(&controller),
                    renderer.gauge(widget)?,
                ),
                WidgetKind::Singlestat(s) => Singlestat::new(
                    &widget.id,
                    s.clone(),
                    config.widget.clone(),
                    Arc::clone(&controller),
                    renderer.singlestat(widget)?,
                ),
                WidgetKind::Graph(g) => Graph::new(
                    &widget.id,
                    g.clone(),
                    config.widget.clone(),
                    Arc::clone(&controller),
                    renderer.graph(widget)?,
                ),
            };
            widgets.push((widget.id.clone(), syncer));
        }

        info!(title = %spec.title, widgets = widgets.len(), "Dashboard loaded");
        Ok(Self::new(
            config,
            TemplateData::from(spec.variables.clone()),
            widgets,
        ))
    }

    pub fn widget_count(&self) -> usize {
        self.widgets.len()
    }
}

#[async_trait]
impl Syncer for Dashboard {
    #[instrument(skip_all, fields(widgets = self.widgets.len()))]
    async fn sync(&self, request: &SyncRequest) -> Result<()> {
        let request = Arc::new(SyncRequest {
            template_data: request.template_data.with_data(&self.variables),
            ..request.clone()
        });
        let deadline = Instant::now() + self.config.widget_timeout;

        let (err_tx, mut err_rx) = mpsc::channel(self.widgets.len().max(1));
        let mut tasks = JoinSet::new();

        for (id, widget) in &self.widgets {
            let id = id.clone();
            let widget = Arc::clone(widget);
            let request = Arc::clone(&request);
            let err_tx = err_tx.clone();

            tasks.spawn(async move {
                let started = Instant::now();
                let result = fault::isolate(async {
                    tokio::time::timeout_at(deadline, widget.sync(&request))
                        .await
                        .map_err(|_| {
                            Error::DeadlineExceeded(format!("widget {} sync timed out", id))
                        })?
                })
                .await;

                telemetry::record_sync(
                    "widget",
                    started.elapsed().as_secs_f64(),
                    result.is_err(),
                );
                if let Err(e) = result {
                    if err_tx.send((id, e)).await.is_err() {
                        debug!("Dashboard stopped collecting widget errors");
                    }
                }
            });
        }
        drop(err_tx);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Widget task aborted: {}", e);
            }
        }

        while let Some((id, e)) = err_rx.recv().await {
            error!(widget = %id, "Widget sync failed: {}", e);
        }

        Ok(())
    }
}
