//! Renderer that logs widget updates.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use super::{GaugeView, GraphView, Renderer, SinglestatView};
use crate::config::WidgetSpec;
use crate::domain::MetricSeries;
use crate::error::Result;

#[derive(Debug, Default, Clone, Copy)]
pub struct LogRenderer;

impl LogRenderer {
    pub fn new() -> Self {
        Self
    }

    fn view(widget: &WidgetSpec) -> Arc<LogView> {
        Arc::new(LogView::new(&widget.id, &widget.title))
    }
}

impl Renderer for LogRenderer {
    fn gauge(&self, widget: &WidgetSpec) -> Result<Arc<dyn GaugeView>> {
        Ok(Self::view(widget))
    }

    fn singlestat(&self, widget: &WidgetSpec) -> Result<Arc<dyn SinglestatView>> {
        Ok(Self::view(widget))
    }

    fn graph(&self, widget: &WidgetSpec) -> Result<Arc<dyn GraphView>> {
        Ok(Self::view(widget))
    }
}

/// A view that logs what it would draw and remembers its color.
#[derive(Debug)]
pub struct LogView {
    widget: String,
    title: String,
    color: Mutex<Option<String>>,
}

impl LogView {
    pub fn new(widget: &str, title: &str) -> Self {
        Self {
            widget: widget.to_string(),
            title: title.to_string(),
            color: Mutex::new(None),
        }
    }

    pub fn color(&self) -> Option<String> {
        self.color.lock().clone()
    }

    fn store_color(&self, color: &str) {
        info!(widget = %self.widget, color = %color, "Widget color changed");
        *self.color.lock() = Some(color.to_string());
    }
}

impl GaugeView for LogView {
    fn sync(&self, is_percent: bool, value: f64) -> Result<()> {
        if is_percent {
            info!(widget = %self.widget, title = %self.title, "gauge {:.0}%", value);
        } else {
            info!(widget = %self.widget, title = %self.title, "gauge {}", value);
        }
        Ok(())
    }

    fn set_color(&self, color: &str) -> Result<()> {
        self.store_color(color);
        Ok(())
    }
}

impl SinglestatView for LogView {
    fn sync(&self, text: &str) -> Result<()> {
        info!(widget = %self.widget, title = %self.title, "singlestat {}", text);
        Ok(())
    }

    fn set_color(&self, color: &str) -> Result<()> {
        self.store_color(color);
        Ok(())
    }
}

impl GraphView for LogView {
    fn sync(&self, series: &[MetricSeries]) -> Result<()> {
        for s in series {
            match s.latest() {
                Some(p) => info!(
                    widget = %self.widget,
                    series = %s.id,
                    points = s.points.len(),
                    "graph latest {} at {}",
                    p.value,
                    p.timestamp
                ),
                None => info!(widget = %self.widget, series = %s.id, "graph series has no points"),
            }
        }
        Ok(())
    }
}
