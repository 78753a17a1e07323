//! Rendering delegates
//!
//! Widgets push values and colors to views through these ports. Drawing on
//! a terminal is left to the view implementation; [`LogRenderer`] reports
//! every update through `tracing`.

mod log;

pub use self::log::{LogRenderer, LogView};

use std::sync::Arc;

use crate::config::WidgetSpec;
use crate::domain::MetricSeries;
use crate::error::Result;

pub trait GaugeView: Send + Sync {
    /// Show `value`, a percentage when `is_percent` is set.
    fn sync(&self, is_percent: bool, value: f64) -> Result<()>;
    fn set_color(&self, color: &str) -> Result<()>;
}

pub trait SinglestatView: Send + Sync {
    fn sync(&self, text: &str) -> Result<()>;
    fn set_color(&self, color: &str) -> Result<()>;
}

pub trait GraphView: Send + Sync {
    fn sync(&self, series: &[MetricSeries]) -> Result<()>;
}

/// Creates the view backing each declared widget.
pub trait Renderer: Send + Sync {
    fn gauge(&self, widget: &WidgetSpec) -> Result<Arc<dyn GaugeView>>;
    fn singlestat(&self, widget: &WidgetSpec) -> Result<Arc<dyn SinglestatView>>;
    fn graph(&self, widget: &WidgetSpec) -> Result<Arc<dyn GraphView>>;
}
