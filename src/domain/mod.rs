//! Domain Layer
//!
//! Metric value objects and the gatherer port every backend implements.
//!
//! # Usage
//!
//! ```ignore
//! use termgauge::domain::{Gatherer, Query};
//!
//! async fn latest<G: Gatherer>(g: &G) -> Result<f64> {
//!     let series = g.gather_single(&Query::new("up", "prometheus"), Utc::now()).await?;
//!     // ...
//! }
//! ```

pub mod ports;

pub use ports::{Gatherer, IdentifiableGatherer, MetricPoint, MetricSeries, Query, TimeRange};
