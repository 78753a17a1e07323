//! termgauge - Terminal Metrics Dashboard Engine
//!
//! Keeps a fleet of periodically refreshed metric queries correct and
//! bounded under partial failure: several datasources, transient backend
//! errors, per-operation deadlines, a shared cache and bounded concurrency.
//!
//! # Architecture
//!
//! ```text
//! App ─▶ Dashboard ─▶ Widgets ─▶ MetricController
//!                                    │
//!                   QueryExecutor ◀──┴──▶ DatasourceRouter
//!                         │                     │
//!                    MetricCache        ResilientGatherer ─▶ backend adapter
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Prometheus, Graphite, InfluxDB and synthetic backends
//! - [`config`] - Dashboard and user datasource declarations
//! - [`controller`] - Metric access for widgets
//! - [`domain`] - Queries, series and the gatherer ports
//! - [`error`] - Error types
//! - [`fault`] - Panic containment at task boundaries
//! - [`metrics`] - Cache, resilient gatherer, router and query executors
//! - [`render`] - Rendering delegates
//! - [`sync`] - Process, dashboard and widget sync cascade
//! - [`telemetry`] - Prometheus collectors for the engine

pub mod adapters;
pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod fault;
pub mod metrics;
pub mod render;
pub mod sync;
pub mod telemetry;

// Re-export commonly used types
pub use controller::{Controller, MetricController};
pub use domain::{Gatherer, IdentifiableGatherer, MetricPoint, MetricSeries, Query, TimeRange};
pub use error::{Error, Result};
pub use metrics::{
    DatasourceRouter, MetricCache, ParallelQueryExecutor, QueryExecutor, ResilientGatherer,
};
pub use sync::{App, Dashboard, SyncRequest, Syncer};
