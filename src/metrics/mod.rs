//! Metric gathering engine
//!
//! ```text
//! QueryExecutor ──▶ MetricCache
//!       │
//!       ▼
//! DatasourceRouter ──▶ ResilientGatherer ──▶ backend adapter
//! ```

mod cache;
mod config;
mod executor;
mod gatherer;
mod router;

pub use cache::{CacheKey, CacheStats, MetricCache};
pub use config::{CacheConfig, EngineConfig, ExecutorConfig, GathererConfig};
pub use executor::{
    ExecutionMetrics, ExecutionStats, ParallelQueryExecutor, QueryExecutor, WidgetQuery,
    WidgetResult,
};
pub use gatherer::{GathererStats, ResilientGatherer};
pub use router::{DatasourceRouter, GathererFactory, RouterConfig};
