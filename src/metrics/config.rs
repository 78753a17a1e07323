//! Engine configuration
//!
//! Every numeric default lives in one of these structs and is passed into
//! the owning component's constructor.

use std::time::Duration;

// =============================================================================
// Gatherer
// =============================================================================

/// Timeout and retry policy of a [`ResilientGatherer`](super::ResilientGatherer).
#[derive(Debug, Clone, PartialEq)]
pub struct GathererConfig {
    /// Lower bound for the per-call timeout
    pub min_timeout: Duration,

    /// Timeout used when none (or a non-positive one) is configured
    pub default_timeout: Duration,

    /// Upper bound for the per-call timeout, range scaling included
    pub max_timeout: Duration,

    /// Total attempts per call, first try included
    pub max_attempts: u32,

    /// Backoff step between instant query attempts
    pub single_backoff_step: Duration,

    /// Backoff step between range query attempts
    pub range_backoff_step: Duration,
}

impl Default for GathererConfig {
    fn default() -> Self {
        Self {
            min_timeout: Duration::from_secs(1),
            default_timeout: Duration::from_secs(5),
            max_timeout: Duration::from_secs(30),
            max_attempts: 3,
            single_backoff_step: Duration::from_millis(100),
            range_backoff_step: Duration::from_millis(250),
        }
    }
}

// =============================================================================
// Cache
// =============================================================================

/// Configuration for the [`MetricCache`](super::MetricCache)
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Entry count above which half-full inserts trigger an expiry sweep
    pub max_size: usize,

    /// Time-to-live of every entry
    pub max_age: Duration,

    /// Period of the background expiry sweep
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            max_age: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Configuration for the [`QueryExecutor`](super::QueryExecutor)
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Consult and populate the metric cache
    pub enable_caching: bool,

    /// Retry transient errors
    pub enable_retry: bool,

    /// Attempts per query when retry is enabled
    pub max_attempts: u32,

    /// Deadline for one query, slot wait included. `None` means unbounded.
    pub query_timeout: Option<Duration>,

    /// Process-wide cap on in-flight queries. `None` means unbounded.
    pub max_concurrent_queries: Option<usize>,

    /// Unit of the quadratic backoff (`attempt² × unit`)
    pub backoff_unit: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            enable_caching: true,
            enable_retry: true,
            max_attempts: 3,
            query_timeout: Some(Duration::from_secs(5)),
            max_concurrent_queries: Some(10),
            backoff_unit: Duration::from_millis(100),
        }
    }
}

impl ExecutorConfig {
    /// Plain pass-through behaviour: no cache, no retry, no deadline, no limit.
    pub fn legacy() -> Self {
        Self {
            enable_caching: false,
            enable_retry: false,
            max_attempts: 1,
            query_timeout: None,
            max_concurrent_queries: None,
            backoff_unit: Duration::from_millis(100),
        }
    }

    /// Attempts actually made per query.
    pub fn attempts(&self) -> u32 {
        if self.enable_retry {
            self.max_attempts.max(1)
        } else {
            1
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// All metric engine settings in one value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    pub gatherer: GathererConfig,
    pub cache: CacheConfig,
    pub executor: ExecutorConfig,
}
