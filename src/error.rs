//! Error types for the dashboard engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while gathering and syncing dashboard metrics
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    // =========================================================================
    // Configuration Errors (fatal at construction time)
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Datasource kind that no gatherer factory can build
    #[error("Unsupported datasource kind for datasource: {id}")]
    UnsupportedDatasource { id: String },

    /// Alias target missing from the user datasources
    #[error("Alias {alias} for ID {id} not found")]
    AliasNotFound { alias: String, id: String },

    // =========================================================================
    // Query Errors
    // =========================================================================
    /// Query references an unknown datasource
    #[error("Datasource {0} does not exist")]
    DatasourceNotFound(String),

    /// Deadline elapsed before the operation finished
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Operation was canceled by its caller
    #[error("Operation canceled: {0}")]
    Canceled(String),

    /// Deadline elapsed while waiting for a concurrency slot
    #[error("Query execution timeout waiting for rate limit: {0}")]
    RateLimitTimeout(String),

    /// Backend returned an error for the query
    #[error("Backend {datasource} error: {message}")]
    Backend { datasource: String, message: String },

    /// Backend connection error
    #[error("Backend connection error: {0}")]
    BackendConnection(#[source] reqwest::Error),

    /// Backend response could not be decoded
    #[error("Failed to parse backend response: {0}")]
    BackendResponseParse(String),

    /// A transient error survived every retry attempt
    #[error("Query failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// Query returned no usable series or points
    #[error("No metrics returned: {0}")]
    NoMetrics(String),

    // =========================================================================
    // Sync Errors
    // =========================================================================
    /// A concurrent task panicked and the fault was contained
    #[error("Task panic recovered: {0}")]
    TaskPanicked(String),

    /// Render delegate rejected an update
    #[error("Render error: {0}")]
    Render(String),

    // =========================================================================
    // Ambient Errors
    // =========================================================================
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML decoding error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for deadline, cancellation and timeout failures.
    ///
    /// These are never retried and are counted in the timeout bucket.
    pub fn is_context(&self) -> bool {
        match self {
            Error::DeadlineExceeded(_) | Error::Canceled(_) | Error::RateLimitTimeout(_) => true,
            Error::BackendConnection(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// True for errors raised while building the router.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::UnsupportedDatasource { .. } | Error::AliasNotFound { .. }
        )
    }

    /// Wrap an error with the number of attempts that were made.
    pub fn exhausted(attempts: u32, source: Error) -> Self {
        Error::RetriesExhausted {
            attempts,
            source: Box::new(source),
        }
    }
}
