//! termgauge
//!
//! Terminal metrics dashboard: loads a dashboard, routes its widget queries
//! to the configured datasources and refreshes them on a fixed interval.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           termgauge                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │     App      │───▶│  Dashboard   │───▶│   Widgets    │       │
//! │  │  (refresh)   │    │   (wave)     │    │   (fetch)    │       │
//! │  └──────────────┘    └──────────────┘    └──────┬───────┘       │
//! │                                                 ▼               │
//! │          MetricCache ◀── QueryExecutor ──▶ DatasourceRouter     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use termgauge::adapters::BackendFactory;
use termgauge::config::{parse_alias, DashboardSpec, DatasourceKind, UserConfig};
use termgauge::metrics::{
    DatasourceRouter, EngineConfig, MetricCache, ParallelQueryExecutor, QueryExecutor,
    RouterConfig, WidgetQuery,
};
use termgauge::render::LogRenderer;
use termgauge::sync::{App, AppConfig, Dashboard, DashboardConfig};
use termgauge::{IdentifiableGatherer, MetricController, Query};

// =============================================================================
// CLI Arguments
// =============================================================================

/// termgauge - Metrics dashboards in the terminal
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Dashboard file (YAML)
    #[arg(short, long, env = "TERMGAUGE_DASHBOARD", default_value = "dashboard.yaml")]
    dashboard: PathBuf,

    /// User datasources file (YAML), overriding dashboard datasources
    #[arg(short, long, env = "TERMGAUGE_USER_CONFIG")]
    user_config: Option<PathBuf>,

    /// Datasource alias, dashboardID=userID (repeatable)
    #[arg(short, long = "alias")]
    aliases: Vec<String>,

    /// Refresh interval in seconds
    #[arg(long, env = "TERMGAUGE_REFRESH_INTERVAL_SECONDS", default_value = "10")]
    refresh_interval_seconds: u64,

    /// Relative time range in minutes, ending now
    #[arg(long, env = "TERMGAUGE_RELATIVE_RANGE_MINUTES", default_value = "60")]
    relative_range_minutes: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Metrics server bind address, disabled when unset
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting termgauge");
    info!("  Dashboard: {}", args.dashboard.display());
    info!("  Refresh interval: {}s", args.refresh_interval_seconds);
    info!("  Relative range: {} minutes", args.relative_range_minutes);

    let spec = DashboardSpec::from_file(&args.dashboard)
        .with_context(|| format!("loading dashboard {}", args.dashboard.display()))?;
    let user = match &args.user_config {
        Some(path) => UserConfig::from_file(path)
            .with_context(|| format!("loading user config {}", path.display()))?,
        None => UserConfig::default(),
    };
    let aliases = args
        .aliases
        .iter()
        .map(|raw| parse_alias(raw))
        .collect::<termgauge::Result<BTreeMap<_, _>>>()?;

    let engine = EngineConfig::default();

    let router_config = RouterConfig {
        dashboard_datasources: spec.datasources.clone(),
        user_datasources: user.datasources.clone(),
        aliases,
        gatherer: engine.gatherer.clone(),
    };
    let probes = probe_expressions(&router_config);
    let router = Arc::new(DatasourceRouter::new(router_config, &BackendFactory)?);
    info!(datasources = ?router.datasource_ids(), "Datasources configured");

    let cache = MetricCache::new(engine.cache.clone());
    let executor = Arc::new(QueryExecutor::new(engine.executor.clone(), cache));

    probe_datasources(&router, &executor, probes).await;

    // Start metrics server
    if let Some(addr) = args.metrics_addr.clone() {
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(&addr).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let controller = Arc::new(MetricController::new(router, executor));
    let dashboard = Dashboard::from_spec(
        &spec,
        DashboardConfig::default(),
        controller,
        &LogRenderer::new(),
    )?;

    let app = App::new(
        AppConfig {
            refresh_interval: Duration::from_secs(args.refresh_interval_seconds.max(1)),
            relative_time_range: Duration::from_secs(args.relative_range_minutes.max(1) * 60),
            ..Default::default()
        },
        Arc::new(dashboard),
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupt received"),
                Err(e) => error!("Failed to listen for interrupt: {}", e),
            }
            shutdown.cancel();
        });
    }

    app.run(shutdown).await?;

    info!("termgauge shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Startup Probe
// =============================================================================

/// Cheap instant query per routable datasource, by the kind that serves it.
fn probe_expressions(config: &RouterConfig) -> HashMap<String, &'static str> {
    fn expr(kind: &DatasourceKind) -> Option<&'static str> {
        match kind {
            DatasourceKind::Prometheus(_) => Some("vector(1)"),
            DatasourceKind::Graphite(_) => Some("constantLine(1)"),
            DatasourceKind::Fake(_) => Some("probe"),
            DatasourceKind::InfluxDb(_) => None,
        }
    }

    let user: HashMap<_, _> = config
        .user_datasources
        .iter()
        .map(|ds| (ds.id.as_str(), &ds.kind))
        .collect();

    let mut probes = HashMap::new();
    for ds in &config.dashboard_datasources {
        let kind = user.get(ds.id.as_str()).copied().unwrap_or(&ds.kind);
        if let Some(e) = expr(kind) {
            probes.insert(ds.id.clone(), e);
        }
    }
    for (id, target) in &config.aliases {
        probes.remove(id);
        if let Some(e) = user.get(target.as_str()).and_then(|k| expr(k)) {
            probes.insert(id.clone(), e);
        }
    }
    probes
}

async fn probe_datasources(
    router: &DatasourceRouter,
    executor: &Arc<QueryExecutor>,
    probes: HashMap<String, &'static str>,
) {
    let now = Utc::now();
    let mut batch = Vec::with_capacity(probes.len());
    for (id, expr) in probes {
        match router.resolve(&id) {
            Ok(gatherer) => batch.push(WidgetQuery {
                gatherer: gatherer as Arc<dyn IdentifiableGatherer>,
                query: Query::new(expr, id.clone()),
                id,
                at: now,
            }),
            Err(e) => debug!("Skipping probe of {}: {}", id, e),
        }
    }

    let results = ParallelQueryExecutor::new(Arc::clone(executor))
        .execute_widget_queries(batch)
        .await;
    for (id, result) in results {
        match result.error() {
            None => info!(datasource = %id, "Datasource reachable"),
            Some(e) => warn!(datasource = %id, "Datasource probe failed: {}", e),
        }
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(body.into()));
        *response.status_mut() = status;
        response
    }

    async fn metrics_handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/metrics" => match termgauge::telemetry::render() {
                Ok((content_type, buffer)) => {
                    let mut response = respond(StatusCode::OK, buffer);
                    if let Ok(value) = HeaderValue::from_str(&content_type) {
                        response.headers_mut().insert(CONTENT_TYPE, value);
                    }
                    response
                }
                Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            },
            "/healthz" | "/livez" | "/readyz" => respond(StatusCode::OK, "ok"),
            _ => respond(StatusCode::NOT_FOUND, "not found"),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid metrics server address {}", addr))?;

    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind metrics server")?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("metrics server accept error")?;

        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_handler))
                .await
            {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
