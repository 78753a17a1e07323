//! termgauge Engine Integration Tests
//!
//! Exercises the engine through the public API:
//! - Routing: dashboard, user and alias priority over real config files
//! - Execution: cache, retries and batch fan-out through the router
//! - Sync: a YAML dashboard refreshed through the whole cascade

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use termgauge::adapters::FakeGatherer;
use termgauge::config::{Datasource, DatasourceKind, DashboardSpec, UserConfig, WidgetSpec};
use termgauge::metrics::{
    CacheConfig, DatasourceRouter, ExecutorConfig, GathererConfig, GathererFactory, MetricCache,
    ParallelQueryExecutor, QueryExecutor, RouterConfig, WidgetQuery,
};
use termgauge::render::{GaugeView, GraphView, Renderer, SinglestatView};
use termgauge::sync::{Dashboard, DashboardConfig, SyncRequest, Syncer, TemplateData};
use termgauge::{
    Error, Gatherer, IdentifiableGatherer, MetricController, MetricSeries, Query, Result,
};

// =============================================================================
// Fixtures
// =============================================================================

const DASHBOARD: &str = r#"
title: Services
datasources:
  - id: prometheus
    prometheus:
      address: http://dashboard-prometheus:9090
  - id: prom2
    prometheus:
      address: http://dashboard-prom2:9090
  - id: broken
    graphite:
      address: http://broken:8080
variables:
  env: prod
widgets:
  - id: cpu
    title: CPU
    gauge:
      query:
        expr: cpu{env="{{.env}}"}
        datasource_id: prometheus
      percent_value: true
      thresholds:
        - start_value: 0
          color: green
        - start_value: 101
          color: red
  - id: errors
    singlestat:
      query:
        expr: errors
        datasource_id: prom2
      decimals: 1
  - id: latency
    graph:
      queries:
        - expr: latency
          datasource_id: prometheus
  - id: dead
    singlestat:
      query:
        expr: anything
        datasource_id: broken
"#;

const USER: &str = r#"
datasources:
  - id: prometheus
    fake: {}
  - id: localprom
    fake: {}
"#;

/// Synthetic backends tagged `kind:id`; graphite ones always fail.
#[derive(Default)]
struct TestFactory {
    calls: Arc<AtomicUsize>,
}

struct CountingFake {
    tag: String,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Gatherer for CountingFake {
    async fn gather_single(&self, q: &Query, at: DateTime<Utc>) -> Result<Vec<MetricSeries>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut series = FakeGatherer::new().gather_single(q, at).await?;
        series[0] = series[0].clone().with_label("backend", self.tag.clone());
        Ok(series)
    }

    async fn gather_range(
        &self,
        q: &Query,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<MetricSeries>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        FakeGatherer::new().gather_range(q, start, end, step).await
    }
}

struct Unreachable;

#[async_trait]
impl Gatherer for Unreachable {
    async fn gather_single(&self, _: &Query, _: DateTime<Utc>) -> Result<Vec<MetricSeries>> {
        Err(Error::Backend {
            datasource: "broken".into(),
            message: "connection refused".into(),
        })
    }

    async fn gather_range(
        &self,
        _: &Query,
        _: DateTime<Utc>,
        _: DateTime<Utc>,
        _: Duration,
    ) -> Result<Vec<MetricSeries>> {
        Err(Error::Backend {
            datasource: "broken".into(),
            message: "connection refused".into(),
        })
    }
}

impl GathererFactory for TestFactory {
    fn create(&self, ds: &Datasource) -> Result<Arc<dyn Gatherer>> {
        match &ds.kind {
            DatasourceKind::Graphite(_) => Ok(Arc::new(Unreachable)),
            DatasourceKind::InfluxDb(_) => Err(Error::UnsupportedDatasource { id: ds.id.clone() }),
            kind => Ok(Arc::new(CountingFake {
                tag: format!("{}:{}", kind.name(), ds.id),
                calls: Arc::clone(&self.calls),
            })),
        }
    }
}

fn fast_gatherer_config() -> GathererConfig {
    GathererConfig {
        single_backoff_step: Duration::from_millis(1),
        range_backoff_step: Duration::from_millis(1),
        ..Default::default()
    }
}

/// Builds the router the way the binary does: dashboard + user + aliases.
fn build_router(factory: &TestFactory) -> Result<DatasourceRouter> {
    let spec = DashboardSpec::from_yaml(DASHBOARD)?;
    let user = UserConfig::from_yaml(USER)?;

    DatasourceRouter::new(
        RouterConfig {
            dashboard_datasources: spec.datasources,
            user_datasources: user.datasources,
            aliases: BTreeMap::from([("prom2".to_string(), "localprom".to_string())]),
            gatherer: fast_gatherer_config(),
        },
        factory,
    )
}

fn at() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

// =============================================================================
// Routing
// =============================================================================

mod routing_tests {
    use super::*;

    #[tokio::test]
    async fn test_user_and_alias_overrides() {
        let router = build_router(&TestFactory::default()).unwrap();

        let by = |series: Vec<MetricSeries>| series[0].labels["backend"].clone();

        let direct = router
            .gather_single(&Query::new("up", "prometheus"), at())
            .await
            .unwrap();
        assert_eq!(by(direct), "fake:prometheus");

        let aliased = router
            .gather_single(&Query::new("up", "prom2"), at())
            .await
            .unwrap();
        assert_eq!(by(aliased), "fake:localprom");
        assert_eq!(router.resolve("prom2").unwrap().id(), "localprom");
    }

    #[test]
    fn test_alias_to_missing_user_datasource_is_fatal() {
        let result = DatasourceRouter::new(
            RouterConfig {
                aliases: BTreeMap::from([("prom2".to_string(), "nowhere".to_string())]),
                ..Default::default()
            },
            &TestFactory::default(),
        );
        let err = result.unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(err.to_string(), "Alias nowhere for ID prom2 not found");
    }
}

// =============================================================================
// Execution
// =============================================================================

mod execution_tests {
    use super::*;

    fn executor() -> Arc<QueryExecutor> {
        Arc::new(QueryExecutor::new(
            ExecutorConfig {
                backoff_unit: Duration::from_millis(1),
                ..Default::default()
            },
            MetricCache::new(CacheConfig::default()),
        ))
    }

    #[tokio::test]
    async fn test_batch_of_five_with_one_broken_datasource() {
        let router = build_router(&TestFactory::default()).unwrap();
        let executor = executor();

        let batch: Vec<WidgetQuery> = ["prometheus", "prom2", "broken", "prometheus", "prom2"]
            .iter()
            .enumerate()
            .map(|(i, ds)| WidgetQuery {
                id: format!("w{}", i),
                gatherer: router.resolve(ds).unwrap() as Arc<dyn IdentifiableGatherer>,
                query: Query::new(format!("q{}", i), *ds),
                at: at(),
            })
            .collect();

        let results = ParallelQueryExecutor::new(executor.clone())
            .execute_widget_queries(batch)
            .await;

        assert_eq!(results.len(), 5);
        for i in [0, 1, 3, 4] {
            let r = &results[&format!("w{}", i)];
            assert_eq!(r.metrics().unwrap()[0].id, format!("q{}", i));
        }
        assert!(matches!(
            results["w2"].error(),
            Some(Error::RetriesExhausted { attempts: 3, .. })
        ));

        let stats = executor.stats();
        assert_eq!(stats.successes, 4);
        assert_eq!(stats.errors, 1);
        assert_eq!(router.stats()["broken"].failed_queries, 3);
    }

    #[tokio::test]
    async fn test_controller_serves_repeats_from_cache() {
        let factory = TestFactory::default();
        let calls = Arc::clone(&factory.calls);
        let router = Arc::new(build_router(&factory).unwrap());
        let controller = MetricController::new(router, executor());

        use termgauge::Controller;
        let q = Query::new("cpu", "prometheus");
        let first = controller.get_single_metric(&q, at()).await.unwrap();
        let second = controller.get_single_metric(&q, at()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(controller.executor().stats().cache_hits, 1);
        assert_eq!(controller.executor().cache().stats().hits, 1);
    }
}

// =============================================================================
// Sync
// =============================================================================

mod sync_tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        updates: Mutex<Vec<String>>,
    }

    struct View {
        widget: String,
        recorder: Arc<Recorder>,
    }

    impl View {
        fn log(&self, what: String) {
            self.recorder
                .updates
                .lock()
                .push(format!("{}:{}", self.widget, what));
        }
    }

    impl GaugeView for View {
        fn sync(&self, is_percent: bool, value: f64) -> Result<()> {
            self.log(format!("gauge percent={} in_range={}", is_percent, (0.0..=100.0).contains(&value)));
            Ok(())
        }
        fn set_color(&self, color: &str) -> Result<()> {
            self.log(format!("color {}", color));
            Ok(())
        }
    }

    impl SinglestatView for View {
        fn sync(&self, text: &str) -> Result<()> {
            self.log(format!("text decimals={}", text.split('.').nth(1).map_or(0, str::len)));
            Ok(())
        }
        fn set_color(&self, color: &str) -> Result<()> {
            self.log(format!("color {}", color));
            Ok(())
        }
    }

    impl GraphView for View {
        fn sync(&self, series: &[MetricSeries]) -> Result<()> {
            self.log(format!("graph series={}", series.len()));
            Ok(())
        }
    }

    struct RecordingRenderer(Arc<Recorder>);

    impl RecordingRenderer {
        fn view(&self, widget: &WidgetSpec) -> Arc<View> {
            Arc::new(View {
                widget: widget.id.clone(),
                recorder: Arc::clone(&self.0),
            })
        }
    }

    impl Renderer for RecordingRenderer {
        fn gauge(&self, w: &WidgetSpec) -> Result<Arc<dyn GaugeView>> {
            Ok(self.view(w))
        }
        fn singlestat(&self, w: &WidgetSpec) -> Result<Arc<dyn SinglestatView>> {
            Ok(self.view(w))
        }
        fn graph(&self, w: &WidgetSpec) -> Result<Arc<dyn GraphView>> {
            Ok(self.view(w))
        }
    }

    #[tokio::test]
    async fn test_dashboard_wave_updates_healthy_widgets() {
        let router = Arc::new(build_router(&TestFactory::default()).unwrap());
        let executor = Arc::new(QueryExecutor::new(
            ExecutorConfig {
                backoff_unit: Duration::from_millis(1),
                ..Default::default()
            },
            MetricCache::new(CacheConfig::default()),
        ));
        let controller = Arc::new(MetricController::new(router, executor));
        let recorder = Arc::new(Recorder::default());

        let spec = DashboardSpec::from_yaml(DASHBOARD).unwrap();
        let dashboard = Dashboard::from_spec(
            &spec,
            DashboardConfig::default(),
            controller,
            &RecordingRenderer(Arc::clone(&recorder)),
        )
        .unwrap();
        assert_eq!(dashboard.widget_count(), 4);

        let request = SyncRequest {
            time_range_start: at() - chrono::Duration::hours(1),
            time_range_end: at(),
            template_data: TemplateData::new(),
        };
        dashboard.sync(&request).await.unwrap();
        dashboard.sync(&request).await.unwrap();

        let mut updates = recorder.updates.lock().clone();
        updates.sort();
        assert_eq!(
            updates,
            vec![
                "cpu:color green",
                "cpu:gauge percent=true in_range=true",
                "cpu:gauge percent=true in_range=true",
                "errors:text decimals=1",
                "errors:text decimals=1",
                "latency:graph series=1",
                "latency:graph series=1",
            ]
        );
    }
}
