//! Datasource Router
//!
//! Resolves a query's datasource ID to the gatherer that serves it.
//!
//! Priority, lowest first:
//!
//! ```text
//! 0. dashboard datasources   (declared by the dashboard)
//! 1. user datasources        (same ID replaces the dashboard one)
//! 2. aliases                 (dashboard ID → user ID, always wins)
//! ```
//!
//! A user datasource is routable only through a matching dashboard ID or an
//! alias; the dashboard defines the IDs its widgets may reference.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::config::GathererConfig;
use super::gatherer::{GathererStats, ResilientGatherer};
use crate::config::Datasource;
use crate::domain::{Gatherer, MetricSeries, Query};
use crate::error::{Error, Result};

/// Builds the raw backend client for a configured datasource.
pub trait GathererFactory: Send + Sync {
    fn create(&self, datasource: &Datasource) -> Result<Arc<dyn Gatherer>>;
}

/// Inputs of [`DatasourceRouter::new`].
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    /// Lowest priority (0)
    pub dashboard_datasources: Vec<Datasource>,
    /// Mid priority (1), also the targets of aliases
    pub user_datasources: Vec<Datasource>,
    /// Highest priority (2): dashboard ID → user ID
    pub aliases: BTreeMap<String, String>,
    /// Policy applied to every created gatherer
    pub gatherer: GathererConfig,
}

/// Dispatches queries to per-datasource resilient gatherers.
pub struct DatasourceRouter {
    routes: HashMap<String, Arc<ResilientGatherer>>,
}

impl DatasourceRouter {
    /// Build the routing table.
    ///
    /// Fails when a datasource cannot be built or an alias names a user
    /// datasource that does not exist.
    pub fn new(config: RouterConfig, factory: &dyn GathererFactory) -> Result<Self> {
        let build = |ds: &Datasource| -> Result<Arc<ResilientGatherer>> {
            let raw = factory.create(ds)?;
            Ok(Arc::new(ResilientGatherer::new(
                ds.id.clone(),
                raw,
                config.gatherer.clone(),
            )))
        };

        let mut routes = HashMap::new();
        for ds in &config.dashboard_datasources {
            routes.insert(ds.id.clone(), build(ds)?);
        }

        let mut user = HashMap::new();
        for ds in &config.user_datasources {
            user.insert(ds.id.clone(), build(ds)?);
        }

        for (id, gatherer) in routes.iter_mut() {
            if let Some(replacement) = user.get(id) {
                debug!(datasource = %id, "User datasource overrides dashboard datasource");
                *gatherer = Arc::clone(replacement);
            }
        }

        for (id, alias) in &config.aliases {
            let target = user.get(alias).ok_or_else(|| Error::AliasNotFound {
                alias: alias.clone(),
                id: id.clone(),
            })?;
            debug!(datasource = %id, alias = %alias, "Aliasing datasource");
            routes.insert(id.clone(), Arc::clone(target));
        }

        info!(routes = routes.len(), "Datasource router ready");
        Ok(Self { routes })
    }

    /// The gatherer serving `datasource_id`.
    pub fn resolve(&self, datasource_id: &str) -> Result<Arc<ResilientGatherer>> {
        self.routes
            .get(datasource_id)
            .cloned()
            .ok_or_else(|| Error::DatasourceNotFound(datasource_id.to_string()))
    }

    /// Routable IDs, sorted.
    pub fn datasource_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.routes.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Per-route gatherer statistics. Aliased IDs report their target's stats.
    pub fn stats(&self) -> BTreeMap<String, GathererStats> {
        self.routes
            .iter()
            .map(|(id, g)| (id.clone(), g.stats()))
            .collect()
    }
}

impl std::fmt::Debug for DatasourceRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasourceRouter")
            .field("routes", &self.datasource_ids())
            .finish()
    }
}

#[async_trait]
impl Gatherer for DatasourceRouter {
    async fn gather_single(&self, query: &Query, at: DateTime<Utc>) -> Result<Vec<MetricSeries>> {
        self.resolve(&query.datasource_id)?
            .gather_single(query, at)
            .await
    }

    async fn gather_range(
        &self,
        query: &Query,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<MetricSeries>> {
        self.resolve(&query.datasource_id)?
            .gather_range(query, start, end, step)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatasourceKind, FakeDatasource, InfluxDbDatasource, PrometheusDatasource};
    use crate::domain::IdentifiableGatherer;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every query with one series named after the datasource address.
    struct TaggedGatherer {
        tag: String,
    }

    #[async_trait]
    impl Gatherer for TaggedGatherer {
        async fn gather_single(&self, _: &Query, _: DateTime<Utc>) -> Result<Vec<MetricSeries>> {
            Ok(vec![MetricSeries::new(self.tag.clone())])
        }

        async fn gather_range(
            &self,
            _: &Query,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
            _: Duration,
        ) -> Result<Vec<MetricSeries>> {
            Ok(vec![MetricSeries::new(self.tag.clone())])
        }
    }

    #[derive(Default)]
    struct TaggingFactory {
        created: AtomicUsize,
    }

    impl GathererFactory for TaggingFactory {
        fn create(&self, ds: &Datasource) -> Result<Arc<dyn Gatherer>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            match &ds.kind {
                DatasourceKind::Prometheus(p) => Ok(Arc::new(TaggedGatherer {
                    tag: p.address.clone(),
                })),
                DatasourceKind::Fake(_) => Ok(Arc::new(TaggedGatherer {
                    tag: format!("fake:{}", ds.id),
                })),
                _ => Err(Error::UnsupportedDatasource { id: ds.id.clone() }),
            }
        }
    }

    fn prom(id: &str, address: &str) -> Datasource {
        Datasource::new(
            id,
            DatasourceKind::Prometheus(PrometheusDatasource {
                address: address.into(),
            }),
        )
    }

    async fn served_by(router: &DatasourceRouter, id: &str) -> String {
        let series = router
            .gather_single(&Query::new("up", id), Utc::now())
            .await
            .unwrap();
        series[0].id.clone()
    }

    #[tokio::test]
    async fn test_dashboard_datasources_are_routed() {
        let router = DatasourceRouter::new(
            RouterConfig {
                dashboard_datasources: vec![prom("prometheus", "dash")],
                ..Default::default()
            },
            &TaggingFactory::default(),
        )
        .unwrap();

        assert_eq!(served_by(&router, "prometheus").await, "dash");
        assert_eq!(router.resolve("prometheus").unwrap().id(), "prometheus");
    }

    #[tokio::test]
    async fn test_user_datasource_overrides_dashboard() {
        let router = DatasourceRouter::new(
            RouterConfig {
                dashboard_datasources: vec![prom("prometheus", "dash")],
                user_datasources: vec![prom("prometheus", "user")],
                ..Default::default()
            },
            &TaggingFactory::default(),
        )
        .unwrap();

        assert_eq!(served_by(&router, "prometheus").await, "user");
    }

    #[tokio::test]
    async fn test_alias_wins_over_direct_match() {
        let router = DatasourceRouter::new(
            RouterConfig {
                dashboard_datasources: vec![prom("prom2", "dash"), prom("localprom", "dash-local")],
                user_datasources: vec![prom("localprom", "user-local"), prom("prom2", "user-prom2")],
                aliases: BTreeMap::from([("prom2".to_string(), "localprom".to_string())]),
                ..Default::default()
            },
            &TaggingFactory::default(),
        )
        .unwrap();

        assert_eq!(served_by(&router, "prom2").await, "user-local");
        assert_eq!(served_by(&router, "localprom").await, "user-local");
        assert_eq!(router.resolve("prom2").unwrap().id(), "localprom");
    }

    #[tokio::test]
    async fn test_alias_can_add_new_route() {
        let router = DatasourceRouter::new(
            RouterConfig {
                user_datasources: vec![prom("localprom", "user-local")],
                aliases: BTreeMap::from([("prom2".to_string(), "localprom".to_string())]),
                ..Default::default()
            },
            &TaggingFactory::default(),
        )
        .unwrap();

        assert_eq!(served_by(&router, "prom2").await, "user-local");
        // User-only datasources are reachable through aliases, not directly.
        assert_matches!(router.resolve("localprom"), Err(Error::DatasourceNotFound(_)));
    }

    #[test]
    fn test_missing_alias_target_fails_construction() {
        let result = DatasourceRouter::new(
            RouterConfig {
                dashboard_datasources: vec![prom("prom2", "dash")],
                aliases: BTreeMap::from([("prom2".to_string(), "missing".to_string())]),
                ..Default::default()
            },
            &TaggingFactory::default(),
        );

        assert_matches!(
            result,
            Err(Error::AliasNotFound { ref alias, ref id }) if alias == "missing" && id == "prom2"
        );
    }

    #[test]
    fn test_unsupported_kind_fails_construction() {
        let influx = Datasource::new(
            "influx",
            DatasourceKind::InfluxDb(InfluxDbDatasource {
                address: "http://localhost:8086".into(),
                database: "db".into(),
                username: None,
                password: None,
                insecure: false,
            }),
        );
        let result = DatasourceRouter::new(
            RouterConfig {
                dashboard_datasources: vec![influx],
                ..Default::default()
            },
            &TaggingFactory::default(),
        );

        let err = result.unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_unknown_datasource_is_not_found() {
        let router = DatasourceRouter::new(
            RouterConfig {
                dashboard_datasources: vec![Datasource::new(
                    "synthetic",
                    DatasourceKind::Fake(FakeDatasource::default()),
                )],
                ..Default::default()
            },
            &TaggingFactory::default(),
        )
        .unwrap();

        let result = router
            .gather_range(
                &Query::new("up", "nope"),
                Utc::now() - chrono::Duration::minutes(5),
                Utc::now(),
                Duration::from_secs(15),
            )
            .await;

        assert_matches!(result, Err(Error::DatasourceNotFound(ref id)) if id == "nope");
        assert_eq!(router.datasource_ids(), vec!["synthetic".to_string()]);
        assert_eq!(router.stats()["synthetic"].total_queries, 0);
    }
}
