//! Process level of the sync cascade.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use super::{SyncRequest, Syncer, TemplateData};
use crate::error::{Error, Result};
use crate::{fault, telemetry};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub refresh_interval: Duration,
    /// Deadline of one sync pass
    pub pass_timeout: Duration,
    /// Window ending now, used when no fixed range is set
    pub relative_time_range: Duration,
    pub time_range_start: Option<DateTime<Utc>>,
    pub time_range_end: Option<DateTime<Utc>>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(10),
            pass_timeout: Duration::from_secs(8),
            relative_time_range: Duration::from_secs(3600),
            time_range_start: None,
            time_range_end: None,
        }
    }
}

/// Drives the root syncer: once at start, then on every refresh tick until
/// shutdown.
pub struct App {
    config: AppConfig,
    syncer: Arc<dyn Syncer>,
    running: AtomicBool,
}

impl App {
    pub fn new(config: AppConfig, syncer: Arc<dyn Syncer>) -> Self {
        Self {
            config,
            syncer,
            running: AtomicBool::new(false),
        }
    }

    /// Run the refresh loop until `shutdown` is cancelled.
    ///
    /// An app runs once; a second call fails even after the first returned.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(Error::Internal("already running".into()));
        }

        info!(
            "Starting refresh loop every {:?}",
            self.config.refresh_interval
        );
        self.sync_pass().await;

        let period = self.config.refresh_interval.max(Duration::from_millis(1));
        let mut tick = interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Refresh loop shutting down");
                    return Ok(());
                }
                _ = tick.tick() => self.sync_pass().await,
            }
        }
    }

    /// One bounded, fault-isolated pass. Never fails.
    async fn sync_pass(&self) {
        let request = self.sync_request(Utc::now());
        let started = Instant::now();

        let result = tokio::time::timeout(
            self.config.pass_timeout,
            fault::isolate(self.syncer.sync(&request)),
        )
        .await
        .unwrap_or_else(|_| {
            Err(Error::DeadlineExceeded(format!(
                "app sync timed out after {:?}",
                self.config.pass_timeout
            )))
        });

        telemetry::record_sync("app", started.elapsed().as_secs_f64(), result.is_err());
        if let Err(e) = result {
            error!("App level sync failed: {}", e);
        }
    }

    /// Request for a pass at `now`: the fixed range if configured, otherwise
    /// the relative window ending at `now`.
    pub fn sync_request(&self, now: DateTime<Utc>) -> SyncRequest {
        let end = self.config.time_range_end.unwrap_or(now);
        let start = self.config.time_range_start.unwrap_or_else(|| {
            chrono::Duration::from_std(self.config.relative_time_range)
                .map(|window| end - window)
                .unwrap_or(end)
        });

        let mut template_data = TemplateData::new();
        template_data.insert("__start", start.to_rfc3339());
        template_data.insert("__end", end.to_rfc3339());

        SyncRequest {
            time_range_start: start,
            time_range_end: end,
            template_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingSyncer {
        passes: AtomicUsize,
        panic_on: Option<usize>,
        hang: bool,
        last: Mutex<Option<SyncRequest>>,
    }

    #[async_trait]
    impl Syncer for CountingSyncer {
        async fn sync(&self, request: &SyncRequest) -> Result<()> {
            let pass = self.passes.fetch_add(1, Ordering::SeqCst) + 1;
            *self.last.lock() = Some(request.clone());
            if self.panic_on == Some(pass) {
                panic!("pass {} exploded", pass);
            }
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    fn app(syncer: Arc<CountingSyncer>) -> Arc<App> {
        Arc::new(App::new(AppConfig::default(), syncer))
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_sync_then_every_tick() {
        let syncer = Arc::new(CountingSyncer::default());
        let app = app(syncer.clone());
        let shutdown = CancellationToken::new();

        let handle = {
            let app = app.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { app.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(syncer.passes.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(syncer.passes.load(Ordering::SeqCst), 3);

        shutdown.cancel();
        tokio_test::assert_ok!(handle.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_pass_does_not_stop_loop() {
        let syncer = Arc::new(CountingSyncer {
            panic_on: Some(1),
            ..Default::default()
        });
        let app = app(syncer.clone());
        let shutdown = CancellationToken::new();

        let handle = {
            let app = app.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { app.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(syncer.passes.load(Ordering::SeqCst), 2);

        shutdown.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_pass_is_cut_at_deadline() {
        let syncer = Arc::new(CountingSyncer {
            hang: true,
            ..Default::default()
        });
        let app = app(syncer.clone());
        let shutdown = CancellationToken::new();

        let handle = {
            let app = app.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { app.run(shutdown).await })
        };

        // The initial pass is cut at 8s; ticks are anchored after it, so
        // the next pass starts at 18s.
        tokio::time::sleep(Duration::from_secs(17)).await;
        assert_eq!(syncer.passes.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(syncer.passes.load(Ordering::SeqCst), 2);

        shutdown.cancel();
        tokio::time::sleep(Duration::from_secs(8)).await;
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_second_run_rejected() {
        let app = app(Arc::new(CountingSyncer::default()));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        assert!(app.run(shutdown.clone()).await.is_ok());
        assert_matches!(
            app.run(shutdown).await,
            Err(Error::Internal(ref msg)) if msg == "already running"
        );
    }

    #[test]
    fn test_sync_request_ranges() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        let relative = App::new(
            AppConfig {
                relative_time_range: Duration::from_secs(900),
                ..Default::default()
            },
            Arc::new(CountingSyncer::default()),
        );
        let req = relative.sync_request(now);
        assert_eq!(req.time_range_end, now);
        assert_eq!(req.time_range_start, now - chrono::Duration::minutes(15));
        assert_eq!(req.template_data.get("__end"), Some(now.to_rfc3339().as_str()));

        let fixed_start = now - chrono::Duration::days(1);
        let fixed = App::new(
            AppConfig {
                time_range_start: Some(fixed_start),
                ..Default::default()
            },
            Arc::new(CountingSyncer::default()),
        );
        let req = fixed.sync_request(now);
        assert_eq!(req.time_range_start, fixed_start);
        assert_eq!(
            req.template_data.get("__start"),
            Some(fixed_start.to_rfc3339().as_str())
        );
    }
}
