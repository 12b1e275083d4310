//! Fixed-period telluric batch polling.
//!
//! Every `poll_period` the daemon pulls up to `batch_size` pending items in a
//! read-only transaction and processes them with at most `connections_limit`
//! in flight. Each item is recalculated elevated with no transaction open,
//! then resolved in its own short elevated transaction.
//!
//! Batches never overlap. A batch that outlasts the period causes the ticks
//! that fell inside it to be skipped (logged and counted); the next batch
//! starts one full period after the overrunning batch finished.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use tokio::sync::Semaphore;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::traits::{TelluricBatchItem, TelluricRecalculator, TelluricWorkSource};
use crate::constants::{
    DEFAULT_TELLURIC_BATCH_SIZE, DEFAULT_TELLURIC_CONNECTIONS_LIMIT, DEFAULT_TELLURIC_POLL_PERIOD,
};
use crate::errors::{Error, Result};
use crate::session::{run_read_only, run_transactional, ElevatedContext, SessionProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingConfig {
    pub poll_period: Duration,
    pub batch_size: usize,
    pub connections_limit: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_period: DEFAULT_TELLURIC_POLL_PERIOD,
            batch_size: DEFAULT_TELLURIC_BATCH_SIZE,
            connections_limit: DEFAULT_TELLURIC_CONNECTIONS_LIMIT,
        }
    }
}

impl PollingConfig {
    fn validate(&self) -> Result<()> {
        if self.poll_period.is_zero() {
            return Err(Error::InvalidConfigValue(
                "telluric poll period must be greater than zero".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfigValue(
                "telluric batch size must be greater than zero".to_string(),
            ));
        }
        if self.connections_limit == 0 {
            return Err(Error::InvalidConfigValue(
                "telluric connections limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct TelluricDeps {
    pub sessions: Arc<dyn SessionProvider>,
    pub elevated: Arc<dyn ElevatedContext>,
    pub source: Arc<dyn TelluricWorkSource>,
    pub recalculator: Arc<dyn TelluricRecalculator>,
}

/// What one batch did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub fetched: usize,
    pub processed: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct DaemonStats {
    batches: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    fetch_failures: AtomicU64,
    ticks_missed: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DaemonStatsSnapshot {
    pub batches: u64,
    pub processed: u64,
    pub failed: u64,
    pub fetch_failures: u64,
    pub ticks_missed: u64,
}

impl DaemonStats {
    pub fn snapshot(&self) -> DaemonStatsSnapshot {
        DaemonStatsSnapshot {
            batches: self.batches.load(Ordering::SeqCst),
            processed: self.processed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            fetch_failures: self.fetch_failures.load(Ordering::SeqCst),
            ticks_missed: self.ticks_missed.load(Ordering::SeqCst),
        }
    }
}

pub struct PollingDaemon {
    config: PollingConfig,
    deps: TelluricDeps,
    permits: Semaphore,
    stats: Arc<DaemonStats>,
}

impl PollingDaemon {
    pub fn new(config: PollingConfig, deps: TelluricDeps) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            permits: Semaphore::new(config.connections_limit),
            config,
            deps,
            stats: Arc::new(DaemonStats::default()),
        })
    }

    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<DaemonStats> {
        self.stats.clone()
    }

    /// Polls until cancelled. A batch in progress when cancellation arrives
    /// is finished first.
    pub async fn run(&self, cancel: CancellationToken) {
        let period = self.config.poll_period;
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "Telluric daemon started (period {:?}, batch size {}, connections limit {})",
            period, self.config.batch_size, self.config.connections_limit
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let started = Instant::now();
            let report = self.run_batch().await;
            let elapsed = started.elapsed();
            if report.fetched > 0 {
                info!(
                    "Telluric batch finished in {:?}: {} processed, {} failed",
                    elapsed, report.processed, report.failed
                );
            }

            if elapsed > period {
                let missed = (elapsed.as_nanos() / period.as_nanos()) as u64;
                self.stats.ticks_missed.fetch_add(missed, Ordering::SeqCst);
                warn!(
                    "Telluric batch overran the {:?} poll period ({:?}); {} tick(s) missed",
                    period, elapsed, missed
                );
                ticker.reset();
            }
        }

        info!("Telluric daemon stopped");
    }

    /// Fetches and processes one batch.
    pub async fn run_batch(&self) -> BatchReport {
        let items = match self.fetch().await {
            Ok(items) => items,
            Err(e) => {
                self.stats.fetch_failures.fetch_add(1, Ordering::SeqCst);
                warn!("Failed to fetch telluric batch: {}", e);
                return BatchReport::default();
            }
        };
        self.stats.batches.fetch_add(1, Ordering::SeqCst);

        if items.is_empty() {
            debug!("No pending telluric items");
            return BatchReport::default();
        }

        let fetched = items.len();
        let processed = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        stream::iter(items)
            .for_each_concurrent(self.config.connections_limit, |item| {
                let processed = &processed;
                let failed = &failed;
                async move {
                    match self.process(&item).await {
                        Ok(()) => {
                            processed.fetch_add(1, Ordering::SeqCst);
                            self.stats.processed.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => {
                            failed.fetch_add(1, Ordering::SeqCst);
                            self.stats.failed.fetch_add(1, Ordering::SeqCst);
                            warn!(
                                "Telluric item {} (observation {}) failed: {}",
                                item.id, item.observation_id, e
                            );
                            self.record_failure(&item, &e.to_string()).await;
                        }
                    }
                }
            })
            .await;

        BatchReport {
            fetched,
            processed: processed.into_inner(),
            failed: failed.into_inner(),
        }
    }

    async fn fetch(&self) -> Result<Vec<TelluricBatchItem>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| Error::Unexpected(e.to_string()))?;
        let source = self.deps.source.clone();
        let limit = self.config.batch_size;

        run_read_only(
            self.deps.sessions.as_ref(),
            self.deps.elevated.as_ref(),
            move |session| Box::pin(async move { source.fetch_batch(session, limit).await }),
        )
        .await
    }

    async fn process(&self, item: &TelluricBatchItem) -> Result<()> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| Error::Unexpected(e.to_string()))?;
        let recalculator = self.deps.recalculator.clone();

        self.deps
            .elevated
            .run_as_privileged(recalculator.recalculate(item))
            .await?;

        let item = item.clone();
        run_transactional(
            self.deps.sessions.as_ref(),
            self.deps.elevated.as_ref(),
            move |session| Box::pin(async move { recalculator.resolve(session, &item).await }),
        )
        .await
    }

    async fn record_failure(&self, item: &TelluricBatchItem, reason: &str) {
        let permit = self.permits.acquire().await;
        if permit.is_err() {
            return;
        }
        let source = self.deps.source.clone();
        let failed_item = item.clone();
        let reason = reason.to_string();

        let recorded = run_transactional(
            self.deps.sessions.as_ref(),
            self.deps.elevated.as_ref(),
            move |session| {
                Box::pin(async move { source.record_failure(session, &failed_item, &reason).await })
            },
        )
        .await;

        if let Err(e) = recorded {
            warn!("Could not record failure of telluric item {}: {}", item.id, e);
        }
    }
}
