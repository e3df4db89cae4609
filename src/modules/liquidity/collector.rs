use anyhow::{Context, Result};
use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::config::CollectorSettings;
use super::schemas::PoolConfig;
use super::sources::defs::{FetchError, PoolSource};
use super::storage::SnapshotStorage;
use super::utils::window::snapshot_from_raw;
use crate::debug::{log_elapsed, start_if};
use crate::utils::fmt_duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPool {
    pub pool_address: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub records: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolFailure {
    pub pool_address: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectReport {
    pub stored: Vec<StoredPool>,
    pub failed: Vec<PoolFailure>,
    pub elapsed_ms: u64,
}

impl CollectReport {
    /// Every pool of a non-empty cycle failed.
    pub fn all_failed(&self) -> bool {
        self.stored.is_empty() && !self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectOutcome {
    /// Another cycle was in flight; nothing was fetched.
    Skipped,
    Completed(CollectReport),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorStatus {
    pub is_running: bool,
    pub is_scheduled: bool,
    /// Number of tracked pools; the pool list itself is served by `/api/pools`.
    pub pools: usize,
}

/// Clears the in-flight flag however the cycle ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Time until the next wall-clock multiple of `interval` after `now`.
pub fn until_next_boundary(now: OffsetDateTime, interval: Duration) -> Duration {
    let step = i128::try_from(interval.as_nanos()).unwrap_or(i128::MAX).max(1);
    let now_ns = now.unix_timestamp_nanos();
    let next = (now_ns.div_euclid(step) + 1) * step;
    Duration::from_nanos(u64::try_from(next - now_ns).unwrap_or(u64::MAX))
}

/// A running scheduler task and the channel that asks it to stop.
struct Schedule {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct Collector {
    source: Arc<dyn PoolSource>,
    storage: Arc<SnapshotStorage>,
    settings: CollectorSettings,
    pools: RwLock<Vec<PoolConfig>>,
    running: AtomicBool,
    schedule: Mutex<Option<Schedule>>,
    /// Stopped scheduler task that may still be finishing its cycle.
    draining: Mutex<Option<JoinHandle<()>>>,
    clock: fn() -> OffsetDateTime,
}

impl Collector {
    pub fn new(
        source: Arc<dyn PoolSource>,
        storage: Arc<SnapshotStorage>,
        settings: CollectorSettings,
        pools: Vec<PoolConfig>,
    ) -> Self {
        Self {
            source,
            storage,
            settings,
            pools: RwLock::new(pools),
            running: AtomicBool::new(false),
            schedule: Mutex::new(None),
            draining: Mutex::new(None),
            clock: OffsetDateTime::now_utc,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> OffsetDateTime) -> Self {
        self.clock = clock;
        self
    }

    pub fn storage(&self) -> &Arc<SnapshotStorage> {
        &self.storage
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /* ---------- pool set ---------- */

    pub async fn pools(&self) -> Vec<PoolConfig> {
        self.pools.read().await.clone()
    }

    /// Returns false when the pool is already tracked.
    pub async fn add_pool(&self, pool: PoolConfig) -> bool {
        let mut pools = self.pools.write().await;
        if pools.iter().any(|p| p.same_pool(&pool.pool_address)) {
            return false;
        }
        info!(pool = %pool.pool_address, "[collector] pool added");
        pools.push(pool);
        true
    }

    pub async fn remove_pool(&self, pool_address: &str) -> bool {
        let mut pools = self.pools.write().await;
        let before = pools.len();
        pools.retain(|p| !p.same_pool(pool_address));
        let removed = pools.len() != before;
        if removed {
            info!(pool = pool_address, "[collector] pool removed");
        }
        removed
    }

    pub async fn status(&self) -> CollectorStatus {
        CollectorStatus {
            is_running: self.is_running(),
            is_scheduled: self.is_scheduled(),
            pools: self.pools.read().await.len(),
        }
    }

    /* ---------- collection ---------- */

    pub async fn collect_now(&self) -> CollectOutcome {
        let pools = self.pools().await;
        self.collect_and_store(&pools).await
    }

    /// Fetches, transforms and stores every pool concurrently. A pool that fails
    /// is logged and reported; the others still complete. Returns `Skipped`
    /// without fetching when a cycle is already in flight.
    pub async fn collect_and_store(&self, pools: &[PoolConfig]) -> CollectOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("[collector] collection already running, skipping");
            return CollectOutcome::Skipped;
        }
        let _guard = RunningGuard(&self.running);

        let started = Instant::now();
        let timer = start_if(tracing::enabled!(tracing::Level::DEBUG));
        let collected_at = (self.clock)();
        info!(pools = pools.len(), "[collector] starting collection");

        let results = join_all(pools.iter().map(|pool| self.collect_pool(pool, collected_at))).await;

        let mut report = CollectReport { stored: Vec::new(), failed: Vec::new(), elapsed_ms: 0 };
        for (pool, res) in pools.iter().zip(results) {
            match res {
                Ok(stored) => {
                    info!(
                        pool = %pool.pool_address,
                        records = stored.records,
                        "[collector] stored snapshot"
                    );
                    report.stored.push(stored);
                }
                Err(e) => {
                    error!(pool = %pool.pool_address, "[collector] collection failed: {e:#}");
                    report.failed.push(PoolFailure {
                        pool_address: pool.pool_address.clone(),
                        error: format!("{e:#}"),
                    });
                }
            }
        }

        let elapsed = started.elapsed();
        report.elapsed_ms = elapsed.as_millis() as u64;
        log_elapsed("collector", "collect_and_store", timer);
        info!(
            stored = report.stored.len(),
            failed = report.failed.len(),
            "[collector] collection finished in {}",
            fmt_duration(elapsed)
        );
        CollectOutcome::Completed(report)
    }

    async fn collect_pool(&self, pool: &PoolConfig, collected_at: OffsetDateTime) -> Result<StoredPool> {
        let timeout = self.settings.fetch_timeout();
        let raw = match tokio::time::timeout(timeout, self.source.fetch_pool(pool)).await {
            Ok(res) => res.context("fetch pool data")?,
            Err(_) => return Err(FetchError::Timeout(timeout)).context("fetch pool data"),
        };
        debug!(pool = %pool.pool_address, ticks = raw.ticks.len(), "[collector] fetched ticks");

        let snapshot = snapshot_from_raw(pool, raw, self.settings.window_radius, collected_at);
        let keys = self.storage.write_snapshot(&snapshot).await.context("store snapshot")?;
        Ok(StoredPool {
            pool_address: pool.pool_address.clone(),
            timestamp: snapshot.timestamp,
            records: keys.len(),
        })
    }

    /* ---------- scheduler ---------- */

    fn schedule_slot(&self) -> MutexGuard<'_, Option<Schedule>> {
        self.schedule.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn draining_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.draining.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_scheduled(&self) -> bool {
        self.schedule_slot().as_ref().is_some_and(|s| !s.task.is_finished())
    }

    /// Runs a cycle at every interval boundary until stopped. Returns false if
    /// the scheduler is already running. Must be called inside a tokio runtime.
    pub fn start_scheduler(self: &Arc<Self>) -> bool {
        let mut slot = self.schedule_slot();
        if slot.as_ref().is_some_and(|s| !s.task.is_finished()) {
            return false;
        }
        let (stop, stopped) = watch::channel(false);
        let this = Arc::clone(self);
        let task = tokio::spawn(this.schedule_loop(stopped));
        *slot = Some(Schedule { stop, task });
        info!(
            interval = %fmt_duration(self.settings.interval()),
            "[collector] scheduler started"
        );
        true
    }

    /// Asks the scheduler to stop. A cycle already in flight runs to completion
    /// so no pool is left with a partly written snapshot; no further cycle
    /// starts. Returns false if no scheduler was running.
    pub fn stop_scheduler(&self) -> bool {
        let Some(schedule) = self.schedule_slot().take() else {
            return false;
        };
        // the loop also exits when the sender is gone, so a send error is moot
        let _ = schedule.stop.send(true);
        *self.draining_slot() = Some(schedule.task);
        info!("[collector] scheduler stop requested");
        true
    }

    /// Stops the scheduler and waits for the in-flight cycle, scheduled or
    /// manual, to finish.
    pub async fn shutdown(&self) {
        self.stop_scheduler();
        let task = self.draining_slot().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("[collector] scheduler task ended abnormally: {e}");
            }
        }
        while self.is_running() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        info!("[collector] collector idle");
    }

    async fn schedule_loop(self: Arc<Self>, mut stopped: watch::Receiver<bool>) {
        let interval = self.settings.interval();
        if self.settings.run_immediately {
            self.collect_now().await;
        }
        loop {
            if *stopped.borrow() {
                break;
            }
            let wait = until_next_boundary((self.clock)(), interval);
            debug!(wait = %fmt_duration(wait), "[collector] next scheduled run");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                // either a stop request or the sender being dropped
                _ = stopped.changed() => break,
            }
            if let CollectOutcome::Skipped = self.collect_now().await {
                debug!("[collector] scheduled run overlapped a manual run");
            }
        }
        info!("[collector] scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn next_boundary_is_top_of_the_hour() {
        let hour = Duration::from_secs(3_600);
        assert_eq!(
            until_next_boundary(datetime!(2025-09-06 14:59:00 UTC), hour),
            Duration::from_secs(60)
        );
        assert_eq!(until_next_boundary(datetime!(2025-09-06 14:00 UTC), hour), hour);
        assert_eq!(
            until_next_boundary(datetime!(2025-09-06 14:00:00.5 UTC), hour),
            Duration::from_millis(3_599_500)
        );
    }

    #[test]
    fn report_flags_total_failure() {
        let mut r = CollectReport { stored: vec![], failed: vec![], elapsed_ms: 0 };
        assert!(!r.all_failed());
        r.failed.push(PoolFailure { pool_address: "0x1".into(), error: "x".into() });
        assert!(r.all_failed());
    }
}
