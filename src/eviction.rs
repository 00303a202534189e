//! Memory-pressure and inactivity eviction for the fast store
//!
//! The manager runs a periodic sweep that:
//! 1. reads the fast store's memory usage and skips the sweep if that fails
//! 2. evicts least recently used keys while usage is above the threshold,
//!    re-reading usage after every eviction, until it drops to
//!    `threshold - 10` percent or candidates run out
//! 3. evicts keys idle for longer than the inactivity timeout
//!
//! Eviction only ever touches the fast store. An evicted key stays
//! recoverable through [`HybridCache::get`](crate::HybridCache::get), which
//! falls back to the durable store and re-warms the fast store.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::access_tracker::now_unix_millis;
use crate::{
    AccessMetadata, AccessTracker, CacheConfig, CacheError, CacheResult, EvictionConfig,
    FastStore, StoreError,
};

/// Fast store memory usage relative to the configured ceiling
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub used_bytes: u64,
    pub max_bytes: u64,
    pub percent_used: f64,
}

/// Read-only view returned by [`EvictionManager::get_stats`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictionStats {
    pub memory_usage: MemoryUsage,
    pub total_tracked_keys: usize,
    pub metadata_snapshot: Vec<AccessMetadata>,
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    /// Usage read at the start of the sweep; `None` if the read failed and
    /// the sweep was skipped
    pub memory_before: Option<MemoryUsage>,
    /// Keys evicted under memory pressure, in eviction order
    pub evicted_lru: Vec<String>,
    /// Keys evicted for inactivity
    pub evicted_inactive: Vec<String>,
    /// Keys whose fast store delete failed; they stay tracked
    pub failed: Vec<String>,
}

impl SweepReport {
    pub fn skipped(&self) -> bool {
        self.memory_before.is_none()
    }

    pub fn evicted_count(&self) -> usize {
        self.evicted_lru.len() + self.evicted_inactive.len()
    }
}

/// Order entries oldest first; ties go to the least accessed, then by key.
pub(crate) fn eviction_order(a: &AccessMetadata, b: &AccessMetadata) -> Ordering {
    a.last_access_unix_millis
        .cmp(&b.last_access_unix_millis)
        .then(a.access_count.cmp(&b.access_count))
        .then_with(|| a.key.cmp(&b.key))
}

struct EvictionInner<F: FastStore> {
    fast: Arc<F>,
    tracker: Arc<AccessTracker>,
    cache_config: CacheConfig,
    config: EvictionConfig,
    /// Serializes sweeps so on-demand and timer sweeps never overlap
    sweep_lock: Mutex<()>,
}

struct Sweeper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Background evictor for the fast store.
///
/// Starts stopped. [`start`](Self::start) restores the persisted access
/// ledger and schedules sweeps; [`stop`](Self::stop) cancels the schedule,
/// waits for an in-flight sweep and persists the ledger.
pub struct EvictionManager<F: FastStore> {
    inner: Arc<EvictionInner<F>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl<F: FastStore> EvictionManager<F> {
    pub(crate) fn new(
        fast: Arc<F>,
        tracker: Arc<AccessTracker>,
        cache_config: CacheConfig,
        config: EvictionConfig,
    ) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(EvictionInner {
                fast,
                tracker,
                cache_config,
                config,
                sweep_lock: Mutex::new(()),
            }),
            sweeper: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EvictionConfig {
        &self.inner.config
    }

    pub async fn is_running(&self) -> bool {
        self.sweeper.lock().await.is_some()
    }

    /// Restore the access ledger and begin periodic sweeps.
    ///
    /// Calling `start` on a running manager is a no-op.
    pub async fn start(&self) {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_some() {
            debug!("Eviction manager already running");
            return;
        }

        self.inner.restore_ledger().await;

        let cancel = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { inner.run(token).await });
        *sweeper = Some(Sweeper { cancel, handle });

        info!(
            "Eviction manager started: max {} bytes, threshold {}%, interval {:?}, inactivity {:?}",
            self.inner.config.max_fast_store_bytes,
            self.inner.config.eviction_threshold_percent,
            self.inner.config.check_interval(),
            self.inner.config.inactivity_timeout()
        );
    }

    /// Cancel scheduled sweeps, wait for a running one and persist the ledger.
    ///
    /// Stopping a stopped manager is a no-op.
    pub async fn stop(&self) -> CacheResult<()> {
        let Some(sweeper) = self.sweeper.lock().await.take() else {
            return Ok(());
        };

        sweeper.cancel.cancel();
        if let Err(e) = sweeper.handle.await {
            warn!("Eviction sweeper task ended abnormally: {}", e);
        }

        self.inner.persist_ledger().await?;
        info!("Eviction manager stopped");
        Ok(())
    }

    /// Run one sweep now, outside the schedule
    pub async fn sweep_now(&self) -> SweepReport {
        self.inner.sweep().await
    }

    /// Evict a single key from the fast store. The durable copy is untouched.
    pub async fn evict(&self, key: &str) -> CacheResult<()> {
        self.inner
            .evict_key(key)
            .await
            .map_err(CacheError::FastStore)
    }

    pub async fn get_stats(&self) -> CacheResult<EvictionStats> {
        let used = self
            .inner
            .fast
            .memory_info()
            .await
            .map_err(CacheError::FastStore)?;
        let snapshot = self.inner.tracker.snapshot();
        Ok(EvictionStats {
            memory_usage: self.inner.usage(used),
            total_tracked_keys: snapshot.len(),
            metadata_snapshot: snapshot,
        })
    }
}

impl<F: FastStore> Drop for EvictionManager<F> {
    fn drop(&mut self) {
        // Drop cannot await the sweeper or persist the ledger; only stop() does
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            warn!(
                "Eviction manager dropped while running; access ledger not persisted, call stop() first"
            );
            sweeper.cancel.cancel();
        }
    }
}

impl<F: FastStore> EvictionInner<F> {
    async fn run(&self, token: CancellationToken) {
        let period = self.config.check_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    // An in-flight sweep always runs to completion
                    let report = self.sweep().await;
                    if report.evicted_count() > 0 || !report.failed.is_empty() {
                        info!(
                            "Eviction sweep: {} lru, {} inactive, {} failed",
                            report.evicted_lru.len(),
                            report.evicted_inactive.len(),
                            report.failed.len()
                        );
                    }
                }
            }
        }
        debug!("Eviction sweeper exiting");
    }

    fn usage(&self, used_bytes: u64) -> MemoryUsage {
        MemoryUsage {
            used_bytes,
            max_bytes: self.config.max_fast_store_bytes,
            percent_used: self.config.percent_used(used_bytes),
        }
    }

    async fn sweep(&self) -> SweepReport {
        let _guard = self.sweep_lock.lock().await;
        let mut report = SweepReport::default();

        let used = match self.fast.memory_info().await {
            Ok(used) => used,
            Err(e) => {
                warn!("Skipping eviction sweep, memory check failed: {}", e);
                return report;
            }
        };
        let usage = self.usage(used);
        report.memory_before = Some(usage);

        if self.config.exceeds_threshold(used) {
            info!(
                "Fast store at {:.1}% of {} bytes, above {}% threshold",
                usage.percent_used, usage.max_bytes, self.config.eviction_threshold_percent
            );
            self.evict_least_recent(used, &mut report).await;
        }

        self.evict_inactive(now_unix_millis(), &mut report).await;
        report
    }

    async fn evict_least_recent(&self, mut used: u64, report: &mut SweepReport) {
        let mut candidates = self.tracker.snapshot();
        candidates.sort_by(eviction_order);

        for candidate in candidates {
            if self.config.within_target(used) {
                break;
            }

            if let Err(e) = self.evict_key(&candidate.key).await {
                warn!("Failed to evict key {}: {}", candidate.key, e);
                report.failed.push(candidate.key);
                continue;
            }
            report.evicted_lru.push(candidate.key);

            used = match self.fast.memory_info().await {
                Ok(used) => used,
                Err(e) => {
                    warn!("Memory check failed mid-sweep, halting pressure eviction: {}", e);
                    return;
                }
            };
        }

        let percent = self.config.percent_used(used);
        if !self.config.within_target(used) {
            warn!(
                "Eviction candidates exhausted with fast store still at {:.1}% (target {}%)",
                percent,
                self.config.target_percent()
            );
        } else {
            debug!("Fast store down to {:.1}% after pressure eviction", percent);
        }
    }

    async fn evict_inactive(&self, now_millis: u64, report: &mut SweepReport) {
        let timeout_ms = self.config.inactivity_timeout_secs.saturating_mul(1000);
        let mut stale: Vec<AccessMetadata> = self
            .tracker
            .snapshot()
            .into_iter()
            .filter(|meta| now_millis.saturating_sub(meta.last_access_unix_millis) > timeout_ms)
            .collect();
        stale.sort_by(eviction_order);

        for meta in stale {
            match self.evict_key(&meta.key).await {
                Ok(()) => report.evicted_inactive.push(meta.key),
                Err(e) => {
                    warn!("Failed to evict inactive key {}: {}", meta.key, e);
                    report.failed.push(meta.key);
                }
            }
        }
    }

    /// Drop a key's record and field map from the fast store and stop tracking it
    async fn evict_key(&self, key: &str) -> Result<(), StoreError> {
        let keys = [
            self.cache_config.record_key(key),
            self.cache_config.fields_key(key),
        ];
        self.fast.delete(&keys).await?;
        self.tracker.remove(key);
        debug!("Evicted key {} from fast store", key);
        Ok(())
    }

    async fn restore_ledger(&self) {
        let metadata_key = &self.cache_config.metadata_key;
        match self.fast.get(metadata_key).await {
            Ok(Some(bytes)) => match AccessTracker::parse_dump(&bytes) {
                Ok(snapshot) => {
                    debug!("Restored {} access entries", snapshot.len());
                    self.tracker.load_from(snapshot);
                }
                Err(e) => warn!("Ignoring unreadable access snapshot: {}", e),
            },
            Ok(None) => debug!("No persisted access snapshot"),
            Err(e) => warn!("Failed to load access snapshot: {}", e),
        }
    }

    async fn persist_ledger(&self) -> CacheResult<()> {
        let bytes = self.tracker.dump()?;
        self.fast
            .set(&self.cache_config.metadata_key, bytes, None)
            .await
            .map_err(CacheError::FastStore)?;
        debug!("Persisted {} access entries", self.tracker.len());
        Ok(())
    }
}
