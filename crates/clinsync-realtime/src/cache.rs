//! In-memory report snapshot cache.
//!
//! The change feed trims old rows to identifying columns, so status
//! transitions and deletion payloads are reconstructed from the last
//! snapshot seen here. Entries expire `MAX_CACHE_AGE` after first
//! insertion; a background sweep clears them and `get` treats an over-age
//! entry as a miss between sweeps. Losing the cache is safe: callers fall
//! back to the feed's old row or report the prior status as "unknown".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as Age, Utc};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use clinsync_core::defaults::MAX_CACHE_AGE_SECS;
use clinsync_core::{ReportSnapshot, ReportStatus};

/// Process-local cache of the last-seen state of each report.
pub struct ReportSnapshotCache {
    entries: RwLock<HashMap<Uuid, ReportSnapshot>>,
    max_age: Age,
}

impl Default for ReportSnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportSnapshotCache {
    /// Cache with the standard 24 hour entry lifetime.
    pub fn new() -> Self {
        Self::with_max_age_secs(MAX_CACHE_AGE_SECS)
    }

    /// Cache with a custom entry lifetime.
    pub fn with_max_age_secs(max_age_secs: i64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_age: Age::seconds(max_age_secs),
        }
    }

    fn is_expired(&self, snapshot: &ReportSnapshot) -> bool {
        Utc::now() - snapshot.cached_at > self.max_age
    }

    /// Insert or replace a snapshot.
    pub async fn insert(&self, snapshot: ReportSnapshot) {
        let mut entries = self.entries.write().await;
        entries.insert(snapshot.report_id, snapshot);
    }

    /// Last-known snapshot for a report. Over-age entries read as absent
    /// even before the sweeper removes them.
    pub async fn get(&self, report_id: Uuid) -> Option<ReportSnapshot> {
        let entries = self.entries.read().await;
        entries
            .get(&report_id)
            .filter(|s| !self.is_expired(s))
            .cloned()
    }

    /// Remove and return the snapshot for a report.
    pub async fn remove(&self, report_id: Uuid) -> Option<ReportSnapshot> {
        let mut entries = self.entries.write().await;
        entries.remove(&report_id)
    }

    /// Overwrite the status of an existing entry. `cached_at` is left
    /// untouched: activity does not extend an entry's lifetime.
    ///
    /// Returns whether an entry was present.
    pub async fn set_status(&self, report_id: Uuid, status: ReportStatus) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&report_id) {
            Some(snapshot) => {
                snapshot.status = status;
                true
            }
            None => false,
        }
    }

    /// Number of entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop every over-age entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, s| Utc::now() - s.cached_at <= self.max_age);
        before - entries.len()
    }
}

/// Spawn the background sweep task.
///
/// Purges expired entries every `interval` until the shutdown signal fires
/// or its sender is dropped.
pub fn spawn_cache_sweeper(
    cache: Arc<ReportSnapshotCache>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = cache.purge_expired().await;
                    let cache_size = cache.len().await;
                    if removed > 0 {
                        info!(
                            subsystem = "realtime",
                            component = "cache",
                            removed,
                            cache_size,
                            "Purged expired report snapshots"
                        );
                    } else {
                        debug!(
                            subsystem = "realtime",
                            component = "cache",
                            cache_size,
                            "Cache sweep complete"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    debug!(
                        subsystem = "realtime",
                        component = "cache",
                        "Cache sweeper stopping"
                    );
                    break;
                }
            }
        }
    })
}
