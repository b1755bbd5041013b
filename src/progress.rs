//! Run-scoped counters and stats snapshots.
//!
//! Workers bump lock-free counters on the shared [`ProgressTracker`]. A
//! [`StatsSnapshot`] combines those counters with a corpus aggregate read
//! from the store; the aggregate is cached for a configurable TTL because a
//! full recount on every tick would cost more than the snapshot is worth.
//!
//! A snapshot never fails. When the store cannot be read, the snapshot holds
//! the counters only and is flagged `degraded`.
//!
//! The [`spawn_reporter`] task writes the snapshot to disk on a timer, every
//! K finished tasks, and once more on shutdown.

use chrono::{DateTime, NaiveTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::clock::{Clock, to_chrono};
use crate::models::{CorpusStats, RunCounters, StatsSnapshot, TaskOutcome};
use crate::outputs::json::write_snapshot;
use crate::store::Store;

/// Skip reason recorded for records that were already stored.
pub const DUPLICATE: &str = "duplicate";

struct CachedStats {
    fetched_at: DateTime<Utc>,
    stats: CorpusStats,
}

pub struct ProgressTracker {
    articles_persisted: AtomicU64,
    tasks_succeeded: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_skipped: AtomicU64,
    skipped_by_reason: DashMap<String, u64>,
    persisted_per_category: DashMap<String, u64>,

    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    cache_ttl: chrono::Duration,
    top_n: usize,
    cache: Mutex<Option<CachedStats>>,

    every_k: u64,
    milestone: Notify,
}

impl ProgressTracker {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        cache_ttl: Duration,
        top_n: usize,
        every_k: u64,
    ) -> Self {
        Self {
            articles_persisted: AtomicU64::new(0),
            tasks_succeeded: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            tasks_skipped: AtomicU64::new(0),
            skipped_by_reason: DashMap::new(),
            persisted_per_category: DashMap::new(),
            store,
            clock,
            cache_ttl: to_chrono(cache_ttl),
            top_n,
            cache: Mutex::new(None),
            every_k,
            milestone: Notify::new(),
        }
    }

    pub fn record_persisted(&self, category: &str) {
        self.articles_persisted.fetch_add(1, Ordering::Relaxed);
        *self
            .persisted_per_category
            .entry(category.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_skipped(&self, reason: &str) {
        *self
            .skipped_by_reason
            .entry(reason.to_string())
            .or_insert(0) += 1;
    }

    /// Count a finished task and wake the reporter on every K-th one.
    pub fn record_task(&self, outcome: &TaskOutcome) {
        let counter = match outcome {
            TaskOutcome::Success(_) => &self.tasks_succeeded,
            TaskOutcome::Failed(_) => &self.tasks_failed,
            TaskOutcome::Skipped(_) => &self.tasks_skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if self.every_k > 0 && self.tasks_done() % self.every_k == 0 {
            self.milestone.notify_one();
        }
    }

    pub fn tasks_done(&self) -> u64 {
        self.tasks_succeeded.load(Ordering::Relaxed)
            + self.tasks_failed.load(Ordering::Relaxed)
            + self.tasks_skipped.load(Ordering::Relaxed)
    }

    pub fn counters(&self) -> RunCounters {
        let collect = |map: &DashMap<String, u64>| -> BTreeMap<String, u64> {
            map.iter().map(|e| (e.key().clone(), *e.value())).collect()
        };
        RunCounters {
            articles_persisted: self.articles_persisted.load(Ordering::Relaxed),
            articles_skipped: collect(&self.skipped_by_reason),
            tasks_succeeded: self.tasks_succeeded.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_skipped: self.tasks_skipped.load(Ordering::Relaxed),
            persisted_per_category: collect(&self.persisted_per_category),
        }
    }

    /// Drop the cached corpus aggregate so the next snapshot rereads the store.
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    /// Combine live counters with the (possibly cached) corpus aggregate.
    #[instrument(level = "debug", skip(self))]
    pub async fn snapshot(&self) -> StatsSnapshot {
        let now = self.clock.now();
        let run = self.counters();

        let corpus = {
            let mut cache = self.cache.lock().await;
            match cache.as_ref() {
                Some(c) if now - c.fetched_at < self.cache_ttl => Some(c.stats.clone()),
                _ => {
                    let today_start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
                    match self.store.read_corpus_stats(today_start, self.top_n).await {
                        Ok(stats) => {
                            *cache = Some(CachedStats {
                                fetched_at: now,
                                stats: stats.clone(),
                            });
                            Some(stats)
                        }
                        Err(e) => {
                            warn!(error = %e, "Corpus stats unavailable; snapshot degraded to run counters");
                            None
                        }
                    }
                }
            }
        };

        match corpus {
            Some(c) => StatsSnapshot {
                generated_at: now,
                total_articles: c.total_articles,
                per_category: c.per_category,
                top_journalists: c.top_journalists,
                today_count: c.today_count,
                run,
                degraded: false,
            },
            None => StatsSnapshot {
                generated_at: now,
                total_articles: run.articles_persisted,
                per_category: run.persisted_per_category.clone(),
                top_journalists: Vec::new(),
                today_count: run.articles_persisted,
                run,
                degraded: true,
            },
        }
    }
}

/// Write a snapshot to `path` on every `interval` tick, every K finished
/// tasks, and once when `shutdown` flips to `true`.
pub fn spawn_reporter(
    tracker: Arc<ProgressTracker>,
    path: PathBuf,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so the first write reflects some work.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = tracker.milestone.notified() => {
                    debug!(tasks_done = tracker.tasks_done(), "Task milestone reached");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            write(&tracker, &path).await;
        }

        tracker.invalidate().await;
        write(&tracker, &path).await;
        info!(path = %path.display(), "Final stats snapshot written");
    })
}

async fn write(tracker: &ProgressTracker, path: &Path) {
    let snapshot = tracker.snapshot().await;
    if let Err(e) = write_snapshot(&snapshot, path).await {
        warn!(path = %path.display(), error = %e, "Could not write stats snapshot");
    }
}
