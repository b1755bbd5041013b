//! Deduplication gate in front of the store.
//!
//! The gate keeps a run-scoped set of canonical URLs that are either known to
//! be stored or have been claimed by a worker in this run. Claiming is a single
//! atomic insert, so two workers holding the same article can never both get
//! through. The set is warmed lazily, once per category, from the store.
//!
//! The cache only ever says "duplicate" early. A URL that passes the cache is
//! still checked with [`Store::exists`], and the store's unique constraint is
//! the final word at insert time.

use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, instrument, warn};

use crate::error::StoreError;
use crate::models::Article;
use crate::store::Store;

/// Verdict of [`DedupGate::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The caller now owns the URL for this run and should persist it.
    New,
    Duplicate,
}

pub struct DedupGate {
    store: Arc<dyn Store>,
    seen: DashSet<String>,
    /// `(source, category)` pairs whose stored URLs have been loaded.
    seeded: DashMap<(String, String), ()>,
    cache_hits: AtomicU64,
    store_hits: AtomicU64,
}

impl DedupGate {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            seen: DashSet::new(),
            seeded: DashMap::new(),
            cache_hits: AtomicU64::new(0),
            store_hits: AtomicU64::new(0),
        }
    }

    #[instrument(level = "debug", skip(self))]
    async fn ensure_seeded(&self, source: &str, category: &str) {
        let key = (source.to_string(), category.to_string());
        if self.seeded.insert(key, ()).is_some() {
            return;
        }
        match self.store.known_urls(source, category).await {
            Ok(urls) => {
                debug!(count = urls.len(), "Seeded dedup cache");
                for url in urls {
                    self.seen.insert(url);
                }
            }
            // Without a seed every URL goes to the store; slower, not wrong.
            Err(e) => warn!(error = %e, "Could not seed dedup cache"),
        }
    }

    /// Decide whether `article` should be persisted.
    ///
    /// On [`Admission::New`] the URL stays claimed; call [`Self::release`] if
    /// persisting it then fails, so a later task can try again.
    pub async fn admit(&self, article: &Article) -> Result<Admission, StoreError> {
        self.ensure_seeded(&article.source, &article.category).await;

        if !self.seen.insert(article.canonical_url.clone()) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Admission::Duplicate);
        }

        match self.store.exists(&article.canonical_url).await {
            Ok(true) => {
                self.store_hits.fetch_add(1, Ordering::Relaxed);
                Ok(Admission::Duplicate)
            }
            Ok(false) => Ok(Admission::New),
            Err(e) => {
                self.seen.remove(&article.canonical_url);
                Err(e)
            }
        }
    }

    /// Give up a claim made by [`Self::admit`].
    pub fn release(&self, canonical_url: &str) {
        self.seen.remove(canonical_url);
    }

    /// `(cache hits, store hits)` so far.
    pub fn hit_counts(&self) -> (u64, u64) {
        (
            self.cache_hits.load(Ordering::Relaxed),
            self.store_hits.load(Ordering::Relaxed),
        )
    }
}
