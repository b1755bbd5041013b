//! Persistence contract consumed by the pipeline and the ranking engine.
//!
//! The core never talks SQL. It depends on [`Store`], which every call site
//! treats as remotely fallible. [`SqliteStore`] is the concrete backend and
//! [`RetryStore`] wraps any store with its own backoff policy.
//!
//! Uniqueness of `canonical_url` is enforced by the backend itself; callers may
//! cache membership, but a duplicate insert must always come back as
//! [`UpsertOutcome::AlreadyExists`], never as a second row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{
    Article, Byline, BylineFilter, CorpusStats, CrawlTask, Journalist, RunSummary,
};

pub mod retry;
pub mod sqlite;
#[cfg(test)]
pub mod testing;

pub use retry::RetryStore;
pub use sqlite::SqliteStore;

/// Result of [`Store::upsert_article`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    AlreadyExists,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn exists(&self, canonical_url: &str) -> Result<bool, StoreError>;

    /// Insert `article` and fold it into its journalist's aggregate atomically.
    async fn upsert_article(&self, article: &Article) -> Result<UpsertOutcome, StoreError>;

    /// Full aggregate for `(name, source)`, article references newest first.
    async fn read_journalist_aggregate(
        &self,
        name: &str,
        source: &str,
    ) -> Result<Option<Journalist>, StoreError>;

    /// All aggregates, optionally for one source. Article references are left empty.
    async fn list_journalists(&self, source: Option<&str>) -> Result<Vec<Journalist>, StoreError>;

    async fn read_bylines(&self, filter: &BylineFilter) -> Result<Vec<Byline>, StoreError>;

    /// Corpus totals. `today_start` bounds the "collected today" count.
    async fn read_corpus_stats(
        &self,
        today_start: DateTime<Utc>,
        top_n: usize,
    ) -> Result<CorpusStats, StoreError>;

    /// Canonical URLs already stored for one category, for warming a dedup cache.
    async fn known_urls(&self, source: &str, category: &str) -> Result<Vec<String>, StoreError>;

    async fn record_page_completed(&self, task: &CrawlTask) -> Result<(), StoreError>;

    /// Completed pages for one category, ascending.
    async fn completed_pages(&self, source: &str, category: &str) -> Result<Vec<u32>, StoreError>;

    async fn clear_progress(&self, source: &str, category: &str) -> Result<(), StoreError>;

    async fn log_crawl_run(&self, summary: &RunSummary) -> Result<(), StoreError>;
}

/// Next page to crawl given the completed ones: one past the contiguous prefix from page 1.
pub fn resume_page(completed: &[u32]) -> u32 {
    let mut next = 1;
    for &page in completed {
        if page == next {
            next += 1;
        } else if page > next {
            break;
        }
    }
    next
}
