//! Failure-injecting store for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::{SqliteStore, Store, UpsertOutcome};
use crate::error::StoreError;
use crate::models::{
    Article, Byline, BylineFilter, CorpusStats, CrawlTask, Journalist, RunSummary,
};

/// Wraps an in-memory [`SqliteStore`]; writes can be made to fail a number of
/// times and reads can be switched off entirely.
pub struct FlakyStore {
    inner: SqliteStore,
    failing_writes: AtomicU32,
    write_attempts: AtomicU32,
    reads_down: AtomicBool,
}

impl FlakyStore {
    pub async fn new() -> Self {
        Self::wrap(SqliteStore::in_memory().await.unwrap())
    }

    pub fn wrap(inner: SqliteStore) -> Self {
        Self {
            inner,
            failing_writes: AtomicU32::new(0),
            write_attempts: AtomicU32::new(0),
            reads_down: AtomicBool::new(false),
        }
    }

    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    pub fn set_reads_down(&self, down: bool) {
        self.reads_down.store(down, Ordering::SeqCst);
    }

    pub fn write_attempts(&self) -> u32 {
        self.write_attempts.load(Ordering::SeqCst)
    }

    fn write_gate(&self) -> Result<(), StoreError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(StoreError::Unavailable("injected write failure".into()))
        } else {
            Ok(())
        }
    }

    fn read_gate(&self) -> Result<(), StoreError> {
        if self.reads_down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("injected read failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn exists(&self, canonical_url: &str) -> Result<bool, StoreError> {
        self.read_gate()?;
        self.inner.exists(canonical_url).await
    }

    async fn upsert_article(&self, article: &Article) -> Result<UpsertOutcome, StoreError> {
        self.write_gate()?;
        self.inner.upsert_article(article).await
    }

    async fn read_journalist_aggregate(
        &self,
        name: &str,
        source: &str,
    ) -> Result<Option<Journalist>, StoreError> {
        self.read_gate()?;
        self.inner.read_journalist_aggregate(name, source).await
    }

    async fn list_journalists(&self, source: Option<&str>) -> Result<Vec<Journalist>, StoreError> {
        self.read_gate()?;
        self.inner.list_journalists(source).await
    }

    async fn read_bylines(&self, filter: &BylineFilter) -> Result<Vec<Byline>, StoreError> {
        self.read_gate()?;
        self.inner.read_bylines(filter).await
    }

    async fn read_corpus_stats(
        &self,
        today_start: DateTime<Utc>,
        top_n: usize,
    ) -> Result<CorpusStats, StoreError> {
        self.read_gate()?;
        self.inner.read_corpus_stats(today_start, top_n).await
    }

    async fn known_urls(&self, source: &str, category: &str) -> Result<Vec<String>, StoreError> {
        self.read_gate()?;
        self.inner.known_urls(source, category).await
    }

    async fn record_page_completed(&self, task: &CrawlTask) -> Result<(), StoreError> {
        self.write_gate()?;
        self.inner.record_page_completed(task).await
    }

    async fn completed_pages(&self, source: &str, category: &str) -> Result<Vec<u32>, StoreError> {
        self.read_gate()?;
        self.inner.completed_pages(source, category).await
    }

    async fn clear_progress(&self, source: &str, category: &str) -> Result<(), StoreError> {
        self.write_gate()?;
        self.inner.clear_progress(source, category).await
    }

    async fn log_crawl_run(&self, summary: &RunSummary) -> Result<(), StoreError> {
        self.write_gate()?;
        self.inner.log_crawl_run(summary).await
    }
}
