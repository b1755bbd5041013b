//! Exponential backoff around any [`Store`].
//!
//! [`RetryStore`] is a transparent decorator: it forwards every call to the
//! wrapped store and, when a call fails with a retryable [`StoreError`], waits
//! and tries again according to its own [`RetryPolicy`]. The policy is kept
//! separate from the fetch policy; store hiccups (a locked database, a pool
//! timeout) clear up on a much shorter scale than a struggling web server.
//!
//! Waits go through the injected [`Clock`], so tests run without real delays.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};

use super::{Store, UpsertOutcome};
use crate::clock::Clock;
use crate::error::StoreError;
use crate::models::{
    Article, Byline, BylineFilter, CorpusStats, CrawlTask, Journalist, RunSummary,
};
use crate::retry::RetryPolicy;

pub struct RetryStore<T> {
    inner: T,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl<T: Store> RetryStore<T> {
    pub fn new(inner: T, policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            policy,
            clock,
        }
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &T {
        &self.inner
    }

    async fn with_retry<R, F, Fut>(&self, op: &'static str, call: F) -> Result<R, StoreError>
    where
        F: Fn() -> Fut + Send,
        Fut: Future<Output = Result<R, StoreError>> + Send,
        R: Send,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0u32;

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    let total_dt = total_t0.elapsed();

                    if !e.is_retryable() || attempt > self.policy.max_retries {
                        error!(
                            op,
                            attempt,
                            max = self.policy.max_retries,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "Store call failed; giving up"
                        );
                        return Err(e);
                    }

                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        op,
                        attempt,
                        max = self.policy.max_retries,
                        ?delay,
                        error = %e,
                        "Store call failed; backing off"
                    );
                    self.clock.sleep(delay).await;
                }
            }
        }
    }
}

impl<T> fmt::Debug for RetryStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryStore")
            .field("policy", &self.policy)
            .finish()
    }
}

#[async_trait]
impl<T: Store> Store for RetryStore<T> {
    async fn exists(&self, canonical_url: &str) -> Result<bool, StoreError> {
        self.with_retry("exists", || self.inner.exists(canonical_url))
            .await
    }

    async fn upsert_article(&self, article: &Article) -> Result<UpsertOutcome, StoreError> {
        self.with_retry("upsert_article", || self.inner.upsert_article(article))
            .await
    }

    async fn read_journalist_aggregate(
        &self,
        name: &str,
        source: &str,
    ) -> Result<Option<Journalist>, StoreError> {
        self.with_retry("read_journalist_aggregate", || {
            self.inner.read_journalist_aggregate(name, source)
        })
        .await
    }

    async fn list_journalists(&self, source: Option<&str>) -> Result<Vec<Journalist>, StoreError> {
        self.with_retry("list_journalists", || self.inner.list_journalists(source))
            .await
    }

    async fn read_bylines(&self, filter: &BylineFilter) -> Result<Vec<Byline>, StoreError> {
        self.with_retry("read_bylines", || self.inner.read_bylines(filter))
            .await
    }

    async fn read_corpus_stats(
        &self,
        today_start: DateTime<Utc>,
        top_n: usize,
    ) -> Result<CorpusStats, StoreError> {
        self.with_retry("read_corpus_stats", || {
            self.inner.read_corpus_stats(today_start, top_n)
        })
        .await
    }

    async fn known_urls(&self, source: &str, category: &str) -> Result<Vec<String>, StoreError> {
        self.with_retry("known_urls", || self.inner.known_urls(source, category))
            .await
    }

    async fn record_page_completed(&self, task: &CrawlTask) -> Result<(), StoreError> {
        self.with_retry("record_page_completed", || {
            self.inner.record_page_completed(task)
        })
        .await
    }

    async fn completed_pages(&self, source: &str, category: &str) -> Result<Vec<u32>, StoreError> {
        self.with_retry("completed_pages", || {
            self.inner.completed_pages(source, category)
        })
        .await
    }

    async fn clear_progress(&self, source: &str, category: &str) -> Result<(), StoreError> {
        self.with_retry("clear_progress", || self.inner.clear_progress(source, category))
            .await
    }

    async fn log_crawl_run(&self, summary: &RunSummary) -> Result<(), StoreError> {
        self.with_retry("log_crawl_run", || self.inner.log_crawl_run(summary))
            .await
    }
}
