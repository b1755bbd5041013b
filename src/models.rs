//! Data models shared by the crawl pipeline and the ranking engine.
//!
//! This module defines the core data structures used throughout the crate:
//! - [`CrawlTask`] / [`CrawlTaskResult`]: one (category, page) fetch unit and its outcome
//! - [`RawArticle`]: a record as handed over by a page parser, not yet trusted
//! - [`Article`]: a validated, normalized article ready for persistence
//! - [`Journalist`]: the derived per-author aggregate
//! - [`ControlSignal`]: the operator's stop / pause / resume instruction
//! - [`StatsSnapshot`]: the periodically materialized run and corpus statistics

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

use crate::error::ValidationError;
use crate::utils::{canonicalize_url, clean_text, parse_published};

/// One listing page to fetch. Identity is `(source, category, page)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CrawlTask {
    pub source: String,
    pub category: String,
    pub page: u32,
}

impl CrawlTask {
    pub fn new(source: impl Into<String>, category: impl Into<String>, page: u32) -> Self {
        Self {
            source: source.into(),
            category: category.into(),
            page,
        }
    }
}

impl fmt::Display for CrawlTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.source, self.category, self.page)
    }
}

/// What a successfully processed page contributed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageYield {
    /// Canonical URLs persisted by this task.
    pub persisted: Vec<String>,
    /// Records already present in the store (or earlier in this run).
    pub duplicates: usize,
    /// Records rejected by validation.
    pub discarded: usize,
}

/// Final outcome of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum TaskOutcome {
    Success(PageYield),
    Failed(String),
    Skipped(String),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success(_))
    }
}

/// The result reported for a task; `attempts` counts fetch attempts made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlTaskResult {
    pub task: CrawlTask,
    pub outcome: TaskOutcome,
    pub attempts: u32,
}

/// A record as extracted by a page parser. Nothing here is trusted yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawArticle {
    pub title: String,
    pub author: String,
    pub body: String,
    /// As found in the markup; may be relative.
    pub url: String,
    /// As printed by the source.
    pub published: String,
}

/// How a parser wants its raw records normalized.
#[derive(Debug, Clone)]
pub struct NormalizeRules<'a> {
    /// Base for resolving relative links.
    pub base: Option<&'a Url>,
    /// Query parameters that are part of an article's identity.
    pub keep_params: &'a [&'a str],
    /// Offset of timestamps printed without one.
    pub utc_offset: FixedOffset,
}

impl RawArticle {
    /// Validate and normalize into an [`Article`] for `task`.
    pub fn into_article(
        self,
        task: &CrawlTask,
        rules: &NormalizeRules<'_>,
    ) -> Result<Article, ValidationError> {
        let title = clean_text(&self.title);
        if title.is_empty() {
            return Err(ValidationError::MissingTitle);
        }
        let author = clean_text(&self.author);
        if author.is_empty() {
            return Err(ValidationError::MissingAuthor);
        }
        let canonical_url = canonicalize_url(&self.url, rules.base, rules.keep_params)?;
        let published_at = parse_published(&self.published, rules.utc_offset)
            .ok_or_else(|| ValidationError::UnparseableTimestamp(self.published.clone()))?;

        Ok(Article {
            title,
            author,
            body: self.body.trim().to_string(),
            category: task.category.clone(),
            canonical_url,
            published_at,
            source: task.source.clone(),
        })
    }
}

/// A validated article. `canonical_url` is the global deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub author: String,
    pub body: String,
    pub category: String,
    pub canonical_url: String,
    pub published_at: DateTime<Utc>,
    pub source: String,
}

/// A pointer from a journalist aggregate to one of their stored articles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRef {
    pub canonical_url: String,
    pub title: String,
    pub category: String,
    pub published_at: DateTime<Utc>,
}

/// Per-author aggregate derived from the stored articles.
///
/// `total_articles` always equals the number of distinct canonical URLs
/// attributed to `(name, source)` in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journalist {
    pub name: String,
    pub source: String,
    pub total_articles: u64,
    pub first_article_at: Option<DateTime<Utc>>,
    pub last_article_at: Option<DateTime<Utc>>,
    pub categories: BTreeMap<String, u64>,
    pub articles: Vec<ArticleRef>,
}

impl Journalist {
    /// Category with the most articles; ties go to the alphabetically first.
    pub fn main_category(&self) -> Option<(&str, u64)> {
        top_category(&self.categories)
    }
}

/// Largest count in a per-category tally; ties go to the alphabetically first.
pub fn top_category(categories: &BTreeMap<String, u64>) -> Option<(&str, u64)> {
    categories
        .iter()
        .fold(None, |best: Option<(&str, u64)>, (name, &count)| match best {
            Some((_, c)) if c >= count => best,
            _ => Some((name.as_str(), count)),
        })
}

/// One article reduced to what trend and category rankings count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Byline {
    pub author: String,
    pub source: String,
    pub category: String,
    pub published_at: DateTime<Utc>,
}

/// Restricts which [`Byline`]s a store read returns. `None` means no restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BylineFilter {
    pub source: Option<String>,
    pub category: Option<String>,
    /// Inclusive lower bound on `published_at`.
    pub since: Option<DateTime<Utc>>,
}

/// The operator's instruction for the current run. Last write wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "until", rename_all = "snake_case")]
pub enum ControlSignal {
    Running,
    StopRequested,
    PausedUntil(DateTime<Utc>),
}

impl ControlSignal {
    /// Collapse a pause whose deadline has passed into `Running`.
    pub fn effective(self, now: DateTime<Utc>) -> Self {
        match self {
            ControlSignal::PausedUntil(until) if until <= now => ControlSignal::Running,
            other => other,
        }
    }
}

impl fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlSignal::Running => write!(f, "running"),
            ControlSignal::StopRequested => write!(f, "stop requested"),
            ControlSignal::PausedUntil(until) => write!(f, "paused until {}", until.to_rfc3339()),
        }
    }
}

/// A journalist's name and count, as listed in snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalistCount {
    pub name: String,
    pub source: String,
    pub total_articles: u64,
    pub last_article_at: Option<DateTime<Utc>>,
}

/// The store-derived part of a [`StatsSnapshot`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusStats {
    pub total_articles: u64,
    pub per_category: BTreeMap<String, u64>,
    pub top_journalists: Vec<JournalistCount>,
    pub today_count: u64,
}

/// Live counters of the current run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub articles_persisted: u64,
    pub articles_skipped: BTreeMap<String, u64>,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub tasks_skipped: u64,
    pub persisted_per_category: BTreeMap<String, u64>,
}

/// Compact record of a finished run, as kept in the run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tasks_total: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub tasks_skipped: u64,
    pub articles_persisted: u64,
    /// `completed`, `partial` (some tasks failed) or `stopped`.
    pub status: String,
}

/// Point-in-time run and corpus statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub generated_at: DateTime<Utc>,
    pub total_articles: u64,
    pub per_category: BTreeMap<String, u64>,
    pub top_journalists: Vec<JournalistCount>,
    pub today_count: u64,
    pub run: RunCounters,
    /// Set when the store portion could not be read and counters are all we have.
    pub degraded: bool,
}
