//! SQLite backend for [`Store`].
//!
//! # Tables
//!
//! | Table | Key | Contents |
//! |-------|-----|----------|
//! | `articles` | `canonical_url` (unique) | every persisted article |
//! | `journalists` | `(name, source)` | incrementally maintained aggregates |
//! | `crawl_progress` | `(source, category, page)` | pages completed by unfinished runs |
//! | `crawl_runs` | autoincrement | one summary row per finished run |
//!
//! The schema is created on connect. Timestamps are stored as RFC 3339 text in
//! UTC, which keeps range comparisons in SQL consistent with chrono ordering.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::{Store, UpsertOutcome};
use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::models::{
    Article, ArticleRef, Byline, BylineFilter, CorpusStats, CrawlTask, Journalist,
    JournalistCount, RunSummary,
};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS articles (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        canonical_url TEXT NOT NULL UNIQUE,
        title         TEXT NOT NULL,
        author        TEXT NOT NULL,
        body          TEXT NOT NULL,
        category      TEXT NOT NULL,
        source        TEXT NOT NULL,
        published_at  TEXT NOT NULL,
        collected_at  TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_articles_author ON articles (author, source)",
    "CREATE INDEX IF NOT EXISTS idx_articles_category ON articles (source, category)",
    r#"CREATE TABLE IF NOT EXISTS journalists (
        name             TEXT NOT NULL,
        source           TEXT NOT NULL,
        total_articles   INTEGER NOT NULL,
        first_article_at TEXT,
        last_article_at  TEXT,
        categories       TEXT NOT NULL DEFAULT '{}',
        PRIMARY KEY (name, source)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS crawl_progress (
        source       TEXT NOT NULL,
        category     TEXT NOT NULL,
        page         INTEGER NOT NULL,
        completed_at TEXT NOT NULL,
        PRIMARY KEY (source, category, page)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS crawl_runs (
        id                 INTEGER PRIMARY KEY AUTOINCREMENT,
        source             TEXT NOT NULL,
        started_at         TEXT NOT NULL,
        finished_at        TEXT NOT NULL,
        tasks_total        INTEGER NOT NULL,
        tasks_succeeded    INTEGER NOT NULL,
        tasks_failed       INTEGER NOT NULL,
        tasks_skipped      INTEGER NOT NULL,
        articles_persisted INTEGER NOT NULL,
        status             TEXT NOT NULL
    )"#,
];

fn count(v: i64) -> u64 {
    v.max(0) as u64
}

pub struct SqliteStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url`, e.g. `sqlite://newsdesk.db`.
    #[instrument(level = "info", skip_all, fields(%url))]
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self {
            pool,
            clock: Arc::new(SystemClock),
        };
        store.init_schema().await?;
        info!("SQLite store ready");
        Ok(store)
    }

    /// A private in-memory database. One connection that never expires, so the data lives as long as the store.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self {
            pool,
            clock: Arc::new(SystemClock),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Use `clock` for collection and bookkeeping timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn fold_into_journalist(
        tx: &mut Transaction<'_, Sqlite>,
        article: &Article,
    ) -> Result<(), StoreError> {
        let existing = sqlx::query(
            "SELECT total_articles, first_article_at, last_article_at, categories \
             FROM journalists WHERE name = ? AND source = ?",
        )
        .bind(&article.author)
        .bind(&article.source)
        .fetch_optional(&mut **tx)
        .await?;

        let (total, first, last, mut categories) = match existing {
            Some(row) => {
                let categories: BTreeMap<String, u64> =
                    serde_json::from_str(&row.try_get::<String, _>("categories")?)?;
                (
                    count(row.try_get("total_articles")?),
                    row.try_get::<Option<DateTime<Utc>>, _>("first_article_at")?,
                    row.try_get::<Option<DateTime<Utc>>, _>("last_article_at")?,
                    categories,
                )
            }
            None => (0, None, None, BTreeMap::new()),
        };

        *categories.entry(article.category.clone()).or_insert(0) += 1;
        let ts = article.published_at;
        let first = Some(first.map_or(ts, |f| f.min(ts)));
        let last = Some(last.map_or(ts, |l| l.max(ts)));

        sqlx::query(
            r#"INSERT INTO journalists (name, source, total_articles, first_article_at, last_article_at, categories)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT (name, source) DO UPDATE SET
                   total_articles = excluded.total_articles,
                   first_article_at = excluded.first_article_at,
                   last_article_at = excluded.last_article_at,
                   categories = excluded.categories"#,
        )
        .bind(&article.author)
        .bind(&article.source)
        .bind((total + 1) as i64)
        .bind(first)
        .bind(last)
        .bind(serde_json::to_string(&categories)?)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

fn journalist_from_row(row: &SqliteRow) -> Result<Journalist, StoreError> {
    Ok(Journalist {
        name: row.try_get("name")?,
        source: row.try_get("source")?,
        total_articles: count(row.try_get("total_articles")?),
        first_article_at: row.try_get("first_article_at")?,
        last_article_at: row.try_get("last_article_at")?,
        categories: serde_json::from_str(&row.try_get::<String, _>("categories")?)?,
        articles: Vec::new(),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn exists(&self, canonical_url: &str) -> Result<bool, StoreError> {
        let found = sqlx::query("SELECT 1 FROM articles WHERE canonical_url = ?")
            .bind(canonical_url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    #[instrument(level = "debug", skip_all, fields(url = %article.canonical_url))]
    async fn upsert_article(&self, article: &Article) -> Result<UpsertOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            r#"INSERT INTO articles (canonical_url, title, author, body, category, source, published_at, collected_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (canonical_url) DO NOTHING"#,
        )
        .bind(&article.canonical_url)
        .bind(&article.title)
        .bind(&article.author)
        .bind(&article.body)
        .bind(&article.category)
        .bind(&article.source)
        .bind(article.published_at)
        .bind(self.clock.now())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            debug!("Article already stored");
            return Ok(UpsertOutcome::AlreadyExists);
        }

        Self::fold_into_journalist(&mut tx, article).await?;
        tx.commit().await?;
        Ok(UpsertOutcome::Inserted)
    }

    async fn read_journalist_aggregate(
        &self,
        name: &str,
        source: &str,
    ) -> Result<Option<Journalist>, StoreError> {
        let Some(row) = sqlx::query("SELECT * FROM journalists WHERE name = ? AND source = ?")
            .bind(name)
            .bind(source)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        let mut journalist = journalist_from_row(&row)?;

        let rows = sqlx::query(
            "SELECT canonical_url, title, category, published_at FROM articles \
             WHERE author = ? AND source = ? ORDER BY published_at DESC, canonical_url ASC",
        )
        .bind(name)
        .bind(source)
        .fetch_all(&self.pool)
        .await?;
        journalist.articles = rows
            .iter()
            .map(|r| {
                Ok(ArticleRef {
                    canonical_url: r.try_get("canonical_url")?,
                    title: r.try_get("title")?,
                    category: r.try_get("category")?,
                    published_at: r.try_get("published_at")?,
                })
            })
            .collect::<Result<_, sqlx::Error>>()?;
        Ok(Some(journalist))
    }

    async fn list_journalists(&self, source: Option<&str>) -> Result<Vec<Journalist>, StoreError> {
        let rows = sqlx::query("SELECT * FROM journalists WHERE (? IS NULL OR source = ?)")
            .bind(source)
            .bind(source)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(journalist_from_row).collect()
    }

    async fn read_bylines(&self, filter: &BylineFilter) -> Result<Vec<Byline>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT author, source, category, published_at FROM articles
               WHERE (? IS NULL OR source = ?)
                 AND (? IS NULL OR category = ?)
                 AND (? IS NULL OR published_at >= ?)"#,
        )
        .bind(filter.source.as_deref())
        .bind(filter.source.as_deref())
        .bind(filter.category.as_deref())
        .bind(filter.category.as_deref())
        .bind(filter.since)
        .bind(filter.since)
        .fetch_all(&self.pool)
        .await?;
        let bylines = rows
            .iter()
            .map(|r| {
                Ok(Byline {
                    author: r.try_get("author")?,
                    source: r.try_get("source")?,
                    category: r.try_get("category")?,
                    published_at: r.try_get("published_at")?,
                })
            })
            .collect::<Result<_, sqlx::Error>>()?;
        Ok(bylines)
    }

    #[instrument(level = "debug", skip(self))]
    async fn read_corpus_stats(
        &self,
        today_start: DateTime<Utc>,
        top_n: usize,
    ) -> Result<CorpusStats, StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        let today: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE collected_at >= ?")
            .bind(today_start)
            .fetch_one(&self.pool)
            .await?;

        let per_category = sqlx::query_as::<_, (String, i64)>(
            "SELECT category, COUNT(*) FROM articles GROUP BY category",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(category, n)| (category, count(n)))
        .collect();

        let top_journalists = sqlx::query(
            "SELECT name, source, total_articles, last_article_at FROM journalists \
             ORDER BY total_articles DESC, last_article_at DESC, name ASC LIMIT ?",
        )
        .bind(top_n as i64)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|r| {
            Ok(JournalistCount {
                name: r.try_get("name")?,
                source: r.try_get("source")?,
                total_articles: count(r.try_get("total_articles")?),
                last_article_at: r.try_get("last_article_at")?,
            })
        })
        .collect::<Result<_, sqlx::Error>>()?;

        Ok(CorpusStats {
            total_articles: count(total),
            per_category,
            top_journalists,
            today_count: count(today),
        })
    }

    async fn known_urls(&self, source: &str, category: &str) -> Result<Vec<String>, StoreError> {
        let urls = sqlx::query_scalar(
            "SELECT canonical_url FROM articles WHERE source = ? AND category = ?",
        )
        .bind(source)
        .bind(category)
        .fetch_all(&self.pool)
        .await?;
        Ok(urls)
    }

    async fn record_page_completed(&self, task: &CrawlTask) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR IGNORE INTO crawl_progress (source, category, page, completed_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&task.source)
        .bind(&task.category)
        .bind(task.page as i64)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn completed_pages(&self, source: &str, category: &str) -> Result<Vec<u32>, StoreError> {
        let pages: Vec<i64> = sqlx::query_scalar(
            "SELECT page FROM crawl_progress WHERE source = ? AND category = ? ORDER BY page ASC",
        )
        .bind(source)
        .bind(category)
        .fetch_all(&self.pool)
        .await?;
        Ok(pages
            .into_iter()
            .filter_map(|p| u32::try_from(p).ok())
            .collect())
    }

    async fn clear_progress(&self, source: &str, category: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM crawl_progress WHERE source = ? AND category = ?")
            .bind(source)
            .bind(category)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(level = "info", skip_all, fields(source = %summary.source, status = %summary.status))]
    async fn log_crawl_run(&self, summary: &RunSummary) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO crawl_runs (source, started_at, finished_at, tasks_total, tasks_succeeded,
                   tasks_failed, tasks_skipped, articles_persisted, status)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&summary.source)
        .bind(summary.started_at)
        .bind(summary.finished_at)
        .bind(summary.tasks_total as i64)
        .bind(summary.tasks_succeeded as i64)
        .bind(summary.tasks_failed as i64)
        .bind(summary.tasks_skipped as i64)
        .bind(summary.articles_persisted as i64)
        .bind(&summary.status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
