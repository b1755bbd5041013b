//! Journalist rankings, trends and insights over the stored corpus.
//!
//! The aggregator only reads from the [`Store`] and never writes back; a
//! trend over the last N days recounts articles inside the window without
//! touching the stored aggregates.
//!
//! # Ordering
//!
//! Entries are ordered by count (descending), then by the configured
//! [`TieBreak`], and finally by source, so equal store contents always rank
//! identically. Journalists with no article in scope are left out rather than
//! listed with zero.
//!
//! # Failure
//!
//! A failed store read yields an empty [`Ranking`] with `degraded` set; the
//! caller decides how to present it.

use chrono::{DateTime, Datelike, Utc};
use clap::ValueEnum;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::clock::Clock;
use crate::error::StoreError;
use crate::models::{Byline, BylineFilter, Journalist, top_category};
use crate::store::Store;

/// How journalists with equal counts are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Most recent article first, then name.
    #[default]
    RecentThenName,
    /// Name only.
    Name,
}

/// Histogram bucket width for [`Ranker::insight`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Day,
    #[default]
    Week,
    Month,
}

impl Period {
    /// Bucket label for `ts`: `2025-05-06`, `2025-W19` or `2025-05`.
    pub fn bucket(self, ts: DateTime<Utc>) -> String {
        match self {
            Period::Day => ts.format("%Y-%m-%d").to_string(),
            Period::Week => {
                let week = ts.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Period::Month => ts.format("%Y-%m").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RankScope {
    Overall,
    Category {
        category: String,
    },
    Trend {
        window_days: u32,
        since: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankEntry {
    pub rank: usize,
    pub name: String,
    pub source: String,
    /// Articles counted in scope.
    pub count: u64,
    /// All stored articles by this journalist, when known.
    pub total_articles: Option<u64>,
    pub last_article_at: Option<DateTime<Utc>>,
    pub main_category: Option<String>,
    pub category_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ranking {
    pub generated_at: DateTime<Utc>,
    pub scope: RankScope,
    /// Journalists with at least one article in scope, before truncation to top-N.
    pub journalists_analyzed: usize,
    pub entries: Vec<RankEntry>,
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryShare {
    pub name: String,
    pub count: u64,
    /// Percentage of the journalist's articles.
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramBucket {
    pub bucket: String,
    pub count: u64,
}

/// Full aggregate of one journalist plus derived activity figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub journalist: Journalist,
    pub period: Period,
    /// Oldest bucket first; empty periods are not listed.
    pub histogram: Vec<HistogramBucket>,
    pub main_category: Option<CategoryShare>,
    /// Every category, largest share first.
    pub categories: Vec<CategoryShare>,
}

/// Per-journalist tally before ordering.
#[derive(Debug, Clone, Default)]
struct Tally {
    name: String,
    source: String,
    count: u64,
    total_articles: Option<u64>,
    last_article_at: Option<DateTime<Utc>>,
    categories: BTreeMap<String, u64>,
}

impl Tally {
    fn from_journalist(j: Journalist) -> Self {
        Self {
            count: j.total_articles,
            total_articles: Some(j.total_articles),
            last_article_at: j.last_article_at,
            categories: j.categories,
            name: j.name,
            source: j.source,
        }
    }
}

fn tally_bylines(bylines: Vec<Byline>) -> Vec<Tally> {
    let mut by_author: HashMap<(String, String), Tally> = HashMap::new();
    for b in bylines {
        let tally = by_author
            .entry((b.author.clone(), b.source.clone()))
            .or_insert_with(|| Tally {
                name: b.author,
                source: b.source,
                ..Default::default()
            });
        tally.count += 1;
        tally.last_article_at = tally.last_article_at.max(Some(b.published_at));
        *tally.categories.entry(b.category).or_insert(0) += 1;
    }
    by_author.into_values().collect()
}

fn compare(a: &Tally, b: &Tally, tie_break: TieBreak) -> Ordering {
    let by_count = b.count.cmp(&a.count);
    let tie = match tie_break {
        // `None` sorts below any timestamp, so it lands last in descending order.
        TieBreak::RecentThenName => b
            .last_article_at
            .cmp(&a.last_article_at)
            .then_with(|| a.name.cmp(&b.name)),
        TieBreak::Name => a.name.cmp(&b.name),
    };
    by_count.then(tie).then_with(|| a.source.cmp(&b.source))
}

/// Order, drop zero counts, number and truncate.
fn finish(tallies: Vec<Tally>, tie_break: TieBreak, top_n: Option<usize>) -> (usize, Vec<RankEntry>) {
    let tallies = tallies
        .into_iter()
        .filter(|t| t.count > 0)
        .sorted_by(|a, b| compare(a, b, tie_break))
        .collect_vec();
    let analyzed = tallies.len();
    let entries = tallies
        .into_iter()
        .take(top_n.unwrap_or(usize::MAX))
        .enumerate()
        .map(|(i, t)| RankEntry {
            rank: i + 1,
            main_category: top_category(&t.categories).map(|(name, _)| name.to_string()),
            category_count: t.categories.len(),
            name: t.name,
            source: t.source,
            count: t.count,
            total_articles: t.total_articles,
            last_article_at: t.last_article_at,
        })
        .collect();
    (analyzed, entries)
}

fn share(name: &str, count: u64, total: u64) -> CategoryShare {
    let ratio = if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    };
    CategoryShare {
        name: name.to_string(),
        count,
        ratio,
    }
}

pub struct Ranker {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    tie_break: TieBreak,
    top_n: Option<usize>,
    source: Option<String>,
}

impl Ranker {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            tie_break: TieBreak::default(),
            top_n: None,
            source: None,
        }
    }

    pub fn tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Keep only the first `n` entries (the analyzed count still covers everyone).
    pub fn top_n(mut self, n: usize) -> Self {
        self.top_n = Some(n);
        self
    }

    /// Restrict every computation to one source.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    fn build(&self, scope: RankScope, read: Result<Vec<Tally>, StoreError>) -> Ranking {
        let generated_at = self.clock.now();
        match read {
            Ok(tallies) => {
                let (journalists_analyzed, entries) = finish(tallies, self.tie_break, self.top_n);
                info!(?scope, journalists_analyzed, "Ranking computed");
                Ranking {
                    generated_at,
                    scope,
                    journalists_analyzed,
                    entries,
                    degraded: false,
                }
            }
            Err(e) => {
                warn!(?scope, error = %e, "Store read failed; returning degraded ranking");
                Ranking {
                    generated_at,
                    scope,
                    journalists_analyzed: 0,
                    entries: Vec::new(),
                    degraded: true,
                }
            }
        }
    }

    /// Overall ranking by stored article count.
    #[instrument(level = "info", skip(self))]
    pub async fn rank(&self) -> Ranking {
        let read = self
            .store
            .list_journalists(self.source.as_deref())
            .await
            .map(|js| js.into_iter().map(Tally::from_journalist).collect());
        self.build(RankScope::Overall, read)
    }

    /// Ranking that counts only articles filed under `category`.
    #[instrument(level = "info", skip(self))]
    pub async fn rank_by_category(&self, category: &str) -> Ranking {
        let filter = BylineFilter {
            source: self.source.clone(),
            category: Some(category.to_string()),
            since: None,
        };
        let read = self.store.read_bylines(&filter).await.map(tally_bylines);
        self.build(
            RankScope::Category {
                category: category.to_string(),
            },
            read,
        )
    }

    /// Ranking over articles published in the last `window_days` days.
    #[instrument(level = "info", skip(self))]
    pub async fn trend(&self, window_days: u32) -> Ranking {
        let since = self.clock.now() - chrono::Duration::days(i64::from(window_days));
        let filter = BylineFilter {
            source: self.source.clone(),
            category: None,
            since: Some(since),
        };
        let read = self.store.read_bylines(&filter).await.map(tally_bylines);
        self.build(RankScope::Trend { window_days, since }, read)
    }

    /// Full aggregate of `(name, source)` with an activity histogram.
    #[instrument(level = "info", skip(self))]
    pub async fn insight(
        &self,
        name: &str,
        source: &str,
        period: Period,
    ) -> Result<Option<Insight>, StoreError> {
        let Some(journalist) = self.store.read_journalist_aggregate(name, source).await? else {
            return Ok(None);
        };

        let mut buckets: BTreeMap<String, u64> = BTreeMap::new();
        for article in &journalist.articles {
            *buckets.entry(period.bucket(article.published_at)).or_insert(0) += 1;
        }
        let histogram = buckets
            .into_iter()
            .map(|(bucket, count)| HistogramBucket { bucket, count })
            .collect();

        let total = journalist.total_articles;
        let mut categories: Vec<CategoryShare> = journalist
            .categories
            .iter()
            .map(|(name, &count)| share(name, count, total))
            .collect();
        categories.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        let main_category = journalist
            .main_category()
            .map(|(name, count)| share(name, count, total));

        Ok(Some(Insight {
            journalist,
            period,
            histogram,
            main_category,
            categories,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::Article;
    use crate::store::SqliteStore;
    use crate::store::testing::FlakyStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 31, 12, 0, 0).unwrap()
    }

    fn article(url: &str, author: &str, category: &str, days_ago: i64) -> Article {
        Article {
            title: format!("title {url}"),
            author: author.to_string(),
            body: String::new(),
            category: category.to_string(),
            canonical_url: url.to_string(),
            published_at: now() - chrono::Duration::days(days_ago),
            source: "sisaon".to_string(),
        }
    }

    async fn corpus(articles: &[Article]) -> Arc<SqliteStore> {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        for a in articles {
            store.upsert_article(a).await.unwrap();
        }
        store
    }

    fn ranker(store: Arc<dyn Store>) -> Ranker {
        Ranker::new(store, Arc::new(ManualClock::new(now())))
    }

    fn names(r: &Ranking) -> Vec<(&str, u64)> {
        r.entries.iter().map(|e| (e.name.as_str(), e.count)).collect()
    }

    #[tokio::test]
    async fn test_trend_counts_only_window() {
        let store = corpus(&[
            article("http://x/1", "Kim", "정치", 1),
            article("http://x/2", "Kim", "정치", 10),
            article("http://x/3", "Kim", "경제", 40),
        ])
        .await;
        let r = ranker(store.clone());

        let trend = r.trend(30).await;
        assert_eq!(names(&trend), vec![("Kim", 2)]);

        let overall = r.rank().await;
        assert_eq!(names(&overall), vec![("Kim", 3)]);

        // The stored aggregate is untouched by the trend computation.
        let kim = store
            .read_journalist_aggregate("Kim", "sisaon")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kim.total_articles, 3);
    }

    #[tokio::test]
    async fn test_ties_break_on_recency_then_name() {
        let store = corpus(&[
            article("http://x/1", "Park", "정치", 5),
            article("http://x/2", "Lee", "정치", 2),
            article("http://x/3", "Choi", "정치", 2),
            article("http://x/4", "Kim", "정치", 1),
            article("http://x/5", "Kim", "정치", 9),
        ])
        .await;

        let recent = ranker(store.clone()).rank().await;
        assert_eq!(
            names(&recent),
            vec![("Kim", 2), ("Choi", 1), ("Lee", 1), ("Park", 1)]
        );
        assert_eq!(
            recent.entries.iter().map(|e| e.rank).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );

        let by_name = ranker(store).tie_break(TieBreak::Name).rank().await;
        assert_eq!(
            names(&by_name),
            vec![("Kim", 2), ("Choi", 1), ("Lee", 1), ("Park", 1)]
        );
    }

    #[tokio::test]
    async fn test_name_tie_break_ignores_recency() {
        let store = corpus(&[
            article("http://x/1", "Yoon", "정치", 1),
            article("http://x/2", "Ahn", "정치", 20),
        ])
        .await;
        let recent = ranker(store.clone()).rank().await;
        assert_eq!(names(&recent), vec![("Yoon", 1), ("Ahn", 1)]);
        let by_name = ranker(store).tie_break(TieBreak::Name).rank().await;
        assert_eq!(names(&by_name), vec![("Ahn", 1), ("Yoon", 1)]);
    }

    #[tokio::test]
    async fn test_ranking_is_deterministic() {
        let articles: Vec<Article> = (0..30)
            .map(|i| {
                article(
                    &format!("http://x/{i}"),
                    ["Kim", "Lee", "Park", "Choi"][i % 4],
                    "정치",
                    (i % 3) as i64,
                )
            })
            .collect();
        let store = corpus(&articles).await;
        let a = ranker(store.clone()).rank().await;
        let b = ranker(store.clone()).rank().await;
        assert_eq!(a.entries, b.entries);
        let a = ranker(store.clone()).trend(7).await;
        let b = ranker(store).trend(7).await;
        assert_eq!(a.entries, b.entries);
    }

    #[tokio::test]
    async fn test_category_ranking_and_top_n() {
        let store = corpus(&[
            article("http://x/1", "Kim", "정치", 1),
            article("http://x/2", "Kim", "경제", 1),
            article("http://x/3", "Kim", "경제", 2),
            article("http://x/4", "Lee", "경제", 1),
            article("http://x/5", "Park", "정치", 3),
        ])
        .await;
        let economy = ranker(store.clone()).rank_by_category("경제").await;
        assert_eq!(names(&economy), vec![("Kim", 2), ("Lee", 1)]);
        assert_eq!(economy.journalists_analyzed, 2);

        let top = ranker(store).top_n(1).rank().await;
        assert_eq!(names(&top), vec![("Kim", 3)]);
        assert_eq!(top.journalists_analyzed, 3);
        assert_eq!(top.entries[0].main_category.as_deref(), Some("경제"));
        assert_eq!(top.entries[0].category_count, 2);
    }

    #[tokio::test]
    async fn test_tied_main_category_agrees_with_insight() {
        let store = corpus(&[
            article("http://x/1", "Kim", "정치", 1),
            article("http://x/2", "Kim", "경제", 2),
        ])
        .await;
        let r = ranker(store);

        let overall = r.rank().await;
        assert_eq!(overall.entries[0].main_category.as_deref(), Some("경제"));
        let insight = r
            .insight("Kim", "sisaon", Period::Month)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(insight.main_category.map(|m| m.name).as_deref(), Some("경제"));
    }

    #[tokio::test]
    async fn test_empty_window_omits_everyone() {
        let store = corpus(&[article("http://x/1", "Kim", "정치", 40)]).await;
        let trend = ranker(store).trend(30).await;
        assert!(trend.entries.is_empty());
        assert_eq!(trend.journalists_analyzed, 0);
        assert!(!trend.degraded);
    }

    #[tokio::test]
    async fn test_store_failure_degrades() {
        let flaky = Arc::new(FlakyStore::new().await);
        flaky.set_reads_down(true);
        let r = ranker(flaky);
        assert!(r.rank().await.degraded);
        assert!(r.trend(7).await.degraded);
        assert!(r.insight("Kim", "sisaon", Period::Week).await.is_err());
    }

    #[tokio::test]
    async fn test_insight_histogram_and_main_category() {
        let store = corpus(&[
            article("http://x/1", "Kim", "정치", 0),
            article("http://x/2", "Kim", "정치", 1),
            article("http://x/3", "Kim", "경제", 8),
            article("http://x/4", "Kim", "정치", 40),
        ])
        .await;
        let r = ranker(store);

        let insight = r
            .insight("Kim", "sisaon", Period::Month)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(insight.journalist.total_articles, 4);
        assert_eq!(
            insight.histogram,
            vec![
                HistogramBucket {
                    bucket: "2025-04".into(),
                    count: 1
                },
                HistogramBucket {
                    bucket: "2025-05".into(),
                    count: 3
                },
            ]
        );
        let main = insight.main_category.unwrap();
        assert_eq!(main.name, "정치");
        assert_eq!(main.count, 3);
        assert!((main.ratio - 75.0).abs() < 1e-9);
        assert_eq!(insight.categories[0].name, "정치");
        assert_eq!(insight.categories.len(), 2);

        let weekly = r
            .insight("Kim", "sisaon", Period::Week)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(weekly.histogram.iter().map(|b| b.count).sum::<u64>(), 4);

        assert!(r.insight("Nobody", "sisaon", Period::Week).await.unwrap().is_none());
    }

    #[test]
    fn test_period_bucket_labels() {
        let ts = Utc.with_ymd_and_hms(2025, 5, 6, 23, 0, 0).unwrap();
        assert_eq!(Period::Day.bucket(ts), "2025-05-06");
        assert_eq!(Period::Week.bucket(ts), "2025-W19");
        assert_eq!(Period::Month.bucket(ts), "2025-05");
    }
}
