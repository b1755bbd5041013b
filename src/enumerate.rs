//! Task enumeration over (category × page).
//!
//! Each requested category is probed once: page 1 is fetched and the parser
//! reads the last page number from its pagination. The estimate is capped,
//! the category is resumed after its last contiguous completed page, and the
//! tasks are emitted in ascending page order, category by category.
//!
//! A failed probe only costs its own category, which then yields no tasks and
//! is listed in [`EnumerationPlan::probe_failures`]. Configuration problems
//! (an unknown category, nothing left after the skip set) are fatal.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, instrument, warn};

use crate::error::ConfigError;
use crate::fetch::Fetcher;
use crate::models::CrawlTask;
use crate::ratelimit::RateLimiter;
use crate::scrapers::PageParser;
use crate::store::{Store, resume_page};
use crate::utils::truncate_for_log;

/// What to enumerate.
#[derive(Debug, Clone, Default)]
pub struct EnumerationRequest {
    /// Category names; empty means every category the parser offers.
    pub categories: Vec<String>,
    pub page_cap: Option<u32>,
    pub skip: BTreeSet<String>,
    /// Start each category after its completed pages instead of at page 1.
    pub resume: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPlan {
    pub category: String,
    /// Pages reported by the probe, before capping.
    pub estimated_pages: u32,
    pub first_page: u32,
    pub last_page: u32,
}

impl CategoryPlan {
    pub fn task_count(&self) -> u32 {
        (self.last_page + 1).saturating_sub(self.first_page)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeFailure {
    pub category: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumerationPlan {
    pub source: String,
    pub tasks: Vec<CrawlTask>,
    pub categories: Vec<CategoryPlan>,
    pub probe_failures: Vec<ProbeFailure>,
}

/// Resolve the requested categories against the parser and apply the skip set.
pub fn resolve_categories(
    parser: &dyn PageParser,
    requested: &[String],
    skip: &BTreeSet<String>,
) -> Result<Vec<String>, ConfigError> {
    let offered: Vec<String> = parser.categories().into_iter().map(|(name, _)| name).collect();

    let chosen = if requested.is_empty() {
        offered
    } else {
        for category in requested {
            if !offered.contains(category) {
                return Err(ConfigError::UnknownCategory {
                    source_id: parser.source_id().to_string(),
                    category: category.clone(),
                });
            }
        }
        requested.to_vec()
    };

    let mut seen = BTreeSet::new();
    let remaining: Vec<String> = chosen
        .into_iter()
        .filter(|c| !skip.contains(c))
        .filter(|c| seen.insert(c.clone()))
        .collect();

    if remaining.is_empty() {
        return Err(ConfigError::NoCategories);
    }
    Ok(remaining)
}

/// Fetch page 1 of `category` and read the page count from it.
///
/// A listing without pagination has a single page.
#[instrument(level = "info", skip(parser, fetcher, limiter))]
pub async fn probe_page_count(
    parser: &dyn PageParser,
    fetcher: &dyn Fetcher,
    limiter: &RateLimiter,
    category: &str,
) -> Result<u32, String> {
    let url = parser
        .listing_url(category, 1)
        .map_err(|e| e.to_string())?;
    limiter.acquire(category).await;
    let body = fetcher.fetch(&url).await.map_err(|e| e.to_string())?;
    let pages = parser.estimate_page_count(&body).unwrap_or(1).max(1);
    info!(pages, "Estimated page count");
    Ok(pages)
}

/// Probe every category and report estimates without building tasks.
pub async fn estimate(
    parser: &dyn PageParser,
    fetcher: &dyn Fetcher,
    limiter: &RateLimiter,
    categories: &[String],
) -> Vec<(String, Result<u32, String>)> {
    let mut estimates = Vec::with_capacity(categories.len());
    for category in categories {
        let result = probe_page_count(parser, fetcher, limiter, category).await;
        estimates.push((category.clone(), result));
    }
    estimates
}

/// Build the ordered task list for a run.
#[instrument(level = "info", skip_all, fields(source = parser.source_id()))]
pub async fn enumerate(
    parser: &dyn PageParser,
    fetcher: &dyn Fetcher,
    store: &dyn Store,
    limiter: &RateLimiter,
    request: &EnumerationRequest,
) -> Result<EnumerationPlan, ConfigError> {
    let source = parser.source_id().to_string();
    let categories = resolve_categories(parser, &request.categories, &request.skip)?;
    let mut plan = EnumerationPlan {
        source: source.clone(),
        ..Default::default()
    };

    for category in categories {
        let estimated = match probe_page_count(parser, fetcher, limiter, &category).await {
            Ok(pages) => pages,
            Err(reason) => {
                warn!(%category, reason = %truncate_for_log(&reason, 200), "Probe failed; category yields no tasks");
                plan.probe_failures.push(ProbeFailure { category, reason });
                continue;
            }
        };
        let last_page = request.page_cap.map_or(estimated, |cap| estimated.min(cap));

        let mut first_page = 1;
        if request.resume {
            match store.completed_pages(&source, &category).await {
                Ok(completed) => first_page = resume_page(&completed),
                // Starting over costs fetches, never duplicates.
                Err(e) => warn!(%category, error = %e, "Could not read progress; starting at page 1"),
            }
            if first_page > last_page {
                // Everything up to the (possibly shrunken) end is done: start the walk over.
                if let Err(e) = store.clear_progress(&source, &category).await {
                    warn!(%category, error = %e, "Could not clear stale progress");
                }
                first_page = 1;
            }
        }

        let planned = CategoryPlan {
            category,
            estimated_pages: estimated,
            first_page,
            last_page,
        };
        info!(category = %planned.category, estimated, first_page, last_page, tasks = planned.task_count(), "Category enumerated");
        plan.tasks.extend(
            (first_page..=last_page).map(|page| CrawlTask::new(&source, &planned.category, page)),
        );
        plan.categories.push(planned);
    }

    info!(
        tasks = plan.tasks.len(),
        probe_failures = plan.probe_failures.len(),
        "Enumeration finished"
    );
    Ok(plan)
}
