//! The fetch/retry engine: a bounded worker pool over the enumerated tasks.
//!
//! # Pipeline per task
//!
//! ```text
//! control check ─▶ rate limiter ─▶ fetch ─┬─▶ parse ─▶ validate ─▶ dedup ─▶ store
//!       ▲                                 │
//!       └──────── backoff (Retrying) ◀────┘ transient failure
//! ```
//!
//! Workers share one FIFO queue in enumeration order. Before every fetch the
//! worker consults the [`ControlChannel`]: a pause blocks it until the
//! deadline, a stop makes it finish what it holds and exit. Tasks nobody
//! dispatched are reported as `Skipped("stopped")`.
//!
//! When a category delay is configured, the first task of a category is not
//! handed out until every task of the previous category has finished and the
//! delay has elapsed since the last one did.
//!
//! All shared run state lives in [`RunContext`], which is passed explicitly.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use itertools::Itertools;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::{Clock, to_chrono};
use crate::control::ControlChannel;
use crate::dedup::{Admission, DedupGate};
use crate::enumerate::{EnumerationPlan, ProbeFailure};
use crate::error::StoreError;
use crate::fetch::Fetcher;
use crate::models::{
    Article, ControlSignal, CrawlTask, CrawlTaskResult, PageYield, RunSummary, TaskOutcome,
};
use crate::progress::{DUPLICATE, ProgressTracker};
use crate::ratelimit::RateLimiter;
use crate::retry::{RetryPolicy, TaskState};
use crate::scrapers::PageParser;
use crate::store::{Store, UpsertOutcome};
use crate::utils::truncate_for_log;

/// Skip reason for tasks cut off by a stop request.
pub const STOPPED: &str = "stopped";

/// How often a paused worker re-reads the control channel.
const PAUSE_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub workers: usize,
    pub retry: RetryPolicy,
    /// Pause between the end of one category and the start of the next.
    pub category_delay: Duration,
}

/// Everything a worker needs, shared by reference for the duration of a run.
pub struct RunContext {
    pub parser: Arc<dyn PageParser>,
    pub fetcher: Arc<dyn Fetcher>,
    pub store: Arc<dyn Store>,
    pub control: Arc<dyn ControlChannel>,
    pub clock: Arc<dyn Clock>,
    pub limiter: RateLimiter,
    pub dedup: DedupGate,
    pub progress: Arc<ProgressTracker>,
}

/// Final account of a crawl run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One result per enumerated task, in enumeration order.
    pub results: Vec<CrawlTaskResult>,
    pub persisted_per_category: BTreeMap<String, u64>,
    pub probe_failures: Vec<ProbeFailure>,
    pub stopped: bool,
}

impl RunReport {
    fn count(&self, pred: impl Fn(&TaskOutcome) -> bool) -> u64 {
        self.results.iter().filter(|r| pred(&r.outcome)).count() as u64
    }

    pub fn tasks_succeeded(&self) -> u64 {
        self.count(|o| matches!(o, TaskOutcome::Success(_)))
    }

    pub fn tasks_failed(&self) -> u64 {
        self.count(|o| matches!(o, TaskOutcome::Failed(_)))
    }

    pub fn tasks_skipped(&self) -> u64 {
        self.count(|o| matches!(o, TaskOutcome::Skipped(_)))
    }

    pub fn articles_persisted(&self) -> u64 {
        self.persisted_per_category.values().sum()
    }

    /// Succeeded tasks as a percentage of all tasks; 100 for an empty run.
    pub fn success_rate(&self) -> f64 {
        if self.results.is_empty() {
            return 100.0;
        }
        self.tasks_succeeded() as f64 / self.results.len() as f64 * 100.0
    }

    /// Categories with at least one failed task, or whose probe failed.
    pub fn failed_categories(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, TaskOutcome::Failed(_)))
            .map(|r| r.task.category.clone())
            .chain(self.probe_failures.iter().map(|p| p.category.clone()))
            .sorted()
            .dedup()
            .collect()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    pub fn summary(&self) -> RunSummary {
        let status = if self.stopped {
            "stopped"
        } else if self.tasks_failed() > 0 || !self.probe_failures.is_empty() {
            "partial"
        } else {
            "completed"
        };
        RunSummary {
            source: self.source.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            tasks_total: self.results.len() as u64,
            tasks_succeeded: self.tasks_succeeded(),
            tasks_failed: self.tasks_failed(),
            tasks_skipped: self.tasks_skipped(),
            articles_persisted: self.articles_persisted(),
            status: status.to_string(),
        }
    }
}

enum Next {
    Task(usize, CrawlTask),
    WaitUntil(DateTime<Utc>),
    WaitForCategory,
    Drained,
}

/// The shared queue plus the bookkeeping for the category gate.
struct Dispatch {
    pending: VecDeque<(usize, CrawlTask)>,
    current: Option<String>,
    in_flight: HashMap<String, usize>,
    last_finished: HashMap<String, DateTime<Utc>>,
}

impl Dispatch {
    fn new(tasks: Vec<CrawlTask>) -> Self {
        Self {
            pending: tasks.into_iter().enumerate().collect(),
            current: None,
            in_flight: HashMap::new(),
            last_finished: HashMap::new(),
        }
    }

    fn next(&mut self, now: DateTime<Utc>, category_delay: chrono::Duration) -> Next {
        let Some((_, front)) = self.pending.front() else {
            return Next::Drained;
        };

        let gated = !category_delay.is_zero()
            && self
                .current
                .as_ref()
                .is_some_and(|current| *current != front.category);
        if gated {
            let previous = self.current.clone().unwrap_or_default();
            if self.in_flight.get(&previous).copied().unwrap_or(0) > 0 {
                return Next::WaitForCategory;
            }
            if let Some(finished) = self.last_finished.get(&previous) {
                let release = *finished + category_delay;
                if now < release {
                    return Next::WaitUntil(release);
                }
            }
        }

        let Some((idx, task)) = self.pending.pop_front() else {
            return Next::Drained;
        };
        *self.in_flight.entry(task.category.clone()).or_insert(0) += 1;
        self.current = Some(task.category.clone());
        Next::Task(idx, task)
    }

    fn finish(&mut self, task: &CrawlTask, now: DateTime<Utc>) {
        if let Some(n) = self.in_flight.get_mut(&task.category) {
            *n = n.saturating_sub(1);
        }
        self.last_finished.insert(task.category.clone(), now);
    }
}

enum Go {
    Run,
    Stop,
}

pub struct Engine {
    ctx: Arc<RunContext>,
    config: EngineConfig,
    dispatch: Mutex<Dispatch>,
    task_done: Notify,
    results: Mutex<Vec<Option<CrawlTaskResult>>>,
    stop_seen: AtomicBool,
}

impl Engine {
    pub fn new(ctx: Arc<RunContext>, config: EngineConfig) -> Self {
        Self {
            ctx,
            config,
            dispatch: Mutex::new(Dispatch::new(Vec::new())),
            task_done: Notify::new(),
            results: Mutex::new(Vec::new()),
            stop_seen: AtomicBool::new(false),
        }
    }

    /// Block while paused; report whether the caller may go on.
    ///
    /// The channel is re-read every [`PAUSE_POLL`], so a resume or stop
    /// written during a pause takes effect without waiting out the deadline.
    async fn await_go(&self) -> Go {
        let mut announced = None;
        loop {
            let now = self.ctx.clock.now();
            match self.ctx.control.read_state().await.effective(now) {
                ControlSignal::Running => return Go::Run,
                ControlSignal::StopRequested => {
                    if !self.stop_seen.swap(true, Ordering::SeqCst) {
                        info!("Stop requested; finishing in-flight tasks");
                    }
                    return Go::Stop;
                }
                ControlSignal::PausedUntil(until) => {
                    if announced != Some(until) {
                        info!(until = %until, "Paused");
                        announced = Some(until);
                    }
                    let wake = now
                        .checked_add_signed(to_chrono(PAUSE_POLL))
                        .map_or(until, |poll| poll.min(until));
                    self.ctx.clock.sleep_until(wake).await;
                }
            }
        }
    }

    async fn next_task(&self) -> Option<(usize, CrawlTask)> {
        let delay = to_chrono(self.config.category_delay);
        loop {
            let notified = self.task_done.notified();
            let next = self.dispatch.lock().next(self.ctx.clock.now(), delay);
            match next {
                Next::Task(idx, task) => return Some((idx, task)),
                Next::Drained => return None,
                Next::WaitUntil(release) => {
                    info!(release = %release, "Category finished; waiting before the next one");
                    self.ctx.clock.sleep_until(release).await;
                }
                Next::WaitForCategory => notified.await,
            }
        }
    }

    #[instrument(level = "debug", skip(self))]
    async fn worker(&self, id: usize) {
        loop {
            if let Go::Stop = self.await_go().await {
                break;
            }
            let Some((idx, task)) = self.next_task().await else {
                break;
            };

            let result = self.run_task(task).await;
            self.dispatch
                .lock()
                .finish(&result.task, self.ctx.clock.now());
            self.task_done.notify_waiters();
            self.ctx.progress.record_task(&result.outcome);
            if let Some(slot) = self.results.lock().get_mut(idx) {
                *slot = Some(result);
            }
        }
        debug!(id, "Worker exiting");
    }

    /// Drive one task through its state machine to a final result.
    #[instrument(level = "info", skip_all, fields(task = %task))]
    async fn run_task(&self, task: CrawlTask) -> CrawlTaskResult {
        let url = match self.ctx.parser.listing_url(&task.category, task.page) {
            Ok(url) => url,
            Err(e) => {
                return CrawlTaskResult {
                    task,
                    outcome: TaskOutcome::Failed(e.to_string()),
                    attempts: 0,
                };
            }
        };

        let policy = &self.config.retry;
        let mut state = TaskState::Pending;
        let mut outcome = None;

        while outcome.is_none() {
            if let Go::Stop = self.await_go().await {
                state = state.skip(STOPPED);
                outcome = Some(TaskOutcome::Skipped(STOPPED.to_string()));
                break;
            }

            self.ctx.limiter.acquire(&task.category).await;
            state = state.begin_attempt();

            match self.ctx.fetcher.fetch(&url).await {
                Ok(body) => {
                    let result = self.process_body(&task, &body).await;
                    state = match &result {
                        TaskOutcome::Success(_) => state.succeed(),
                        TaskOutcome::Failed(reason) => state.fail(reason.clone()),
                        TaskOutcome::Skipped(reason) => state.skip(reason.clone()),
                    };
                    outcome = Some(result);
                }
                Err(e) => {
                    state = state.fetch_failed(&e, policy, self.ctx.clock.now());
                    match &state {
                        TaskState::Retrying {
                            attempt,
                            next_deadline,
                        } => {
                            warn!(attempt, next = %next_deadline, error = %e, "Fetch failed; will retry");
                            self.ctx.clock.sleep_until(*next_deadline).await;
                        }
                        TaskState::Failed { attempts, reason } => {
                            error!(attempts, reason = %reason, "Task failed");
                            outcome = Some(TaskOutcome::Failed(reason.clone()));
                        }
                        _ => {}
                    }
                }
            }
        }

        debug_assert!(state.is_terminal());
        let outcome = outcome.unwrap_or_else(|| TaskOutcome::Failed("no outcome".to_string()));
        if outcome.is_success() {
            if let Err(e) = self.ctx.store.record_page_completed(&task).await {
                warn!(error = %e, "Could not record page completion");
            }
        }
        CrawlTaskResult {
            task,
            outcome,
            attempts: state.attempts(),
        }
    }

    /// Parse, validate, deduplicate and persist one listing body.
    async fn process_body(&self, task: &CrawlTask, body: &str) -> TaskOutcome {
        let raws = match self.ctx.parser.parse_listing(body) {
            Ok(raws) => raws,
            Err(e) => {
                warn!(error = %e, body = %truncate_for_log(body, 120), "Listing not parseable; skipping page");
                return TaskOutcome::Skipped(e.to_string());
            }
        };

        let rules = self.ctx.parser.normalize_rules();
        let mut page = PageYield::default();

        for raw in raws {
            let article = match raw.into_article(task, &rules) {
                Ok(article) => article,
                Err(v) => {
                    debug!(reason = v.reason(), error = %v, "Record discarded");
                    self.ctx.progress.record_skipped(v.reason());
                    page.discarded += 1;
                    continue;
                }
            };

            match self.persist(&article).await {
                Ok(true) => {
                    self.ctx.progress.record_persisted(&article.category);
                    page.persisted.push(article.canonical_url);
                }
                Ok(false) => {
                    self.ctx.progress.record_skipped(DUPLICATE);
                    page.duplicates += 1;
                }
                Err(e) => {
                    error!(url = %article.canonical_url, error = %e, "Store write failed; failing page");
                    return TaskOutcome::Failed(format!("store: {e}"));
                }
            }
        }

        info!(
            persisted = page.persisted.len(),
            duplicates = page.duplicates,
            discarded = page.discarded,
            "Page processed"
        );
        TaskOutcome::Success(page)
    }

    /// `Ok(true)` when the article was newly stored.
    async fn persist(&self, article: &Article) -> Result<bool, StoreError> {
        if self.ctx.dedup.admit(article).await? == Admission::Duplicate {
            return Ok(false);
        }
        match self.ctx.store.upsert_article(article).await {
            Ok(UpsertOutcome::Inserted) => Ok(true),
            Ok(UpsertOutcome::AlreadyExists) => Ok(false),
            Err(e) => {
                self.ctx.dedup.release(&article.canonical_url);
                Err(e)
            }
        }
    }

    /// Execute `plan` to completion (or until stopped) and report.
    #[instrument(level = "info", skip_all, fields(source = %plan.source, tasks = plan.tasks.len()))]
    pub async fn run(&self, plan: EnumerationPlan) -> RunReport {
        let started_at = self.ctx.clock.now();
        let total = plan.tasks.len();
        *self.results.lock() = vec![None; total];
        *self.dispatch.lock() = Dispatch::new(plan.tasks.clone());

        let workers = self.config.workers.max(1).min(total.max(1));
        info!(workers, "Starting workers");
        join_all((0..workers).map(|id| self.worker(id))).await;

        // Whatever is still queued was never dispatched.
        let leftovers: Vec<(usize, CrawlTask)> = self.dispatch.lock().pending.drain(..).collect();
        if !leftovers.is_empty() {
            info!(count = leftovers.len(), "Undispatched tasks reported as skipped");
        }
        {
            let mut results = self.results.lock();
            for (idx, task) in leftovers {
                let outcome = TaskOutcome::Skipped(STOPPED.to_string());
                self.ctx.progress.record_task(&outcome);
                if let Some(slot) = results.get_mut(idx) {
                    *slot = Some(CrawlTaskResult {
                        task,
                        outcome,
                        attempts: 0,
                    });
                }
            }
        }

        let results: Vec<CrawlTaskResult> = self.results.lock().drain(..).flatten().collect();
        self.clear_finished_categories(&plan, &results).await;

        let report = RunReport {
            source: plan.source,
            started_at,
            finished_at: self.ctx.clock.now(),
            persisted_per_category: self.ctx.progress.counters().persisted_per_category,
            results,
            probe_failures: plan.probe_failures,
            stopped: self.stop_seen.load(Ordering::SeqCst),
        };
        info!(
            succeeded = report.tasks_succeeded(),
            failed = report.tasks_failed(),
            skipped = report.tasks_skipped(),
            persisted = report.articles_persisted(),
            "Run finished"
        );
        report
    }

    /// Categories whose every task succeeded in this run start over next time.
    async fn clear_finished_categories(&self, plan: &EnumerationPlan, results: &[CrawlTaskResult]) {
        for category in &plan.categories {
            let mut outcomes = results
                .iter()
                .filter(|r| r.task.category == category.category)
                .map(|r| r.outcome.is_success())
                .peekable();
            if outcomes.peek().is_none() || !outcomes.all(|ok| ok) {
                continue;
            }
            match self
                .ctx
                .store
                .clear_progress(&plan.source, &category.category)
                .await
            {
                Ok(()) => debug!(category = %category.category, "Category complete; progress cleared"),
                Err(e) => warn!(category = %category.category, error = %e, "Could not clear progress"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::control::MemoryControlChannel;
    use crate::enumerate::{EnumerationRequest, enumerate};
    use crate::error::FetchError;
    use crate::fetch::ScriptedFetcher;
    use crate::scrapers::sisaon::{SisaonParser, fixtures};
    use crate::store::testing::FlakyStore;
    use crate::store::{RetryStore, SqliteStore};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use chrono::TimeZone;
    use url::Url;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 6, 0, 0, 0).unwrap()
    }

    /// Records when each fetch happened and can fire a control signal on the N-th fetch.
    struct Observed {
        inner: Arc<ScriptedFetcher>,
        clock: Arc<ManualClock>,
        times: Mutex<Vec<DateTime<Utc>>>,
        trigger: Option<(usize, ControlSignal, Arc<MemoryControlChannel>)>,
    }

    #[async_trait]
    impl Fetcher for Observed {
        async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
            let n = {
                let mut times = self.times.lock();
                times.push(self.clock.now());
                times.len()
            };
            if let Some((at, signal, control)) = &self.trigger {
                if n == *at {
                    control.write_state(*signal).await.unwrap();
                }
            }
            self.inner.fetch(url).await
        }
    }

    /// Reports a pause for the first `paused_reads` reads, then running.
    struct ResumedMidPause {
        reads: AtomicUsize,
        paused_reads: usize,
        until: DateTime<Utc>,
    }

    #[async_trait]
    impl ControlChannel for ResumedMidPause {
        async fn read_state(&self) -> ControlSignal {
            if self.reads.fetch_add(1, Ordering::SeqCst) < self.paused_reads {
                ControlSignal::PausedUntil(self.until)
            } else {
                ControlSignal::Running
            }
        }

        async fn write_state(&self, _signal: ControlSignal) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct Harness {
        clock: Arc<ManualClock>,
        scripted: Arc<ScriptedFetcher>,
        store: Arc<SqliteStore>,
        control: Arc<MemoryControlChannel>,
        parser: Arc<SisaonParser>,
    }

    impl Harness {
        async fn new() -> Self {
            let clock = Arc::new(ManualClock::new(start()));
            Self {
                store: Arc::new(
                    SqliteStore::in_memory()
                        .await
                        .unwrap()
                        .with_clock(clock.clone()),
                ),
                clock,
                scripted: Arc::new(ScriptedFetcher::new()),
                control: Arc::new(MemoryControlChannel::default()),
                parser: Arc::new(SisaonParser::new()),
            }
        }

        fn url(&self, category: &str, page: u32) -> String {
            self.parser.listing_url(category, page).unwrap().to_string()
        }

        /// Serve `pages` listing pages for `category`, `per_page` valid articles each.
        fn serve(&self, category: &str, base: u32, pages: u32, per_page: u32) {
            for page in 1..=pages {
                let items: Vec<(u32, String)> = (0..per_page)
                    .map(|i| (base + page * 100 + i, format!("기사 {category} {page}-{i}")))
                    .collect();
                let rows: Vec<(u32, &str, &str, &str)> = items
                    .iter()
                    .map(|(id, title)| (*id, title.as_str(), "김철수 기자", "2025.05.05 10:00"))
                    .collect();
                self.scripted
                    .respond(&self.url(category, page), Ok(fixtures::listing(&rows, pages)));
            }
        }

        fn observed(&self, trigger: Option<(usize, ControlSignal)>) -> Arc<Observed> {
            Arc::new(Observed {
                inner: self.scripted.clone(),
                clock: self.clock.clone(),
                times: Mutex::new(Vec::new()),
                trigger: trigger.map(|(n, s)| (n, s, self.control.clone())),
            })
        }

        fn engine(&self, fetcher: Arc<dyn Fetcher>, workers: usize, category_delay: Duration) -> Engine {
            self.engine_with(
                self.store.clone(),
                self.control.clone(),
                fetcher,
                workers,
                category_delay,
            )
        }

        fn engine_with(
            &self,
            store: Arc<dyn Store>,
            control: Arc<dyn ControlChannel>,
            fetcher: Arc<dyn Fetcher>,
            workers: usize,
            category_delay: Duration,
        ) -> Engine {
            let ctx = Arc::new(RunContext {
                parser: self.parser.clone(),
                fetcher,
                store: store.clone(),
                control,
                clock: self.clock.clone(),
                limiter: RateLimiter::new(
                    Duration::from_millis(100),
                    Duration::ZERO,
                    self.clock.clone(),
                ),
                dedup: DedupGate::new(store.clone()),
                progress: Arc::new(ProgressTracker::new(
                    store,
                    self.clock.clone(),
                    Duration::from_secs(300),
                    10,
                    0,
                )),
            });
            Engine::new(
                ctx,
                EngineConfig {
                    workers,
                    retry: RetryPolicy {
                        jitter: Duration::ZERO,
                        ..RetryPolicy::fetch(2)
                    },
                    category_delay,
                },
            )
        }

        async fn plan(&self, categories: &[&str], resume: bool) -> EnumerationPlan {
            let limiter = RateLimiter::new(Duration::ZERO, Duration::ZERO, self.clock.clone());
            enumerate(
                self.parser.as_ref(),
                self.scripted.as_ref(),
                self.store.as_ref(),
                &limiter,
                &EnumerationRequest {
                    categories: categories.iter().map(|c| c.to_string()).collect(),
                    resume,
                    ..Default::default()
                },
            )
            .await
            .unwrap()
        }

        async fn stored(&self) -> u64 {
            self.store
                .read_corpus_stats(start(), 0)
                .await
                .unwrap()
                .total_articles
        }
    }

    #[tokio::test]
    async fn test_every_task_reported_exactly_once() {
        let h = Harness::new().await;
        h.serve("정치", 0, 3, 2);
        h.serve("경제", 10_000, 2, 2);
        let plan = h.plan(&["정치", "경제"], false).await;
        assert_eq!(plan.tasks.len(), 5);

        let report = h
            .engine(h.scripted.clone(), 2, Duration::ZERO)
            .run(plan.clone())
            .await;
        assert_eq!(report.results.len(), 5);
        let mut seen: Vec<CrawlTask> = report.results.iter().map(|r| r.task.clone()).collect();
        seen.sort();
        let mut expected = plan.tasks.clone();
        expected.sort();
        assert_eq!(seen, expected);
        assert!(report.results.iter().all(|r| r.outcome.is_success()));
        assert_eq!(report.articles_persisted(), 10);
        assert_eq!(h.stored().await, 10);
        assert_eq!(report.summary().status, "completed");
    }

    #[tokio::test]
    async fn test_invalid_records_are_discarded_individually() {
        let h = Harness::new().await;
        let mut rows: Vec<(u32, String, &str, &str)> = (0..18)
            .map(|i| (100 + i, format!("기사 {i}"), "김철수 기자", "2025.05.05 10:00"))
            .collect();
        rows.push((200, "저자 없음".into(), "", "2025.05.05 10:00"));
        rows.push((201, "날짜 없음".into(), "이영희 기자", "어제"));
        let rows: Vec<(u32, &str, &str, &str)> =
            rows.iter().map(|(i, t, a, d)| (*i, t.as_str(), *a, *d)).collect();
        h.scripted
            .respond(&h.url("정치", 1), Ok(fixtures::listing(&rows, 1)));

        let plan = h.plan(&["정치"], false).await;
        let engine = h.engine(h.scripted.clone(), 1, Duration::ZERO);
        let report = engine.run(plan).await;

        match &report.results[0].outcome {
            TaskOutcome::Success(page) => {
                assert_eq!(page.persisted.len(), 18);
                assert_eq!(page.discarded, 2);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(h.stored().await, 18);
        let counters = engine.ctx.progress.counters();
        assert_eq!(counters.articles_skipped.get("missing_author"), Some(&1));
        assert_eq!(counters.articles_skipped.get("bad_timestamp"), Some(&1));
    }

    #[tokio::test]
    async fn test_second_run_persists_nothing_new() {
        let h = Harness::new().await;
        h.serve("정치", 0, 3, 4);

        let first = h
            .engine(h.scripted.clone(), 3, Duration::ZERO)
            .run(h.plan(&["정치"], true).await)
            .await;
        assert_eq!(first.articles_persisted(), 12);

        let second = h
            .engine(h.scripted.clone(), 3, Duration::ZERO)
            .run(h.plan(&["정치"], true).await)
            .await;
        assert_eq!(second.results.len(), 3);
        assert_eq!(second.articles_persisted(), 0);
        assert_eq!(h.stored().await, 12);
        let duplicates: usize = second
            .results
            .iter()
            .map(|r| match &r.outcome {
                TaskOutcome::Success(p) => p.duplicates,
                _ => 0,
            })
            .sum();
        assert_eq!(duplicates, 12);
    }

    #[tokio::test]
    async fn test_stop_skips_undispatched_and_resume_continues() {
        let h = Harness::new().await;
        h.serve("정치", 0, 5, 2);
        let fetcher = h.observed(Some((2, ControlSignal::StopRequested)));

        let report = h
            .engine(fetcher.clone(), 1, Duration::ZERO)
            .run(h.plan(&["정치"], true).await)
            .await;
        assert!(report.stopped);
        let outcomes: Vec<&TaskOutcome> = report.results.iter().map(|r| &r.outcome).collect();
        assert!(outcomes[0].is_success());
        assert!(outcomes[1].is_success());
        for o in &outcomes[2..] {
            assert_eq!(**o, TaskOutcome::Skipped(STOPPED.to_string()));
        }
        assert_eq!(report.tasks_failed(), 0);
        assert_eq!(report.summary().status, "stopped");

        // Resume after the operator clears the stop.
        h.control.write_state(ControlSignal::Running).await.unwrap();
        let plan = h.plan(&["정치"], true).await;
        let pages: Vec<u32> = plan.tasks.iter().map(|t| t.page).collect();
        assert_eq!(pages, vec![3, 4, 5]);

        let resumed = h.engine(h.scripted.clone(), 2, Duration::ZERO).run(plan).await;
        assert_eq!(resumed.articles_persisted(), 6);
        assert_eq!(h.stored().await, 10);
        // Fully walked, so the next run starts from the top again.
        assert!(h.store.completed_pages("sisaon", "정치").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pause_delays_dispatch_without_losing_tasks() {
        let h = Harness::new().await;
        h.serve("정치", 0, 3, 1);
        let plan = h.plan(&["정치"], false).await;
        let until = start() + chrono::Duration::seconds(300);
        h.control
            .write_state(ControlSignal::PausedUntil(until))
            .await
            .unwrap();

        let fetcher = h.observed(None);
        let report = h.engine(fetcher.clone(), 2, Duration::ZERO).run(plan).await;
        assert_eq!(report.tasks_succeeded(), 3);
        let times = fetcher.times.lock().clone();
        assert_eq!(times.len(), 3);
        assert!(times.iter().all(|t| *t >= until));
    }

    #[tokio::test]
    async fn test_resume_during_pause_is_honoured_early() {
        let h = Harness::new().await;
        h.serve("정치", 0, 1, 1);
        let plan = h.plan(&["정치"], false).await;
        let until = start() + chrono::Duration::hours(1);
        let control = Arc::new(ResumedMidPause {
            reads: AtomicUsize::new(0),
            paused_reads: 5,
            until,
        });

        let fetcher = h.observed(None);
        let report = h
            .engine_with(h.store.clone(), control, fetcher.clone(), 1, Duration::ZERO)
            .run(plan)
            .await;
        assert_eq!(report.tasks_succeeded(), 1);
        let times = fetcher.times.lock().clone();
        assert_eq!(times.len(), 1);
        assert!(times[0] < until);
        assert!(times[0] - start() <= chrono::Duration::seconds(10));
    }

    #[tokio::test]
    async fn test_store_outage_fails_page_and_releases_claims() {
        let h = Harness::new().await;
        h.serve("정치", 0, 1, 2);
        let plan = h.plan(&["정치"], false).await;

        let store = Arc::new(RetryStore::new(
            FlakyStore::new().await,
            RetryPolicy {
                jitter: Duration::ZERO,
                ..RetryPolicy::store()
            },
            h.clock.clone(),
        ));
        store.inner().fail_next_writes(100);
        let engine = h.engine_with(
            store.clone(),
            h.control.clone(),
            h.scripted.clone(),
            1,
            Duration::ZERO,
        );

        let report = engine.run(plan.clone()).await;
        assert_eq!(
            report.results[0].outcome,
            TaskOutcome::Failed("store: store unavailable: injected write failure".into())
        );
        // One upsert plus three store-level retries, then the page gives up.
        assert_eq!(store.inner().write_attempts(), 4);
        assert_eq!(report.articles_persisted(), 0);
        assert_eq!(report.summary().status, "partial");

        // Same run context, so a claim left behind would turn these into duplicates.
        store.inner().fail_next_writes(0);
        let retried = engine.run(plan).await;
        assert!(retried.results[0].outcome.is_success());
        assert_eq!(retried.articles_persisted(), 2);
        assert_eq!(
            store
                .read_corpus_stats(start(), 0)
                .await
                .unwrap()
                .total_articles,
            2
        );
    }

    #[tokio::test]
    async fn test_transient_failures_retry_with_backoff() {
        let h = Harness::new().await;
        h.serve("정치", 0, 1, 2);
        let url = h.url("정치", 1);
        let plan = h.plan(&["정치"], false).await;

        // Re-script: two 503s, then the page.
        let scripted = Arc::new(ScriptedFetcher::new());
        let busy = || {
            Err(FetchError::Transient {
                url: url.clone(),
                reason: "HTTP 503".into(),
            })
        };
        scripted.respond(&url, busy());
        scripted.respond(&url, busy());
        scripted.respond(&url, Ok(fixtures::listing(&[(1, "기사", "김 기자", "2025.05.05 10:00")], 1)));

        let before = h.clock.now();
        let report = h.engine(scripted.clone(), 1, Duration::ZERO).run(plan).await;
        assert!(report.results[0].outcome.is_success());
        assert_eq!(report.results[0].attempts, 3);
        assert_eq!(scripted.call_count(&url), 3);
        // 1s + 2s of virtual backoff.
        assert!(h.clock.now() - before >= chrono::Duration::seconds(3));
    }

    #[tokio::test]
    async fn test_exhausted_and_permanent_failures_are_isolated() {
        let h = Harness::new().await;
        h.serve("정치", 0, 3, 1);
        let plan = h.plan(&["정치"], false).await;

        let scripted = Arc::new(ScriptedFetcher::new());
        let p1 = h.url("정치", 1);
        let p2 = h.url("정치", 2);
        let p3 = h.url("정치", 3);
        scripted.respond(&p1, Err(FetchError::Timeout { url: p1.clone() }));
        scripted.respond(
            &p2,
            Err(FetchError::Permanent {
                url: p2.clone(),
                reason: "HTTP 404".into(),
            }),
        );
        scripted.respond(&p3, Ok(fixtures::listing(&[(7, "기사", "김 기자", "2025.05.05 10:00")], 3)));

        let report = h.engine(scripted.clone(), 2, Duration::ZERO).run(plan).await;
        assert!(matches!(report.results[0].outcome, TaskOutcome::Failed(_)));
        assert_eq!(report.results[0].attempts, 3);
        assert!(matches!(report.results[1].outcome, TaskOutcome::Failed(_)));
        assert_eq!(report.results[1].attempts, 1);
        assert!(report.results[2].outcome.is_success());
        assert_eq!(report.failed_categories(), vec!["정치".to_string()]);
        assert_eq!(report.summary().status, "partial");
        // Failed pages keep their progress open for the next run.
        assert_eq!(
            h.store.completed_pages("sisaon", "정치").await.unwrap(),
            vec![3]
        );
    }

    #[tokio::test]
    async fn test_parse_failure_skips_without_retry() {
        let h = Harness::new().await;
        h.serve("정치", 0, 1, 1);
        let plan = h.plan(&["정치"], false).await;

        let scripted = Arc::new(ScriptedFetcher::new());
        let url = h.url("정치", 1);
        scripted.respond(&url, Ok("<html><body>점검 중</body></html>".into()));
        let report = h.engine(scripted.clone(), 1, Duration::ZERO).run(plan).await;
        assert!(matches!(report.results[0].outcome, TaskOutcome::Skipped(_)));
        assert_eq!(report.results[0].attempts, 1);
        assert_eq!(scripted.call_count(&url), 1);
    }

    #[tokio::test]
    async fn test_category_delay_separates_categories() {
        let h = Harness::new().await;
        h.serve("정치", 0, 2, 1);
        h.serve("경제", 10_000, 2, 1);
        let plan = h.plan(&["정치", "경제"], false).await;

        let fetcher = h.observed(None);
        let report = h
            .engine(fetcher.clone(), 2, Duration::from_secs(10))
            .run(plan)
            .await;
        assert_eq!(report.tasks_succeeded(), 4);

        let times = fetcher.times.lock().clone();
        let last_politics = times[0].max(times[1]);
        assert!(times[2] >= last_politics + chrono::Duration::seconds(10));
        assert!(times[3] >= last_politics + chrono::Duration::seconds(10));
    }

    #[test]
    fn test_dispatch_waits_for_previous_category() {
        let mut d = Dispatch::new(vec![
            CrawlTask::new("s", "a", 1),
            CrawlTask::new("s", "b", 1),
        ]);
        let delay = chrono::Duration::seconds(5);
        let Next::Task(_, first) = d.next(start(), delay) else {
            panic!("expected a task");
        };
        assert!(matches!(d.next(start(), delay), Next::WaitForCategory));
        d.finish(&first, start());
        assert!(matches!(d.next(start(), delay), Next::WaitUntil(t) if t == start() + delay));
        assert!(matches!(d.next(start() + delay, delay), Next::Task(_, _)));
        assert!(matches!(d.next(start() + delay, delay), Next::Drained));
    }
}
