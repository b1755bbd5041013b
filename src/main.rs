//! # newsdesk_crawl
//!
//! A news crawl pipeline that walks the paginated category listings of a
//! news site, extracts article records, stores each article once, and keeps
//! per-journalist aggregates that can be ranked and inspected.
//!
//! ## Features
//!
//! - Enumerates (category × page) tasks from a cheap page-count probe, with a
//!   page cap, a skip list and resume after the last completed page
//! - Bounded worker pool with global and per-category rate limits, retry with
//!   exponential backoff, and a pause between categories
//! - Stop / pause / resume through a control file, honoured between fetches
//! - Deduplication by canonical URL, backed by the store's unique key
//! - Periodic JSON stats snapshots and a final run report
//! - Journalist rankings (overall, per category, recent window) and insights
//!
//! ## Usage
//!
//! ```sh
//! newsdesk_crawl crawl -c 정치 -c 경제 --page-cap 20
//! newsdesk_crawl control pause --secs 300
//! newsdesk_crawl rank --by-category
//! newsdesk_crawl insight 김철수 --period month
//! ```
//!
//! ## Architecture
//!
//! 1. **Enumeration**: probe each category and build the ordered task list
//! 2. **Crawling**: workers fetch, parse, validate, deduplicate and store
//! 3. **Reporting**: snapshots while running, a run report at the end
//! 4. **Ranking**: read-only aggregation over the stored articles

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod clock;
mod config;
mod control;
mod dedup;
mod engine;
mod enumerate;
mod error;
mod fetch;
mod models;
mod outputs;
mod progress;
mod ranking;
mod ratelimit;
mod retry;
mod scrapers;
mod store;
mod utils;

use cli::{Cli, Command, ControlAction, CrawlArgs, InsightArgs, RankArgs, RankOutput, TrendArgs};
use clock::{Clock, SystemClock, to_chrono};
use config::RunConfig;
use control::{ControlChannel, FileControlChannel};
use dedup::DedupGate;
use engine::{Engine, RunContext};
use error::CrawlError;
use fetch::HttpFetcher;
use models::ControlSignal;
use outputs::{json, table};
use progress::{ProgressTracker, spawn_reporter};
use ranking::{Ranker, Ranking};
use ratelimit::RateLimiter;
use retry::RetryPolicy;
use store::{RetryStore, SqliteStore, Store};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    let cli = Cli::parse();
    debug!(database_url = %cli.database_url, config = ?cli.config, "Parsed CLI arguments");

    let result: Result<(), Box<dyn Error>> = match &cli.command {
        Command::Crawl(args) => crawl(&cli, args).await.map_err(Into::into),
        Command::Estimate(args) => estimate(&cli, args).await,
        Command::Rank(args) => rank(&cli, args).await,
        Command::Trend(args) => trend(&cli, args).await,
        Command::Insight(args) => insight(&cli, args).await,
        Command::Control { action } => control(&cli, *action).await,
    };

    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    let elapsed = start_time.elapsed();
    debug!(?elapsed, secs = elapsed.as_secs(), "Execution complete");
    result
}

fn run_config(cli: &Cli, args: &CrawlArgs) -> Result<RunConfig, CrawlError> {
    let config = RunConfig::load_or_default(cli.config.as_deref())?.apply(args);
    config.validate()?;
    Ok(config)
}

async fn open_store(cli: &Cli, clock: Arc<dyn Clock>) -> Result<Arc<dyn Store>, CrawlError> {
    let sqlite = SqliteStore::connect(&cli.database_url)
        .await?
        .with_clock(clock.clone());
    Ok(Arc::new(RetryStore::new(sqlite, RetryPolicy::store(), clock)))
}

#[instrument(level = "info", skip_all)]
async fn crawl(cli: &Cli, args: &CrawlArgs) -> Result<(), CrawlError> {
    let config = run_config(cli, args)?;
    info!(
        source = %config.source,
        workers = config.workers,
        request_delay_ms = config.request_delay_ms,
        resume = config.resume,
        "Crawl starting"
    );

    let parser = scrapers::parser_for(&config.source)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = open_store(cli, clock.clone()).await?;
    let fetcher = Arc::new(HttpFetcher::new(config.timeout())?);
    let control = Arc::new(FileControlChannel::new(&cli.control_file));

    if control.read_state().await == ControlSignal::StopRequested {
        warn!(path = %control.path().display(), "Clearing stop request left by an earlier run");
        control.write_state(ControlSignal::Running).await?;
    }

    let limiter = RateLimiter::new(
        config.request_delay(),
        config.category_request_delay(),
        clock.clone(),
    );
    let plan = enumerate::enumerate(
        parser.as_ref(),
        fetcher.as_ref(),
        store.as_ref(),
        &limiter,
        &config.enumeration(),
    )
    .await?;

    let progress = Arc::new(ProgressTracker::new(
        store.clone(),
        clock.clone(),
        config.snapshot_ttl(),
        config.top_n,
        config.stats_every_k,
    ));
    let ctx = Arc::new(RunContext {
        parser,
        fetcher,
        store: store.clone(),
        control: control.clone(),
        clock,
        limiter,
        dedup: DedupGate::new(store.clone()),
        progress: progress.clone(),
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reporter = spawn_reporter(
        progress,
        config.stats_path.clone(),
        config.stats_interval(),
        shutdown_rx,
    );

    // Ctrl-C behaves like `control stop`.
    let interrupt = {
        let control = control.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; finishing in-flight pages");
                if let Err(e) = control.write_state(ControlSignal::StopRequested).await {
                    error!(error = %e, "Could not record stop request");
                }
            }
        })
    };

    let report = Engine::new(ctx.clone(), config.engine()).run(plan).await;
    interrupt.abort();

    let _ = shutdown_tx.send(true);
    if let Err(e) = reporter.await {
        warn!(error = %e, "Stats reporter ended abnormally");
    }

    let (cache_hits, store_hits) = ctx.dedup.hit_counts();
    info!(cache_hits, store_hits, "Duplicate detection");

    let report_path = json::report_path(&config.stats_path);
    if let Err(e) = json::write_json(&report, &report_path).await {
        error!(path = %report_path.display(), error = %e, "Failed to write run report");
    }

    let summary = report.summary();
    if let Err(e) = store.log_crawl_run(&summary).await {
        error!(error = %e, "Failed to record crawl run");
    }

    for (category, count) in &report.persisted_per_category {
        info!(%category, count, "Articles persisted");
    }
    let failed = report.failed_categories();
    if !failed.is_empty() {
        warn!(categories = ?failed, "Categories with failures");
    }
    info!(
        status = %summary.status,
        tasks = summary.tasks_total,
        succeeded = summary.tasks_succeeded,
        failed = summary.tasks_failed,
        skipped = summary.tasks_skipped,
        articles = summary.articles_persisted,
        success_rate = report.success_rate(),
        secs = report.duration().num_seconds(),
        "Crawl finished"
    );
    Ok(())
}

#[instrument(level = "info", skip_all)]
async fn estimate(cli: &Cli, args: &CrawlArgs) -> Result<(), Box<dyn Error>> {
    let config = run_config(cli, args)?;
    let parser = scrapers::parser_for(&config.source)?;
    let categories = enumerate::resolve_categories(parser.as_ref(), &config.categories, &config.skip)?;
    let fetcher = HttpFetcher::new(config.timeout())?;
    let limiter = RateLimiter::new(
        config.request_delay(),
        config.category_request_delay(),
        Arc::new(SystemClock),
    );

    let estimates = enumerate::estimate(parser.as_ref(), &fetcher, &limiter, &categories).await;
    let mut total = 0u64;
    for (category, result) in &estimates {
        match result {
            Ok(pages) => {
                let capped = config.page_cap.map_or(*pages, |cap| (*pages).min(cap));
                total += u64::from(capped);
                if capped < *pages {
                    println!("{category}: {pages} pages (capped to {capped})");
                } else {
                    println!("{category}: {pages} pages");
                }
            }
            Err(reason) => println!("{category}: probe failed ({})", utils::truncate_for_log(reason, 120)),
        }
    }
    println!("total: {total} pages");
    Ok(())
}

/// Ranker over the configured store, with presentation defaults from the config file.
async fn ranker(cli: &Cli, output: &RankOutput, source: Option<&str>) -> Result<Ranker, Box<dyn Error>> {
    let config = RunConfig::load_or_default(cli.config.as_deref())?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = open_store(cli, clock.clone()).await?;
    let mut ranker = Ranker::new(store, clock)
        .tie_break(output.tie_break.unwrap_or(config.tie_break))
        .top_n(output.top.unwrap_or(config.top_n));
    if let Some(source) = source {
        ranker = ranker.source(source);
    }
    Ok(ranker)
}

fn print_rankings(rankings: &[Ranking], as_json: bool) -> Result<(), Box<dyn Error>> {
    if as_json {
        match rankings {
            [single] => println!("{}", serde_json::to_string_pretty(single)?),
            many => println!("{}", serde_json::to_string_pretty(many)?),
        }
        return Ok(());
    }
    for ranking in rankings {
        println!("{}", table::ranking_to_text(ranking));
    }
    Ok(())
}

#[instrument(level = "info", skip_all)]
async fn rank(cli: &Cli, args: &RankArgs) -> Result<(), Box<dyn Error>> {
    let ranker = ranker(cli, &args.output, args.source.as_deref()).await?;

    let rankings = if args.by_category {
        let config = RunConfig::load_or_default(cli.config.as_deref())?;
        let parser = scrapers::parser_for(args.source.as_deref().unwrap_or(&config.source))?;
        let mut rankings = Vec::new();
        for (category, _) in parser.categories() {
            rankings.push(ranker.rank_by_category(&category).await);
        }
        rankings
    } else if let Some(category) = &args.category {
        vec![ranker.rank_by_category(category).await]
    } else {
        vec![ranker.rank().await]
    };

    print_rankings(&rankings, args.output.json)
}

#[instrument(level = "info", skip_all, fields(days = args.days))]
async fn trend(cli: &Cli, args: &TrendArgs) -> Result<(), Box<dyn Error>> {
    let ranker = ranker(cli, &args.output, args.source.as_deref()).await?;
    let ranking = ranker.trend(args.days).await;
    print_rankings(&[ranking], args.output.json)
}

#[instrument(level = "info", skip_all, fields(name = %args.name))]
async fn insight(cli: &Cli, args: &InsightArgs) -> Result<(), Box<dyn Error>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = open_store(cli, clock.clone()).await?;
    let ranker = Ranker::new(store, clock);

    match ranker.insight(&args.name, &args.source, args.period).await? {
        Some(insight) if args.json => println!("{}", serde_json::to_string_pretty(&insight)?),
        Some(insight) => println!("{}", table::insight_to_text(&insight)),
        None => println!("No journalist named {} at {}", args.name, args.source),
    }
    Ok(())
}

#[instrument(level = "info", skip(cli))]
async fn control(cli: &Cli, action: ControlAction) -> Result<(), Box<dyn Error>> {
    let channel = FileControlChannel::new(&cli.control_file);
    let signal = match action {
        ControlAction::Stop => ControlSignal::StopRequested,
        ControlAction::Pause { secs } => {
            let until = SystemClock.now() + to_chrono(std::time::Duration::from_secs(secs));
            ControlSignal::PausedUntil(until)
        }
        ControlAction::Resume => ControlSignal::Running,
        ControlAction::Status => {
            let state = channel.read_state().await;
            println!("{}", state.effective(SystemClock.now()));
            return Ok(());
        }
    };
    channel.write_state(signal).await?;
    info!(path = %channel.path().display(), %signal, "Control signal written");
    println!("{signal}");
    Ok(())
}
