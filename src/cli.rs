//! Command-line interface definitions for newsdesk_crawl.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Global options can also be provided through environment variables.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::MAX_DELAY_SECS;
use crate::ranking::{Period, TieBreak};

/// Command-line arguments for newsdesk_crawl.
///
/// # Examples
///
/// ```sh
/// # Crawl two categories, at most 20 pages each
/// newsdesk_crawl crawl -c 정치 -c 경제 --page-cap 20
///
/// # Pause a running crawl for five minutes
/// newsdesk_crawl control pause --secs 300
///
/// # Journalists with the most articles in the last week
/// newsdesk_crawl trend --days 7
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// SQLite database holding articles, journalists and crawl progress
    #[arg(
        long,
        global = true,
        env = "NEWSDESK_DATABASE_URL",
        default_value = "sqlite://newsdesk.db"
    )]
    pub database_url: String,

    /// Optional path to a YAML run configuration
    #[arg(long, global = true, env = "NEWSDESK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Control file shared by running crawls and the `control` command
    #[arg(
        long,
        global = true,
        env = "NEWSDESK_CONTROL_FILE",
        default_value = "newsdesk.control.json"
    )]
    pub control_file: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl listing pages and store new articles
    Crawl(CrawlArgs),
    /// Probe each category and print its estimated page count
    Estimate(CrawlArgs),
    /// Rank journalists by stored article count
    Rank(RankArgs),
    /// Rank journalists by articles published in a recent window
    Trend(TrendArgs),
    /// Show one journalist's aggregate and activity
    Insight(InsightArgs),
    /// Stop, pause or resume running crawls
    Control {
        #[command(subcommand)]
        action: ControlAction,
    },
}

/// Flags that override the run configuration.
#[derive(Args, Debug, Default)]
pub struct CrawlArgs {
    /// Source id
    #[arg(short, long)]
    pub source: Option<String>,

    /// Category to crawl; repeat for several (default: all)
    #[arg(short = 'c', long = "category")]
    pub categories: Vec<String>,

    /// Category to leave out; repeat for several
    #[arg(long)]
    pub skip: Vec<String>,

    /// Concurrent workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Minimum delay between any two requests, in milliseconds
    #[arg(long)]
    pub request_delay_ms: Option<u64>,

    /// Pause between categories, in seconds
    #[arg(long)]
    pub category_delay_secs: Option<u64>,

    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Per-request timeout, in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Crawl at most this many pages per category
    #[arg(long)]
    pub page_cap: Option<u32>,

    /// Ignore recorded progress and start every category at page 1
    #[arg(long)]
    pub fresh: bool,

    /// Where the stats snapshot is written
    #[arg(long)]
    pub stats_path: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RankArgs {
    /// Only journalists of this source
    #[arg(short, long)]
    pub source: Option<String>,

    /// Count only this category's articles
    #[arg(short = 'c', long)]
    pub category: Option<String>,

    /// One ranking per category
    #[arg(long, conflicts_with = "category")]
    pub by_category: bool,

    #[command(flatten)]
    pub output: RankOutput,
}

#[derive(Args, Debug)]
pub struct TrendArgs {
    /// Window length in days, ending now
    #[arg(short, long, default_value_t = 7)]
    pub days: u32,

    #[arg(short, long)]
    pub source: Option<String>,

    #[command(flatten)]
    pub output: RankOutput,
}

/// Presentation options shared by `rank` and `trend`.
#[derive(Args, Debug)]
pub struct RankOutput {
    /// Number of journalists to list
    #[arg(short = 'n', long)]
    pub top: Option<usize>,

    /// Order among journalists with equal counts
    #[arg(long, value_enum)]
    pub tie_break: Option<TieBreak>,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct InsightArgs {
    /// Journalist name as stored
    pub name: String,

    #[arg(short, long, default_value = crate::scrapers::sisaon::SOURCE_ID)]
    pub source: String,

    /// Histogram bucket size
    #[arg(short, long, value_enum, default_value_t = Period::Week)]
    pub period: Period,

    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    /// Ask running crawls to finish in-flight pages and exit
    Stop,
    /// Hold new fetches for the given number of seconds
    Pause {
        #[arg(long, value_parser = clap::value_parser!(u64).range(..=MAX_DELAY_SECS))]
        secs: u64,
    },
    /// Clear a stop or pause
    Resume,
    /// Print the current signal
    Status,
}
