//! Run configuration.
//!
//! Values come from three layers, later ones winning:
//!
//! 1. built-in defaults ([`RunConfig::default`])
//! 2. an optional YAML file (`--config` / `NEWSDESK_CONFIG`)
//! 3. command-line flags ([`RunConfig::apply`])
//!
//! ```yaml
//! source: sisaon
//! categories: [정치, 경제]
//! workers: 3
//! request_delay_ms: 1000
//! category_delay_secs: 10
//! page_cap: 20
//! skip: [자동차]
//! stats_path: ./stats.json
//! tie_break: recent_then_name
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::cli::CrawlArgs;
use crate::engine::EngineConfig;
use crate::enumerate::EnumerationRequest;
use crate::error::ConfigError;
use crate::ranking::TieBreak;
use crate::retry::RetryPolicy;

/// Upper bound for every configured delay, interval and pause: one week.
pub const MAX_DELAY_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub source: String,
    /// Empty means every category the source offers.
    pub categories: Vec<String>,
    pub workers: usize,
    pub request_delay_ms: u64,
    /// Minimum spacing between two requests of the same category.
    pub category_request_delay_ms: u64,
    pub category_delay_secs: u64,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub page_cap: Option<u32>,
    pub skip: BTreeSet<String>,
    pub resume: bool,
    pub stats_path: PathBuf,
    pub stats_interval_secs: u64,
    /// Also write a snapshot every K finished tasks; 0 disables.
    pub stats_every_k: u64,
    pub top_n: usize,
    pub snapshot_ttl_secs: u64,
    pub tie_break: TieBreak,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            source: crate::scrapers::sisaon::SOURCE_ID.to_string(),
            categories: Vec::new(),
            workers: 3,
            request_delay_ms: 1000,
            category_request_delay_ms: 0,
            category_delay_secs: 10,
            max_retries: 3,
            timeout_secs: 15,
            page_cap: None,
            skip: BTreeSet::new(),
            resume: true,
            stats_path: PathBuf::from("stats.json"),
            stats_interval_secs: 30,
            stats_every_k: 10,
            top_n: 10,
            snapshot_ttl_secs: 300,
            tie_break: TieBreak::default(),
        }
    }
}

impl RunConfig {
    /// Read a YAML file; missing keys take their defaults.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: RunConfig = serde_yaml::from_str(&raw)?;
        debug!(?config, "Loaded configuration file");
        Ok(config)
    }

    /// Defaults, or the file at `path` when one is given.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Overlay the flags that were given on the command line.
    pub fn apply(mut self, args: &CrawlArgs) -> Self {
        if let Some(source) = &args.source {
            self.source = source.clone();
        }
        if !args.categories.is_empty() {
            self.categories = args.categories.clone();
        }
        if !args.skip.is_empty() {
            self.skip.extend(args.skip.iter().cloned());
        }
        if let Some(workers) = args.workers {
            self.workers = workers;
        }
        if let Some(ms) = args.request_delay_ms {
            self.request_delay_ms = ms;
        }
        if let Some(secs) = args.category_delay_secs {
            self.category_delay_secs = secs;
        }
        if let Some(retries) = args.max_retries {
            self.max_retries = retries;
        }
        if let Some(secs) = args.timeout_secs {
            self.timeout_secs = secs;
        }
        if args.page_cap.is_some() {
            self.page_cap = args.page_cap;
        }
        if args.fresh {
            self.resume = false;
        }
        if let Some(path) = &args.stats_path {
            self.stats_path = path.clone();
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be positive".into()));
        }
        if self.stats_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "stats_interval_secs must be positive".into(),
            ));
        }
        let limits = [
            ("request_delay_ms", self.request_delay_ms / 1000),
            ("category_request_delay_ms", self.category_request_delay_ms / 1000),
            ("category_delay_secs", self.category_delay_secs),
            ("timeout_secs", self.timeout_secs),
            ("stats_interval_secs", self.stats_interval_secs),
            ("snapshot_ttl_secs", self.snapshot_ttl_secs),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, secs)| *secs > MAX_DELAY_SECS) {
            return Err(ConfigError::Invalid(format!(
                "{name} exceeds the {MAX_DELAY_SECS}s limit"
            )));
        }
        if self.page_cap == Some(0) {
            return Err(ConfigError::Invalid("page_cap must be positive".into()));
        }
        if !self.categories.is_empty() && self.categories.iter().all(|c| self.skip.contains(c)) {
            return Err(ConfigError::NoCategories);
        }
        Ok(())
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn category_request_delay(&self) -> Duration {
        Duration::from_millis(self.category_request_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            workers: self.workers,
            retry: RetryPolicy::fetch(self.max_retries),
            category_delay: Duration::from_secs(self.category_delay_secs),
        }
    }

    pub fn enumeration(&self) -> EnumerationRequest {
        EnumerationRequest {
            categories: self.categories.clone(),
            page_cap: self.page_cap,
            skip: self.skip.clone(),
            resume: self.resume,
        }
    }
}
