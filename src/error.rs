//! Error taxonomy for the crawl pipeline.
//!
//! Every component reports failures through one of the enums below so the
//! engine can decide, per error, whether to retry, skip, discard or give up:
//!
//! | Error | Engine reaction |
//! |-------|-----------------|
//! | [`FetchError::Transient`] / [`FetchError::Timeout`] | retried with backoff, then `Failed` |
//! | [`FetchError::Permanent`] | `Failed` immediately |
//! | [`ParseError`] | task `Skipped`, never retried |
//! | [`ValidationError`] | single record discarded, task still succeeds |
//! | [`StoreError`] | retried by the store policy, then `Failed` (writes) or degraded (reads) |
//! | [`ConfigError`] | fatal for the whole run |

use thiserror::Error;

/// Failure while fetching a listing page.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Network hiccup, connection reset or a 5xx/408/429 response.
    #[error("transient fetch failure for {url}: {reason}")]
    Transient { url: String, reason: String },

    /// The request exceeded the per-request timeout.
    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// A failure that will not improve on retry (bad URL, 404, 403, ...).
    #[error("permanent fetch failure for {url}: {reason}")]
    Permanent { url: String, reason: String },
}

impl FetchError {
    /// Whether the engine should schedule another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. } | FetchError::Timeout { .. })
    }

    /// Classify an HTTP status that was not a success.
    pub fn from_status(url: &str, status: reqwest::StatusCode) -> Self {
        let reason = format!("HTTP {status}");
        if status.is_server_error()
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            FetchError::Transient {
                url: url.to_string(),
                reason,
            }
        } else {
            FetchError::Permanent {
                url: url.to_string(),
                reason,
            }
        }
    }

    /// Classify a transport-level `reqwest` error.
    pub fn from_reqwest(url: &str, e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            return FetchError::Timeout {
                url: url.to_string(),
            };
        }
        if let Some(status) = e.status() {
            return FetchError::from_status(url, status);
        }
        if e.is_builder() {
            return FetchError::Permanent {
                url: url.to_string(),
                reason: e.to_string(),
            };
        }
        FetchError::Transient {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

/// The page body could not be understood as a listing.
#[derive(Debug, Clone, Error)]
#[error("could not parse listing: {0}")]
pub struct ParseError(pub String);

/// Why a single raw record was rejected before persistence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("record has no title")]
    MissingTitle,
    #[error("record has no author")]
    MissingAuthor,
    #[error("record has no URL")]
    MissingUrl,
    #[error("record URL is not valid: {0}")]
    InvalidUrl(String),
    #[error("published timestamp is not parseable: {0:?}")]
    UnparseableTimestamp(String),
}

impl ValidationError {
    /// Stable key used for the skipped-by-reason counters.
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::MissingTitle => "missing_title",
            ValidationError::MissingAuthor => "missing_author",
            ValidationError::MissingUrl => "missing_url",
            ValidationError::InvalidUrl(_) => "invalid_url",
            ValidationError::UnparseableTimestamp(_) => "bad_timestamp",
        }
    }
}

/// Failure talking to the persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("could not (de)serialize stored value: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether another attempt could succeed. Decode and serialization faults never will.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Database(e) => !matches!(
                e,
                sqlx::Error::RowNotFound
                    | sqlx::Error::ColumnNotFound(_)
                    | sqlx::Error::ColumnDecode { .. }
                    | sqlx::Error::Decode(_)
                    | sqlx::Error::TypeNotFound { .. }
                    | sqlx::Error::Configuration(_)
            ),
            StoreError::Unavailable(_) => true,
            StoreError::Serialization(_) => false,
        }
    }
}

/// Configuration problems detected before any task runs. The only fatal class.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no categories left to crawl")]
    NoCategories,

    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("unknown category {category:?} for source {source_id}")]
    UnknownCategory { source_id: String, category: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("could not read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Top-level error for the run entry points.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}
