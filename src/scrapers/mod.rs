//! Page parsers: the site-specific half of the crawler.
//!
//! The pipeline never looks at markup itself. Each news source provides a
//! [`PageParser`] that knows how to address the source's listing pages, how to
//! turn a listing body into [`RawArticle`]s, and how to read the pagination.
//! Parsers are selected by source identifier through [`parser_for`].
//!
//! # Supported Sources
//!
//! | Source id | Module | Notes |
//! |-----------|--------|-------|
//! | `sisaon` | [`sisaon`] | Sisaon news section listings (`view_type=sm`) |

use chrono::{FixedOffset, Offset, Utc};
use std::sync::Arc;
use url::Url;

use crate::error::{ConfigError, ParseError};
use crate::models::{NormalizeRules, RawArticle};

pub mod sisaon;

/// Capability interface implemented once per news source.
pub trait PageParser: Send + Sync {
    /// Stable identifier stored alongside every article.
    fn source_id(&self) -> &str;

    /// Categories the source offers, as `(name, code)` pairs in crawl order.
    fn categories(&self) -> Vec<(String, String)>;

    /// URL of listing page `page` (1-based) for `category` (a name from [`Self::categories`]).
    fn listing_url(&self, category: &str, page: u32) -> Result<Url, ConfigError>;

    /// Extract raw records from a listing body.
    fn parse_listing(&self, body: &str) -> Result<Vec<RawArticle>, ParseError>;

    /// Estimate the last page number from a listing body, if the pagination says.
    fn estimate_page_count(&self, body: &str) -> Option<u32>;

    /// Base URL that relative article links are resolved against.
    fn base_url(&self) -> &Url;

    /// Query parameters that identify an article; everything else is dropped.
    fn identity_params(&self) -> &[&'static str] {
        &[]
    }

    /// Offset of timestamps the source prints without one.
    fn utc_offset(&self) -> FixedOffset {
        Utc.fix()
    }

    fn normalize_rules(&self) -> NormalizeRules<'_> {
        NormalizeRules {
            base: Some(self.base_url()),
            keep_params: self.identity_params(),
            utc_offset: self.utc_offset(),
        }
    }
}

/// Look up the parser for `source_id`.
pub fn parser_for(source_id: &str) -> Result<Arc<dyn PageParser>, ConfigError> {
    match source_id {
        sisaon::SOURCE_ID => Ok(Arc::new(sisaon::SisaonParser::new())),
        other => Err(ConfigError::UnknownSource(other.to_string())),
    }
}
