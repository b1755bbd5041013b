//! Output generation for monitors and operators.
//!
//! # Submodules
//!
//! - [`json`]: atomic JSON artifacts (stats snapshot, run report, `--json` output)
//! - [`table`]: aligned text tables for rankings and insights
//!
//! # Output Structure
//!
//! ```text
//! stats_path                 # StatsSnapshot, rewritten while crawling
//! <stem>.report.json         # RunReport, written when the crawl ends
//! ```

pub mod json;
pub mod table;
