//! JSON artifacts for external monitors.
//!
//! Two files are produced during a crawl:
//!
//! ```text
//! stats_path                  # StatsSnapshot, rewritten on every tick
//! stats_path.with("report")   # RunReport, written once at the end
//! ```
//!
//! Both are written to a temporary sibling first and renamed into place, so a
//! monitor polling the file never reads a half-written document.

use serde::Serialize;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, instrument};

use crate::models::StatsSnapshot;
use crate::utils::ensure_writable_parent;

/// Pretty-print `value` to `path` atomically.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<(), Box<dyn Error>> {
    let json = serde_json::to_string_pretty(value)?;

    if let Err(e) = ensure_writable_parent(path).await {
        error!(error = %e, "Output directory not writable");
        return Err(e);
    }

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).await?;
    fs::rename(&tmp, path).await?;
    debug!("Wrote JSON artifact");
    Ok(())
}

pub async fn write_snapshot(snapshot: &StatsSnapshot, path: &Path) -> Result<(), Box<dyn Error>> {
    write_json(snapshot, path).await
}

/// Where the run report lands for a given snapshot path: `stats.json` -> `stats.report.json`.
pub fn report_path(stats_path: &Path) -> PathBuf {
    let stem = stats_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "stats".to_string());
    stats_path.with_file_name(format!("{stem}.report.json"))
}
