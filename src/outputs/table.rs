//! Plain-text rendering of rankings and insights for the terminal.
//!
//! ```text
//! Journalist ranking: overall (12 journalists analyzed)
//!
//!      #  Journalist      Source    Articles  Last article      Main category
//!   🥇  1  김철수          sisaon           3  2025-05-05 10:00  정치 (+1)
//! ```

use chrono::{DateTime, Utc};
use std::fmt::{self, Write};

use crate::ranking::{Insight, RankScope, Ranking};

const MEDALS: [&str; 3] = ["🥇", "🥈", "🥉"];
const BAR_WIDTH: u64 = 30;

fn when(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Left-align `s` in `width` columns, counting chars.
fn pad(s: &str, width: usize) -> String {
    let len = s.chars().count();
    format!("{s}{}", " ".repeat(width.saturating_sub(len)))
}

fn title(scope: &RankScope) -> String {
    match scope {
        RankScope::Overall => "overall".to_string(),
        RankScope::Category { category } => format!("category {category}"),
        RankScope::Trend { window_days, since } => format!(
            "last {window_days} days (since {})",
            since.format("%Y-%m-%d %H:%M UTC")
        ),
    }
}

fn write_ranking(out: &mut String, ranking: &Ranking) -> fmt::Result {
    writeln!(
        out,
        "Journalist ranking: {} ({} journalists analyzed)",
        title(&ranking.scope),
        ranking.journalists_analyzed
    )?;
    if ranking.degraded {
        writeln!(out, "  ! store unavailable, nothing could be ranked")?;
    }
    if ranking.entries.is_empty() {
        writeln!(out, "\n  (no articles in scope)")?;
        return Ok(());
    }

    let name_w = ranking
        .entries
        .iter()
        .map(|e| e.name.chars().count())
        .max()
        .unwrap_or(0)
        .max("Journalist".len());

    writeln!(out)?;
    writeln!(
        out,
        "     #  {}  Source    Articles  Last article      Main category",
        pad("Journalist", name_w)
    )?;
    for entry in &ranking.entries {
        let medal = MEDALS.get(entry.rank.wrapping_sub(1)).copied().unwrap_or("  ");
        let category = match &entry.main_category {
            Some(main) if entry.category_count > 1 => {
                format!("{main} (+{})", entry.category_count - 1)
            }
            Some(main) => main.clone(),
            None => "-".to_string(),
        };
        writeln!(
            out,
            "  {medal} {:>2}  {}  {}  {:>8}  {}  {category}",
            entry.rank,
            pad(&entry.name, name_w),
            pad(&entry.source, 8),
            entry.count,
            pad(&when(entry.last_article_at), 16),
        )?;
    }
    Ok(())
}

fn write_insight(out: &mut String, insight: &Insight) -> fmt::Result {
    let j = &insight.journalist;
    writeln!(out, "{} ({})", j.name, j.source)?;
    writeln!(out, "  Articles:       {}", j.total_articles)?;
    writeln!(out, "  First article:  {}", when(j.first_article_at))?;
    writeln!(out, "  Last article:   {}", when(j.last_article_at))?;
    match &insight.main_category {
        Some(main) => writeln!(
            out,
            "  Main category:  {} ({} articles, {:.1}%)",
            main.name, main.count, main.ratio
        )?,
        None => writeln!(out, "  Main category:  -")?,
    }
    writeln!(out, "  Categories:     {}", insight.categories.len())?;
    for share in &insight.categories {
        writeln!(
            out,
            "    {}  {:>5}  {:>5.1}%",
            pad(&share.name, 12),
            share.count,
            share.ratio
        )?;
    }

    if insight.histogram.is_empty() {
        return Ok(());
    }
    writeln!(out, "\n  Activity by {:?}:", insight.period)?;
    let max = insight.histogram.iter().map(|b| b.count).max().unwrap_or(1).max(1);
    for bucket in &insight.histogram {
        let bar = (bucket.count * BAR_WIDTH).div_ceil(max) as usize;
        writeln!(
            out,
            "    {}  {:>4}  {}",
            pad(&bucket.bucket, 10),
            bucket.count,
            "█".repeat(bar)
        )?;
    }
    Ok(())
}

pub fn ranking_to_text(ranking: &Ranking) -> String {
    let mut out = String::new();
    match write_ranking(&mut out, ranking) {
        Ok(()) => out,
        Err(_) => String::new(),
    }
}

pub fn insight_to_text(insight: &Insight) -> String {
    let mut out = String::new();
    match write_insight(&mut out, insight) {
        Ok(()) => out,
        Err(_) => String::new(),
    }
}
