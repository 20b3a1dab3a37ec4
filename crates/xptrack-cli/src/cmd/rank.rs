use std::io::{self, Write};

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use serde::Serialize;
use xptrack_core::error::ErrorCode;
use xptrack_core::model::{SubjectId, days_before};
use xptrack_core::truerank::{RankEntry, RankError, RankPosition, Truerank};

use super::Context;
use crate::output::{CodedError, Renderable, pretty_kv, pretty_section, render_list, render_mode};

#[derive(Args, Debug)]
pub struct RankArgs {
    /// Show this subject's position instead of a page of the leaderboard.
    pub subject: Option<String>,

    /// Activity window in days.
    #[arg(long, value_name = "DAYS")]
    pub days: Option<i64>,

    /// Minimum in-window growth; subjects at or below it are not ranked.
    #[arg(long, value_name = "XP")]
    pub threshold: Option<i64>,

    /// 1-based page of the leaderboard.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub page: u32,
}

#[derive(Debug, Serialize)]
struct RankRow {
    rank: usize,
    id: SubjectId,
    name: String,
    xp: i64,
    growth: i64,
}

impl RankRow {
    fn new(rank: usize, entry: &RankEntry) -> Self {
        Self {
            rank,
            id: entry.subject.id,
            name: entry.subject.label(),
            xp: entry.xp,
            growth: entry.growth,
        }
    }
}

impl Renderable for RankRow {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "#{:<4} {:<24} {:>12} xp  (+{})",
            self.rank, self.name, self.xp, self.growth
        )
    }

    fn render_table(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}",
            self.rank, self.id, self.name, self.xp, self.growth
        )
    }

    fn table_headers() -> &'static [&'static str] {
        &["RANK", "ID", "NAME", "XP", "GROWTH"]
    }
}

#[derive(Debug, Serialize)]
struct PositionReport {
    days: i64,
    threshold: i64,
    active: usize,
    #[serde(flatten)]
    position: RankPosition,
    gap: Option<i64>,
}

/// Execute `xpt rank`: the active leaderboard, or one subject's place in it.
///
/// # Errors
///
/// Returns [`RankError::NotFound`] when the subject is not active, or an
/// argument or store error.
pub fn run_rank(args: &RankArgs, ctx: &Context) -> Result<()> {
    let ranking = &ctx.config.ranking;
    let days = args.days.unwrap_or(ranking.default_days);
    let window_start = (days > 0)
        .then(|| days_before(Utc::now(), days))
        .flatten()
        .ok_or(RankError::InvalidWindow(days))?;
    let threshold = args.threshold.unwrap_or(ranking.default_threshold);

    let store = ctx.open_store()?;
    let rank = Truerank::build(&store, window_start, threshold, ranking.candidate_limit)?;

    let Some(raw) = &args.subject else {
        let page = usize::try_from(args.page).unwrap_or(1);
        let offset = (page - 1) * ranking.page_size.max(1);
        let rows: Vec<RankRow> = rank
            .page(page, ranking.page_size)
            .iter()
            .enumerate()
            .map(|(i, entry)| RankRow::new(offset + i + 1, entry))
            .collect();
        return render_list(&rows, ctx.output);
    };

    let id: SubjectId = raw.parse().map_err(|_| {
        CodedError::new(ErrorCode::InvalidArgument, format!("invalid subject id `{raw}`"))
    })?;
    let position = rank.find_index(id)?;
    let report = PositionReport {
        days,
        threshold,
        active: rank.len(),
        gap: position.gap(),
        position,
    };
    render_mode(ctx.output, &report, render_position_text, render_position_pretty)
}

fn render_position_text(report: &PositionReport, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "{}\t{}\t{}\t{}",
        report.position.rank + 1,
        report.active,
        report.position.entry.xp,
        report.gap.map_or_else(|| "-".to_string(), |gap| gap.to_string())
    )
}

fn render_position_pretty(report: &PositionReport, w: &mut dyn Write) -> io::Result<()> {
    let entry = &report.position.entry;
    pretty_section(w, &format!("Active leaderboard, last {} days", report.days))?;
    pretty_kv(w, "subject", entry.subject.label())?;
    pretty_kv(
        w,
        "rank",
        format!("#{} of {}", report.position.rank + 1, report.active),
    )?;
    pretty_kv(w, "xp", format!("{} (+{} in window)", entry.xp, entry.growth))?;
    if let (Some(ahead), Some(gap)) = (&report.position.ahead, report.gap) {
        pretty_kv(w, "next up", format!("{} ({gap} xp ahead)", ahead.subject.label()))?;
    } else {
        pretty_kv(w, "next up", "nobody, top of the board")?;
    }
    Ok(())
}
