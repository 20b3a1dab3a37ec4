use std::collections::HashMap;
use std::io::{self, Write};

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use serde::Serialize;
use xptrack_core::level::xp_to_level;
use xptrack_core::model::{SubjectId, SubjectSeries};

use super::{Context, window_start};
use crate::output::{Renderable, render_list};

/// Window used by `--growth` when `--days` is not given.
const DEFAULT_GROWTH_DAYS: i64 = 7;

#[derive(Args, Debug)]
pub struct TopArgs {
    /// Number of subjects to show.
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    pub limit: u32,

    /// Only consider records from the last DAYS days.
    #[arg(long, value_name = "DAYS", value_parser = clap::value_parser!(i64).range(1..))]
    pub days: Option<i64>,

    /// Rank by growth inside the window instead of by total XP.
    #[arg(long)]
    pub growth: bool,
}

#[derive(Debug, Serialize)]
struct TopRow {
    position: usize,
    id: SubjectId,
    name: String,
    xp: i64,
    level: i64,
    growth: i64,
}

impl Renderable for TopRow {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "{:>3}. {:<24} {:>12} xp  lvl {:<4} +{}",
            self.position, self.name, self.xp, self.level, self.growth
        )
    }

    fn render_table(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}\t{}",
            self.position, self.id, self.name, self.xp, self.level, self.growth
        )
    }

    fn table_headers() -> &'static [&'static str] {
        &["POS", "ID", "NAME", "XP", "LEVEL", "GROWTH"]
    }
}

/// Execute `xpt top`: the leaderboard by total XP or by recent growth.
///
/// # Errors
///
/// Returns an error for an unrepresentable window or if the store cannot be
/// queried.
pub fn run_top(args: &TopArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let now = Utc::now();
    let limit = Some(usize::try_from(args.limit).unwrap_or(usize::MAX));

    let rows: Vec<TopRow> = if args.growth {
        let start = window_start(now, args.days.unwrap_or(DEFAULT_GROWTH_DAYS))?;
        let latest: HashMap<SubjectId, i64> = store
            .latest_values()?
            .into_iter()
            .map(|(subject, xp)| (subject.id, xp))
            .collect();
        store
            .top_by_growth(start, None, limit, None)?
            .into_iter()
            .enumerate()
            .map(|(i, series)| {
                let xp = latest.get(&series.subject.id).copied().unwrap_or_default();
                let values = series.points.iter().map(|p| p.value);
                let growth = values.clone().max().unwrap_or(0) - values.min().unwrap_or(0);
                row(i, &series, xp, growth)
            })
            .collect()
    } else {
        let start = args
            .days
            .map(|days| window_start(now, days))
            .transpose()?;
        store
            .top_by_current_value(limit, None, start, None)?
            .into_iter()
            .enumerate()
            .map(|(i, series)| {
                let xp = series.last().map_or(0, |p| p.value);
                row(i, &series, xp, series.growth())
            })
            .collect()
    };

    render_list(&rows, ctx.output)
}

fn row(index: usize, series: &SubjectSeries, xp: i64, growth: i64) -> TopRow {
    TopRow {
        position: index + 1,
        id: series.subject.id,
        name: series.subject.label(),
        xp,
        level: xp_to_level(xp),
        growth,
    }
}
