use std::io::{self, Write};

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use xptrack_core::collector::Collector;
use xptrack_core::level::xp_to_level;
use xptrack_core::model::SubjectId;

use super::Context;
use crate::cmd::collect::{render_cycle_pretty, render_cycle_text};
use crate::output::{Renderable, render_list, render_mode};

#[derive(Args, Debug)]
pub struct ProfilesArgs {
    /// List stored profiles instead of refreshing them from the API.
    #[arg(long)]
    pub list: bool,

    /// Refresh pages `1..=N` (default: `collector.largest_pages`).
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub pages: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ProfileRow {
    id: SubjectId,
    name: String,
    color: Option<String>,
    xp: i64,
    level: i64,
}

impl Renderable for ProfileRow {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "{:<24} {:>12} xp  lvl {:<4} {}",
            self.name,
            self.xp,
            self.level,
            self.color.as_deref().unwrap_or("-")
        )
    }

    fn render_table(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}",
            self.id,
            self.name,
            self.xp,
            self.level,
            self.color.as_deref().unwrap_or("-")
        )
    }

    fn table_headers() -> &'static [&'static str] {
        &["ID", "NAME", "XP", "LEVEL", "COLOR"]
    }
}

/// Execute `xpt profiles`: refresh display profiles, or list them.
///
/// # Errors
///
/// Returns an error if the store or the API cannot be used.
pub fn run_profiles(args: &ProfilesArgs, ctx: &Context) -> Result<()> {
    if args.list {
        let store = ctx.open_store()?;
        let rows: Vec<ProfileRow> = store
            .latest_values()?
            .into_iter()
            .map(|(subject, xp)| ProfileRow {
                id: subject.id,
                name: subject.label(),
                color: subject.color,
                xp,
                level: xp_to_level(xp),
            })
            .collect();
        return render_list(&rows, ctx.output);
    }

    let collector_cfg = &ctx.config.collector;
    let source = ctx.leaderboard()?;
    let _lock = ctx.lock_writer()?;
    let store = ctx.open_store()?;
    let last_page = args.pages.unwrap_or(collector_cfg.largest_pages).max(1);

    let report = Collector::new(&store, &source, collector_cfg.retry_policy())
        .update_profiles(1..=last_page)?;
    render_mode(ctx.output, &report, render_cycle_text, render_cycle_pretty)
}
