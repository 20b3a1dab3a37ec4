use std::io::{self, Write};

use anyhow::Result;
use clap::{ArgGroup, Args};
use tracing::info;
use xptrack_core::collector::{Collector, CycleReport};
use xptrack_core::config::CollectorConfig;

use super::Context;
use crate::output::{fmt_time, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("sweep").args(["small", "large", "pages"])))]
pub struct CollectArgs {
    /// Sweep the small page range (`collector.small_pages`).
    #[arg(long)]
    pub small: bool,

    /// Sweep the large page range (`collector.large_pages`).
    #[arg(long)]
    pub large: bool,

    /// Sweep pages `1..=N`.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub pages: Option<u32>,
}

impl CollectArgs {
    /// Last page to fetch; without a flag the largest range is swept.
    pub fn last_page(&self, collector: &CollectorConfig) -> u32 {
        let last = if let Some(pages) = self.pages {
            pages
        } else if self.small {
            collector.small_pages
        } else if self.large {
            collector.large_pages
        } else {
            collector.largest_pages
        };
        last.max(1)
    }
}

/// Execute `xpt collect`: one gated collection cycle.
///
/// # Errors
///
/// Returns the collector error (`TooSoon`, `ManyFailures`, `Commit`) or a
/// setup failure.
pub fn run_collect(args: &CollectArgs, ctx: &Context) -> Result<()> {
    let collector_cfg = &ctx.config.collector;
    let source = ctx.leaderboard()?;
    let _lock = ctx.lock_writer()?;
    let store = ctx.open_store()?;

    let last_page = args.last_page(collector_cfg);
    info!(last_page, "collecting");
    let report = Collector::new(&store, &source, collector_cfg.retry_policy())
        .record_data(1..=last_page, collector_cfg.min_separation())?;

    render_mode(ctx.output, &report, render_cycle_text, render_cycle_pretty)
}

pub fn render_cycle_text(report: &CycleReport, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "{}\tpages={}\tfailed_pages={}\tsaved={}\tfailures={}\tskipped={}",
        report.timestamp.to_rfc3339(),
        report.pages_requested,
        report.pages_failed,
        report.successes,
        report.failures,
        report.skipped
    )
}

pub fn render_cycle_pretty(report: &CycleReport, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Collection cycle")?;
    pretty_kv(w, "at", fmt_time(report.timestamp))?;
    pretty_kv(
        w,
        "pages",
        format!(
            "{} requested, {} failed",
            report.pages_requested, report.pages_failed
        ),
    )?;
    pretty_kv(w, "saved", report.successes.to_string())?;
    pretty_kv(w, "failures", report.failures.to_string())?;
    pretty_kv(w, "skipped", report.skipped.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(small: bool, large: bool, pages: Option<u32>) -> CollectArgs {
        CollectArgs {
            small,
            large,
            pages,
        }
    }

    #[test]
    fn sweep_flags_pick_configured_ranges() {
        let cfg = CollectorConfig::default();
        assert_eq!(args(true, false, None).last_page(&cfg), cfg.small_pages);
        assert_eq!(args(false, true, None).last_page(&cfg), cfg.large_pages);
        assert_eq!(args(false, false, Some(3)).last_page(&cfg), 3);
        assert_eq!(args(false, false, None).last_page(&cfg), cfg.largest_pages);
    }
}
