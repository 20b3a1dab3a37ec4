use std::io::{self, Write};
use std::thread;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use tracing::{info, warn};
use xptrack_core::collector::{CollectError, Collector, CycleReport};
use xptrack_core::schedule::{Scheduler, Sweep};

use super::Context;
use crate::output::{fmt_time, render_stream_item};

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Stop after this many sweeps (default: run until interrupted).
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub iterations: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum Outcome {
    Saved,
    TooSoon,
    Failed,
}

#[derive(Debug, Serialize)]
struct SweepRecord {
    iteration: u32,
    sweep: Sweep,
    pages: u32,
    outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<CycleReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    next_at: DateTime<Utc>,
}

/// Execute `xpt watch`: collect on the adaptive large/small cadence.
///
/// A gated cycle counts as a success; any other collection failure shortens
/// the next wait. Commit exhaustion stops the loop.
///
/// # Errors
///
/// Returns the fatal `Commit` error, or a setup failure.
pub fn run_watch(args: &WatchArgs, ctx: &Context) -> Result<()> {
    let collector_cfg = &ctx.config.collector;
    let source = ctx.leaderboard()?;
    let store = ctx.open_store()?;
    let collector = Collector::new(&store, &source, collector_cfg.retry_policy());
    let mut scheduler = Scheduler::new(&ctx.config.schedule, collector_cfg);

    let mut iteration = 0;
    loop {
        iteration += 1;
        let (sweep, pages) = scheduler.next_sweep();
        let last_page = *pages.end();

        let result = {
            let _lock = ctx.lock_writer()?;
            collector.record_data(pages, collector_cfg.min_separation())
        };
        let (outcome, report, error) = match result {
            Ok(report) => (Outcome::Saved, Some(report), None),
            Err(err @ CollectError::TooSoon { .. }) => (Outcome::TooSoon, None, Some(err.to_string())),
            Err(err @ CollectError::Commit { .. }) => return Err(err.into()),
            Err(err) => {
                warn!(error = %err, code = %err.code(), "collection cycle failed");
                (Outcome::Failed, None, Some(err.to_string()))
            }
        };

        let wait = scheduler.complete(outcome != Outcome::Failed);
        let record = SweepRecord {
            iteration,
            sweep,
            pages: last_page,
            outcome,
            report,
            error,
            next_at: Utc::now() + wait,
        };
        render_stream_item(ctx.output, &record, render_sweep_human)?;

        if args.iterations.is_some_and(|limit| iteration >= limit) {
            break;
        }
        info!(wait_minutes = wait.num_minutes(), "sleeping until next sweep");
        thread::sleep(wait.to_std().unwrap_or_default());
    }
    Ok(())
}

fn render_sweep_human(record: &SweepRecord, w: &mut dyn Write) -> io::Result<()> {
    let detail = match (&record.report, &record.error) {
        (Some(report), _) => format!(
            "saved {} (failures {}, skipped {})",
            report.successes, report.failures, report.skipped
        ),
        (None, Some(error)) => error.clone(),
        (None, None) => String::new(),
    };
    writeln!(
        w,
        "[{}] {:?} sweep, pages 1..={}: {}; next at {}",
        record.iteration,
        record.sweep,
        record.pages,
        detail,
        fmt_time(record.next_at)
    )
}
