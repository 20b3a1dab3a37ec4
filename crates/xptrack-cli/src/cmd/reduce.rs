use std::io::{self, Write};

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use xptrack_core::reducer::{Reducer, ReductionState};

use super::Context;
use crate::output::{fmt_time, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct ReduceArgs {
    /// Delete the planned records. Without this flag the plan is only shown.
    #[arg(long)]
    pub yes: bool,
}

#[derive(Debug, Serialize)]
struct ReduceReport {
    state: ReductionState,
    planned_at: DateTime<Utc>,
    subjects_scanned: usize,
    planned: usize,
    deleted: usize,
    records_before: usize,
    records_after: usize,
}

/// Execute `xpt reduce`: plan compaction, then confirm or discard it.
///
/// # Errors
///
/// Returns an error if planning or the delete pass fails.
pub fn run_reduce(args: &ReduceArgs, ctx: &Context) -> Result<()> {
    let _lock = ctx.lock_writer()?;
    let store = ctx.open_store()?;
    let records_before = store.record_count()?;

    let mut reduction =
        Reducer::new(&store, ctx.config.reducer.safe_threshold).reduce(Utc::now())?;
    let planned = reduction.pending();
    if args.yes {
        reduction.commit(&store)?;
    } else {
        reduction.rollback()?;
    }

    let report = ReduceReport {
        state: reduction.state(),
        planned_at: reduction.planned_at(),
        subjects_scanned: reduction.subjects_scanned(),
        planned,
        deleted: reduction.deleted(),
        records_before,
        records_after: store.record_count()?,
    };
    render_mode(ctx.output, &report, render_reduce_text, render_reduce_pretty)
}

fn render_reduce_text(report: &ReduceReport, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "{}\tscanned={}\tplanned={}\tdeleted={}\trecords={}",
        report.state,
        report.subjects_scanned,
        report.planned,
        report.deleted,
        report.records_after
    )
}

fn render_reduce_pretty(report: &ReduceReport, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Compaction")?;
    pretty_kv(w, "planned at", fmt_time(report.planned_at))?;
    pretty_kv(w, "subjects", report.subjects_scanned.to_string())?;
    pretty_kv(w, "redundant", report.planned.to_string())?;
    pretty_kv(w, "state", report.state.to_string())?;
    pretty_kv(
        w,
        "records",
        format!("{} -> {}", report.records_before, report.records_after),
    )?;
    if report.state == ReductionState::Aborted && report.planned > 0 {
        writeln!(w, "Nothing deleted. Re-run with --yes to apply.")?;
    }
    Ok(())
}
