use std::io::{self, Write};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use xptrack_core::collector::{Liveness, liveness};
use xptrack_core::model::Event;

use super::Context;
use crate::output::{fmt_opt_time, fmt_time, pretty_kv, pretty_section, render_mode};

#[derive(Debug, Serialize)]
struct StatusReport {
    db_path: String,
    subjects: usize,
    records: usize,
    collection: Liveness,
    open_event: Option<Event>,
    checked_at: DateTime<Utc>,
}

/// Execute `xpt status`: store size, collection liveness and the open event.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or queried.
pub fn run_status(ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let now = Utc::now();

    let report = StatusReport {
        db_path: ctx.db_path.display().to_string(),
        subjects: store.subjects()?.len(),
        records: store.record_count()?,
        collection: liveness(&store, now, ctx.config.collector.max_separation())?,
        open_event: store.current_event()?,
        checked_at: now,
    };

    render_mode(ctx.output, &report, render_status_text, render_status_pretty)
}

fn render_status_text(report: &StatusReport, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "db\t{}", report.db_path)?;
    writeln!(w, "subjects\t{}", report.subjects)?;
    writeln!(w, "records\t{}", report.records)?;
    writeln!(
        w,
        "last_collection\t{}",
        report
            .collection
            .last
            .map_or_else(|| "-".to_string(), |ts| ts.to_rfc3339())
    )?;
    writeln!(w, "halted\t{}", report.collection.halted)?;
    writeln!(
        w,
        "open_event\t{}",
        report
            .open_event
            .as_ref()
            .map_or_else(|| "-".to_string(), |event| event.id.to_string())
    )
}

fn render_status_pretty(report: &StatusReport, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "xptrack status")?;
    pretty_kv(w, "database", &report.db_path)?;
    pretty_kv(w, "subjects", report.subjects.to_string())?;
    pretty_kv(w, "records", report.records.to_string())?;
    pretty_kv(w, "last", fmt_opt_time(report.collection.last))?;
    pretty_kv(w, "previous", fmt_opt_time(report.collection.previous))?;
    if report.collection.halted {
        pretty_kv(w, "collection", "HALTED")?;
    } else {
        pretty_kv(w, "collection", "running")?;
    }
    match &report.open_event {
        Some(event) => pretty_kv(
            w,
            "event",
            format!(
                "#{} since {}{}",
                event.id,
                fmt_time(event.start_time),
                event
                    .multiplier
                    .map(|m| format!(" (x{m})"))
                    .unwrap_or_default()
            ),
        ),
        None => pretty_kv(w, "event", "none"),
    }
}
