use std::io::{self, Write};

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde::Serialize;
use xptrack_core::model::Event;

use super::{Context, window_start};
use crate::output::{Renderable, fmt_time, pretty_kv, render, render_list};

#[derive(Subcommand, Debug)]
pub enum EventCommand {
    #[command(
        about = "Open a new event",
        after_help = "EXAMPLES:\n    # Double XP starting now\n    xpt event start --multiplier 2\n\n    # A closed event in the past\n    xpt event start --at 2025-06-01T00:00:00Z --until 2025-06-03T00:00:00Z"
    )]
    Start(StartArgs),

    #[command(
        about = "Close the open event",
        after_help = "EXAMPLES:\n    # End the running event now\n    xpt event end"
    )]
    End(EndArgs),

    #[command(
        about = "List events",
        after_help = "EXAMPLES:\n    # Every recorded event\n    xpt event list\n\n    # Events visible in the last 30 days\n    xpt event list --days 30"
    )]
    List(ListArgs),
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Start instant (RFC 3339); defaults to now.
    #[arg(long, value_name = "TIME")]
    pub at: Option<DateTime<Utc>>,

    /// End instant (RFC 3339) for an event that is already over.
    #[arg(long, value_name = "TIME")]
    pub until: Option<DateTime<Utc>>,

    /// XP multiplier in effect during the event.
    #[arg(long)]
    pub multiplier: Option<f64>,
}

#[derive(Args, Debug)]
pub struct EndArgs {
    /// End instant (RFC 3339); defaults to now.
    #[arg(long, value_name = "TIME")]
    pub at: Option<DateTime<Utc>>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only events overlapping the last DAYS days (short ones are hidden).
    #[arg(long, value_name = "DAYS", value_parser = clap::value_parser!(i64).range(1..))]
    pub days: Option<i64>,
}

#[derive(Debug, Serialize)]
struct EventRow(Event);

impl Renderable for EventRow {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()> {
        let event = &self.0;
        writeln!(
            w,
            "#{:<4} {} -> {}{}",
            event.id,
            fmt_time(event.start_time),
            event.end_time.map_or_else(|| "open".to_string(), fmt_time),
            multiplier_suffix(event)
        )
    }

    fn render_table(&self, w: &mut dyn Write) -> io::Result<()> {
        let event = &self.0;
        writeln!(
            w,
            "{}\t{}\t{}\t{}",
            event.id,
            event.start_time.to_rfc3339(),
            event
                .end_time
                .map_or_else(|| "-".to_string(), |end| end.to_rfc3339()),
            event
                .multiplier
                .map_or_else(|| "-".to_string(), |m| m.to_string())
        )
    }

    fn table_headers() -> &'static [&'static str] {
        &["ID", "START", "END", "MULTIPLIER"]
    }
}

fn multiplier_suffix(event: &Event) -> String {
    event
        .multiplier
        .map(|m| format!("  x{m}"))
        .unwrap_or_default()
}

/// Execute `xpt event <command>`.
///
/// # Errors
///
/// Returns `EventExists`, `NoOpenEvent` or `InvalidArgument` from the store,
/// or a setup failure.
pub fn run_event(command: &EventCommand, ctx: &Context) -> Result<()> {
    match command {
        EventCommand::Start(args) => {
            let _lock = ctx.lock_writer()?;
            let store = ctx.open_store()?;
            let start = args.at.unwrap_or_else(Utc::now);
            let event = store.create_event(start, args.until, args.multiplier)?;
            render(ctx.output, &event, |event, w| {
                writeln!(w, "Started event #{}", event.id)?;
                render_event_detail(event, w)
            })
        }
        EventCommand::End(args) => {
            let _lock = ctx.lock_writer()?;
            let store = ctx.open_store()?;
            let event = store.end_event(args.at.unwrap_or_else(Utc::now))?;
            render(ctx.output, &event, |event, w| {
                writeln!(w, "Ended event #{}", event.id)?;
                render_event_detail(event, w)
            })
        }
        EventCommand::List(args) => {
            let store = ctx.open_store()?;
            let events = match args.days {
                Some(days) => {
                    let now = Utc::now();
                    store.events_in_range(window_start(now, days)?, None, now)?
                }
                None => store.events()?,
            };
            let rows: Vec<EventRow> = events.into_iter().map(EventRow).collect();
            render_list(&rows, ctx.output)
        }
    }
}

fn render_event_detail(event: &Event, w: &mut dyn Write) -> io::Result<()> {
    pretty_kv(w, "start", fmt_time(event.start_time))?;
    pretty_kv(
        w,
        "end",
        event.end_time.map_or_else(|| "open".to_string(), fmt_time),
    )?;
    if let Some(multiplier) = event.multiplier {
        pretty_kv(w, "multiplier", multiplier.to_string())?;
    }
    Ok(())
}
