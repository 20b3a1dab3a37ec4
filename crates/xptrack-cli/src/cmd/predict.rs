use std::io::{self, Write};

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use xptrack_core::error::ErrorCode;
use xptrack_core::level::xp_to_level;
use xptrack_core::model::SubjectId;
use xptrack_core::predictor::{Prediction, PredictionOptions, Projection, Target};

use super::Context;
use crate::output::{CodedError, fmt_time, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct PredictArgs {
    /// Subject id (`123`, `<@123>` or `<@!123>`).
    pub subject: String,

    /// Target: `15000xp`, `lvl 40`, `+5`, `-2kxp`, `2.5m`, or a subject `<@id>`.
    #[arg(allow_hyphen_values = true)]
    pub target: String,

    /// Days of history used for the growth rate.
    #[arg(long, value_name = "DAYS")]
    pub days: Option<i64>,

    /// Assume this growth rate (XP per day) instead of the observed one.
    #[arg(long, value_name = "XP_PER_DAY")]
    pub growth: Option<f64>,
}

#[derive(Debug, Serialize)]
struct PredictReport {
    subject: SubjectId,
    name: String,
    window_days: i64,
    current_level: i64,
    projection: Projection,
    eta: Option<DateTime<Utc>>,
}

/// Execute `xpt predict`: days until a subject meets a target.
///
/// # Errors
///
/// Returns the prediction error (`NoData`, `ZeroGrowth`, `InvalidTarget`,
/// `TargetBounds`) or an argument error.
pub fn run_predict(args: &PredictArgs, ctx: &Context) -> Result<()> {
    let subject: SubjectId = args.subject.parse().map_err(|_| {
        CodedError::new(
            ErrorCode::InvalidArgument,
            format!("invalid subject id `{}`", args.subject),
        )
    })?;
    let target: Target = args.target.parse()?;
    let window_days = args.days.unwrap_or(ctx.config.predictor.default_days);
    if window_days <= 0 {
        return Err(CodedError::new(
            ErrorCode::InvalidArgument,
            format!("--days must be positive, got {window_days}"),
        )
        .into());
    }

    let store = ctx.open_store()?;
    let now = Utc::now();
    let options = PredictionOptions {
        window_days,
        growth_override: args.growth,
        max_target_days: ctx.config.predictor.max_target_distance_days,
    };
    let projection = Prediction::new(&store, subject, target, &options, now)?.evaluate()?;
    let name = store
        .subject(subject)?
        .map_or_else(|| subject.to_string(), |profile| profile.label());

    let report = PredictReport {
        subject,
        name,
        window_days,
        current_level: xp_to_level(projection.current),
        eta: projection.eta(now),
        projection,
    };
    render_mode(ctx.output, &report, render_predict_text, render_predict_pretty)
}

fn render_predict_text(report: &PredictReport, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "{}\t{}\t{:.2}\t{:.2}",
        report.subject, report.projection.target, report.projection.days, report.projection.rate_per_day
    )
}

fn render_predict_pretty(report: &PredictReport, w: &mut dyn Write) -> io::Result<()> {
    let p = &report.projection;
    pretty_section(w, &format!("{} -> {}", report.name, p.target))?;
    pretty_kv(
        w,
        "current",
        format!("{} xp (level {})", p.current, report.current_level),
    )?;
    pretty_kv(w, "target xp", p.target_xp.to_string())?;
    pretty_kv(
        w,
        "growth",
        format!("{:.1} xp/day over {} days", p.rate_per_day, report.window_days),
    )?;
    if p.is_reachable() {
        pretty_kv(w, "days", format!("{:.1}", p.days))?;
        if let Some(eta) = report.eta {
            pretty_kv(w, "eta", fmt_time(eta))?;
        }
    } else {
        pretty_kv(w, "days", format!("{:.1} (already passed)", p.days))?;
    }
    Ok(())
}
