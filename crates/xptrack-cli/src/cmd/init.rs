use std::io::{self, Write};

use anyhow::{Context as _, Result};
use serde::Serialize;
use xptrack_core::db::Store;

use super::Context;
use crate::output::{pretty_kv, render};

#[derive(Debug, Serialize)]
struct InitReport {
    path: String,
    created: bool,
    subjects: usize,
    records: usize,
}

/// Execute `xpt init`: create the database (and its directory) or migrate an
/// existing one to the current schema.
///
/// # Errors
///
/// Returns an error if the directory or database cannot be created.
pub fn run_init(ctx: &Context) -> Result<()> {
    let created = !ctx.db_path.exists();
    if let Some(parent) = ctx.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let _lock = ctx.lock_writer()?;
    let store = Store::open(&ctx.db_path, ctx.config.denylist.to_denylist())
        .with_context(|| format!("Failed to initialize {}", ctx.db_path.display()))?;

    let report = InitReport {
        path: ctx.db_path.display().to_string(),
        created,
        subjects: store.subjects()?.len(),
        records: store.record_count()?,
    };

    render(ctx.output, &report, render_init_human)
}

fn render_init_human(report: &InitReport, w: &mut dyn Write) -> io::Result<()> {
    if report.created {
        writeln!(w, "Initialized xptrack store")?;
    } else {
        writeln!(w, "Store already initialized; schema is current")?;
    }
    pretty_kv(w, "path", &report.path)?;
    pretty_kv(w, "subjects", report.subjects.to_string())?;
    pretty_kv(w, "records", report.records.to_string())
}
