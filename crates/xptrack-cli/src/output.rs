//! Shared output layer for pretty/text/JSON parity across all CLI commands.
//!
//! Every command handler receives an [`OutputMode`] and formats its output
//! accordingly: pretty output for humans, compact rows for scripts, or
//! stable JSON.
//!
//! # Output mode resolution
//!
//! Precedence (highest wins):
//! 1. `--format` / `--json` flag
//! 2. `XPT_FORMAT` env var → `"pretty"` | `"text"` | `"json"`
//! 3. Default: [`OutputMode::Pretty`] if stdout is a TTY; [`OutputMode::Text`] if piped.
//!
//! Failures go to stderr through [`render_failure`], which looks up the
//! stable error code carried anywhere in the error chain.

use std::fmt;
use std::io::{self, IsTerminal, Write};

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::Serialize;
use xptrack_core::api::FetchError;
use xptrack_core::collector::CollectError;
use xptrack_core::db::StoreError;
use xptrack_core::error::ErrorCode;
use xptrack_core::lock::LockError;
use xptrack_core::predictor::PredictionError;
use xptrack_core::reducer::ReduceError;
use xptrack_core::truerank::RankError;

/// Shared width for human pretty separators.
pub const PRETTY_RULE_WIDTH: usize = 60;

/// Exit status for failures without a more specific status.
pub const EXIT_FAILURE: i32 = 1;

/// Exit status when the collection gate rejected a cycle.
pub const EXIT_TOO_SOON: i32 = 3;

/// Exit status when another process holds the writer lock.
pub const EXIT_LOCKED: i32 = 4;

/// Write a horizontal separator used by pretty human output.
pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = PRETTY_RULE_WIDTH)
}

/// Write a section heading followed by a separator.
pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    pretty_rule(w)
}

/// Render a left-aligned key/value line in human output.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<14} {}", format!("{key}:"), value.as_ref())
}

/// Minute-resolution UTC timestamp for human output.
pub fn fmt_time(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// `fmt_time` for optional instants.
pub fn fmt_opt_time(ts: Option<DateTime<Utc>>) -> String {
    ts.map_or_else(|| "never".to_string(), fmt_time)
}

/// The three output modes supported by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Human-optimized output (sections, aligned columns).
    Pretty,
    /// Plain rows for pipes and scripts.
    Text,
    /// Machine-readable JSON.
    Json,
}

impl OutputMode {
    /// Returns `true` if JSON output was requested.
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Core resolution logic, separated from I/O for testability.
fn resolve_output_mode_inner(
    format_flag: Option<OutputMode>,
    json_flag: bool,
    format_env: Option<&str>,
    is_tty: bool,
) -> OutputMode {
    if let Some(mode) = format_flag {
        return mode;
    }

    if json_flag {
        return OutputMode::Json;
    }

    if let Some(val) = format_env {
        match val.to_lowercase().as_str() {
            "json" => return OutputMode::Json,
            "text" => return OutputMode::Text,
            "pretty" => return OutputMode::Pretty,
            _ => {}
        }
    }

    if is_tty {
        OutputMode::Pretty
    } else {
        OutputMode::Text
    }
}

/// Resolve the output mode from CLI flags, environment, and TTY defaults.
pub fn resolve_output_mode(format_flag: Option<OutputMode>, json_flag: bool) -> OutputMode {
    let env_val = std::env::var("XPT_FORMAT").ok();
    let is_tty = io::stdout().is_terminal();
    resolve_output_mode_inner(format_flag, json_flag, env_val.as_deref(), is_tty)
}

/// A row type that can be rendered in all modes.
pub trait Renderable: Serialize {
    /// One human-readable line (or block).
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()>;

    /// One text row; columns match [`Renderable::table_headers`].
    fn render_table(&self, w: &mut dyn Write) -> io::Result<()>;

    /// Column headers for text mode.
    fn table_headers() -> &'static [&'static str]
    where
        Self: Sized,
    {
        &[]
    }
}

/// Render a list of [`Renderable`] rows to stdout.
///
/// JSON mode writes one array; text mode writes a header line first.
pub fn render_list<R: Renderable>(items: &[R], mode: OutputMode) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_list(&mut out, items, mode)?;
    Ok(())
}

fn write_list<R: Renderable>(
    out: &mut dyn Write,
    items: &[R],
    mode: OutputMode,
) -> anyhow::Result<()> {
    match mode {
        OutputMode::Pretty => {
            for item in items {
                item.render_human(out)?;
            }
        }
        OutputMode::Text => {
            let headers = R::table_headers();
            if !items.is_empty() && !headers.is_empty() {
                writeln!(out, "{}", headers.join("\t"))?;
            }
            for item in items {
                item.render_table(out)?;
            }
        }
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut *out, items)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

/// Render a serializable value with explicit pretty/text renderers.
pub fn render_mode<T: Serialize>(
    mode: OutputMode,
    value: &T,
    text_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Text => text_fn(value, &mut out)?,
        OutputMode::Pretty => pretty_fn(value, &mut out)?,
    }
    Ok(())
}

/// Render a serializable value; pretty and text share `human_fn`.
pub fn render<T: Serialize>(
    mode: OutputMode,
    value: &T,
    human_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Pretty | OutputMode::Text => human_fn(value, &mut out)?,
    }
    Ok(())
}

/// Render one record of a stream: a compact JSON line, or `human_fn` output.
pub fn render_stream_item<T: Serialize>(
    mode: OutputMode,
    value: &T,
    human_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if mode.is_json() {
        serde_json::to_writer(&mut out, value)?;
        writeln!(out)?;
    } else {
        human_fn(value, &mut out)?;
    }
    out.flush()?;
    Ok(())
}

/// A failure raised by the CLI itself, tagged with its error code.
#[derive(Debug)]
pub struct CodedError {
    pub code: ErrorCode,
    pub message: String,
}

impl CodedError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CodedError {}

/// Error code of the first typed error in `err`'s chain.
pub fn error_code_of(err: &anyhow::Error) -> Option<ErrorCode> {
    err.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<CodedError>() {
            return Some(e.code);
        }
        if let Some(e) = cause.downcast_ref::<CollectError>() {
            return Some(e.code());
        }
        if let Some(e) = cause.downcast_ref::<PredictionError>() {
            return Some(e.code());
        }
        if let Some(e) = cause.downcast_ref::<RankError>() {
            return Some(e.code());
        }
        if let Some(e) = cause.downcast_ref::<ReduceError>() {
            return Some(e.code());
        }
        if let Some(e) = cause.downcast_ref::<StoreError>() {
            return Some(e.code());
        }
        if let Some(e) = cause.downcast_ref::<FetchError>() {
            return Some(e.code());
        }
        if let Some(e) = cause.downcast_ref::<LockError>() {
            return Some(e.code());
        }
        cause
            .downcast_ref::<rusqlite::Error>()
            .map(|_| ErrorCode::StorageFailure)
    })
}

/// Process exit status for a failure with `code`.
pub const fn exit_code(code: Option<ErrorCode>) -> i32 {
    match code {
        Some(ErrorCode::TooSoon) => EXIT_TOO_SOON,
        Some(ErrorCode::LockContention) => EXIT_LOCKED,
        _ => EXIT_FAILURE,
    }
}

/// A structured error with optional suggestion and error code.
#[derive(Debug, Serialize)]
pub struct CliError {
    /// Human-readable error message.
    pub message: String,
    /// Optional suggestion for how to fix the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Stable `E####` code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl CliError {
    /// Build from an error chain; the message includes every cause.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let code = error_code_of(err);
        Self {
            message: format!("{err:#}"),
            suggestion: code.and_then(ErrorCode::hint).map(str::to_string),
            error_code: code.map(|c| c.code().to_string()),
        }
    }
}

/// Render an error to stderr in the requested format.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    write_error(&mut out, mode, error)
}

fn write_error(out: &mut dyn Write, mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    match mode {
        OutputMode::Json => {
            let wrapper = serde_json::json!({ "error": error });
            serde_json::to_writer_pretty(&mut *out, &wrapper)?;
            writeln!(out)?;
        }
        OutputMode::Pretty | OutputMode::Text => {
            match &error.error_code {
                Some(code) => writeln!(out, "error[{code}]: {}", error.message)?,
                None => writeln!(out, "error: {}", error.message)?,
            }
            if let Some(suggestion) = &error.suggestion {
                writeln!(out, "  suggestion: {suggestion}")?;
            }
        }
    }
    Ok(())
}

/// Report a failed command on stderr and return the exit status to use.
pub fn render_failure(mode: OutputMode, err: &anyhow::Error) -> i32 {
    let cli_error = CliError::from_anyhow(err);
    if render_error(mode, &cli_error).is_err() {
        eprintln!("error: {err:#}");
    }
    exit_code(error_code_of(err))
}
