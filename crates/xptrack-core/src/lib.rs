#![forbid(unsafe_code)]
//! xptrack-core library.
//!
//! Time-series tracking engine for a leaderboard quantity ("XP"): a SQLite
//! store, a failure-tolerant collector, a compacting reducer, a trend
//! predictor and an activity-filtered ranker.
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums at component seams, `anyhow::Result`
//!   for glue such as opening stores and loading configuration.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod api;
pub mod collector;
pub mod config;
pub mod db;
pub mod error;
pub mod level;
pub mod lock;
pub mod model;
pub mod predictor;
pub mod reducer;
pub mod retry;
pub mod schedule;
pub mod truerank;
