//! Tracker configuration: a TOML file plus `XPT_*` environment overrides.
//!
//! Resolution order (later wins): built-in defaults, the config file
//! (`<config_dir>/xptrack/config.toml` unless a path is given), environment.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::db::denylist::{Denylist, HiddenHistory};
use crate::db::DEFAULT_DB_FILE;
use crate::model::SubjectId;
use crate::retry::{DEFAULT_MAX_ATTEMPTS, RetryPolicy};

/// Upper bound for every `*_minutes` setting (one hundred years).
pub const MAX_MINUTES: i64 = 100 * 366 * 24 * 60;

/// `minutes` as a duration, clamped to `0..=MAX_MINUTES`.
#[must_use]
pub fn minutes(minutes: i64) -> chrono::Duration {
    chrono::Duration::minutes(minutes.clamp(0, MAX_MINUTES))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub reducer: ReducerConfig,
    #[serde(default)]
    pub predictor: PredictorConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub denylist: DenylistConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl TrackerConfig {
    /// Reject minute settings outside `0..=MAX_MINUTES`.
    ///
    /// # Errors
    ///
    /// Names the first out-of-range setting.
    pub fn validate(&self) -> Result<()> {
        let settings = [
            (
                "collector.min_separation_minutes (XPT_MIN_SEPARATION)",
                self.collector.min_separation_minutes,
            ),
            (
                "collector.max_separation_minutes (XPT_MAX_SEPARATION)",
                self.collector.max_separation_minutes,
            ),
            (
                "schedule.initial_wait_minutes",
                self.schedule.initial_wait_minutes,
            ),
            ("schedule.min_wait_minutes", self.schedule.min_wait_minutes),
            ("schedule.max_wait_minutes", self.schedule.max_wait_minutes),
            ("schedule.step_minutes", self.schedule.step_minutes),
        ];
        for (key, value) in settings {
            anyhow::ensure!(
                (0..=MAX_MINUTES).contains(&value),
                "{key} must be between 0 and {MAX_MINUTES}, got {value}"
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff sleep; doubles per failed attempt.
    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: u64,
    #[serde(default = "default_min_separation")]
    pub min_separation_minutes: i64,
    #[serde(default = "default_max_separation")]
    pub max_separation_minutes: i64,
    #[serde(default = "default_small_pages")]
    pub small_pages: u32,
    #[serde(default = "default_large_pages")]
    pub large_pages: u32,
    #[serde(default = "default_largest_pages")]
    pub largest_pages: u32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            max_retries: default_max_retries(),
            retry_base_secs: default_retry_base_secs(),
            min_separation_minutes: default_min_separation(),
            max_separation_minutes: default_max_separation(),
            small_pages: default_small_pages(),
            large_pages: default_large_pages(),
            largest_pages: default_largest_pages(),
        }
    }
}

impl CollectorConfig {
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(self.retry_base_secs))
    }

    #[must_use]
    pub fn min_separation(&self) -> chrono::Duration {
        minutes(self.min_separation_minutes)
    }

    #[must_use]
    pub fn max_separation(&self) -> chrono::Duration {
        minutes(self.max_separation_minutes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReducerConfig {
    /// XP gain below which neighbouring samples count as redundant.
    #[serde(default = "default_safe_threshold")]
    pub safe_threshold: i64,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            safe_threshold: default_safe_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictorConfig {
    #[serde(default = "default_predictor_days")]
    pub default_days: i64,
    #[serde(default = "default_max_target_distance")]
    pub max_target_distance_days: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            default_days: default_predictor_days(),
            max_target_distance_days: default_max_target_distance(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingConfig {
    #[serde(default = "default_rank_threshold")]
    pub default_threshold: i64,
    #[serde(default = "default_rank_days")]
    pub default_days: i64,
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            default_threshold: default_rank_threshold(),
            default_days: default_rank_days(),
            candidate_limit: default_candidate_limit(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_initial_wait")]
    pub initial_wait_minutes: i64,
    #[serde(default = "default_min_wait")]
    pub min_wait_minutes: i64,
    #[serde(default = "default_max_wait")]
    pub max_wait_minutes: i64,
    #[serde(default = "default_wait_step")]
    pub step_minutes: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            initial_wait_minutes: default_initial_wait(),
            min_wait_minutes: default_min_wait(),
            max_wait_minutes: default_max_wait(),
            step_minutes: default_wait_step(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenylistConfig {
    #[serde(default)]
    pub hidden: Vec<HiddenHistory>,
    #[serde(default)]
    pub growth_excluded: Vec<SubjectId>,
}

impl DenylistConfig {
    #[must_use]
    pub fn to_denylist(&self) -> Denylist {
        Denylist::new(
            self.hidden.iter().cloned(),
            self.growth_excluded.iter().copied(),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Default config file location: `<config_dir>/xptrack/config.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("xptrack").join("config.toml"))
}

/// Load the config file.
///
/// An explicit `path` must exist; a missing default file yields defaults.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: Option<&Path>) -> Result<TrackerConfig> {
    let path = match path {
        Some(explicit) => explicit.to_path_buf(),
        None => match default_config_path() {
            Some(default) if default.exists() => default,
            _ => return Ok(TrackerConfig::default()),
        },
    };

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<TrackerConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Load the config file, then apply process environment overrides.
///
/// # Errors
///
/// Returns an error if the file or an override cannot be parsed, or a
/// setting is out of range.
pub fn resolve_config(path: Option<&Path>) -> Result<TrackerConfig> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Apply `XPT_*` overrides read through `lookup`.
///
/// # Errors
///
/// Returns an error naming the variable when a value does not parse.
pub fn apply_env_overrides(
    config: &mut TrackerConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    let collector = &mut config.collector;
    override_parsed(&lookup, "XPT_MAX_RETRIES", &mut collector.max_retries)?;
    override_parsed(&lookup, "XPT_MIN_SEPARATION", &mut collector.min_separation_minutes)?;
    override_parsed(&lookup, "XPT_MAX_SEPARATION", &mut collector.max_separation_minutes)?;
    override_parsed(&lookup, "XPT_COLLECTION_SMALL", &mut collector.small_pages)?;
    override_parsed(&lookup, "XPT_COLLECTION_LARGE", &mut collector.large_pages)?;
    override_parsed(&lookup, "XPT_COLLECTION_LARGEST", &mut collector.largest_pages)?;
    if let Some(url) = non_empty_var(&lookup, "XPT_API_URL") {
        collector.api_url = Some(url);
    }

    override_parsed(&lookup, "XPT_SAFE_THRESHOLD", &mut config.reducer.safe_threshold)?;
    override_parsed(
        &lookup,
        "XPT_PREDICTOR_DEFAULT_DAYS",
        &mut config.predictor.default_days,
    )?;
    override_parsed(
        &lookup,
        "XPT_MAX_TARGET_DISTANCE",
        &mut config.predictor.max_target_distance_days,
    )?;
    override_parsed(
        &lookup,
        "XPT_RANK_DEFAULT_THRESHOLD",
        &mut config.ranking.default_threshold,
    )?;

    if let Some(path) = non_empty_var(&lookup, "XPT_DB") {
        config.database.path = Some(PathBuf::from(path));
    }
    Ok(())
}

/// Database location: CLI flag, then config/env, then the platform data dir.
#[must_use]
pub fn resolve_db_path(config: &TrackerConfig, cli: Option<&Path>) -> PathBuf {
    if let Some(path) = cli {
        return path.to_path_buf();
    }
    if let Some(path) = &config.database.path {
        return path.clone();
    }
    dirs::data_dir().map_or_else(
        || PathBuf::from(DEFAULT_DB_FILE),
        |dir| dir.join("xptrack").join(DEFAULT_DB_FILE),
    )
}

fn non_empty_var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn override_parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(raw) = non_empty_var(lookup, key) {
        *slot = raw
            .parse()
            .with_context(|| format!("invalid value for {key}: '{raw}'"))?;
    }
    Ok(())
}

const fn default_max_retries() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

const fn default_retry_base_secs() -> u64 {
    1
}

const fn default_min_separation() -> i64 {
    30
}

const fn default_max_separation() -> i64 {
    120
}

const fn default_small_pages() -> u32 {
    2
}

const fn default_large_pages() -> u32 {
    6
}

const fn default_largest_pages() -> u32 {
    10
}

const fn default_safe_threshold() -> i64 {
    200
}

const fn default_predictor_days() -> i64 {
    30
}

const fn default_max_target_distance() -> f64 {
    36_500.0
}

const fn default_rank_threshold() -> i64 {
    30
}

const fn default_rank_days() -> i64 {
    7
}

const fn default_candidate_limit() -> usize {
    200
}

const fn default_page_size() -> usize {
    10
}

const fn default_initial_wait() -> i64 {
    60
}

const fn default_min_wait() -> i64 {
    30
}

const fn default_max_wait() -> i64 {
    120
}

const fn default_wait_step() -> i64 {
    15
}
