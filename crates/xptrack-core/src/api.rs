//! Paginated leaderboard source.
//!
//! The collector only sees the [`LeaderboardSource`] trait; production uses
//! [`HttpLeaderboard`] (`GET <url>?page=N`), tests use in-memory pages.
//!
//! Entry fields are decoded leniently: ids and XP may arrive as numbers or
//! numeric strings, and unparseable values decode as absent so a single bad
//! entry never fails the whole page.

use std::time::Duration;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use crate::error::ErrorCode;
use crate::model::SubjectId;

/// Timeout applied to each HTTP call.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Display color the API reports for entries without usable data.
pub const NO_DATA_COLOR: &str = "#000000";

/// A page fetch that did not produce a usable body.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("undecodable response body: {0}")]
    Decode(String),
}

impl FetchError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::FetchFailed
    }
}

/// Source of leaderboard pages (1-based).
pub trait LeaderboardSource {
    /// Fetch one page.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] when the page is unavailable or malformed.
    fn fetch_page(&self, page: u32) -> Result<LeaderboardPage, FetchError>;
}

/// One decoded page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeaderboardPage {
    #[serde(default)]
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// One leaderboard row as reported by the API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    #[serde(default, deserialize_with = "lenient_int")]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub xp: Option<i64>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    /// The API marks departed members with a `missing` key, whatever its value.
    #[serde(default, deserialize_with = "present")]
    pub missing: bool,
}

impl LeaderboardEntry {
    /// First non-empty of nickname, display name, username.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        [&self.nickname, &self.display_name, &self.username]
            .into_iter()
            .filter_map(|name| name.as_deref())
            .find(|name| !name.trim().is_empty())
    }

    #[must_use]
    pub fn subject_id(&self) -> Option<SubjectId> {
        self.id.map(SubjectId::new)
    }

    /// Entries flagged missing, or without a real color, are not ingested.
    #[must_use]
    pub fn is_ingestible(&self) -> bool {
        !self.missing
            && self
                .color
                .as_deref()
                .is_some_and(|color| !color.eq_ignore_ascii_case(NO_DATA_COLOR))
    }
}

fn lenient_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|v| i64::try_from(v).ok())),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn present<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let _ = Value::deserialize(deserializer)?;
    Ok(true)
}

/// Blocking HTTP leaderboard client.
#[derive(Debug, Clone)]
pub struct HttpLeaderboard {
    agent: ureq::Agent,
    url: String,
}

impl HttpLeaderboard {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("xptrack/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            url: url.into(),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl LeaderboardSource for HttpLeaderboard {
    fn fetch_page(&self, page: u32) -> Result<LeaderboardPage, FetchError> {
        debug!(url = %self.url, page, "fetching leaderboard page");
        let response = self
            .agent
            .get(&self.url)
            .query("page", &page.to_string())
            .set("Accept", "application/json")
            .call()
            .map_err(|err| match err {
                ureq::Error::Status(code, _) => FetchError::Status(code),
                ureq::Error::Transport(transport) => FetchError::Transport(transport.to_string()),
            })?;

        response
            .into_json::<LeaderboardPage>()
            .map_err(|err| FetchError::Decode(err.to_string()))
    }
}
