use std::fmt;

/// Machine-readable error codes shared by every component and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    ApiUrlMissing,
    SubjectNotFound,
    InvalidArgument,
    DuplicateRecord,
    InvalidStateTransition,
    EventExists,
    NoOpenEvent,
    TooSoon,
    ManyFailures,
    CommitFailed,
    FetchFailed,
    NoData,
    ZeroGrowth,
    InvalidTarget,
    TargetBounds,
    NotActive,
    StorageFailure,
    LockContention,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::ApiUrlMissing => "E1003",
            Self::SubjectNotFound => "E2001",
            Self::InvalidArgument => "E2002",
            Self::DuplicateRecord => "E2003",
            Self::InvalidStateTransition => "E2004",
            Self::EventExists => "E2005",
            Self::NoOpenEvent => "E2006",
            Self::TooSoon => "E3001",
            Self::ManyFailures => "E3002",
            Self::CommitFailed => "E3003",
            Self::FetchFailed => "E3004",
            Self::NoData => "E4001",
            Self::ZeroGrowth => "E4002",
            Self::InvalidTarget => "E4003",
            Self::TargetBounds => "E4004",
            Self::NotActive => "E4005",
            Self::StorageFailure => "E5001",
            Self::LockContention => "E5002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Store not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::ApiUrlMissing => "Leaderboard API URL not configured",
            Self::SubjectNotFound => "Subject not found",
            Self::InvalidArgument => "Invalid argument",
            Self::DuplicateRecord => "Duplicate record",
            Self::InvalidStateTransition => "Invalid state transition",
            Self::EventExists => "An event is already open",
            Self::NoOpenEvent => "No event is open",
            Self::TooSoon => "Collection attempted too soon",
            Self::ManyFailures => "Too many failures during collection",
            Self::CommitFailed => "Commit failed after retries",
            Self::FetchFailed => "Leaderboard fetch failed",
            Self::NoData => "Not enough data in range",
            Self::ZeroGrowth => "No growth in range",
            Self::InvalidTarget => "Invalid target",
            Self::TargetBounds => "Target too far away",
            Self::NotActive => "Subject not active enough to rank",
            Self::StorageFailure => "Storage failure",
            Self::LockContention => "Lock contention",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `xpt init` to create the store."),
            Self::ConfigParseError => Some("Fix syntax in the xptrack config.toml and retry."),
            Self::ApiUrlMissing => Some("Set `collector.api_url` or XPT_API_URL."),
            Self::SubjectNotFound | Self::DuplicateRecord | Self::NotActive => None,
            Self::InvalidArgument => Some("Check the command arguments and retry."),
            Self::InvalidStateTransition => {
                Some("Follow valid transitions: planned -> confirmed | aborted.")
            }
            Self::EventExists => Some("End the current event before creating a new one."),
            Self::NoOpenEvent => Some("Start an event before ending one."),
            Self::TooSoon => Some("Wait for the minimum separation to elapse."),
            Self::ManyFailures => Some("Check the leaderboard API; the cycle will be retried."),
            Self::CommitFailed => Some("Check disk space and database integrity."),
            Self::FetchFailed => Some("Check the leaderboard API URL and network."),
            Self::NoData => Some("Use a longer period or wait for more collections."),
            Self::ZeroGrowth => Some("Use a longer period or a growth override."),
            Self::InvalidTarget => Some("Use e.g. `15000xp`, `lvl 40`, `+5`, `2.5k` or `<@id>`."),
            Self::TargetBounds => Some("Choose a nearer target."),
            Self::StorageFailure => Some("Retry once. If persistent, check the database file."),
            Self::LockContention => Some("Retry after the other `xpt` process releases its lock."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
