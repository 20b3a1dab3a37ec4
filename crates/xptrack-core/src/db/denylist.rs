//! Injectable subject exclusions for known-bad historical data.
//!
//! Two kinds of exclusion exist:
//! - **hidden history**: a subject's series is suppressed entirely, or only
//!   for query windows that straddle a cutoff (the data before the cutoff is
//!   known to be wrong, e.g. an account migration)
//! - **growth exclusion**: a subject never appears in growth rankings
//!   (bulk imports, bot accounts)

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::SubjectId;

/// One hidden-history rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenHistory {
    pub id: SubjectId,
    /// Suppress windows that start before this instant and end after it.
    /// `None` hides the subject's series unconditionally.
    #[serde(default)]
    pub before: Option<DateTime<Utc>>,
}

/// Subject exclusions applied by the store's range and ranking queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Denylist {
    hidden: HashMap<SubjectId, Option<DateTime<Utc>>>,
    growth_excluded: HashSet<SubjectId>,
}

impl Denylist {
    #[must_use]
    pub fn new(
        hidden: impl IntoIterator<Item = HiddenHistory>,
        growth_excluded: impl IntoIterator<Item = SubjectId>,
    ) -> Self {
        Self {
            hidden: hidden.into_iter().map(|rule| (rule.id, rule.before)).collect(),
            growth_excluded: growth_excluded.into_iter().collect(),
        }
    }

    /// Whether a series query for `id` over `[start, end]` must return nothing.
    #[must_use]
    pub fn hides(
        &self,
        id: SubjectId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> bool {
        match self.hidden.get(&id) {
            None => false,
            Some(None) => true,
            Some(Some(cutoff)) => {
                start.is_none_or(|s| s < *cutoff) && end.is_none_or(|e| e > *cutoff)
            }
        }
    }

    #[must_use]
    pub fn excludes_from_growth(&self, id: SubjectId) -> bool {
        self.growth_excluded.contains(&id)
    }

    #[must_use]
    pub fn growth_excluded(&self) -> &HashSet<SubjectId> {
        &self.growth_excluded
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hidden.is_empty() && self.growth_excluded.is_empty()
    }
}
