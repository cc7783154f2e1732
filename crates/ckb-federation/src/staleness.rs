// SPDX-License-Identifier: MIT OR Apache-2.0
//! Sync-age staleness levels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How out of date one repo's federation data is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalenessLevel {
    /// Synced within seven days.
    Fresh,
    /// Synced within thirty days.
    Aging,
    /// Synced within ninety days.
    Stale,
    /// Older than ninety days, or never synced.
    Obsolete,
}

impl StalenessLevel {
    /// Classify a sync age in days.
    #[must_use]
    pub fn from_age_days(days: i64) -> Self {
        if days <= 7 {
            Self::Fresh
        } else if days <= 30 {
            Self::Aging
        } else if days <= 90 {
            Self::Stale
        } else {
            Self::Obsolete
        }
    }

    /// Classify an optional last-sync timestamp against `now`.
    #[must_use]
    pub fn from_last_sync(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        match last {
            Some(at) => Self::from_age_days((now - at).num_days()),
            None => Self::Obsolete,
        }
    }
}

/// One repo's staleness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoStaleness {
    /// Repository UID.
    pub repo_uid: String,
    /// Last completed sync, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Derived level.
    pub level: StalenessLevel,
}

/// Federation-wide staleness: per-repo levels plus the worst of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederationStaleness {
    /// Per-repo detail.
    pub repos: Vec<RepoStaleness>,
    /// Worst level across the federation.
    pub overall: StalenessLevel,
}

impl FederationStaleness {
    /// Roll up per-repo staleness. An empty federation is `Fresh`.
    #[must_use]
    pub fn roll_up(repos: Vec<RepoStaleness>) -> Self {
        let overall = repos
            .iter()
            .map(|r| r.level)
            .max()
            .unwrap_or(StalenessLevel::Fresh);
        Self { repos, overall }
    }
}
