// SPDX-License-Identifier: MIT OR Apache-2.0
//! The response envelope every tool returns.
//!
//! `{ schemaVersion, data, meta: { provenance, confidence, cache?,
//! truncation? }, warnings[], suggestedNextCalls[], error? }`

use crate::drilldown::Drilldown;
use crate::error::CkbError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Schema version stamped on every envelope.
pub const SCHEMA_VERSION: &str = "ckb/v1";

// ---------------------------------------------------------------------------
// Backends and completeness
// ---------------------------------------------------------------------------

/// The class of a fact source. Precedence is part of the contract:
/// indexed semantic > cross-repository > language server; the VCS and
/// scanner sources never outrank them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Precomputed semantic index (SCIP-class).
    IndexedSemantic,
    /// Cross-repository fact service (Glean-class).
    CrossRepo,
    /// Running language-server subprocess.
    LanguageServer,
    /// The version-control system itself.
    Vcs,
    /// Plain-text scanner fallback.
    Scanner,
}

impl BackendKind {
    /// Precedence rank; lower outranks higher.
    #[must_use]
    pub fn precedence(&self) -> u8 {
        match self {
            Self::IndexedSemantic => 0,
            Self::CrossRepo => 1,
            Self::LanguageServer => 2,
            Self::Vcs => 3,
            Self::Scanner => 4,
        }
    }

    /// Stable name used in provenance and confidence factors.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::IndexedSemantic => "indexed",
            Self::CrossRepo => "cross_repo",
            Self::LanguageServer => "language_server",
            Self::Vcs => "vcs",
            Self::Scanner => "scanner",
        }
    }
}

/// Machine-readable explanation of why a result may be less than total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum CompletenessReason {
    /// A full-fidelity backend answered.
    FullBackend,
    /// Only a language server answered; results are best effort.
    BestEffortLsp,
    /// The language server had not finished initializing.
    WorkspaceNotReady,
    /// The query deadline expired before all sources answered.
    TimedOut,
    /// The response budget truncated the result.
    Truncated,
    /// Only single-file analysis was possible.
    SingleFileOnly,
    /// No source could answer at all.
    NoBackendAvailable,
    /// The index predates the current repository state.
    IndexStale,
    /// The source did not say.
    Unknown,
}

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// Which backend answered, and how completely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BackendProvenance {
    /// Backend class.
    pub backend: BackendKind,
    /// Completeness of this backend's contribution.
    pub completeness: f64,
    /// Why the contribution is (or is not) complete.
    pub completeness_reason: CompletenessReason,
}

/// A recorded disagreement between backends on a whitelisted field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MetadataConflict {
    /// The field that disagreed.
    pub field: String,
    /// The value that won.
    pub chosen: serde_json::Value,
    /// The value that lost.
    pub rejected: serde_json::Value,
    /// Backend whose value won.
    pub chosen_from: BackendKind,
    /// Backend whose value lost.
    pub rejected_from: BackendKind,
}

/// Summary of the repository state a response was computed against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RepoStateStamp {
    /// Composite fingerprint of HEAD + staged + working + untracked.
    pub fingerprint: String,
    /// Commit hash of HEAD.
    pub head_commit: String,
    /// Whether any staged/working/untracked component was non-empty.
    pub dirty: bool,
}

/// How results from multiple backends were combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum MergeMode {
    /// One primary backend, whitelist metadata supplements from peers.
    PreferFirst,
    /// All backends queried, merged by reference key.
    Union,
}

/// Full provenance block reflecting *this* call's backend set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Provenance {
    /// Every backend consulted for this call.
    pub backends: Vec<BackendProvenance>,
    /// Merge mode in effect.
    pub merge_mode: MergeMode,
    /// Repository state the response was computed against.
    pub repo_state: RepoStateStamp,
    /// Disagreements recorded during metadata supplementation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata_conflicts: Vec<MetadataConflict>,
}

// ---------------------------------------------------------------------------
// Confidence
// ---------------------------------------------------------------------------

/// Availability status of a backend in a confidence factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FactorStatus {
    /// Available and its answer was used.
    Available,
    /// Available but its answer was not needed.
    AvailableUnused,
    /// Could not be consulted.
    Unavailable,
}

/// One contribution to the confidence score.
///
/// Every backend participating in a query gets exactly one factor, plus one
/// `repo_state` factor reflecting working-tree dirtiness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConfidenceFactor {
    /// Factor name: a backend name or `"repo_state"`.
    pub name: String,
    /// Availability status.
    pub status: FactorStatus,
    /// Scalar impact on the score (may be negative).
    pub impact: f64,
}

/// Coarse confidence tier derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    /// Score ≥ 0.8.
    High,
    /// Score ≥ 0.5.
    Medium,
    /// Anything lower.
    Low,
}

impl ConfidenceTier {
    /// Derive the tier from a score.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::High
        } else if score >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Confidence block of the response meta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Confidence {
    /// Overall score in `[0, 1]`.
    pub score: f64,
    /// Tier derived from the score.
    pub tier: ConfidenceTier,
    /// Individual contributions.
    pub factors: Vec<ConfidenceFactor>,
    /// Human-readable reasons.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
}

// ---------------------------------------------------------------------------
// Cache and truncation meta
// ---------------------------------------------------------------------------

/// Cache outcome for this response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CacheMeta {
    /// Whether the response was served from cache.
    pub hit: bool,
    /// Age of the cached entry in seconds (0 on miss).
    pub age_secs: u64,
}

/// Why and how a response was truncated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TruncationMeta {
    /// Which budget limit fired (e.g. `max-modules`, `max-items`).
    pub reason: String,
    /// Number of entries removed.
    pub dropped: u32,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Response metadata common to every tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResponseMeta {
    /// Backend set and repo state for this call.
    pub provenance: Provenance,
    /// Confidence score, tier, and factors.
    pub confidence: Confidence,
    /// Cache outcome, when a cache tier was consulted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheMeta>,
    /// Truncation record, when the budget fired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation: Option<TruncationMeta>,
}

/// The envelope every tool returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(bound(deserialize = "T: serde::de::DeserializeOwned"))]
pub struct Envelope<T> {
    /// Contract schema version.
    pub schema_version: String,
    /// The payload; absent when `error` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Provenance, confidence, cache, truncation.
    pub meta: ResponseMeta,
    /// Advisory warnings (e.g. dirty working tree).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Ranked follow-up suggestions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_next_calls: Vec<Drilldown>,
    /// Structured error, when the call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CkbError>,
}

impl<T> Envelope<T> {
    /// Build a success envelope.
    #[must_use]
    pub fn ok(data: T, meta: ResponseMeta) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            data: Some(data),
            meta,
            warnings: Vec::new(),
            suggested_next_calls: Vec::new(),
            error: None,
        }
    }

    /// Build an error envelope. The error's drilldowns are lifted into
    /// `suggested_next_calls`.
    #[must_use]
    pub fn err(error: CkbError, meta: ResponseMeta) -> Self {
        let suggested_next_calls = error.drilldowns.clone();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            data: None,
            meta,
            warnings: Vec::new(),
            suggested_next_calls,
            error: Some(error),
        }
    }

    /// Append a warning.
    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Append follow-up suggestions (already ranked by the caller).
    #[must_use]
    pub fn with_suggestions(mut self, suggestions: Vec<Drilldown>) -> Self {
        self.suggested_next_calls.extend(suggestions);
        self
    }
}
