// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Error catalog for the Code Knowledge Backplane.
//!
//! Error kinds are surfaced by stable code string (e.g. `SYMBOL_NOT_FOUND`),
//! never by exception type. Every error may carry structured suggested fixes
//! and drilldowns so callers can recover without guessing.

use crate::drilldown::Drilldown;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCode enum
// ---------------------------------------------------------------------------

/// Enumeration of all CKB error codes. The code strings are part of the
/// public contract and never change meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No fact source that could answer the query is currently reachable.
    BackendUnavailable,
    /// The semantic index for this repository has never been generated.
    IndexMissing,
    /// The semantic index exists but predates the current repository state.
    IndexStale,
    /// The language server for this file type has not finished initializing.
    WorkspaceNotReady,
    /// The query exceeded its deadline.
    Timeout,
    /// The per-language request queue is full.
    RateLimited,
    /// No symbol matches the given identifier.
    SymbolNotFound,
    /// The symbol existed but has been deleted; a tombstone records when.
    SymbolDeleted,
    /// The requested scope is not valid for this tool.
    ScopeInvalid,
    /// Alias resolution revisited a node it had already seen.
    AliasCycle,
    /// Alias resolution exceeded the maximum chain depth.
    AliasChainTooDeep,
    /// The response could not fit the declared budget even after truncation.
    BudgetExceeded,
    /// An unexpected internal failure.
    InternalError,
}

impl ErrorCode {
    /// Machine-readable code string (e.g. `"SYMBOL_NOT_FOUND"`).
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::BackendUnavailable => "BACKEND_UNAVAILABLE",
            Self::IndexMissing => "INDEX_MISSING",
            Self::IndexStale => "INDEX_STALE",
            Self::WorkspaceNotReady => "WORKSPACE_NOT_READY",
            Self::Timeout => "TIMEOUT",
            Self::RateLimited => "RATE_LIMITED",
            Self::SymbolNotFound => "SYMBOL_NOT_FOUND",
            Self::SymbolDeleted => "SYMBOL_DELETED",
            Self::ScopeInvalid => "SCOPE_INVALID",
            Self::AliasCycle => "ALIAS_CYCLE",
            Self::AliasChainTooDeep => "ALIAS_CHAIN_TOO_DEEP",
            Self::BudgetExceeded => "BUDGET_EXCEEDED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Human-readable category label.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::BackendUnavailable | Self::IndexMissing | Self::IndexStale => "availability",
            Self::WorkspaceNotReady | Self::Timeout | Self::RateLimited => "capacity",
            Self::SymbolNotFound | Self::SymbolDeleted | Self::ScopeInvalid => "lookup",
            Self::AliasCycle | Self::AliasChainTooDeep => "identity",
            Self::BudgetExceeded | Self::InternalError => "system",
        }
    }

    /// Short human-readable description of this error code.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::BackendUnavailable => {
                "No fact source that could answer the query is currently reachable"
            }
            Self::IndexMissing => "The semantic index for this repository has not been generated",
            Self::IndexStale => "The semantic index predates the current repository state",
            Self::WorkspaceNotReady => {
                "The language server for this file type has not finished initializing"
            }
            Self::Timeout => "The query exceeded its deadline",
            Self::RateLimited => "The per-language request queue is full",
            Self::SymbolNotFound => "No symbol matches the given identifier",
            Self::SymbolDeleted => "The symbol has been deleted; a tombstone records when",
            Self::ScopeInvalid => "The requested scope is not valid for this tool",
            Self::AliasCycle => "Alias resolution revisited a node it had already seen",
            Self::AliasChainTooDeep => "Alias resolution exceeded the maximum chain depth",
            Self::BudgetExceeded => "The response could not fit the declared budget",
            Self::InternalError => "An unexpected internal failure occurred",
        }
    }

    /// Negative-cache TTL in seconds for this error class, if it is
    /// negative-cacheable at all.
    #[must_use]
    pub fn negative_cache_ttl_secs(&self) -> Option<u64> {
        match self {
            Self::SymbolNotFound => Some(60),
            Self::BackendUnavailable => Some(15),
            Self::WorkspaceNotReady => Some(10),
            Self::Timeout => Some(5),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::error::Error for ErrorCode {}

/// All error codes, in definition order.
pub const ALL_CODES: &[ErrorCode] = &[
    ErrorCode::BackendUnavailable,
    ErrorCode::IndexMissing,
    ErrorCode::IndexStale,
    ErrorCode::WorkspaceNotReady,
    ErrorCode::Timeout,
    ErrorCode::RateLimited,
    ErrorCode::SymbolNotFound,
    ErrorCode::SymbolDeleted,
    ErrorCode::ScopeInvalid,
    ErrorCode::AliasCycle,
    ErrorCode::AliasChainTooDeep,
    ErrorCode::BudgetExceeded,
    ErrorCode::InternalError,
];

/// Look up an [`ErrorCode`] by its code string.
#[must_use]
pub fn lookup_code(code: &str) -> Option<ErrorCode> {
    ALL_CODES.iter().find(|c| c.code() == code).copied()
}

// ---------------------------------------------------------------------------
// SuggestedFix
// ---------------------------------------------------------------------------

/// A structured remediation hint attached to an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SuggestedFix {
    /// Run a shell command (e.g. regenerate the index).
    RunCommand {
        /// The command line to run.
        command: String,
        /// What running it will accomplish.
        rationale: String,
    },
    /// Open a documentation page.
    OpenDocs {
        /// Documentation URL.
        url: String,
    },
    /// Install a missing tool.
    InstallTool {
        /// Name of the tool to install.
        tool: String,
        /// Install hint (package manager invocation or URL).
        hint: String,
    },
}

// ---------------------------------------------------------------------------
// CkbError
// ---------------------------------------------------------------------------

/// Rich error value carrying an [`ErrorCode`], a human message, structured
/// context, suggested fixes, and drilldowns.
///
/// This is the error shape that crosses the tool boundary. Internal layers
/// use `anyhow` and convert at the edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CkbError {
    /// The catalog error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Arbitrary key-value context (deterministic ordering).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
    /// Structured remediation hints.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_fixes: Vec<SuggestedFix>,
    /// Follow-up calls that may route around the failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drilldowns: Vec<Drilldown>,
}

impl CkbError {
    /// Start building an error for the given code.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: BTreeMap::new(),
            suggested_fixes: Vec::new(),
            drilldowns: Vec::new(),
        }
    }

    /// Add a key-value context entry.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Attach a suggested fix.
    #[must_use]
    pub fn with_fix(mut self, fix: SuggestedFix) -> Self {
        self.suggested_fixes.push(fix);
        self
    }

    /// Attach a drilldown.
    #[must_use]
    pub fn with_drilldown(mut self, drilldown: Drilldown) -> Self {
        self.drilldowns.push(drilldown);
        self
    }
}

impl fmt::Display for CkbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)?;
        if !self.context.is_empty() {
            write!(f, " (")?;
            let mut first = true;
            for (k, v) in &self.context {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{k}={v}")?;
                first = false;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for CkbError {}

/// Convenience result type for operations that fail with a [`CkbError`].
pub type CkbResult<T> = Result<T, CkbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_code_has_distinct_string() {
        let mut seen = std::collections::BTreeSet::new();
        for c in ALL_CODES {
            assert!(seen.insert(c.code()), "duplicate code string: {}", c.code());
        }
        assert_eq!(seen.len(), 13);
    }

    #[test]
    fn lookup_roundtrips_every_code() {
        for c in ALL_CODES {
            assert_eq!(lookup_code(c.code()), Some(*c));
        }
        assert_eq!(lookup_code("NO_SUCH_CODE"), None);
    }

    #[test]
    fn descriptions_are_nonempty() {
        for c in ALL_CODES {
            assert!(!c.description().is_empty(), "{c:?} has empty description");
            assert!(!c.category().is_empty());
        }
    }

    #[test]
    fn negative_cache_ttls_match_policy() {
        assert_eq!(
            ErrorCode::SymbolNotFound.negative_cache_ttl_secs(),
            Some(60)
        );
        assert_eq!(
            ErrorCode::BackendUnavailable.negative_cache_ttl_secs(),
            Some(15)
        );
        assert_eq!(
            ErrorCode::WorkspaceNotReady.negative_cache_ttl_secs(),
            Some(10)
        );
        assert_eq!(ErrorCode::Timeout.negative_cache_ttl_secs(), Some(5));
        assert_eq!(ErrorCode::AliasCycle.negative_cache_ttl_secs(), None);
    }

    #[test]
    fn display_includes_code_and_context() {
        let err = CkbError::new(ErrorCode::SymbolNotFound, "no such symbol")
            .with_context("stable_id", "ckb:foo:sym:ABCD");
        let s = err.to_string();
        assert!(s.contains("SYMBOL_NOT_FOUND"), "missing code in: {s}");
        assert!(s.contains("stable_id=ckb:foo:sym:ABCD"), "missing ctx in: {s}");
    }

    #[test]
    fn serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::AliasChainTooDeep).unwrap();
        assert_eq!(json, "\"ALIAS_CHAIN_TOO_DEEP\"");
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorCode::AliasChainTooDeep);
    }

    #[test]
    fn suggested_fix_serializes_with_kind_tag() {
        let fix = SuggestedFix::RunCommand {
            command: "ckb index regenerate".into(),
            rationale: "refresh the stale index".into(),
        };
        let v = serde_json::to_value(&fix).unwrap();
        assert_eq!(v["kind"], "run_command");
        assert_eq!(v["command"], "ckb index regenerate");
    }
}
