// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! ckb-backend
//!
//! The uniform interface over heterogeneous fact sources, and the concrete
//! adapters: a SCIP-class semantic index, a supervised language server,
//! the VCS, and a plain-text scanner.
//!
//! Source-of-truth contract: identity anchors and call graphs come only
//! from indexed sources; a language server never mints stable IDs;
//! visibility cascades indexed-modifiers → reference-analysis →
//! naming-convention.

use async_trait::async_trait;
use ckb_core::{
    BackendKind, CompletenessReason, ErrorCode, ImpactItem, ModuleFacts, Reference, SymbolFacts,
    SymbolId,
};
use serde::{Deserialize, Serialize};

/// The SCIP-class index adapter.
pub mod indexed;
/// The language-server adapter over the supervisor.
pub mod lsp;
/// The text-scan fallback adapter.
pub mod scanner;
/// Scripted adapter doubles for tests.
pub mod testing;
/// The version-control adapter.
pub mod vcs;

// ---------------------------------------------------------------------------
// Capabilities and results
// ---------------------------------------------------------------------------

/// What one adapter is allowed and able to answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterCapabilities {
    /// Can answer symbol lookups.
    pub symbols: bool,
    /// Can enumerate references.
    pub references: bool,
    /// Can list modules.
    pub modules: bool,
    /// Can answer impact queries (requires a call graph).
    pub impact: bool,
    /// May act as an identity anchor (indexed sources only).
    pub mints_stable_ids: bool,
    /// Reports visibility modifiers.
    pub visibility: bool,
}

/// A possibly-incomplete answer from one adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialResult<T> {
    /// The data produced.
    pub data: T,
    /// Whether entries were dropped to honor a limit.
    pub truncated: bool,
    /// Completeness in `[0, 1]`.
    pub completeness: f64,
    /// Why the completeness is what it is.
    pub completeness_reason: CompletenessReason,
}

impl<T> PartialResult<T> {
    /// A complete answer from a full-fidelity backend.
    #[must_use]
    pub fn full(data: T) -> Self {
        Self {
            data,
            truncated: false,
            completeness: 1.0,
            completeness_reason: CompletenessReason::FullBackend,
        }
    }

    /// A partial answer with an explicit completeness and reason.
    #[must_use]
    pub fn partial(data: T, completeness: f64, reason: CompletenessReason) -> Self {
        Self {
            data,
            truncated: false,
            completeness,
            completeness_reason: reason,
        }
    }

    /// Mark the result truncated.
    #[must_use]
    pub fn truncated(mut self) -> Self {
        self.truncated = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// A symbol query with identity context already resolved.
///
/// Adapters receive the human-meaningful identity fields; the opaque stable
/// ID alone is not enough to drive a text search or an index lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolQuery {
    /// The stable symbol ID being queried.
    pub id: SymbolId,
    /// Unqualified name.
    pub name: String,
    /// Containing scope.
    #[serde(default)]
    pub container: String,
    /// Backend-native ID hint, when the identity store has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_hint: Option<String>,
    /// File the symbol is defined in, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hint: Option<String>,
    /// Language key, for routing to the right server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Scope restriction for reference queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceScope {
    /// Restrict to one file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Restrict to one module (path prefix).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

impl ReferenceScope {
    /// Whether a path falls inside the scope.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        if let Some(file) = &self.file
            && !ckb_core::paths::paths_equal(file, path)
        {
            return false;
        }
        if let Some(module) = &self.module
            && !ckb_core::paths::is_under(module, path)
        {
            return false;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors an adapter can surface. Mapped onto the public error taxonomy at
/// the orchestrator boundary.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The source cannot be consulted at all right now.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// The language server has not finished initializing.
    #[error("workspace not ready for '{language}'")]
    NotReady {
        /// Language whose server is warming up.
        language: String,
    },
    /// The per-language queue is saturated.
    #[error("rate limited")]
    RateLimited,
    /// The adapter-level deadline elapsed.
    #[error("adapter timed out")]
    Timeout,
    /// An I/O failure underneath the adapter.
    #[error("adapter i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Anything else.
    #[error("adapter internal error: {0}")]
    Internal(String),
}

impl AdapterError {
    /// The public error code for this failure.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Unavailable(_) => ErrorCode::BackendUnavailable,
            Self::NotReady { .. } => ErrorCode::WorkspaceNotReady,
            Self::RateLimited => ErrorCode::RateLimited,
            Self::Timeout => ErrorCode::Timeout,
            Self::Io(_) | Self::Internal(_) => ErrorCode::InternalError,
        }
    }
}

// ---------------------------------------------------------------------------
// The adapter trait
// ---------------------------------------------------------------------------

/// Uniform interface over one fact source.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Which precedence class this adapter belongs to.
    fn kind(&self) -> BackendKind;

    /// What this adapter can answer.
    fn capabilities(&self) -> AdapterCapabilities;

    /// Whether the source can currently be consulted.
    async fn is_available(&self) -> bool;

    /// Look up one symbol.
    async fn get_symbol(
        &self,
        query: &SymbolQuery,
    ) -> Result<PartialResult<Option<SymbolFacts>>, AdapterError>;

    /// Enumerate references to a symbol within a scope.
    async fn find_references(
        &self,
        query: &SymbolQuery,
        scope: &ReferenceScope,
        limit: usize,
    ) -> Result<PartialResult<Vec<Reference>>, AdapterError>;

    /// List architectural modules.
    async fn list_modules(&self) -> Result<PartialResult<Vec<ModuleFacts>>, AdapterError>;

    /// Compute impact out to `depth` hops.
    async fn impact(
        &self,
        query: &SymbolQuery,
        depth: u32,
    ) -> Result<PartialResult<Vec<ImpactItem>>, AdapterError>;
}
