// SPDX-License-Identifier: MIT OR Apache-2.0
//! The shared fact model — symbols, references, modules, impact items.
//!
//! These are the wire shapes adapters produce and the orchestrator merges.
//! Nothing here knows where a fact came from; provenance lives on the
//! envelope.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Locations
// ---------------------------------------------------------------------------

/// A source location, repo-relative with forward slashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Location {
    /// Canonical repo-relative file path.
    pub file: String,
    /// One-based start line.
    pub start_line: u32,
    /// One-based start column.
    pub start_column: u32,
    /// One-based end line.
    pub end_line: u32,
    /// One-based end column.
    pub end_column: u32,
}

/// Whether a location can be trusted against the current working tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum LocationFreshness {
    /// The location was computed against the current repository state.
    Fresh,
    /// The repository has changed since the location was computed.
    MayBeStale,
}

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

/// The kind of a symbol, as reported by fact sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    /// A module, namespace, or package.
    Module,
    /// A type definition (struct, class, enum, interface).
    Type,
    /// A free function or method.
    Function,
    /// A field or property.
    Field,
    /// A constant or static.
    Constant,
    /// A variable binding.
    Variable,
    /// Anything the source could not classify.
    Unknown,
}

/// Symbol visibility as classified by the visibility cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Exported / importable from outside its module.
    Public,
    /// Reachable only within its defining scope.
    Internal,
    /// The cascade produced no verdict.
    Unknown,
}

/// A symbol as returned by a fact source, before identity stamping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SymbolFacts {
    /// Stable identifier (`ckb:<repo>:sym:<fingerprint>`), if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_id: Option<String>,
    /// Unqualified name.
    pub name: String,
    /// Containing scope (module path, class name), empty for top level.
    #[serde(default)]
    pub container: String,
    /// Symbol kind.
    pub kind: SymbolKind,
    /// Parameter count for callables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arity: Option<u32>,
    /// Full signature as written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_full: Option<String>,
    /// Whitespace- and name-insensitive signature form used for matching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_normalized: Option<String>,
    /// Visibility verdict, if the cascade ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    /// Confidence in the visibility verdict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility_confidence: Option<f64>,
    /// Owning module identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
    /// Definition site.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// Whether the location reflects the current repository state.
    pub location_freshness: LocationFreshness,
    /// Number of known references, when the source reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_count: Option<u32>,
    /// Source confidence in this record as a whole, in `[0, 1]`.
    pub confidence: f64,
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

/// How a reference uses the symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// The defining occurrence.
    Definition,
    /// A plain read or call.
    Use,
    /// A write or mutation.
    Write,
    /// An import / include.
    Import,
}

/// A single reference to a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Reference {
    /// Where the reference occurs.
    pub location: Location,
    /// How the symbol is used.
    pub kind: ReferenceKind,
    /// Source confidence, in `[0, 1]`.
    pub confidence: f64,
}

impl Reference {
    /// The merge key for union-mode deduplication: a hash over
    /// `(file, start_line, start_column, kind)`.
    #[must_use]
    pub fn merge_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.location.file.as_bytes());
        hasher.update([0]);
        hasher.update(self.location.start_line.to_be_bytes());
        hasher.update(self.location.start_column.to_be_bytes());
        hasher.update(format!("{:?}", self.kind).as_bytes());
        let digest = hasher.finalize();
        hex_lower(&digest[..16])
    }
}

// ---------------------------------------------------------------------------
// Modules and impact
// ---------------------------------------------------------------------------

/// An architectural module summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ModuleFacts {
    /// Module identifier (usually its canonical path).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Number of symbols defined in the module.
    pub symbol_count: u32,
    /// Number of inbound dependencies on the module.
    pub impact_count: u32,
}

/// The kind of an impact item, ordered by display priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ImpactKind {
    /// A direct caller of the changed symbol.
    Caller,
    /// A type or function that implements / overrides it.
    Implementer,
    /// A transitive dependent reached through the call graph.
    Transitive,
    /// A test exercising the symbol.
    Test,
}

impl ImpactKind {
    /// Display priority; lower sorts first.
    #[must_use]
    pub fn priority(&self) -> u8 {
        match self {
            Self::Caller => 0,
            Self::Implementer => 1,
            Self::Transitive => 2,
            Self::Test => 3,
        }
    }
}

/// One entry in an impact analysis result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ImpactItem {
    /// Stable ID of the impacted symbol.
    pub stable_id: String,
    /// Display name.
    pub name: String,
    /// How the impact reaches this symbol.
    pub kind: ImpactKind,
    /// Confidence in the edge, in `[0, 1]`.
    pub confidence: f64,
    /// Graph distance from the queried symbol.
    pub depth: u32,
}

/// Lowercase hex encoding.
#[must_use]
pub fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
    }
    out
}
