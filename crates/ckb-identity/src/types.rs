// SPDX-License-Identifier: MIT OR Apache-2.0
//! Identity record shapes: fingerprints, lifecycle states, aliases.

use chrono::{DateTime, Utc};
use ckb_core::{BackendKind, Location, LocationFreshness, SymbolKind, hex_lower};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The identity-bearing fields of a symbol.
///
/// Two symbols with equal fingerprints are the same symbol across index
/// refreshes; the stable ID is a pure function of this struct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolFingerprint {
    /// Containing scope (module path, class), empty for top level.
    pub container: String,
    /// Unqualified name.
    pub name: String,
    /// Symbol kind.
    pub kind: SymbolKind,
    /// Parameter count for callables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arity: Option<u32>,
    /// Whitespace- and parameter-name-insensitive signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_signature: Option<String>,
}

impl SymbolFingerprint {
    /// The stable fingerprint component of the symbol ID: a 16-byte hex
    /// SHA-256 over the identity fields with explicit separators.
    #[must_use]
    pub fn stable_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.container.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.name.as_bytes());
        hasher.update([0x1f]);
        hasher.update(format!("{:?}", self.kind).as_bytes());
        hasher.update([0x1f]);
        if let Some(arity) = self.arity {
            hasher.update(arity.to_be_bytes());
        }
        hasher.update([0x1f]);
        if let Some(ref sig) = self.normalized_signature {
            hasher.update(sig.as_bytes());
        }
        let digest = hasher.finalize();
        hex_lower(&digest[..16])
    }
}

/// Lifecycle state of an identity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolState {
    /// The symbol exists in the latest refresh.
    Active,
    /// The symbol disappeared; the row is a tombstone.
    Deleted,
    /// The symbol's status could not be determined.
    Unknown,
}

/// A mapping from a backend's native identifier to this record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendMapping {
    /// The backend that owns the native ID.
    pub backend: BackendKind,
    /// Backend-native identifier (e.g. a SCIP symbol string).
    pub native_id: String,
}

/// One row in the identity store.
///
/// `stable_id` is canonical and never mutated after creation; deletion is a
/// state transition with tombstone timestamps, never a row removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Canonical stable ID (`ckb:<repo>:sym:<hash>`).
    pub stable_id: String,
    /// Hash qualifying a specific definition version, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_version_id: Option<String>,
    /// Identity fingerprint.
    pub fingerprint: SymbolFingerprint,
    /// Last known definition site.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// Whether the location reflects the current repository state.
    pub location_freshness: LocationFreshness,
    /// Lifecycle state.
    pub state: SymbolState,
    /// When the tombstone was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Repo-state fingerprint in which the deletion was observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_in_state: Option<String>,
    /// Native identifiers across backends.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backend_mappings: Vec<BackendMapping>,
}

/// Why an alias redirect exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AliasReason {
    /// The symbol kept its container but changed name.
    Renamed,
    /// The symbol kept its name but changed container or file.
    Moved,
    /// Two old symbols collapsed into one successor.
    Merged,
    /// A fuzzy signature/container/kind match.
    FuzzyMatch,
}

/// A redirect edge from a retired stable ID to its successor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alias {
    /// The retired stable ID.
    pub old_stable_id: String,
    /// The successor stable ID.
    pub new_stable_id: String,
    /// Why the redirect exists.
    pub reason: AliasReason,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// When the alias was created.
    pub created_at: DateTime<Utc>,
    /// Repo-state fingerprint the reconciliation ran against.
    pub created_in_state: String,
}

/// Maximum alias-chain depth `resolve` will follow.
pub const MAX_ALIAS_DEPTH: usize = 3;
