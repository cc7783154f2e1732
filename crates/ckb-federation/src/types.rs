// SPDX-License-Identifier: MIT OR Apache-2.0
//! Federation catalog row types.

use chrono::{DateTime, Utc};
use ckb_core::hex_lower;
use ckb_detectors::{ContractType, ContractVisibility, EvidenceTier};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One registered repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoRecord {
    /// Stable UID within the federation.
    pub repo_uid: String,
    /// Human-meaningful repository ID (usually its name).
    pub repo_id: String,
    /// Display name.
    pub name: String,
    /// Checkout path the last sync ran against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_path: Option<String>,
    /// When the repo last completed a sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Source-store schema version observed at sync time.
    pub schema_version: u32,
}

/// A contract row. `id` is `<repoUid>:<path>` and stable within a
/// repo-uid lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractRecord {
    /// `<repoUid>:<path>`.
    pub id: String,
    /// Owning repository UID.
    pub repo_uid: String,
    /// Owning repository ID.
    pub repo_id: String,
    /// Repo-relative path of the contract file.
    pub path: String,
    /// Contract format.
    pub contract_type: ContractType,
    /// Type-specific metadata.
    pub metadata: serde_json::Value,
    /// Visibility verdict.
    pub visibility: ContractVisibility,
    /// Which rule produced the verdict.
    pub visibility_basis: String,
    /// Confidence in the verdict.
    pub confidence: f64,
    /// When the contract was last indexed.
    pub indexed_at: DateTime<Utc>,
}

impl ContractRecord {
    /// Compose the stable contract ID.
    #[must_use]
    pub fn compose_id(repo_uid: &str, path: &str) -> String {
        format!("{repo_uid}:{path}")
    }
}

/// A consumer edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// Row ID assigned by the store; stable across re-upserts.
    pub id: i64,
    /// Unique digest of `(contract, consumer repo, evidence, paths)`.
    pub edge_key: String,
    /// The consumed contract.
    pub contract_id: String,
    /// Consuming repository UID.
    pub consumer_repo_uid: String,
    /// Consuming repository ID.
    pub consumer_repo_id: String,
    /// Consuming files.
    pub consumer_paths: Vec<String>,
    /// Evidence quality.
    pub tier: EvidenceTier,
    /// Evidence type.
    pub evidence_type: String,
    /// Confidence in the edge.
    pub confidence: f64,
    /// Detector that produced the evidence.
    pub detector: String,
    /// Last detection time.
    pub detected_at: DateTime<Utc>,
    /// Whether an operator suppressed the edge.
    pub suppressed: bool,
    /// Who suppressed it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppressed_by: Option<String>,
    /// Whether an operator verified the edge.
    pub verified: bool,
    /// Who verified it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_by: Option<String>,
}

/// Compute the edge key: a 16-byte hex digest over the sorted inputs.
///
/// Invariant under permutations of `consumer_paths`.
#[must_use]
pub fn edge_key(
    contract_id: &str,
    consumer_repo_uid: &str,
    evidence_type: &str,
    consumer_paths: &[String],
) -> String {
    let mut sorted: Vec<&str> = consumer_paths.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    hasher.update(contract_id.as_bytes());
    hasher.update([b'|']);
    hasher.update(consumer_repo_uid.as_bytes());
    hasher.update([b'|']);
    hasher.update(evidence_type.as_bytes());
    hasher.update([b'|']);
    for path in sorted {
        hasher.update(path.as_bytes());
        hasher.update([0x1f]);
    }
    hex_lower(&hasher.finalize()[..16])
}

/// A federated module row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRecord {
    /// Owning repository UID.
    pub repo_uid: String,
    /// Module identifier within the repo.
    pub module_id: String,
    /// Display name.
    pub name: String,
    /// Repo-relative path.
    pub path: String,
    /// Number of symbols defined in the module.
    pub symbol_count: u32,
    /// Short free-text summary, searchable.
    #[serde(default)]
    pub summary: String,
}

/// Who owns paths matching a pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    /// Owning repository UID.
    pub repo_uid: String,
    /// Glob-style path pattern.
    pub pattern: String,
    /// Owner type (`team`, `person`).
    pub owner_type: String,
    /// Owner identifier.
    pub owner_id: String,
    /// Confidence the record is current.
    pub confidence: f64,
}

/// A change-frequency hotspot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotspotRecord {
    /// Owning repository UID.
    pub repo_uid: String,
    /// Repo-relative path of the hotspot target.
    pub path: String,
    /// Hotspot score; higher is hotter.
    pub score: f64,
    /// When the snapshot was taken.
    pub snapshot_at: DateTime<Utc>,
}

/// An architecture decision record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Owning repository UID.
    pub repo_uid: String,
    /// Decision identifier within the repo.
    pub decision_id: String,
    /// Title, searchable.
    pub title: String,
    /// Body, searchable.
    #[serde(default)]
    pub body: String,
    /// When the decision was made.
    pub decided_at: DateTime<Utc>,
}

/// A proto import graph row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtoImportRecord {
    /// The importing contract ID.
    pub importer_contract_id: String,
    /// The imported contract ID.
    pub imported_contract_id: String,
    /// The import string as written.
    pub import_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_key_is_invariant_under_path_permutation() {
        let a = edge_key(
            "uid:proto/u.proto",
            "consumer",
            "proto-import",
            &["x.proto".into(), "y.proto".into()],
        );
        let b = edge_key(
            "uid:proto/u.proto",
            "consumer",
            "proto-import",
            &["y.proto".into(), "x.proto".into()],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn edge_key_distinguishes_every_component() {
        let base = edge_key("c", "r", "e", &["p".into()]);
        assert_ne!(base, edge_key("c2", "r", "e", &["p".into()]));
        assert_ne!(base, edge_key("c", "r2", "e", &["p".into()]));
        assert_ne!(base, edge_key("c", "r", "e2", &["p".into()]));
        assert_ne!(base, edge_key("c", "r", "e", &["p2".into()]));
    }

    #[test]
    fn edge_key_is_16_byte_hex() {
        let key = edge_key("c", "r", "e", &[]);
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn contract_id_composition() {
        assert_eq!(
            ContractRecord::compose_id("uid-1", "proto/api/v1/user.proto"),
            "uid-1:proto/api/v1/user.proto"
        );
    }
}
