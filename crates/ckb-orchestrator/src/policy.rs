// SPDX-License-Identifier: MIT OR Apache-2.0
//! Effective query policy: preference ladder, caps, timeouts, windows.

use ckb_core::{BackendKind, MergeMode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Serde helper — `Duration` as integer milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(val: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        val.as_millis().serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let ms: u64 = u64::deserialize(de)?;
        Ok(Duration::from_millis(ms))
    }
}

/// The policy every query runs under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorPolicy {
    /// Preference ladder, best first.
    pub preference: Vec<BackendKind>,
    /// Per-backend in-flight cap: indexed.
    pub indexed_concurrency: usize,
    /// Per-backend in-flight cap: language server.
    pub language_server_concurrency: usize,
    /// Per-backend in-flight cap: VCS.
    pub vcs_concurrency: usize,
    /// Per-backend call timeout.
    #[serde(with = "duration_millis")]
    pub backend_timeout: Duration,
    /// Overall timeout for union-mode queries.
    #[serde(with = "duration_millis")]
    pub union_timeout: Duration,
    /// Window within which identical queries coalesce.
    #[serde(with = "duration_millis")]
    pub coalescing_window: Duration,
    /// Primary-completeness threshold below which the ladder descends.
    pub completeness_threshold: f64,
    /// Default merge mode.
    pub merge_mode: MergeMode,
}

impl Default for OrchestratorPolicy {
    fn default() -> Self {
        Self {
            preference: vec![
                BackendKind::IndexedSemantic,
                BackendKind::CrossRepo,
                BackendKind::LanguageServer,
                BackendKind::Vcs,
                BackendKind::Scanner,
            ],
            indexed_concurrency: 10,
            language_server_concurrency: 3,
            vcs_concurrency: 5,
            backend_timeout: Duration::from_secs(10),
            union_timeout: Duration::from_secs(60),
            coalescing_window: Duration::from_millis(50),
            completeness_threshold: 0.8,
            merge_mode: MergeMode::PreferFirst,
        }
    }
}

impl OrchestratorPolicy {
    /// In-flight cap for one backend class.
    #[must_use]
    pub fn concurrency_for(&self, kind: BackendKind) -> usize {
        match kind {
            BackendKind::IndexedSemantic | BackendKind::CrossRepo => self.indexed_concurrency,
            BackendKind::LanguageServer => self.language_server_concurrency,
            BackendKind::Vcs | BackendKind::Scanner => self.vcs_concurrency,
        }
    }

    /// Stable hash of the policy, part of the view-cache key.
    #[must_use]
    pub fn config_hash(&self) -> String {
        let serialized = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(serialized.as_bytes());
        ckb_core::hex_lower(&hasher.finalize()[..8])
    }
}

/// Which repo-state component a tool keys its cache on. Metadata-only
/// tools use `head`; location-sensitive tools use `full`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolClass {
    /// `status`, `get_symbol` — cache by HEAD commit.
    Metadata,
    /// `references`, `impact`, `architecture` — cache by full fingerprint.
    LocationSensitive,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ladder_matches_precedence() {
        let p = OrchestratorPolicy::default();
        let ranks: Vec<u8> = p.preference.iter().map(|k| k.precedence()).collect();
        let mut sorted = ranks.clone();
        sorted.sort_unstable();
        assert_eq!(ranks, sorted, "ladder must be ordered by precedence");
    }

    #[test]
    fn default_caps_follow_contract() {
        let p = OrchestratorPolicy::default();
        assert_eq!(p.concurrency_for(BackendKind::IndexedSemantic), 10);
        assert_eq!(p.concurrency_for(BackendKind::LanguageServer), 3);
        assert_eq!(p.concurrency_for(BackendKind::Vcs), 5);
        assert_eq!(p.coalescing_window, Duration::from_millis(50));
        assert_eq!(p.union_timeout, Duration::from_secs(60));
        assert!((p.completeness_threshold - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn config_hash_is_stable_and_sensitive() {
        let a = OrchestratorPolicy::default();
        let b = OrchestratorPolicy::default();
        assert_eq!(a.config_hash(), b.config_hash());
        let c = OrchestratorPolicy {
            completeness_threshold: 0.9,
            ..OrchestratorPolicy::default()
        };
        assert_ne!(a.config_hash(), c.config_hash());
    }
}
