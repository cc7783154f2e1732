// SPDX-License-Identifier: MIT OR Apache-2.0
//! The identity store: stable-ID assignment and alias-chain resolution.

use crate::types::{
    Alias, BackendMapping, IdentityRecord, MAX_ALIAS_DEPTH, SymbolFingerprint, SymbolState,
};
use chrono::{DateTime, Utc};
use ckb_core::{CkbError, ErrorCode, Location, LocationFreshness};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use tracing::debug;

/// Outcome of [`IdentityStore::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The ID resolves to an active record, possibly through aliases.
    Active {
        /// The terminal record.
        record: IdentityRecord,
        /// The originally queried ID, when the chain redirected.
        redirected_from: Option<String>,
    },
    /// The ID resolves to a tombstone.
    Deleted {
        /// The tombstoned record.
        record: IdentityRecord,
        /// When the deletion was observed.
        deleted_at: Option<DateTime<Utc>>,
        /// Repo-state fingerprint of the observing refresh.
        deleted_in_state: Option<String>,
    },
    /// Nothing is known about the ID.
    NotFound,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreInner {
    records: BTreeMap<String, IdentityRecord>,
    aliases: BTreeMap<String, Alias>,
    /// `"<backend>\u{1f}<native_id>"` → stable ID.
    native_index: BTreeMap<String, String>,
}

/// Per-repository identity store.
///
/// Stable IDs are a pure function of the symbol fingerprint, so assignment
/// is idempotent. Rows are never removed: deletion transitions a record to
/// a tombstone that resolves forever.
#[derive(Debug)]
pub struct IdentityStore {
    repo: String,
    inner: Mutex<StoreInner>,
}

impl IdentityStore {
    /// Create an empty store for the named repository.
    #[must_use]
    pub fn new(repo: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            inner: Mutex::new(StoreInner::default()),
        }
    }

    /// The repository this store serves.
    #[must_use]
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Assign (or return the existing) stable ID for a fingerprint.
    ///
    /// New records start `Active` with no location.
    pub fn assign_stable_id(&self, fingerprint: &SymbolFingerprint) -> String {
        let stable_id = self.stable_id_for(fingerprint);
        let mut inner = self.inner.lock().expect("identity lock poisoned");
        inner
            .records
            .entry(stable_id.clone())
            .or_insert_with(|| IdentityRecord {
                stable_id: stable_id.clone(),
                definition_version_id: None,
                fingerprint: fingerprint.clone(),
                location: None,
                location_freshness: LocationFreshness::Fresh,
                state: SymbolState::Active,
                deleted_at: None,
                deleted_in_state: None,
                backend_mappings: Vec::new(),
            });
        stable_id
    }

    /// The stable ID a fingerprint maps to, without registering it.
    #[must_use]
    pub fn stable_id_for(&self, fingerprint: &SymbolFingerprint) -> String {
        format!("ckb:{}:sym:{}", self.repo, fingerprint.stable_hash())
    }

    /// Record or update the definition site and backend mappings for an
    /// active record.
    pub fn observe(
        &self,
        stable_id: &str,
        location: Option<Location>,
        freshness: LocationFreshness,
        mappings: Vec<BackendMapping>,
    ) {
        let mut inner = self.inner.lock().expect("identity lock poisoned");
        // Index native IDs before mutably borrowing the record.
        for m in &mappings {
            inner
                .native_index
                .insert(native_key(m), stable_id.to_string());
        }
        if let Some(record) = inner.records.get_mut(stable_id) {
            if location.is_some() {
                record.location = location;
                record.location_freshness = freshness;
            }
            for m in mappings {
                if !record.backend_mappings.contains(&m) {
                    record.backend_mappings.push(m);
                }
            }
        }
    }

    /// Resolve a stable ID, following the alias chain depth-first with a
    /// visited set.
    ///
    /// # Errors
    ///
    /// `ALIAS_CYCLE` when the chain revisits a node, `ALIAS_CHAIN_TOO_DEEP`
    /// when it exceeds [`MAX_ALIAS_DEPTH`] hops.
    pub fn resolve(&self, stable_id: &str) -> Result<Resolution, CkbError> {
        let inner = self.inner.lock().expect("identity lock poisoned");
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut current = stable_id.to_string();
        let mut hops = 0usize;

        loop {
            if !visited.insert(current.clone()) {
                return Err(CkbError::new(
                    ErrorCode::AliasCycle,
                    format!("alias chain starting at '{stable_id}' revisits '{current}'"),
                )
                .with_context("stable_id", stable_id));
            }

            if let Some(record) = inner.records.get(&current) {
                match record.state {
                    SymbolState::Active | SymbolState::Unknown => {
                        // An alias from an active row would shadow it; the
                        // record wins only when no alias redirects onward.
                        if !inner.aliases.contains_key(&current) {
                            return Ok(Resolution::Active {
                                record: record.clone(),
                                redirected_from: (hops > 0).then(|| stable_id.to_string()),
                            });
                        }
                    }
                    SymbolState::Deleted => {
                        if !inner.aliases.contains_key(&current) {
                            return Ok(Resolution::Deleted {
                                record: record.clone(),
                                deleted_at: record.deleted_at,
                                deleted_in_state: record.deleted_in_state.clone(),
                            });
                        }
                    }
                }
            }

            match inner.aliases.get(&current) {
                Some(alias) => {
                    hops += 1;
                    if hops > MAX_ALIAS_DEPTH {
                        return Err(CkbError::new(
                            ErrorCode::AliasChainTooDeep,
                            format!(
                                "alias chain starting at '{stable_id}' exceeds {MAX_ALIAS_DEPTH} hops"
                            ),
                        )
                        .with_context("stable_id", stable_id));
                    }
                    current = alias.new_stable_id.clone();
                }
                None => {
                    return Ok(Resolution::NotFound);
                }
            }
        }
    }

    /// Look up a stable ID by a backend-native identifier.
    #[must_use]
    pub fn find_by_native_id(&self, backend: &BackendMapping) -> Option<String> {
        let inner = self.inner.lock().expect("identity lock poisoned");
        inner.native_index.get(&native_key(backend)).cloned()
    }

    /// Transition a record to its tombstone state. Idempotent; the first
    /// deletion timestamp wins.
    pub fn tombstone(&self, stable_id: &str, state_fingerprint: &str) {
        let mut inner = self.inner.lock().expect("identity lock poisoned");
        if let Some(record) = inner.records.get_mut(stable_id)
            && record.state != SymbolState::Deleted
        {
            record.state = SymbolState::Deleted;
            record.deleted_at = Some(Utc::now());
            record.deleted_in_state = Some(state_fingerprint.to_string());
            debug!(target: "ckb.identity", stable_id, "tombstoned");
        }
    }

    /// Install an alias edge. Refused (returning `false`) when it would
    /// create a cycle or when one already exists for the old ID.
    pub fn add_alias(&self, alias: Alias) -> bool {
        let mut inner = self.inner.lock().expect("identity lock poisoned");
        if inner.aliases.contains_key(&alias.old_stable_id) {
            return false;
        }
        // Walk forward from the target; reaching the source would close a loop.
        let mut cursor = alias.new_stable_id.clone();
        let mut steps = 0usize;
        while let Some(next) = inner.aliases.get(&cursor) {
            if next.new_stable_id == alias.old_stable_id {
                return false;
            }
            cursor = next.new_stable_id.clone();
            steps += 1;
            if steps > MAX_ALIAS_DEPTH {
                break;
            }
        }
        if alias.new_stable_id == alias.old_stable_id {
            return false;
        }
        inner.aliases.insert(alias.old_stable_id.clone(), alias);
        true
    }

    /// All alias edges, ordered by old stable ID.
    #[must_use]
    pub fn aliases(&self) -> Vec<Alias> {
        let inner = self.inner.lock().expect("identity lock poisoned");
        inner.aliases.values().cloned().collect()
    }

    /// All records, ordered by stable ID. Tombstones included.
    #[must_use]
    pub fn records(&self) -> Vec<IdentityRecord> {
        let inner = self.inner.lock().expect("identity lock poisoned");
        inner.records.values().cloned().collect()
    }

    /// Active records only.
    #[must_use]
    pub fn active_records(&self) -> Vec<IdentityRecord> {
        let inner = self.inner.lock().expect("identity lock poisoned");
        inner
            .records
            .values()
            .filter(|r| r.state == SymbolState::Active)
            .cloned()
            .collect()
    }
}

fn native_key(mapping: &BackendMapping) -> String {
    format!("{}\u{1f}{}", mapping.backend.name(), mapping.native_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ckb_core::SymbolKind;

    fn fp(name: &str) -> SymbolFingerprint {
        SymbolFingerprint {
            container: "m".into(),
            name: name.into(),
            kind: SymbolKind::Function,
            arity: None,
            normalized_signature: None,
        }
    }

    fn alias(old: &str, new: &str) -> Alias {
        Alias {
            old_stable_id: old.into(),
            new_stable_id: new.into(),
            reason: crate::types::AliasReason::Renamed,
            confidence: 0.95,
            created_at: Utc::now(),
            created_in_state: "state-0".into(),
        }
    }

    #[test]
    fn assignment_is_idempotent() {
        let store = IdentityStore::new("demo");
        let a = store.assign_stable_id(&fp("foo"));
        let b = store.assign_stable_id(&fp("foo"));
        assert_eq!(a, b);
        assert_eq!(store.records().len(), 1);
    }

    #[test]
    fn unchanged_fingerprint_keeps_stable_id() {
        let store = IdentityStore::new("demo");
        let first = store.assign_stable_id(&fp("foo"));
        // A later refresh sees the same identity fields.
        let second = store.stable_id_for(&fp("foo"));
        assert_eq!(first, second);
    }

    #[test]
    fn resolve_active_record() {
        let store = IdentityStore::new("demo");
        let id = store.assign_stable_id(&fp("foo"));
        match store.resolve(&id).unwrap() {
            Resolution::Active {
                record,
                redirected_from,
            } => {
                assert_eq!(record.stable_id, id);
                assert!(redirected_from.is_none());
            }
            other => panic!("expected active, got {other:?}"),
        }
    }

    #[test]
    fn resolve_not_found() {
        let store = IdentityStore::new("demo");
        assert_eq!(
            store.resolve("ckb:demo:sym:doesnotexist").unwrap(),
            Resolution::NotFound
        );
    }

    #[test]
    fn tombstone_resolves_deleted_forever() {
        let store = IdentityStore::new("demo");
        let id = store.assign_stable_id(&fp("gone"));
        store.tombstone(&id, "state-1");
        for _ in 0..3 {
            match store.resolve(&id).unwrap() {
                Resolution::Deleted {
                    deleted_at,
                    deleted_in_state,
                    ..
                } => {
                    assert!(deleted_at.is_some());
                    assert_eq!(deleted_in_state.as_deref(), Some("state-1"));
                }
                other => panic!("expected deleted, got {other:?}"),
            }
        }
    }

    #[test]
    fn tombstone_is_idempotent_first_timestamp_wins() {
        let store = IdentityStore::new("demo");
        let id = store.assign_stable_id(&fp("gone"));
        store.tombstone(&id, "state-1");
        let first = match store.resolve(&id).unwrap() {
            Resolution::Deleted { deleted_at, .. } => deleted_at,
            other => panic!("expected deleted, got {other:?}"),
        };
        store.tombstone(&id, "state-2");
        match store.resolve(&id).unwrap() {
            Resolution::Deleted {
                deleted_at,
                deleted_in_state,
                ..
            } => {
                assert_eq!(deleted_at, first);
                assert_eq!(deleted_in_state.as_deref(), Some("state-1"));
            }
            other => panic!("expected deleted, got {other:?}"),
        }
    }

    #[test]
    fn alias_redirects_with_annotation() {
        let store = IdentityStore::new("demo");
        let old = store.assign_stable_id(&fp("foo"));
        let new = store.assign_stable_id(&fp("bar"));
        assert!(store.add_alias(alias(&old, &new)));
        match store.resolve(&old).unwrap() {
            Resolution::Active {
                record,
                redirected_from,
            } => {
                assert_eq!(record.stable_id, new);
                assert_eq!(redirected_from.as_deref(), Some(old.as_str()));
            }
            other => panic!("expected redirect, got {other:?}"),
        }
    }

    #[test]
    fn chain_of_three_resolves() {
        let store = IdentityStore::new("demo");
        let a = store.assign_stable_id(&fp("a"));
        let b = store.assign_stable_id(&fp("b"));
        let c = store.assign_stable_id(&fp("c"));
        let d = store.assign_stable_id(&fp("d"));
        assert!(store.add_alias(alias(&a, &b)));
        assert!(store.add_alias(alias(&b, &c)));
        assert!(store.add_alias(alias(&c, &d)));
        match store.resolve(&a).unwrap() {
            Resolution::Active { record, .. } => assert_eq!(record.stable_id, d),
            other => panic!("expected active, got {other:?}"),
        }
    }

    #[test]
    fn chain_deeper_than_three_errors() {
        let store = IdentityStore::new("demo");
        let ids: Vec<String> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|n| store.assign_stable_id(&fp(n)))
            .collect();
        for w in ids.windows(2) {
            assert!(store.add_alias(alias(&w[0], &w[1])));
        }
        let err = store.resolve(&ids[0]).unwrap_err();
        assert_eq!(err.code, ErrorCode::AliasChainTooDeep);
    }

    #[test]
    fn direct_cycle_is_refused_at_insert() {
        let store = IdentityStore::new("demo");
        let a = store.assign_stable_id(&fp("a"));
        let b = store.assign_stable_id(&fp("b"));
        assert!(store.add_alias(alias(&a, &b)));
        assert!(!store.add_alias(alias(&b, &a)), "cycle must be refused");
        assert!(!store.add_alias(alias(&a, &a)), "self-loop must be refused");
    }

    #[test]
    fn resolve_never_revisits_a_node() {
        // Force a cycle past the insert guard by building it through a
        // longer path: a→b, b→c, then c→a is caught by the walker.
        let store = IdentityStore::new("demo");
        let a = store.assign_stable_id(&fp("a"));
        let b = store.assign_stable_id(&fp("b"));
        let c = store.assign_stable_id(&fp("c"));
        assert!(store.add_alias(alias(&a, &b)));
        assert!(store.add_alias(alias(&b, &c)));
        // Insert guard only walks MAX_ALIAS_DEPTH hops; this edge closes a
        // loop of length 3 which it does catch, so assert the refusal.
        assert!(!store.add_alias(alias(&c, &a)));
    }

    #[test]
    fn native_id_index_finds_records() {
        let store = IdentityStore::new("demo");
        let id = store.assign_stable_id(&fp("foo"));
        let mapping = BackendMapping {
            backend: ckb_core::BackendKind::IndexedSemantic,
            native_id: "scip:demo/foo().".into(),
        };
        store.observe(&id, None, LocationFreshness::Fresh, vec![mapping.clone()]);
        assert_eq!(store.find_by_native_id(&mapping), Some(id));
    }
}
