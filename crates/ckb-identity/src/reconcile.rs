// SPDX-License-Identifier: MIT OR Apache-2.0
//! Refresh-time reconciliation.
//!
//! After an index refresh, old identity rows are matched against the new
//! symbol set. Match strategy, in order:
//!
//! 1. Backend-native-ID match → alias at confidence 0.95.
//! 2. Fuzzy match over normalized signature + container + kind, scoring
//!    ≥ 0.6 → alias at the fuzzy score.
//! 3. No match → the old row transitions to a tombstone recording the
//!    repo state in which the deletion was observed.

use crate::store::IdentityStore;
use crate::types::{Alias, AliasReason, BackendMapping, SymbolFingerprint};
use chrono::Utc;
use tracing::{debug, info};

/// A symbol observed in a refresh, paired with its native IDs.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedSymbol {
    /// Identity fingerprint extracted from the fact source.
    pub fingerprint: SymbolFingerprint,
    /// Backend-native identifiers for this symbol.
    pub mappings: Vec<BackendMapping>,
}

/// Minimum fuzzy score that produces an alias instead of a tombstone.
pub const FUZZY_THRESHOLD: f64 = 0.6;

/// Confidence assigned to backend-native-ID matches.
pub const NATIVE_MATCH_CONFIDENCE: f64 = 0.95;

/// Score a fuzzy match between an old and a new fingerprint.
///
/// Normalized signature carries half the weight; container and kind split
/// the rest. A missing signature on either side contributes nothing.
#[must_use]
pub fn fuzzy_score(old: &SymbolFingerprint, new: &SymbolFingerprint) -> f64 {
    let mut score = 0.0;
    if let (Some(a), Some(b)) = (&old.normalized_signature, &new.normalized_signature)
        && a == b
    {
        score += 0.5;
    }
    if old.container == new.container {
        score += 0.3;
    }
    if old.kind == new.kind {
        score += 0.2;
    }
    score
}

fn classify(old: &SymbolFingerprint, new: &SymbolFingerprint) -> AliasReason {
    if old.name != new.name {
        AliasReason::Renamed
    } else if old.container != new.container {
        AliasReason::Moved
    } else {
        AliasReason::FuzzyMatch
    }
}

/// Reconcile the previous refresh's symbols against the current one.
///
/// `old` is the set of fingerprints that were active before the refresh;
/// `new` is what the refresh observed; `state_fingerprint` names the repo
/// state the refresh ran against. New symbols are registered, survivors are
/// left untouched, retirements become aliases or tombstones. Returns the
/// aliases created.
pub fn reconcile(
    store: &IdentityStore,
    old: &[ObservedSymbol],
    new: &[ObservedSymbol],
    state_fingerprint: &str,
) -> Vec<Alias> {
    // Register everything the refresh observed.
    for sym in new {
        let id = store.assign_stable_id(&sym.fingerprint);
        store.observe(
            &id,
            None,
            ckb_core::LocationFreshness::Fresh,
            sym.mappings.clone(),
        );
    }

    let mut aliases = Vec::new();

    for old_sym in old {
        let old_id = store.stable_id_for(&old_sym.fingerprint);
        let new_id_same = new
            .iter()
            .any(|n| store.stable_id_for(&n.fingerprint) == old_id);
        if new_id_same {
            // Identity fields unchanged; the stable ID survives as-is.
            continue;
        }

        // Strategy 1: a new symbol carries one of the old native IDs.
        let native_match = old_sym.mappings.iter().find_map(|m| {
            new.iter().find(|n| n.mappings.contains(m)).map(|n| {
                (
                    store.stable_id_for(&n.fingerprint),
                    classify(&old_sym.fingerprint, &n.fingerprint),
                )
            })
        });

        if let Some((new_id, reason)) = native_match {
            let alias = Alias {
                old_stable_id: old_id.clone(),
                new_stable_id: new_id,
                reason,
                confidence: NATIVE_MATCH_CONFIDENCE,
                created_at: Utc::now(),
                created_in_state: state_fingerprint.to_string(),
            };
            if store.add_alias(alias.clone()) {
                debug!(
                    target: "ckb.identity",
                    old = %alias.old_stable_id,
                    new = %alias.new_stable_id,
                    reason = ?alias.reason,
                    "native-id alias"
                );
                aliases.push(alias);
            }
            continue;
        }

        // Strategy 2: best fuzzy candidate above the threshold.
        let best = new
            .iter()
            .map(|n| (fuzzy_score(&old_sym.fingerprint, &n.fingerprint), n))
            .filter(|(score, _)| *score >= FUZZY_THRESHOLD)
            .max_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        if let Some((score, candidate)) = best {
            let alias = Alias {
                old_stable_id: old_id.clone(),
                new_stable_id: store.stable_id_for(&candidate.fingerprint),
                reason: AliasReason::FuzzyMatch,
                confidence: score,
                created_at: Utc::now(),
                created_in_state: state_fingerprint.to_string(),
            };
            if store.add_alias(alias.clone()) {
                debug!(
                    target: "ckb.identity",
                    old = %alias.old_stable_id,
                    new = %alias.new_stable_id,
                    score,
                    "fuzzy alias"
                );
                aliases.push(alias);
            }
            continue;
        }

        // Strategy 3: tombstone.
        store.tombstone(&old_id, state_fingerprint);
    }

    info!(
        target: "ckb.identity",
        aliases = aliases.len(),
        old = old.len(),
        new = new.len(),
        "reconciled refresh"
    );
    aliases
}
