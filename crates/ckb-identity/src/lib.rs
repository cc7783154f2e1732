// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! ckb-identity
//!
//! Stable symbol identity that survives rename, move, and delete across
//! index refreshes. Stable IDs are pure functions of a symbol's identity
//! fingerprint; retirements become alias redirects or tombstones, never
//! row deletions.

/// Refresh-time reconciliation producing aliases and tombstones.
pub mod reconcile;
/// The identity store and alias-chain resolution.
pub mod store;
/// Record shapes: fingerprints, lifecycle states, aliases.
pub mod types;

pub use reconcile::{FUZZY_THRESHOLD, NATIVE_MATCH_CONFIDENCE, ObservedSymbol, fuzzy_score, reconcile};
pub use store::{IdentityStore, Resolution};
pub use types::{
    Alias, AliasReason, BackendMapping, IdentityRecord, MAX_ALIAS_DEPTH, SymbolFingerprint,
    SymbolState,
};
