// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! ckb-core
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// JSON canonicalization for snapshot comparison.
pub mod canon;
/// Suggested follow-up calls.
pub mod drilldown;
/// The response envelope and provenance/confidence blocks.
pub mod envelope;
/// Error catalog and rich error values.
pub mod error;
/// The shared fact model: symbols, references, modules, impact.
pub mod facts;
/// Public identifier forms.
pub mod ids;
/// Contractual array orderings.
pub mod order;
/// Canonical path rules.
pub mod paths;

pub use drilldown::{Drilldown, rank_and_cap};
pub use envelope::{
    BackendKind, BackendProvenance, CacheMeta, CompletenessReason, Confidence, ConfidenceFactor,
    ConfidenceTier, Envelope, FactorStatus, MergeMode, MetadataConflict, Provenance, ResponseMeta,
    RepoStateStamp, SCHEMA_VERSION, TruncationMeta,
};
pub use error::{ALL_CODES, CkbError, CkbResult, ErrorCode, SuggestedFix, lookup_code};
pub use facts::{
    ImpactItem, ImpactKind, Location, LocationFreshness, ModuleFacts, Reference, ReferenceKind,
    SymbolFacts, SymbolKind, Visibility, hex_lower,
};
pub use ids::{ContractId, IdParseError, SymbolId};
