// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! ckb-federation
//!
//! The federation catalog: a relational store of contracts, consumer
//! edges, proto import graphs, and per-repo materializations (modules,
//! ownership, hotspots, decisions), with the impact engine and per-repo
//! sync on top.

/// The impact engine.
pub mod impact;
/// Glob-style ownership matching.
pub mod ownership;
/// Sync-age staleness levels.
pub mod staleness;
/// The SQLite catalog.
pub mod store;
/// Per-repo sync.
pub mod sync;
/// Row types.
pub mod types;

pub use impact::{
    ConsumerEntry, ImpactOptions, ImpactResponse, OwnerEntry, RiskFactor, RiskLevel,
    analyze_contract_impact,
};
pub use ownership::{pattern_matches, pattern_specificity};
pub use staleness::{FederationStaleness, RepoStaleness, StalenessLevel};
pub use store::{DEFAULT_MAX_DEPTH, FederationIndex, SCHEMA_VERSION, StoreError, StoreResult};
pub use sync::{
    JsonSourceStore, MIN_SOURCE_SCHEMA, SourceStore, SyncError, SyncReport, resolve_pending_edges,
    sync_repo,
};
pub use types::{
    ContractRecord, DecisionRecord, EdgeRecord, HotspotRecord, ModuleRecord, OwnershipRecord,
    ProtoImportRecord, RepoRecord, edge_key,
};
