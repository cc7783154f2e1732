// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! ckb-remote
//!
//! The HTTP side of the federation: a retrying, size-capped client per
//! peer server, a TTL cache with per-endpoint freshness policy, and the
//! hybrid engine that fans symbol searches out across the local catalog
//! and every enabled peer.

/// The TTL caching wrapper.
pub mod cache;
/// The per-server HTTP client.
pub mod client;
/// The fan-out engine.
pub mod hybrid;

pub use cache::{CachingRemoteClient, Endpoint};
pub use client::{
    MAX_BODY_BYTES, RemoteClient, RemoteError, RemoteRepo, RemoteServerConfig, RemoteSymbol,
    expand_token,
};
pub use hybrid::{
    AnnotatedSymbol, DEFAULT_FANOUT_TIMEOUT, HybridQueryEngine, HybridResult,
    LocalFederationSource, QueryError, QuerySource, SourceStatus, SymbolSource,
};
