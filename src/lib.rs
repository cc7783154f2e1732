// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! The Code Knowledge Backplane, assembled.
//!
//! This crate re-exports the member crates under one roof for embedders:
//! outer surfaces (CLI, MCP transport, exporters) depend on `ckb` and get
//! the orchestrator, federation catalog, remote fan-out, job engine, and
//! streaming primitives with one dependency line.

pub use ckb_backend as backend;
pub use ckb_cache as cache;
pub use ckb_compress as compress;
pub use ckb_config as config;
pub use ckb_core as core;
pub use ckb_detectors as detectors;
pub use ckb_federation as federation;
pub use ckb_identity as identity;
pub use ckb_jobs as jobs;
pub use ckb_orchestrator as orchestrator;
pub use ckb_remote as remote;
pub use ckb_repostate as repostate;
pub use ckb_stream as stream;
pub use ckb_supervisor as supervisor;
