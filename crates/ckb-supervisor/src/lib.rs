// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! ckb-supervisor
//!
//! A bounded pool of language-server subprocesses. One supervisor owns
//! every lifecycle: per-language state machines, bounded request queues,
//! consecutive-failure tracking with exponential-backoff restarts, LRU
//! eviction at the process cap, and orphan reaping on shutdown.

/// Supervisor tuning and server specifications.
pub mod config;
/// Low-level subprocess stdio.
pub mod process;
/// The supervisor itself.
pub mod supervisor;

pub use config::{LanguageServerSpec, SupervisorConfig};
pub use process::{ProcessError, ServerProcess};
pub use supervisor::{ProcessState, ProcessStats, Supervisor, SupervisorError};
