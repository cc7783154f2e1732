// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! ckb-jobs
//!
//! A persistent background-job queue: jobs persist as `queued` rows
//! before anything touches a channel, a single worker processes them in
//! submission order, a recovery loop re-enqueues rows that missed the
//! channel (or survived a crash), and cancellation flows through a
//! per-job token. Terminal states are sticky.

/// Cancellation token for handlers.
pub mod cancel;
/// The engine: worker, recovery, submission.
pub mod engine;
/// Job persistence.
pub mod store;
/// Job rows and lifecycle states.
pub mod types;

pub use cancel::CancelToken;
pub use engine::{JobContext, JobEngine, JobEngineConfig, JobEngineError, JobHandler};
pub use store::{JobStore, JobStoreError, JobStoreResult};
pub use types::{Job, JobStatus};
