// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! ckb-detectors
//!
//! Detectors scan a repository checkout and emit the contracts it
//! defines, the evidence that it consumes contracts, and its internal
//! proto import graph. File contents are read transiently for pattern
//! matching and never stored.

/// OpenAPI / Swagger detection.
pub mod openapi;
/// Protocol-buffer detection.
pub mod proto;
/// Output shapes shared by all detectors.
pub mod types;
/// The shared filtered tree walker.
pub mod walker;

pub use openapi::OpenapiDetector;
pub use proto::ProtoDetector;
pub use types::{
    ContractDetector, ContractType, ContractVisibility, DetectedContract, DetectedImport,
    DetectedReference, DetectorOutput, EvidenceTier,
};

/// The default detector set, in the order sync runs them.
#[must_use]
pub fn default_detectors() -> Vec<Box<dyn ContractDetector>> {
    vec![Box::new(ProtoDetector::new()), Box::new(OpenapiDetector::new())]
}

/// Run every detector over one checkout, merging the outputs.
pub fn detect_all(
    detectors: &[Box<dyn ContractDetector>],
    root: &std::path::Path,
) -> anyhow::Result<DetectorOutput> {
    let mut merged = DetectorOutput::default();
    for detector in detectors {
        merged.merge(detector.detect(root)?);
    }
    Ok(merged)
}
