// SPDX-License-Identifier: MIT OR Apache-2.0
//! Detector output shapes.

use serde::{Deserialize, Serialize};

/// The contract format a file defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractType {
    /// Protocol buffers.
    Proto,
    /// OpenAPI / Swagger.
    Openapi,
    /// GraphQL schema.
    Graphql,
}

impl ContractType {
    /// Stable name used in the federation store.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Proto => "proto",
            Self::Openapi => "openapi",
            Self::Graphql => "graphql",
        }
    }
}

/// Visibility verdict for a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractVisibility {
    /// Meant to be consumed across repositories.
    Public,
    /// Implementation detail of its repository.
    Internal,
    /// No rule produced a verdict.
    Unknown,
}

/// Evidence quality of a consumer edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceTier {
    /// Co-change or naming heuristics; hidden by default.
    Heuristic,
    /// Generated code or generator configuration.
    Derived,
    /// An explicit import or dependency declaration.
    Declared,
}

/// A contract file found in a repository checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedContract {
    /// Repo-relative canonical path.
    pub path: String,
    /// Contract format.
    pub contract_type: ContractType,
    /// Type-specific metadata (package, services, title, ...).
    pub metadata: serde_json::Value,
    /// Visibility verdict.
    pub visibility: ContractVisibility,
    /// Which rule produced the verdict.
    pub visibility_basis: String,
    /// Confidence in the verdict, in `[0, 1]`.
    pub confidence: f64,
    /// Keys other repositories may import this contract under.
    pub import_keys: Vec<String>,
}

/// Evidence that some file consumes a contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedReference {
    /// The consuming file, repo-relative.
    pub consumer_path: String,
    /// The import key the consumer used.
    pub import_key: String,
    /// Evidence quality.
    pub tier: EvidenceTier,
    /// Evidence type (e.g. `proto-import`, `generated-code`, `buf-deps`).
    pub evidence_type: String,
    /// Confidence in the edge, in `[0, 1]`.
    pub confidence: f64,
    /// The detector that produced the evidence.
    pub detector: String,
}

/// A proto-to-proto import observed inside the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedImport {
    /// The importing proto file, repo-relative.
    pub importer_path: String,
    /// The import string as written.
    pub import_path: String,
    /// Whether the import was marked `public`.
    pub public: bool,
}

/// Everything one detector found in a checkout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectorOutput {
    /// Contracts defined in the repository.
    pub contracts: Vec<DetectedContract>,
    /// Consumption evidence.
    pub references: Vec<DetectedReference>,
    /// Proto import graph rows.
    pub imports: Vec<DetectedImport>,
}

impl DetectorOutput {
    /// Merge another detector's output into this one.
    pub fn merge(&mut self, other: DetectorOutput) {
        self.contracts.extend(other.contracts);
        self.references.extend(other.references);
        self.imports.extend(other.imports);
    }
}

/// One contract detector.
pub trait ContractDetector: Send + Sync {
    /// Detector name recorded on every reference it emits.
    fn name(&self) -> &'static str;

    /// Scan a repository checkout.
    fn detect(&self, root: &std::path::Path) -> anyhow::Result<DetectorOutput>;
}
