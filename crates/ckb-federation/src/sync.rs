// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-repo federation sync.
//!
//! Sync verifies source-store schema compatibility, clears the repo's
//! prior materializations, replicates modules / ownership / hotspots /
//! decisions, and runs the contract detectors over the checkout to upsert
//! contracts, proto imports, and resolved consumer edges. Failures are
//! isolated per data type: one broken table logs a warning, the rest of
//! the sync proceeds.

use crate::store::{FederationIndex, SCHEMA_VERSION, StoreResult};
use crate::types::{
    ContractRecord, DecisionRecord, HotspotRecord, ModuleRecord, OwnershipRecord,
    ProtoImportRecord, RepoRecord,
};
use anyhow::{Context, Result};
use chrono::Utc;
use ckb_detectors::{ContractDetector, DetectorOutput};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Minimum source-store schema version sync accepts.
pub const MIN_SOURCE_SCHEMA: u32 = 1;

/// Hotspots replicated per repo: top N by score.
pub const HOTSPOT_LIMIT: usize = 20;

/// Read-only view of one repository's local knowledge store.
pub trait SourceStore {
    /// Schema version of the source store.
    fn schema_version(&self) -> u32;
    /// Module rows.
    fn modules(&self) -> Result<Vec<ModuleRecord>>;
    /// Ownership rows.
    fn ownership(&self) -> Result<Vec<OwnershipRecord>>;
    /// Hotspot rows (unsorted; sync keeps the top N).
    fn hotspots(&self) -> Result<Vec<HotspotRecord>>;
    /// Decision rows.
    fn decisions(&self) -> Result<Vec<DecisionRecord>>;
}

/// A source store serialized as one JSON document (`ckb-source.json`),
/// as produced by the per-repo indexing tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSourceStore {
    /// Schema version of the document.
    pub schema_version: u32,
    /// Module rows.
    #[serde(default)]
    pub modules: Vec<ModuleRecord>,
    /// Ownership rows.
    #[serde(default)]
    pub ownership: Vec<OwnershipRecord>,
    /// Hotspot rows.
    #[serde(default)]
    pub hotspots: Vec<HotspotRecord>,
    /// Decision rows.
    #[serde(default)]
    pub decisions: Vec<DecisionRecord>,
}

impl JsonSourceStore {
    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read source store {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
    }

    /// An empty store at the current schema, for repos with no local data.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            modules: Vec::new(),
            ownership: Vec::new(),
            hotspots: Vec::new(),
            decisions: Vec::new(),
        }
    }
}

impl SourceStore for JsonSourceStore {
    fn schema_version(&self) -> u32 {
        self.schema_version
    }

    fn modules(&self) -> Result<Vec<ModuleRecord>> {
        Ok(self.modules.clone())
    }

    fn ownership(&self) -> Result<Vec<OwnershipRecord>> {
        Ok(self.ownership.clone())
    }

    fn hotspots(&self) -> Result<Vec<HotspotRecord>> {
        Ok(self.hotspots.clone())
    }

    fn decisions(&self) -> Result<Vec<DecisionRecord>> {
        Ok(self.decisions.clone())
    }
}

/// Errors that abort a repo sync entirely.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The source store is too old for this catalog.
    #[error("source schema {found} below minimum {minimum}")]
    SchemaIncompatible {
        /// Observed source schema version.
        found: u32,
        /// Minimum this catalog accepts.
        minimum: u32,
    },
    /// The federation store failed.
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
    /// Detector failure severe enough to abort.
    #[error("detectors failed: {0}")]
    Detectors(String),
}

/// Per-sync counters for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Modules replicated.
    pub modules: usize,
    /// Ownership rows replicated.
    pub ownership: usize,
    /// Hotspots replicated.
    pub hotspots: usize,
    /// Decisions replicated.
    pub decisions: usize,
    /// Contracts upserted.
    pub contracts: usize,
    /// Proto import rows recorded.
    pub proto_imports: usize,
    /// Consumer edges upserted.
    pub edges: usize,
    /// Data types that failed and were skipped.
    pub warnings: usize,
}

/// Sync one repository into the federation catalog.
pub fn sync_repo(
    store: &FederationIndex,
    repo_uid: &str,
    repo_id: &str,
    name: &str,
    checkout: &Path,
    source: &dyn SourceStore,
    detectors: &[Box<dyn ContractDetector>],
) -> Result<SyncReport, SyncError> {
    if source.schema_version() < MIN_SOURCE_SCHEMA {
        return Err(SyncError::SchemaIncompatible {
            found: source.schema_version(),
            minimum: MIN_SOURCE_SCHEMA,
        });
    }

    // Register the repo first so foreign keys hold, then drop whatever the
    // previous sync materialized.
    store.upsert_repo(&RepoRecord {
        repo_uid: repo_uid.to_string(),
        repo_id: repo_id.to_string(),
        name: name.to_string(),
        root_path: Some(checkout.display().to_string()),
        last_synced_at: None,
        schema_version: source.schema_version(),
    })?;
    store.clear_materializations(repo_uid)?;

    let mut report = SyncReport::default();

    // Each data type fails independently.
    match source.modules() {
        Ok(modules) => {
            store.replace_modules(repo_uid, &modules)?;
            report.modules = modules.len();
        }
        Err(err) => {
            warn!(target: "ckb.federation.sync", repo_uid, error = %err, "modules skipped");
            report.warnings += 1;
        }
    }
    match source.ownership() {
        Ok(ownership) => {
            store.replace_ownership(repo_uid, &ownership)?;
            report.ownership = ownership.len();
        }
        Err(err) => {
            warn!(target: "ckb.federation.sync", repo_uid, error = %err, "ownership skipped");
            report.warnings += 1;
        }
    }
    match source.hotspots() {
        Ok(mut hotspots) => {
            // Top-N by score, newest snapshot per path.
            let mut newest: BTreeMap<String, HotspotRecord> = BTreeMap::new();
            for hotspot in hotspots.drain(..) {
                match newest.get(&hotspot.path) {
                    Some(existing) if existing.snapshot_at >= hotspot.snapshot_at => {}
                    _ => {
                        newest.insert(hotspot.path.clone(), hotspot);
                    }
                }
            }
            let mut top: Vec<HotspotRecord> = newest.into_values().collect();
            top.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            top.truncate(HOTSPOT_LIMIT);
            store.replace_hotspots(repo_uid, &top)?;
            report.hotspots = top.len();
        }
        Err(err) => {
            warn!(target: "ckb.federation.sync", repo_uid, error = %err, "hotspots skipped");
            report.warnings += 1;
        }
    }
    match source.decisions() {
        Ok(decisions) => {
            store.replace_decisions(repo_uid, &decisions)?;
            report.decisions = decisions.len();
        }
        Err(err) => {
            warn!(target: "ckb.federation.sync", repo_uid, error = %err, "decisions skipped");
            report.warnings += 1;
        }
    }

    // Detectors: contracts, proto imports, and resolved consumer edges.
    let mut output = DetectorOutput::default();
    for detector in detectors {
        match detector.detect(checkout) {
            Ok(found) => output.merge(found),
            Err(err) => {
                warn!(
                    target: "ckb.federation.sync",
                    repo_uid,
                    detector = detector.name(),
                    error = %err,
                    "detector skipped"
                );
                report.warnings += 1;
            }
        }
    }

    let now = Utc::now();
    for detected in &output.contracts {
        let record = ContractRecord {
            id: ContractRecord::compose_id(repo_uid, &detected.path),
            repo_uid: repo_uid.to_string(),
            repo_id: repo_id.to_string(),
            path: detected.path.clone(),
            contract_type: detected.contract_type,
            metadata: detected.metadata.clone(),
            visibility: detected.visibility,
            visibility_basis: detected.visibility_basis.clone(),
            confidence: detected.confidence,
            indexed_at: now,
        };
        store.upsert_contract(&record, &detected.import_keys)?;
        report.contracts += 1;
    }

    // Proto imports resolve inside the whole catalog, so cross-repo chains
    // connect once both sides have synced.
    for import in &output.imports {
        let importer_id = ContractRecord::compose_id(repo_uid, &import.importer_path);
        for imported_id in store.resolve_import_key(&import.import_path)? {
            if imported_id == importer_id {
                continue;
            }
            store.add_proto_import(&ProtoImportRecord {
                importer_contract_id: importer_id.clone(),
                imported_contract_id: imported_id,
                import_path: import.import_path.clone(),
            })?;
            report.proto_imports += 1;
        }
    }

    // Consumer edges: group references by (resolved contract, evidence),
    // one edge per group; a reference resolving into this same repo is
    // dependency-graph data, not cross-repo consumption.
    let mut groups: BTreeMap<(String, String), (ckb_detectors::EvidenceTier, f64, String, Vec<String>)> =
        BTreeMap::new();
    for reference in &output.references {
        for contract_id in store.resolve_import_key(&reference.import_key)? {
            if contract_id.starts_with(&format!("{repo_uid}:")) {
                continue;
            }
            let entry = groups
                .entry((contract_id, reference.evidence_type.clone()))
                .or_insert_with(|| {
                    (
                        reference.tier,
                        reference.confidence,
                        reference.detector.clone(),
                        Vec::new(),
                    )
                });
            if !entry.3.contains(&reference.consumer_path) {
                entry.3.push(reference.consumer_path.clone());
            }
        }
    }
    for ((contract_id, evidence_type), (tier, confidence, detector, paths)) in groups {
        store.upsert_edge(
            &contract_id,
            repo_uid,
            repo_id,
            &paths,
            tier,
            &evidence_type,
            confidence,
            &detector,
        )?;
        report.edges += 1;
    }

    // Stamp the sync.
    store.upsert_repo(&RepoRecord {
        repo_uid: repo_uid.to_string(),
        repo_id: repo_id.to_string(),
        name: name.to_string(),
        root_path: Some(checkout.display().to_string()),
        last_synced_at: Some(now),
        schema_version: source.schema_version(),
    })?;

    info!(
        target: "ckb.federation.sync",
        repo_uid,
        contracts = report.contracts,
        edges = report.edges,
        warnings = report.warnings,
        "sync complete"
    );
    Ok(report)
}

/// Re-resolve edges for every synced repo. Run after the whole federation
/// has synced once so references recorded before their target contract
/// existed still connect.
pub fn resolve_pending_edges(
    store: &FederationIndex,
    checkouts: &BTreeMap<String, std::path::PathBuf>,
    detectors: &[Box<dyn ContractDetector>],
) -> StoreResult<usize> {
    let mut created = 0;
    for repo in store.list_repos()? {
        let Some(checkout) = checkouts.get(&repo.repo_uid) else {
            continue;
        };
        let mut output = DetectorOutput::default();
        for detector in detectors {
            if let Ok(found) = detector.detect(checkout) {
                output.merge(found);
            }
        }
        for reference in &output.references {
            for contract_id in store.resolve_import_key(&reference.import_key)? {
                if contract_id.starts_with(&format!("{}:", repo.repo_uid)) {
                    continue;
                }
                store.upsert_edge(
                    &contract_id,
                    &repo.repo_uid,
                    &repo.repo_id,
                    std::slice::from_ref(&reference.consumer_path),
                    reference.tier,
                    &reference.evidence_type,
                    reference.confidence,
                    &reference.detector,
                )?;
                created += 1;
            }
        }
        for import in &output.imports {
            let importer_id = ContractRecord::compose_id(&repo.repo_uid, &import.importer_path);
            for imported_id in store.resolve_import_key(&import.import_path)? {
                if imported_id == importer_id {
                    continue;
                }
                store.add_proto_import(&ProtoImportRecord {
                    importer_contract_id: importer_id.clone(),
                    imported_contract_id: imported_id,
                    import_path: import.import_path.clone(),
                })?;
            }
        }
    }
    Ok(created)
}
