// SPDX-License-Identifier: MIT OR Apache-2.0
//! The federation catalog store.
//!
//! SQLite, single-writer: every call serializes through one connection
//! behind a mutex; SQLite's own locking keeps concurrent readers safe.
//! Deletion cascades from `federation_repos` through contracts and
//! import keys; consumer edges are cleared explicitly because their
//! consumer side references a repo without a foreign key.

use crate::staleness::{FederationStaleness, RepoStaleness, StalenessLevel};
use crate::types::{
    ContractRecord, DecisionRecord, EdgeRecord, HotspotRecord, ModuleRecord, OwnershipRecord,
    ProtoImportRecord, RepoRecord, edge_key,
};
use chrono::{DateTime, Utc};
use ckb_detectors::{ContractType, ContractVisibility, EvidenceTier};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// Store schema version; a bump invalidates derived caches.
pub const SCHEMA_VERSION: u32 = 1;

/// Maximum reverse-import BFS depth.
pub const DEFAULT_MAX_DEPTH: u32 = 3;

/// Errors from the federation store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying database failed.
    #[error("federation store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored blob could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Convenience alias.
pub type StoreResult<T> = Result<T, StoreError>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS federation_repos (
    repo_uid        TEXT PRIMARY KEY,
    repo_id         TEXT NOT NULL,
    name            TEXT NOT NULL,
    root_path       TEXT,
    last_synced_at  TEXT,
    schema_version  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS federated_modules (
    repo_uid        TEXT NOT NULL REFERENCES federation_repos(repo_uid) ON DELETE CASCADE,
    module_id       TEXT NOT NULL,
    name            TEXT NOT NULL,
    path            TEXT NOT NULL,
    symbol_count    INTEGER NOT NULL DEFAULT 0,
    summary         TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (repo_uid, module_id)
);

CREATE VIRTUAL TABLE IF NOT EXISTS federated_modules_fts USING fts5(
    repo_uid UNINDEXED, module_id UNINDEXED, name, path, summary
);

CREATE TABLE IF NOT EXISTS federated_ownership (
    repo_uid    TEXT NOT NULL REFERENCES federation_repos(repo_uid) ON DELETE CASCADE,
    pattern     TEXT NOT NULL,
    owner_type  TEXT NOT NULL,
    owner_id    TEXT NOT NULL,
    confidence  REAL NOT NULL,
    PRIMARY KEY (repo_uid, pattern, owner_type, owner_id)
);

CREATE TABLE IF NOT EXISTS federated_hotspots (
    repo_uid    TEXT NOT NULL REFERENCES federation_repos(repo_uid) ON DELETE CASCADE,
    path        TEXT NOT NULL,
    score       REAL NOT NULL,
    snapshot_at TEXT NOT NULL,
    PRIMARY KEY (repo_uid, path)
);

CREATE TABLE IF NOT EXISTS federated_decisions (
    repo_uid    TEXT NOT NULL REFERENCES federation_repos(repo_uid) ON DELETE CASCADE,
    decision_id TEXT NOT NULL,
    title       TEXT NOT NULL,
    body        TEXT NOT NULL DEFAULT '',
    decided_at  TEXT NOT NULL,
    PRIMARY KEY (repo_uid, decision_id)
);

CREATE VIRTUAL TABLE IF NOT EXISTS federated_decisions_fts USING fts5(
    repo_uid UNINDEXED, decision_id UNINDEXED, title, body
);

CREATE TABLE IF NOT EXISTS contracts (
    id               TEXT PRIMARY KEY,
    repo_uid         TEXT NOT NULL REFERENCES federation_repos(repo_uid) ON DELETE CASCADE,
    repo_id          TEXT NOT NULL,
    path             TEXT NOT NULL,
    contract_type    TEXT NOT NULL,
    metadata         TEXT NOT NULL,
    visibility       TEXT NOT NULL,
    visibility_basis TEXT NOT NULL DEFAULT '',
    confidence       REAL NOT NULL,
    indexed_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS contract_import_keys (
    contract_id TEXT NOT NULL REFERENCES contracts(id) ON DELETE CASCADE,
    import_key  TEXT NOT NULL,
    PRIMARY KEY (contract_id, import_key)
);

CREATE INDEX IF NOT EXISTS idx_contract_import_keys_key
    ON contract_import_keys(import_key);

CREATE TABLE IF NOT EXISTS contract_edges (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    edge_key           TEXT NOT NULL UNIQUE,
    contract_id        TEXT NOT NULL REFERENCES contracts(id) ON DELETE CASCADE,
    consumer_repo_uid  TEXT NOT NULL,
    consumer_repo_id   TEXT NOT NULL,
    consumer_paths     TEXT NOT NULL,
    tier               TEXT NOT NULL,
    evidence_type      TEXT NOT NULL,
    confidence         REAL NOT NULL,
    detector           TEXT NOT NULL,
    detected_at        TEXT NOT NULL,
    suppressed         INTEGER NOT NULL DEFAULT 0,
    suppressed_by      TEXT,
    verified           INTEGER NOT NULL DEFAULT 0,
    verified_by        TEXT
);

CREATE INDEX IF NOT EXISTS idx_contract_edges_contract
    ON contract_edges(contract_id);

CREATE TABLE IF NOT EXISTS proto_imports (
    importer_contract_id TEXT NOT NULL,
    imported_contract_id TEXT NOT NULL,
    import_path          TEXT NOT NULL,
    PRIMARY KEY (importer_contract_id, imported_contract_id)
);

CREATE INDEX IF NOT EXISTS idx_proto_imports_imported
    ON proto_imports(imported_contract_id);
"#;

/// The federation catalog.
#[derive(Debug)]
pub struct FederationIndex {
    conn: Mutex<Connection>,
}

impl FederationIndex {
    /// Open (or create) the catalog at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory catalog, mainly for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // -- repos ---------------------------------------------------------------

    /// Insert or update a repository record.
    pub fn upsert_repo(&self, repo: &RepoRecord) -> StoreResult<()> {
        let conn = self.conn.lock().expect("federation lock poisoned");
        conn.execute(
            "INSERT INTO federation_repos
                 (repo_uid, repo_id, name, root_path, last_synced_at, schema_version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(repo_uid) DO UPDATE SET
                 repo_id = excluded.repo_id,
                 name = excluded.name,
                 root_path = excluded.root_path,
                 last_synced_at = excluded.last_synced_at,
                 schema_version = excluded.schema_version",
            params![
                repo.repo_uid,
                repo.repo_id,
                repo.name,
                repo.root_path,
                repo.last_synced_at.map(|t| t.to_rfc3339()),
                repo.schema_version,
            ],
        )?;
        Ok(())
    }

    /// Every registered repository.
    pub fn list_repos(&self) -> StoreResult<Vec<RepoRecord>> {
        let conn = self.conn.lock().expect("federation lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT repo_uid, repo_id, name, root_path, last_synced_at, schema_version
             FROM federation_repos ORDER BY repo_uid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RepoRecord {
                repo_uid: row.get(0)?,
                repo_id: row.get(1)?,
                name: row.get(2)?,
                root_path: row.get(3)?,
                last_synced_at: parse_ts_opt(row.get::<_, Option<String>>(4)?),
                schema_version: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Remove a repository and everything materialized from it.
    pub fn remove_repo(&self, repo_uid: &str) -> StoreResult<()> {
        let mut conn = self.conn.lock().expect("federation lock poisoned");
        let tx = conn.transaction()?;
        // Edges reference the consumer side without a foreign key.
        tx.execute(
            "DELETE FROM contract_edges WHERE consumer_repo_uid = ?1",
            params![repo_uid],
        )?;
        tx.execute(
            "DELETE FROM proto_imports WHERE importer_contract_id LIKE ?1 || ':%'
                 OR imported_contract_id LIKE ?1 || ':%'",
            params![repo_uid],
        )?;
        tx.execute(
            "DELETE FROM federated_modules_fts WHERE repo_uid = ?1",
            params![repo_uid],
        )?;
        tx.execute(
            "DELETE FROM federated_decisions_fts WHERE repo_uid = ?1",
            params![repo_uid],
        )?;
        tx.execute(
            "DELETE FROM federation_repos WHERE repo_uid = ?1",
            params![repo_uid],
        )?;
        tx.commit()?;
        debug!(target: "ckb.federation", repo_uid, "repo removed");
        Ok(())
    }

    /// Clear everything a previous sync materialized for one repo, keeping
    /// the repo row itself.
    pub fn clear_materializations(&self, repo_uid: &str) -> StoreResult<()> {
        let mut conn = self.conn.lock().expect("federation lock poisoned");
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM contract_edges WHERE consumer_repo_uid = ?1",
            params![repo_uid],
        )?;
        tx.execute(
            "DELETE FROM proto_imports WHERE importer_contract_id LIKE ?1 || ':%'",
            params![repo_uid],
        )?;
        tx.execute("DELETE FROM contracts WHERE repo_uid = ?1", params![repo_uid])?;
        tx.execute(
            "DELETE FROM federated_modules WHERE repo_uid = ?1",
            params![repo_uid],
        )?;
        tx.execute(
            "DELETE FROM federated_modules_fts WHERE repo_uid = ?1",
            params![repo_uid],
        )?;
        tx.execute(
            "DELETE FROM federated_ownership WHERE repo_uid = ?1",
            params![repo_uid],
        )?;
        tx.execute(
            "DELETE FROM federated_hotspots WHERE repo_uid = ?1",
            params![repo_uid],
        )?;
        tx.execute(
            "DELETE FROM federated_decisions WHERE repo_uid = ?1",
            params![repo_uid],
        )?;
        tx.execute(
            "DELETE FROM federated_decisions_fts WHERE repo_uid = ?1",
            params![repo_uid],
        )?;
        tx.commit()?;
        Ok(())
    }

    // -- contracts -----------------------------------------------------------

    /// Insert or update a contract together with its import keys.
    ///
    /// Transactional: old keys are cleared, then the new set inserted. The
    /// row is updated in place so dependent edges survive.
    pub fn upsert_contract(
        &self,
        contract: &ContractRecord,
        import_keys: &[String],
    ) -> StoreResult<()> {
        let mut conn = self.conn.lock().expect("federation lock poisoned");
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO contracts
                 (id, repo_uid, repo_id, path, contract_type, metadata,
                  visibility, visibility_basis, confidence, indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                 metadata = excluded.metadata,
                 visibility = excluded.visibility,
                 visibility_basis = excluded.visibility_basis,
                 confidence = excluded.confidence,
                 indexed_at = excluded.indexed_at",
            params![
                contract.id,
                contract.repo_uid,
                contract.repo_id,
                contract.path,
                contract.contract_type.name(),
                contract.metadata.to_string(),
                visibility_str(contract.visibility),
                contract.visibility_basis,
                contract.confidence,
                contract.indexed_at.to_rfc3339(),
            ],
        )?;
        tx.execute(
            "DELETE FROM contract_import_keys WHERE contract_id = ?1",
            params![contract.id],
        )?;
        for key in import_keys {
            tx.execute(
                "INSERT OR IGNORE INTO contract_import_keys (contract_id, import_key)
                 VALUES (?1, ?2)",
                params![contract.id, key],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Fetch one contract by its ID.
    pub fn get_contract(&self, id: &str) -> StoreResult<Option<ContractRecord>> {
        let conn = self.conn.lock().expect("federation lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, repo_uid, repo_id, path, contract_type, metadata,
                    visibility, visibility_basis, confidence, indexed_at
             FROM contracts WHERE id = ?1",
        )?;
        stmt.query_row(params![id], contract_from_row)
            .optional()
            .map_err(Into::into)
    }

    /// All contracts owned by one repository.
    pub fn contracts_for_repo(&self, repo_uid: &str) -> StoreResult<Vec<ContractRecord>> {
        let conn = self.conn.lock().expect("federation lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, repo_uid, repo_id, path, contract_type, metadata,
                    visibility, visibility_basis, confidence, indexed_at
             FROM contracts WHERE repo_uid = ?1 ORDER BY path",
        )?;
        let rows = stmt.query_map(params![repo_uid], contract_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Resolve an import key to the contracts it may refer to.
    pub fn resolve_import_key(&self, key: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock().expect("federation lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT contract_id FROM contract_import_keys
             WHERE import_key = ?1 ORDER BY contract_id",
        )?;
        let rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // -- edges ---------------------------------------------------------------

    /// Insert or update a consumer edge.
    ///
    /// The `edge_key` digest is computed here from the sorted inputs. On
    /// conflict only paths, confidence, and timestamps change; the row ID
    /// is stable.
    #[allow(clippy::too_many_arguments)]
    pub fn upsert_edge(
        &self,
        contract_id: &str,
        consumer_repo_uid: &str,
        consumer_repo_id: &str,
        consumer_paths: &[String],
        tier: EvidenceTier,
        evidence_type: &str,
        confidence: f64,
        detector: &str,
    ) -> StoreResult<i64> {
        let key = edge_key(contract_id, consumer_repo_uid, evidence_type, consumer_paths);
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().expect("federation lock poisoned");

        let existing: Option<(i64, String)> = conn
            .query_row(
                "SELECT id, consumer_paths FROM contract_edges WHERE edge_key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match existing {
            Some((id, stored_paths)) => {
                let mut merged: BTreeSet<String> = serde_json::from_str::<Vec<String>>(
                    &stored_paths,
                )
                .map_err(|e| StoreError::Corrupt(format!("edge paths: {e}")))?
                .into_iter()
                .collect();
                merged.extend(consumer_paths.iter().cloned());
                let merged: Vec<String> = merged.into_iter().collect();
                conn.execute(
                    "UPDATE contract_edges
                     SET consumer_paths = ?1, confidence = ?2, detected_at = ?3
                     WHERE id = ?4",
                    params![serde_json::to_string(&merged).unwrap_or_default(), confidence, now, id],
                )?;
                Ok(id)
            }
            None => {
                let mut sorted: Vec<String> = consumer_paths.to_vec();
                sorted.sort_unstable();
                conn.execute(
                    "INSERT INTO contract_edges
                         (edge_key, contract_id, consumer_repo_uid, consumer_repo_id,
                          consumer_paths, tier, evidence_type, confidence, detector,
                          detected_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        key,
                        contract_id,
                        consumer_repo_uid,
                        consumer_repo_id,
                        serde_json::to_string(&sorted).unwrap_or_default(),
                        tier_str(tier),
                        evidence_type,
                        confidence,
                        detector,
                        now,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            }
        }
    }

    /// Unsuppressed edges for a contract at or above `min_tier`, sorted by
    /// confidence descending.
    pub fn edges_for_contract(
        &self,
        contract_id: &str,
        min_tier: EvidenceTier,
    ) -> StoreResult<Vec<EdgeRecord>> {
        let conn = self.conn.lock().expect("federation lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, edge_key, contract_id, consumer_repo_uid, consumer_repo_id,
                    consumer_paths, tier, evidence_type, confidence, detector,
                    detected_at, suppressed, suppressed_by, verified, verified_by
             FROM contract_edges
             WHERE contract_id = ?1 AND suppressed = 0
             ORDER BY confidence DESC, id ASC",
        )?;
        let rows = stmt.query_map(params![contract_id], edge_from_row)?;
        let mut edges = Vec::new();
        for edge in rows {
            let edge = edge?;
            if edge.tier >= min_tier {
                edges.push(edge);
            }
        }
        Ok(edges)
    }

    /// Mark an edge suppressed.
    pub fn suppress_edge(&self, edge_key: &str, by: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().expect("federation lock poisoned");
        let changed = conn.execute(
            "UPDATE contract_edges SET suppressed = 1, suppressed_by = ?2
             WHERE edge_key = ?1",
            params![edge_key, by],
        )?;
        Ok(changed > 0)
    }

    /// Mark an edge verified.
    pub fn verify_edge(&self, edge_key: &str, by: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().expect("federation lock poisoned");
        let changed = conn.execute(
            "UPDATE contract_edges SET verified = 1, verified_by = ?2
             WHERE edge_key = ?1",
            params![edge_key, by],
        )?;
        Ok(changed > 0)
    }

    // -- proto imports -------------------------------------------------------

    /// Record a proto-to-proto import edge.
    pub fn add_proto_import(&self, record: &ProtoImportRecord) -> StoreResult<()> {
        let conn = self.conn.lock().expect("federation lock poisoned");
        conn.execute(
            "INSERT INTO proto_imports
                 (importer_contract_id, imported_contract_id, import_path)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(importer_contract_id, imported_contract_id)
                 DO UPDATE SET import_path = excluded.import_path",
            params![
                record.importer_contract_id,
                record.imported_contract_id,
                record.import_path,
            ],
        )?;
        Ok(())
    }

    /// Reverse-import BFS: which contracts (transitively) import
    /// `contract_id`, out to `max_depth` hops. Returns `(importer, depth,
    /// via)` rows where `via` is the contract that led to the importer.
    pub fn reverse_imports(
        &self,
        contract_id: &str,
        max_depth: u32,
    ) -> StoreResult<Vec<(String, u32, String)>> {
        let conn = self.conn.lock().expect("federation lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT importer_contract_id FROM proto_imports
             WHERE imported_contract_id = ?1 ORDER BY importer_contract_id",
        )?;

        let mut out = Vec::new();
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<(String, u32)> = VecDeque::new();
        visited.insert(contract_id.to_string());
        queue.push_back((contract_id.to_string(), 0));

        while let Some((node, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let importers = stmt
                .query_map(params![node], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<String>, _>>()?;
            for importer in importers {
                if !visited.insert(importer.clone()) {
                    continue;
                }
                out.push((importer.clone(), depth + 1, node.clone()));
                queue.push_back((importer, depth + 1));
            }
        }
        Ok(out)
    }

    // -- materialized data ---------------------------------------------------

    /// Replace the module rows for one repo and rebuild its FTS shadow.
    pub fn replace_modules(&self, repo_uid: &str, modules: &[ModuleRecord]) -> StoreResult<()> {
        let mut conn = self.conn.lock().expect("federation lock poisoned");
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM federated_modules WHERE repo_uid = ?1",
            params![repo_uid],
        )?;
        tx.execute(
            "DELETE FROM federated_modules_fts WHERE repo_uid = ?1",
            params![repo_uid],
        )?;
        for module in modules {
            tx.execute(
                "INSERT INTO federated_modules
                     (repo_uid, module_id, name, path, symbol_count, summary)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    module.repo_uid,
                    module.module_id,
                    module.name,
                    module.path,
                    module.symbol_count,
                    module.summary,
                ],
            )?;
            tx.execute(
                "INSERT INTO federated_modules_fts
                     (repo_uid, module_id, name, path, summary)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    module.repo_uid,
                    module.module_id,
                    module.name,
                    module.path,
                    module.summary,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Full-text search over federated modules.
    pub fn search_modules(&self, query: &str, limit: usize) -> StoreResult<Vec<ModuleRecord>> {
        let conn = self.conn.lock().expect("federation lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT m.repo_uid, m.module_id, m.name, m.path, m.symbol_count, m.summary
             FROM federated_modules_fts f
             JOIN federated_modules m
               ON m.repo_uid = f.repo_uid AND m.module_id = f.module_id
             WHERE federated_modules_fts MATCH ?1
             ORDER BY rank LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![query, limit as i64], |row| {
            Ok(ModuleRecord {
                repo_uid: row.get(0)?,
                module_id: row.get(1)?,
                name: row.get(2)?,
                path: row.get(3)?,
                symbol_count: row.get(4)?,
                summary: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Replace the ownership rows for one repo.
    pub fn replace_ownership(
        &self,
        repo_uid: &str,
        records: &[OwnershipRecord],
    ) -> StoreResult<()> {
        let mut conn = self.conn.lock().expect("federation lock poisoned");
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM federated_ownership WHERE repo_uid = ?1",
            params![repo_uid],
        )?;
        for record in records {
            tx.execute(
                "INSERT OR REPLACE INTO federated_ownership
                     (repo_uid, pattern, owner_type, owner_id, confidence)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.repo_uid,
                    record.pattern,
                    record.owner_type,
                    record.owner_id,
                    record.confidence,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Ownership rows for one repo.
    pub fn ownership_for_repo(&self, repo_uid: &str) -> StoreResult<Vec<OwnershipRecord>> {
        let conn = self.conn.lock().expect("federation lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT repo_uid, pattern, owner_type, owner_id, confidence
             FROM federated_ownership WHERE repo_uid = ?1
             ORDER BY pattern, owner_type, owner_id",
        )?;
        let rows = stmt.query_map(params![repo_uid], |row| {
            Ok(OwnershipRecord {
                repo_uid: row.get(0)?,
                pattern: row.get(1)?,
                owner_type: row.get(2)?,
                owner_id: row.get(3)?,
                confidence: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Replace the hotspot rows for one repo (callers pass the top-N).
    pub fn replace_hotspots(&self, repo_uid: &str, hotspots: &[HotspotRecord]) -> StoreResult<()> {
        let mut conn = self.conn.lock().expect("federation lock poisoned");
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM federated_hotspots WHERE repo_uid = ?1",
            params![repo_uid],
        )?;
        for hotspot in hotspots {
            tx.execute(
                "INSERT OR REPLACE INTO federated_hotspots (repo_uid, path, score, snapshot_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    hotspot.repo_uid,
                    hotspot.path,
                    hotspot.score,
                    hotspot.snapshot_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Replace the decision rows for one repo and rebuild its FTS shadow.
    pub fn replace_decisions(
        &self,
        repo_uid: &str,
        decisions: &[DecisionRecord],
    ) -> StoreResult<()> {
        let mut conn = self.conn.lock().expect("federation lock poisoned");
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM federated_decisions WHERE repo_uid = ?1",
            params![repo_uid],
        )?;
        tx.execute(
            "DELETE FROM federated_decisions_fts WHERE repo_uid = ?1",
            params![repo_uid],
        )?;
        for decision in decisions {
            tx.execute(
                "INSERT INTO federated_decisions
                     (repo_uid, decision_id, title, body, decided_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    decision.repo_uid,
                    decision.decision_id,
                    decision.title,
                    decision.body,
                    decision.decided_at.to_rfc3339(),
                ],
            )?;
            tx.execute(
                "INSERT INTO federated_decisions_fts (repo_uid, decision_id, title, body)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    decision.repo_uid,
                    decision.decision_id,
                    decision.title,
                    decision.body,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Full-text search over decisions.
    pub fn search_decisions(&self, query: &str, limit: usize) -> StoreResult<Vec<DecisionRecord>> {
        let conn = self.conn.lock().expect("federation lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT d.repo_uid, d.decision_id, d.title, d.body, d.decided_at
             FROM federated_decisions_fts f
             JOIN federated_decisions d
               ON d.repo_uid = f.repo_uid AND d.decision_id = f.decision_id
             WHERE federated_decisions_fts MATCH ?1
             ORDER BY rank LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![query, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (repo_uid, decision_id, title, body, decided_at) = row?;
            out.push(DecisionRecord {
                repo_uid,
                decision_id,
                title,
                body,
                decided_at: parse_ts(&decided_at)?,
            });
        }
        Ok(out)
    }

    // -- staleness -----------------------------------------------------------

    /// Staleness for every repo, rolled up federation-wide.
    pub fn staleness(&self) -> StoreResult<FederationStaleness> {
        let now = Utc::now();
        let repos = self
            .list_repos()?
            .into_iter()
            .map(|repo| RepoStaleness {
                level: StalenessLevel::from_last_sync(repo.last_synced_at, now),
                repo_uid: repo.repo_uid,
                last_synced_at: repo.last_synced_at,
            })
            .collect();
        Ok(FederationStaleness::roll_up(repos))
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn contract_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContractRecord> {
    let contract_type: String = row.get(4)?;
    let metadata: String = row.get(5)?;
    let visibility: String = row.get(6)?;
    let indexed_at: String = row.get(9)?;
    Ok(ContractRecord {
        id: row.get(0)?,
        repo_uid: row.get(1)?,
        repo_id: row.get(2)?,
        path: row.get(3)?,
        contract_type: match contract_type.as_str() {
            "proto" => ContractType::Proto,
            "openapi" => ContractType::Openapi,
            _ => ContractType::Graphql,
        },
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        visibility: match visibility.as_str() {
            "public" => ContractVisibility::Public,
            "internal" => ContractVisibility::Internal,
            _ => ContractVisibility::Unknown,
        },
        visibility_basis: row.get(7)?,
        confidence: row.get(8)?,
        indexed_at: chrono::DateTime::parse_from_rfc3339(&indexed_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn edge_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EdgeRecord> {
    let paths: String = row.get(5)?;
    let tier: String = row.get(6)?;
    let detected_at: String = row.get(10)?;
    Ok(EdgeRecord {
        id: row.get(0)?,
        edge_key: row.get(1)?,
        contract_id: row.get(2)?,
        consumer_repo_uid: row.get(3)?,
        consumer_repo_id: row.get(4)?,
        consumer_paths: serde_json::from_str(&paths).unwrap_or_default(),
        tier: match tier.as_str() {
            "declared" => EvidenceTier::Declared,
            "derived" => EvidenceTier::Derived,
            _ => EvidenceTier::Heuristic,
        },
        evidence_type: row.get(7)?,
        confidence: row.get(8)?,
        detector: row.get(9)?,
        detected_at: chrono::DateTime::parse_from_rfc3339(&detected_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        suppressed: row.get::<_, i64>(11)? != 0,
        suppressed_by: row.get(12)?,
        verified: row.get::<_, i64>(13)? != 0,
        verified_by: row.get(14)?,
    })
}

fn visibility_str(v: ContractVisibility) -> &'static str {
    match v {
        ContractVisibility::Public => "public",
        ContractVisibility::Internal => "internal",
        ContractVisibility::Unknown => "unknown",
    }
}

fn tier_str(t: EvidenceTier) -> &'static str {
    match t {
        EvidenceTier::Declared => "declared",
        EvidenceTier::Derived => "derived",
        EvidenceTier::Heuristic => "heuristic",
    }
}

fn parse_ts(s: &str) -> StoreResult<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{s}': {e}")))
}

fn parse_ts_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        chrono::DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(uid: &str) -> RepoRecord {
        RepoRecord {
            repo_uid: uid.into(),
            repo_id: uid.into(),
            name: uid.into(),
            root_path: None,
            last_synced_at: Some(Utc::now()),
            schema_version: SCHEMA_VERSION,
        }
    }

    fn contract(uid: &str, path: &str) -> ContractRecord {
        ContractRecord {
            id: ContractRecord::compose_id(uid, path),
            repo_uid: uid.into(),
            repo_id: uid.into(),
            path: path.into(),
            contract_type: ContractType::Proto,
            metadata: serde_json::json!({"package": "acme.v1"}),
            visibility: ContractVisibility::Public,
            visibility_basis: "path-root".into(),
            confidence: 0.85,
            indexed_at: Utc::now(),
        }
    }

    #[test]
    fn contract_upsert_and_import_key_resolution() {
        let store = FederationIndex::open_in_memory().unwrap();
        store.upsert_repo(&repo("a")).unwrap();
        let c = contract("a", "proto/user.proto");
        store
            .upsert_contract(&c, &["proto/user.proto".into(), "user.proto".into()])
            .unwrap();

        assert_eq!(
            store.resolve_import_key("user.proto").unwrap(),
            vec!["a:proto/user.proto"]
        );
        let fetched = store.get_contract(&c.id).unwrap().unwrap();
        assert_eq!(fetched.path, "proto/user.proto");
        assert_eq!(fetched.visibility, ContractVisibility::Public);

        // Re-upsert with a new key set replaces the old keys.
        store
            .upsert_contract(&c, &["proto/user.proto".into()])
            .unwrap();
        assert!(store.resolve_import_key("user.proto").unwrap().is_empty());
    }

    #[test]
    fn edge_upsert_is_idempotent_and_keeps_id() {
        let store = FederationIndex::open_in_memory().unwrap();
        store.upsert_repo(&repo("a")).unwrap();
        store
            .upsert_contract(&contract("a", "proto/user.proto"), &[])
            .unwrap();

        let paths = vec!["src/client.go".to_string(), "src/other.go".to_string()];
        let first = store
            .upsert_edge(
                "a:proto/user.proto",
                "b",
                "b",
                &paths,
                EvidenceTier::Declared,
                "proto-import",
                0.95,
                "proto",
            )
            .unwrap();
        // Permuted paths produce the same key and the same row.
        let permuted = vec!["src/other.go".to_string(), "src/client.go".to_string()];
        let second = store
            .upsert_edge(
                "a:proto/user.proto",
                "b",
                "b",
                &permuted,
                EvidenceTier::Declared,
                "proto-import",
                0.9,
                "proto",
            )
            .unwrap();
        assert_eq!(first, second, "edge id must survive re-upsert");

        let edges = store
            .edges_for_contract("a:proto/user.proto", EvidenceTier::Heuristic)
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].consumer_paths.len(), 2);
        assert!((edges[0].confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn min_tier_filters_heuristic_edges() {
        let store = FederationIndex::open_in_memory().unwrap();
        store.upsert_repo(&repo("a")).unwrap();
        store
            .upsert_contract(&contract("a", "proto/user.proto"), &[])
            .unwrap();
        store
            .upsert_edge(
                "a:proto/user.proto",
                "b",
                "b",
                &["x".into()],
                EvidenceTier::Heuristic,
                "co-change",
                0.4,
                "heuristic",
            )
            .unwrap();
        store
            .upsert_edge(
                "a:proto/user.proto",
                "c",
                "c",
                &["y".into()],
                EvidenceTier::Derived,
                "generated-code",
                0.7,
                "proto",
            )
            .unwrap();

        let derived_up = store
            .edges_for_contract("a:proto/user.proto", EvidenceTier::Derived)
            .unwrap();
        assert_eq!(derived_up.len(), 1);
        assert_eq!(derived_up[0].consumer_repo_uid, "c");

        let all = store
            .edges_for_contract("a:proto/user.proto", EvidenceTier::Heuristic)
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn suppressed_edges_are_hidden() {
        let store = FederationIndex::open_in_memory().unwrap();
        store.upsert_repo(&repo("a")).unwrap();
        store
            .upsert_contract(&contract("a", "proto/user.proto"), &[])
            .unwrap();
        store
            .upsert_edge(
                "a:proto/user.proto",
                "b",
                "b",
                &["x".into()],
                EvidenceTier::Declared,
                "proto-import",
                0.95,
                "proto",
            )
            .unwrap();
        let key = edge_key("a:proto/user.proto", "b", "proto-import", &["x".into()]);
        assert!(store.suppress_edge(&key, "operator").unwrap());
        assert!(
            store
                .edges_for_contract("a:proto/user.proto", EvidenceTier::Heuristic)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn reverse_imports_bfs_with_depth_and_via() {
        let store = FederationIndex::open_in_memory().unwrap();
        // c imports b, b imports a: reverse of a finds b at 1, c at 2.
        store
            .add_proto_import(&ProtoImportRecord {
                importer_contract_id: "r:b.proto".into(),
                imported_contract_id: "r:a.proto".into(),
                import_path: "a.proto".into(),
            })
            .unwrap();
        store
            .add_proto_import(&ProtoImportRecord {
                importer_contract_id: "r:c.proto".into(),
                imported_contract_id: "r:b.proto".into(),
                import_path: "b.proto".into(),
            })
            .unwrap();

        let result = store.reverse_imports("r:a.proto", 3).unwrap();
        assert_eq!(
            result,
            vec![
                ("r:b.proto".to_string(), 1, "r:a.proto".to_string()),
                ("r:c.proto".to_string(), 2, "r:b.proto".to_string()),
            ]
        );

        let shallow = store.reverse_imports("r:a.proto", 1).unwrap();
        assert_eq!(shallow.len(), 1);
    }

    #[test]
    fn reverse_imports_survives_cycles() {
        let store = FederationIndex::open_in_memory().unwrap();
        store
            .add_proto_import(&ProtoImportRecord {
                importer_contract_id: "r:b.proto".into(),
                imported_contract_id: "r:a.proto".into(),
                import_path: "a.proto".into(),
            })
            .unwrap();
        store
            .add_proto_import(&ProtoImportRecord {
                importer_contract_id: "r:a.proto".into(),
                imported_contract_id: "r:b.proto".into(),
                import_path: "b.proto".into(),
            })
            .unwrap();
        let result = store.reverse_imports("r:a.proto", 5).unwrap();
        assert_eq!(result.len(), 1, "the visited set must stop the cycle");
    }

    #[test]
    fn repo_removal_cascades() {
        let store = FederationIndex::open_in_memory().unwrap();
        store.upsert_repo(&repo("a")).unwrap();
        store.upsert_repo(&repo("b")).unwrap();
        store
            .upsert_contract(&contract("a", "proto/user.proto"), &["user.proto".into()])
            .unwrap();
        store
            .upsert_edge(
                "a:proto/user.proto",
                "b",
                "b",
                &["x".into()],
                EvidenceTier::Declared,
                "proto-import",
                0.95,
                "proto",
            )
            .unwrap();

        store.remove_repo("a").unwrap();
        assert!(store.get_contract("a:proto/user.proto").unwrap().is_none());
        assert!(store.resolve_import_key("user.proto").unwrap().is_empty());
        // Removing the consumer clears its edges too.
        store.upsert_repo(&repo("a")).unwrap();
        store
            .upsert_contract(&contract("a", "proto/user.proto"), &[])
            .unwrap();
        store
            .upsert_edge(
                "a:proto/user.proto",
                "b",
                "b",
                &["x".into()],
                EvidenceTier::Declared,
                "proto-import",
                0.95,
                "proto",
            )
            .unwrap();
        store.remove_repo("b").unwrap();
        assert!(
            store
                .edges_for_contract("a:proto/user.proto", EvidenceTier::Heuristic)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn module_and_decision_fts_round_trip() {
        let store = FederationIndex::open_in_memory().unwrap();
        store.upsert_repo(&repo("a")).unwrap();
        store
            .replace_modules(
                "a",
                &[ModuleRecord {
                    repo_uid: "a".into(),
                    module_id: "core/auth".into(),
                    name: "auth".into(),
                    path: "core/auth".into(),
                    symbol_count: 12,
                    summary: "authentication and session handling".into(),
                }],
            )
            .unwrap();
        let hits = store.search_modules("authentication", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].module_id, "core/auth");

        store
            .replace_decisions(
                "a",
                &[DecisionRecord {
                    repo_uid: "a".into(),
                    decision_id: "adr-7".into(),
                    title: "Adopt protobuf for service contracts".into(),
                    body: "we standardize on proto3".into(),
                    decided_at: Utc::now(),
                }],
            )
            .unwrap();
        let hits = store.search_decisions("protobuf", 10).unwrap();
        assert_eq!(hits.len(), 1);

        // Replacing wipes the previous shadow rows.
        store.replace_modules("a", &[]).unwrap();
        assert!(store.search_modules("authentication", 10).unwrap().is_empty());
    }

    #[test]
    fn staleness_rolls_up_worst() {
        let store = FederationIndex::open_in_memory().unwrap();
        store.upsert_repo(&repo("fresh")).unwrap();
        store
            .upsert_repo(&RepoRecord {
                last_synced_at: None,
                ..repo("never")
            })
            .unwrap();
        let report = store.staleness().unwrap();
        assert_eq!(report.repos.len(), 2);
        assert_eq!(report.overall, StalenessLevel::Obsolete);
    }
}
