// SPDX-License-Identifier: MIT OR Apache-2.0
//! Adapter over a precomputed semantic index (SCIP-class).
//!
//! The index is a JSON file produced by an external indexer. It is the only
//! source allowed to anchor identity and the only source of call graphs.
//! The file is reloaded lazily when its mtime changes.

use crate::{
    AdapterCapabilities, AdapterError, BackendAdapter, PartialResult, ReferenceScope, SymbolQuery,
};
use async_trait::async_trait;
use ckb_core::{
    BackendKind, ImpactItem, ImpactKind, Location, LocationFreshness, ModuleFacts, Reference,
    ReferenceKind, SymbolFacts, SymbolKind, Visibility,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tracing::debug;

// ---------------------------------------------------------------------------
// Index file format
// ---------------------------------------------------------------------------

/// One symbol row in the index file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedSymbol {
    /// Indexer-native symbol ID.
    pub native_id: String,
    /// Unqualified name.
    pub name: String,
    /// Containing scope.
    #[serde(default)]
    pub container: String,
    /// Symbol kind.
    pub kind: SymbolKind,
    /// Parameter count for callables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arity: Option<u32>,
    /// Full signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Normalized signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_normalized: Option<String>,
    /// Visibility from source modifiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    /// Owning module ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
    /// Definition site.
    pub location: Location,
}

/// One reference row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedReference {
    /// Where the reference occurs.
    pub location: Location,
    /// How the symbol is used.
    pub kind: ReferenceKind,
}

/// One call-graph edge, by native IDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEdge {
    /// Calling symbol.
    pub from: String,
    /// Called symbol.
    pub to: String,
}

/// The on-disk index shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexFile {
    /// Format version.
    #[serde(default)]
    pub schema: u32,
    /// Commit the indexer ran against.
    #[serde(default)]
    pub generated_at_commit: String,
    /// Symbol rows.
    #[serde(default)]
    pub symbols: Vec<IndexedSymbol>,
    /// References keyed by native symbol ID.
    #[serde(default)]
    pub references: BTreeMap<String, Vec<IndexedReference>>,
    /// Architectural modules.
    #[serde(default)]
    pub modules: Vec<ModuleFacts>,
    /// Call-graph edges.
    #[serde(default)]
    pub call_graph: Vec<CallEdge>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Loaded {
    mtime: Option<SystemTime>,
    index: Option<Arc<IndexFile>>,
}

/// Adapter over the index file at a fixed path.
#[derive(Debug)]
pub struct IndexedAdapter {
    path: PathBuf,
    loaded: Mutex<Loaded>,
}

impl IndexedAdapter {
    /// Create an adapter for the index at `path`. The file is loaded on
    /// first use.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            loaded: Mutex::new(Loaded::default()),
        }
    }

    /// The current index content, reloading when the file changed.
    pub fn index(&self) -> Result<Arc<IndexFile>, AdapterError> {
        let mtime = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map_err(|e| AdapterError::Unavailable(format!("index missing: {e}")))?;

        let mut loaded = self.loaded.lock().expect("index lock poisoned");
        if loaded.mtime == Some(mtime)
            && let Some(index) = &loaded.index
        {
            return Ok(index.clone());
        }

        let raw = std::fs::read_to_string(&self.path)?;
        let parsed: IndexFile = serde_json::from_str(&raw)
            .map_err(|e| AdapterError::Internal(format!("malformed index: {e}")))?;
        debug!(
            target: "ckb.backend.indexed",
            symbols = parsed.symbols.len(),
            commit = %parsed.generated_at_commit,
            "index loaded"
        );
        let index = Arc::new(parsed);
        loaded.mtime = Some(mtime);
        loaded.index = Some(index.clone());
        Ok(index)
    }

    /// The commit the index was generated against, for staleness checks.
    pub fn generated_commit(&self) -> Result<String, AdapterError> {
        Ok(self.index()?.generated_at_commit.clone())
    }

    fn find<'a>(&self, index: &'a IndexFile, query: &SymbolQuery) -> Option<&'a IndexedSymbol> {
        if let Some(hint) = &query.native_hint
            && let Some(sym) = index.symbols.iter().find(|s| &s.native_id == hint)
        {
            return Some(sym);
        }
        index
            .symbols
            .iter()
            .find(|s| s.name == query.name && s.container == query.container)
    }

    fn to_facts(sym: &IndexedSymbol) -> SymbolFacts {
        SymbolFacts {
            stable_id: None,
            name: sym.name.clone(),
            container: sym.container.clone(),
            kind: sym.kind,
            arity: sym.arity,
            signature_full: sym.signature.clone(),
            signature_normalized: sym.signature_normalized.clone(),
            visibility: sym.visibility,
            visibility_confidence: sym.visibility.map(|_| 0.95),
            module_id: sym.module_id.clone(),
            location: Some(sym.location.clone()),
            location_freshness: LocationFreshness::Fresh,
            ref_count: None,
            confidence: 0.95,
        }
    }
}

#[async_trait]
impl BackendAdapter for IndexedAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::IndexedSemantic
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            symbols: true,
            references: true,
            modules: true,
            impact: true,
            mints_stable_ids: true,
            visibility: true,
        }
    }

    async fn is_available(&self) -> bool {
        self.index().is_ok()
    }

    async fn get_symbol(
        &self,
        query: &SymbolQuery,
    ) -> Result<PartialResult<Option<SymbolFacts>>, AdapterError> {
        let index = self.index()?;
        let facts = self.find(&index, query).map(|sym| {
            let mut facts = Self::to_facts(sym);
            facts.ref_count = index
                .references
                .get(&sym.native_id)
                .map(|refs| refs.len() as u32);
            facts
        });
        Ok(PartialResult::full(facts))
    }

    async fn find_references(
        &self,
        query: &SymbolQuery,
        scope: &ReferenceScope,
        limit: usize,
    ) -> Result<PartialResult<Vec<Reference>>, AdapterError> {
        let index = self.index()?;
        let Some(sym) = self.find(&index, query) else {
            return Ok(PartialResult::full(Vec::new()));
        };
        let all: Vec<Reference> = index
            .references
            .get(&sym.native_id)
            .map(|refs| {
                refs.iter()
                    .filter(|r| scope.contains(&r.location.file))
                    .map(|r| Reference {
                        location: r.location.clone(),
                        kind: r.kind,
                        confidence: 0.95,
                    })
                    .collect()
            })
            .unwrap_or_default();

        if all.len() > limit {
            let mut trimmed = all;
            trimmed.truncate(limit);
            return Ok(PartialResult::full(trimmed).truncated());
        }
        Ok(PartialResult::full(all))
    }

    async fn list_modules(&self) -> Result<PartialResult<Vec<ModuleFacts>>, AdapterError> {
        let index = self.index()?;
        Ok(PartialResult::full(index.modules.clone()))
    }

    async fn impact(
        &self,
        query: &SymbolQuery,
        depth: u32,
    ) -> Result<PartialResult<Vec<ImpactItem>>, AdapterError> {
        let index = self.index()?;
        let Some(sym) = self.find(&index, query) else {
            return Ok(PartialResult::full(Vec::new()));
        };

        // Reverse BFS over the call graph: who reaches this symbol?
        let mut reverse: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for edge in &index.call_graph {
            reverse.entry(&edge.to).or_default().push(&edge.from);
        }

        let mut items = Vec::new();
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut queue: VecDeque<(&str, u32)> = VecDeque::new();
        visited.insert(&sym.native_id);
        queue.push_back((&sym.native_id, 0));

        while let Some((node, d)) = queue.pop_front() {
            if d >= depth {
                continue;
            }
            let Some(callers) = reverse.get(node) else {
                continue;
            };
            for caller in callers {
                if !visited.insert(caller) {
                    continue;
                }
                let caller_sym = index.symbols.iter().find(|s| &s.native_id == caller);
                let (name, file) = caller_sym
                    .map(|s| (s.name.clone(), s.location.file.clone()))
                    .unwrap_or_else(|| ((*caller).to_string(), String::new()));
                let kind = if file.contains("test") {
                    ImpactKind::Test
                } else if d == 0 {
                    ImpactKind::Caller
                } else {
                    ImpactKind::Transitive
                };
                items.push(ImpactItem {
                    stable_id: (*caller).to_string(),
                    name,
                    kind,
                    confidence: (1.0 - 0.2 * f64::from(d)).max(0.2),
                    depth: d + 1,
                });
                queue.push_back((caller, d + 1));
            }
        }

        Ok(PartialResult::full(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ckb_core::SymbolId;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn loc(file: &str, line: u32) -> Location {
        Location {
            file: file.into(),
            start_line: line,
            start_column: 1,
            end_line: line,
            end_column: 10,
        }
    }

    fn sample_index() -> IndexFile {
        IndexFile {
            schema: 1,
            generated_at_commit: "abc123".into(),
            symbols: vec![
                IndexedSymbol {
                    native_id: "scip:lib/parse".into(),
                    name: "parse".into(),
                    container: "lib".into(),
                    kind: SymbolKind::Function,
                    arity: Some(1),
                    signature: Some("fn parse(input: &str) -> Ast".into()),
                    signature_normalized: Some("fn(&str) -> Ast".into()),
                    visibility: Some(Visibility::Public),
                    module_id: Some("lib".into()),
                    location: loc("src/lib.rs", 10),
                },
                IndexedSymbol {
                    native_id: "scip:lib/eval".into(),
                    name: "eval".into(),
                    container: "lib".into(),
                    kind: SymbolKind::Function,
                    arity: Some(1),
                    signature: None,
                    signature_normalized: None,
                    visibility: Some(Visibility::Internal),
                    module_id: Some("lib".into()),
                    location: loc("src/eval.rs", 5),
                },
                IndexedSymbol {
                    native_id: "scip:tests/check".into(),
                    name: "check".into(),
                    container: "tests".into(),
                    kind: SymbolKind::Function,
                    arity: None,
                    signature: None,
                    signature_normalized: None,
                    visibility: None,
                    module_id: None,
                    location: loc("tests/parse_test.rs", 3),
                },
            ],
            references: BTreeMap::from([(
                "scip:lib/parse".to_string(),
                vec![
                    IndexedReference {
                        location: loc("src/eval.rs", 20),
                        kind: ReferenceKind::Use,
                    },
                    IndexedReference {
                        location: loc("src/main.rs", 4),
                        kind: ReferenceKind::Use,
                    },
                ],
            )]),
            modules: vec![ModuleFacts {
                id: "lib".into(),
                name: "lib".into(),
                symbol_count: 2,
                impact_count: 3,
            }],
            call_graph: vec![
                CallEdge {
                    from: "scip:lib/eval".into(),
                    to: "scip:lib/parse".into(),
                },
                CallEdge {
                    from: "scip:tests/check".into(),
                    to: "scip:lib/eval".into(),
                },
            ],
        }
    }

    fn write_index(index: &IndexFile) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(index).unwrap().as_bytes())
            .unwrap();
        file.flush().unwrap();
        file
    }

    fn query(name: &str, container: &str) -> SymbolQuery {
        SymbolQuery {
            id: SymbolId::new("demo", "ffff"),
            name: name.into(),
            container: container.into(),
            native_hint: None,
            file_hint: None,
            language: None,
        }
    }

    #[tokio::test]
    async fn missing_file_is_unavailable() {
        let adapter = IndexedAdapter::new("/definitely/not/here.json");
        assert!(!adapter.is_available().await);
        assert!(matches!(
            adapter.get_symbol(&query("parse", "lib")).await,
            Err(AdapterError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn symbol_lookup_by_name_and_native_hint() {
        let file = write_index(&sample_index());
        let adapter = IndexedAdapter::new(file.path());
        assert!(adapter.is_available().await);

        let by_name = adapter.get_symbol(&query("parse", "lib")).await.unwrap();
        let facts = by_name.data.unwrap();
        assert_eq!(facts.name, "parse");
        assert_eq!(facts.visibility, Some(Visibility::Public));
        assert_eq!(facts.ref_count, Some(2));
        assert!(facts.stable_id.is_none(), "adapters never stamp stable ids");

        let mut q = query("wrong-name", "lib");
        q.native_hint = Some("scip:lib/parse".into());
        let by_hint = adapter.get_symbol(&q).await.unwrap();
        assert_eq!(by_hint.data.unwrap().name, "parse");
    }

    #[tokio::test]
    async fn unknown_symbol_is_none_not_error() {
        let file = write_index(&sample_index());
        let adapter = IndexedAdapter::new(file.path());
        let result = adapter.get_symbol(&query("ghost", "lib")).await.unwrap();
        assert!(result.data.is_none());
    }

    #[tokio::test]
    async fn references_respect_scope_and_limit() {
        let file = write_index(&sample_index());
        let adapter = IndexedAdapter::new(file.path());

        let all = adapter
            .find_references(&query("parse", "lib"), &ReferenceScope::default(), 10)
            .await
            .unwrap();
        assert_eq!(all.data.len(), 2);
        assert!(!all.truncated);

        let scoped = adapter
            .find_references(
                &query("parse", "lib"),
                &ReferenceScope {
                    file: Some("src/eval.rs".into()),
                    module: None,
                },
                10,
            )
            .await
            .unwrap();
        assert_eq!(scoped.data.len(), 1);

        let limited = adapter
            .find_references(&query("parse", "lib"), &ReferenceScope::default(), 1)
            .await
            .unwrap();
        assert_eq!(limited.data.len(), 1);
        assert!(limited.truncated);
    }

    #[tokio::test]
    async fn impact_walks_reverse_call_graph_with_depth() {
        let file = write_index(&sample_index());
        let adapter = IndexedAdapter::new(file.path());

        let one_hop = adapter.impact(&query("parse", "lib"), 1).await.unwrap();
        assert_eq!(one_hop.data.len(), 1);
        assert_eq!(one_hop.data[0].name, "eval");
        assert_eq!(one_hop.data[0].kind, ImpactKind::Caller);
        assert_eq!(one_hop.data[0].depth, 1);

        let two_hops = adapter.impact(&query("parse", "lib"), 2).await.unwrap();
        assert_eq!(two_hops.data.len(), 2);
        let test_item = two_hops.data.iter().find(|i| i.name == "check").unwrap();
        assert_eq!(test_item.kind, ImpactKind::Test);
        assert_eq!(test_item.depth, 2);
    }

    #[tokio::test]
    async fn modules_and_generated_commit() {
        let file = write_index(&sample_index());
        let adapter = IndexedAdapter::new(file.path());
        let modules = adapter.list_modules().await.unwrap();
        assert_eq!(modules.data.len(), 1);
        assert_eq!(adapter.generated_commit().unwrap(), "abc123");
    }
}
