// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end orchestrator behavior against a real git fixture and
//! scripted fact sources.

use ckb_backend::testing::MockAdapter;
use ckb_backend::ReferenceScope;
use ckb_core::{
    BackendKind, CompletenessReason, ErrorCode, Location, LocationFreshness, MergeMode, Reference,
    ReferenceKind, SymbolFacts, SymbolKind, Visibility,
};
use ckb_identity::{BackendMapping, IdentityStore, ObservedSymbol, SymbolFingerprint, reconcile};
use ckb_orchestrator::{Orchestrator, OrchestratorBuilder, OrchestratorPolicy};
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("spawn git");
    assert!(status.success(), "git {args:?} failed");
}

fn fixture_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    git(dir.path(), &["init", "-q"]);
    git(dir.path(), &["config", "user.name", "ckb"]);
    git(dir.path(), &["config", "user.email", "ckb@local"]);
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src/lib.rs"), "pub fn parse() {}\n").unwrap();
    git(dir.path(), &["add", "-A"]);
    git(dir.path(), &["commit", "-qm", "baseline"]);
    dir
}

fn fingerprint(name: &str) -> SymbolFingerprint {
    SymbolFingerprint {
        container: "lib".into(),
        name: name.into(),
        kind: SymbolKind::Function,
        arity: Some(0),
        normalized_signature: Some("fn() -> ()".into()),
    }
}

fn location(file: &str, line: u32) -> Location {
    Location {
        file: file.into(),
        start_line: line,
        start_column: 8,
        end_line: line,
        end_column: 13,
    }
}

fn indexed_symbol_facts() -> SymbolFacts {
    SymbolFacts {
        stable_id: None,
        name: "parse".into(),
        container: "lib".into(),
        kind: SymbolKind::Function,
        arity: Some(0),
        signature_full: Some("pub fn parse()".into()),
        signature_normalized: Some("fn() -> ()".into()),
        visibility: Some(Visibility::Public),
        visibility_confidence: Some(0.95),
        module_id: Some("lib".into()),
        location: Some(location("src/lib.rs", 1)),
        location_freshness: LocationFreshness::Fresh,
        ref_count: Some(2),
        confidence: 0.95,
    }
}

fn reference(file: &str, line: u32) -> Reference {
    Reference {
        location: location(file, line),
        kind: ReferenceKind::Use,
        confidence: 0.95,
    }
}

/// Seed the identity store with the `parse` symbol and return its id.
fn seed_identity(store: &IdentityStore) -> String {
    let id = store.assign_stable_id(&fingerprint("parse"));
    store.observe(
        &id,
        Some(location("src/lib.rs", 1)),
        LocationFreshness::Fresh,
        vec![BackendMapping {
            backend: BackendKind::IndexedSemantic,
            native_id: "scip:lib/parse".into(),
        }],
    );
    id
}

fn orchestrator_with(
    repo: &TempDir,
    identity: Arc<IdentityStore>,
    adapters: Vec<Arc<MockAdapter>>,
) -> Orchestrator {
    let mut builder = OrchestratorBuilder::new("demo", repo.path()).identity(identity);
    for adapter in adapters {
        builder = builder.adapter(adapter);
    }
    builder.build()
}

// ---------------------------------------------------------------------------
// Scenario 1: dirty working tree
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dirty_tree_downgrades_freshness_and_warns() {
    let repo = fixture_repo();
    let identity = Arc::new(IdentityStore::new("demo"));
    let id = seed_identity(&identity);

    // Dirty the working tree.
    fs::write(repo.path().join("src/lib.rs"), "pub fn parse() { /* edited */ }\n").unwrap();

    let indexed =
        Arc::new(MockAdapter::new(BackendKind::IndexedSemantic).with_symbol(indexed_symbol_facts()));
    let orchestrator = orchestrator_with(&repo, identity, vec![indexed]);

    let envelope = orchestrator.get_symbol(&id).await;
    let facts = envelope.data.expect("symbol expected");
    assert_eq!(facts.location_freshness, LocationFreshness::MayBeStale);
    assert_eq!(facts.stable_id.as_deref(), Some(id.as_str()));
    assert!(
        envelope.warnings.iter().any(|w| w.contains("dirty")),
        "expected a dirty-tree warning, got {:?}",
        envelope.warnings
    );
    assert!(
        envelope
            .suggested_next_calls
            .iter()
            .any(|d| d.params.get("repo_state_mode") == Some(&serde_json::json!("full"))),
        "expected a full repo-state drilldown"
    );
    assert!(envelope.meta.provenance.repo_state.dirty);
    // The repo_state confidence factor reflects the dirty tree.
    let repo_factor = envelope
        .meta
        .confidence
        .factors
        .iter()
        .find(|f| f.name == "repo_state")
        .expect("repo_state factor required");
    assert!(repo_factor.impact < 0.0);
}

// ---------------------------------------------------------------------------
// Scenario 2: rename across refreshes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn renamed_symbol_redirects_with_annotation() {
    let repo = fixture_repo();
    let identity = Arc::new(IdentityStore::new("demo"));

    let old = ObservedSymbol {
        fingerprint: fingerprint("Foo"),
        mappings: vec![BackendMapping {
            backend: BackendKind::IndexedSemantic,
            native_id: "scip:lib/sym1".into(),
        }],
    };
    let new = ObservedSymbol {
        fingerprint: fingerprint("Bar"),
        mappings: old.mappings.clone(),
    };
    let old_id = identity.assign_stable_id(&old.fingerprint);
    let aliases = reconcile(&identity, &[old], &[new], "state-1");
    assert_eq!(aliases.len(), 1);
    assert!((aliases[0].confidence - 0.95).abs() < f64::EPSILON);

    let orchestrator = orchestrator_with(&repo, identity, Vec::new());
    let envelope = orchestrator.get_symbol(&old_id).await;
    let facts = envelope.data.expect("redirected symbol expected");
    assert_eq!(facts.name, "Bar");
    assert!(
        envelope
            .warnings
            .iter()
            .any(|w| w.contains(&old_id)),
        "expected redirectedFrom warning naming the retired id"
    );
}

// ---------------------------------------------------------------------------
// Merge laws
// ---------------------------------------------------------------------------

#[tokio::test]
async fn prefer_first_never_adds_references_from_peers() {
    let repo = fixture_repo();
    let identity = Arc::new(IdentityStore::new("demo"));
    let id = seed_identity(&identity);

    let indexed = Arc::new(
        MockAdapter::new(BackendKind::IndexedSemantic)
            .with_symbol(indexed_symbol_facts())
            .with_references(vec![reference("src/a.rs", 1), reference("src/b.rs", 2)]),
    );
    let lsp = Arc::new(
        MockAdapter::new(BackendKind::LanguageServer)
            .with_references((0..5).map(|i| reference("src/extra.rs", i + 1)).collect()),
    );
    let orchestrator = orchestrator_with(&repo, identity, vec![indexed, lsp.clone()]);

    let envelope = orchestrator
        .find_references(&id, ReferenceScope::default(), 50, None)
        .await;
    let references = envelope.data.expect("references expected");
    assert_eq!(references.len(), 2, "peer references must not leak in");
    assert!(
        references.iter().all(|r| !r.location.file.contains("extra")),
        "prefer-first must not contain lower-precedence references"
    );
    assert_eq!(envelope.meta.provenance.merge_mode, MergeMode::PreferFirst);
    // The peer is still visible in provenance as unused.
    assert!(
        envelope
            .meta
            .provenance
            .backends
            .iter()
            .any(|b| b.backend == BackendKind::LanguageServer)
    );
}

#[tokio::test]
async fn prefer_first_supplements_whitelist_with_conflict_records() {
    let repo = fixture_repo();
    let identity = Arc::new(IdentityStore::new("demo"));
    let id = seed_identity(&identity);

    // Ladder deliberately puts the language server first so the indexed
    // source acts as the higher-precedence supplementer.
    let mut lsp_facts = indexed_symbol_facts();
    lsp_facts.visibility = Some(Visibility::Internal);
    lsp_facts.visibility_confidence = Some(0.4);
    let lsp = Arc::new(
        MockAdapter::new(BackendKind::LanguageServer)
            .with_symbol(lsp_facts)
            .with_completeness(0.9, CompletenessReason::BestEffortLsp),
    );
    let indexed =
        Arc::new(MockAdapter::new(BackendKind::IndexedSemantic).with_symbol(indexed_symbol_facts()));

    let policy = OrchestratorPolicy {
        preference: vec![BackendKind::LanguageServer, BackendKind::IndexedSemantic],
        ..OrchestratorPolicy::default()
    };
    let orchestrator = OrchestratorBuilder::new("demo", repo.path())
        .identity(identity)
        .policy(policy)
        .adapter(lsp)
        .adapter(indexed)
        .build();

    let envelope = orchestrator.get_symbol(&id).await;
    let facts = envelope.data.expect("symbol expected");
    // The higher-precedence indexed value wins the disagreement.
    assert_eq!(facts.visibility, Some(Visibility::Public));
    let conflicts = &envelope.meta.provenance.metadata_conflicts;
    assert!(
        conflicts.iter().any(|c| c.field == "visibility"
            && c.chosen_from == BackendKind::IndexedSemantic
            && c.rejected_from == BackendKind::LanguageServer),
        "expected a recorded visibility conflict, got {conflicts:?}"
    );
}

#[tokio::test]
async fn union_merges_by_reference_key() {
    let repo = fixture_repo();
    let identity = Arc::new(IdentityStore::new("demo"));
    let id = seed_identity(&identity);

    let shared = reference("src/shared.rs", 7);
    let indexed = Arc::new(
        MockAdapter::new(BackendKind::IndexedSemantic)
            .with_symbol(indexed_symbol_facts())
            .with_references(vec![shared.clone(), reference("src/a.rs", 1)]),
    );
    let lsp = Arc::new(
        MockAdapter::new(BackendKind::LanguageServer)
            .with_references(vec![shared, reference("src/b.rs", 2)]),
    );
    let orchestrator = orchestrator_with(&repo, identity, vec![indexed, lsp]);

    let envelope = orchestrator
        .find_references(&id, ReferenceScope::default(), 50, Some(MergeMode::Union))
        .await;
    let references = envelope.data.expect("references expected");
    assert_eq!(references.len(), 3, "duplicates collapse by reference key");
    assert_eq!(envelope.meta.provenance.merge_mode, MergeMode::Union);
}

// ---------------------------------------------------------------------------
// Cache correctness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unchanged_state_hits_view_cache_and_edit_invalidates() {
    let repo = fixture_repo();
    let identity = Arc::new(IdentityStore::new("demo"));
    let id = seed_identity(&identity);
    let indexed = Arc::new(
        MockAdapter::new(BackendKind::IndexedSemantic)
            .with_symbol(indexed_symbol_facts())
            .with_references(vec![reference("src/a.rs", 1)]),
    );
    let orchestrator = orchestrator_with(&repo, identity, vec![indexed.clone()]);

    let first = orchestrator
        .find_references(&id, ReferenceScope::default(), 50, None)
        .await;
    assert_eq!(first.meta.cache.as_ref().map(|c| c.hit), Some(false));

    let second = orchestrator
        .find_references(&id, ReferenceScope::default(), 50, None)
        .await;
    assert_eq!(
        second.meta.cache.as_ref().map(|c| c.hit),
        Some(true),
        "unchanged fingerprint must hit the view cache"
    );

    // A single-character working-tree edit invalidates.
    fs::write(repo.path().join("src/lib.rs"), "pub fn parse() {}\n ").unwrap();
    let third = orchestrator
        .find_references(&id, ReferenceScope::default(), 50, None)
        .await;
    assert_eq!(
        third.meta.cache.as_ref().map(|c| c.hit),
        Some(false),
        "a working-tree edit must change the fingerprint key"
    );
}

#[tokio::test]
async fn unknown_symbol_is_negative_cached() {
    let repo = fixture_repo();
    let identity = Arc::new(IdentityStore::new("demo"));
    let indexed =
        Arc::new(MockAdapter::new(BackendKind::IndexedSemantic).with_symbol(indexed_symbol_facts()));
    let orchestrator = orchestrator_with(&repo, identity, vec![indexed.clone()]);

    let missing = "ckb:demo:sym:00000000000000000000000000000000";
    let first = orchestrator.get_symbol(missing).await;
    assert_eq!(
        first.error.as_ref().map(|e| e.code),
        Some(ErrorCode::SymbolNotFound)
    );
    assert_eq!(first.meta.cache.as_ref().map(|c| c.hit), Some(false));

    let second = orchestrator.get_symbol(missing).await;
    assert_eq!(
        second.error.as_ref().map(|e| e.code),
        Some(ErrorCode::SymbolNotFound)
    );
    assert_eq!(
        second.meta.cache.as_ref().map(|c| c.hit),
        Some(true),
        "the repeated miss must come from the negative cache"
    );
    assert_eq!(
        indexed.call_count(),
        0,
        "identity misses never reach the adapters"
    );
}

// ---------------------------------------------------------------------------
// Coalescing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identical_concurrent_queries_share_one_execution() {
    let repo = fixture_repo();
    let identity = Arc::new(IdentityStore::new("demo"));
    let id = seed_identity(&identity);
    let indexed = Arc::new(
        MockAdapter::new(BackendKind::IndexedSemantic)
            .with_symbol(indexed_symbol_facts())
            .with_delay(std::time::Duration::from_millis(100)),
    );
    let orchestrator =
        Arc::new(orchestrator_with(&repo, identity, vec![indexed.clone()]));

    let a = {
        let orchestrator = orchestrator.clone();
        let id = id.clone();
        tokio::spawn(async move { orchestrator.get_symbol(&id).await })
    };
    let b = {
        let orchestrator = orchestrator.clone();
        let id = id.clone();
        tokio::spawn(async move { orchestrator.get_symbol(&id).await })
    };
    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    assert!(a.data.is_some());
    assert!(b.data.is_some());
    assert_eq!(
        indexed.call_count(),
        1,
        "identical concurrent queries must coalesce into one execution"
    );
}

// ---------------------------------------------------------------------------
// Error classes and status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn references_with_no_sources_is_backend_unavailable() {
    let repo = fixture_repo();
    let identity = Arc::new(IdentityStore::new("demo"));
    let id = seed_identity(&identity);
    let down = Arc::new(MockAdapter::new(BackendKind::IndexedSemantic).unavailable());
    let orchestrator = orchestrator_with(&repo, identity, vec![down]);

    let envelope = orchestrator
        .find_references(&id, ReferenceScope::default(), 10, None)
        .await;
    assert_eq!(
        envelope.error.as_ref().map(|e| e.code),
        Some(ErrorCode::BackendUnavailable)
    );
    assert!(envelope.data.is_none());
}

#[tokio::test]
async fn status_reports_backends_cache_and_identity() {
    let repo = fixture_repo();
    let identity = Arc::new(IdentityStore::new("demo"));
    let id = seed_identity(&identity);
    identity.tombstone(&id, "state-x");
    let indexed =
        Arc::new(MockAdapter::new(BackendKind::IndexedSemantic).with_symbol(indexed_symbol_facts()));
    let orchestrator = orchestrator_with(&repo, identity, vec![indexed]);

    let envelope = orchestrator.status().await;
    let report = envelope.data.expect("status expected");
    assert_eq!(report.repo, "demo");
    assert_eq!(report.backends.len(), 1);
    assert!(report.backends[0].available);
    assert_eq!(report.identity.tombstones, 1);
}
