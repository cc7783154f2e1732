// SPDX-License-Identifier: MIT OR Apache-2.0
//! Hybrid fan-out across a local federation and remote peers.

use chrono::Utc;
use ckb_federation::{FederationIndex, ModuleRecord, RepoRecord};
use ckb_remote::{
    CachingRemoteClient, HybridQueryEngine, LocalFederationSource, RemoteServerConfig,
    SourceStatus, SymbolSource,
};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn remote_config(name: &str, server: &MockServer) -> RemoteServerConfig {
    RemoteServerConfig {
        name: name.into(),
        url: server.uri(),
        token: None,
        enabled: true,
        timeout_ms: 5_000,
    }
}

/// A local federation with two repos, each carrying a searchable module.
fn local_store() -> Arc<FederationIndex> {
    let store = FederationIndex::open_in_memory().unwrap();
    for uid in ["local-a", "local-b"] {
        store
            .upsert_repo(&RepoRecord {
                repo_uid: uid.into(),
                repo_id: uid.into(),
                name: uid.into(),
                root_path: None,
                last_synced_at: Some(Utc::now()),
                schema_version: 1,
            })
            .unwrap();
        store
            .replace_modules(
                uid,
                &[ModuleRecord {
                    repo_uid: uid.into(),
                    module_id: format!("{uid}/parser"),
                    name: "parser".into(),
                    path: "src/parser".into(),
                    symbol_count: 4,
                    summary: "parser module".into(),
                }],
            )
            .unwrap();
    }
    Arc::new(store)
}

async fn mount_repo_list(server: &MockServer, uid: &str) {
    Mock::given(method("GET"))
        .and(path("/api/repos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "repos": [{"uid": uid, "name": uid}]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn fan_out_merges_sources_and_degrades_timeouts() {
    // Remote one answers; remote two stalls past the fan-out deadline.
    let fast = MockServer::start().await;
    mount_repo_list(&fast, "fast-repo").await;
    Mock::given(method("GET"))
        .and(path("/api/repos/fast-repo/symbols/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "symbols": [
                {"stable_id": "ckb:fast-repo:sym:aa", "name": "parser", "score": 0.9}
            ]
        })))
        .mount(&fast)
        .await;

    let slow = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/repos"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"repos": []}))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&slow)
        .await;

    let sources: Vec<Arc<dyn SymbolSource>> = vec![
        Arc::new(LocalFederationSource::new(local_store())),
        Arc::new(CachingRemoteClient::new(&remote_config("fast", &fast)).unwrap()),
        Arc::new(CachingRemoteClient::new(&remote_config("slow", &slow)).unwrap()),
    ];
    let engine = HybridQueryEngine::new(sources).with_timeout(Duration::from_millis(500));

    let result = engine.search_symbols("parser", 20).await;

    assert_eq!(result.sources.len(), 3, "every source gets a provenance entry");
    let timeouts: Vec<_> = result
        .sources
        .iter()
        .filter(|s| s.status == SourceStatus::Timeout)
        .collect();
    assert_eq!(timeouts.len(), 1);
    assert_eq!(timeouts[0].name, "slow");
    assert!(!result.errors.is_empty(), "the timeout is recorded as an error");

    // Successful sources contributed: two local repos plus the fast remote.
    let from_local = result
        .symbols
        .iter()
        .filter(|s| s.source == "local-federation")
        .count();
    let from_fast = result.symbols.iter().filter(|s| s.source == "fast").count();
    assert_eq!(from_local, 2);
    assert_eq!(from_fast, 1);
    assert!(
        result.symbols.iter().all(|s| s.source != "slow"),
        "the timed-out source contributes nothing"
    );
}

#[tokio::test]
async fn source_errors_are_non_fatal() {
    let broken = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/repos"))
        .respond_with(ResponseTemplate::new(401).set_body_string("no auth"))
        .mount(&broken)
        .await;

    let sources: Vec<Arc<dyn SymbolSource>> = vec![
        Arc::new(LocalFederationSource::new(local_store())),
        Arc::new(CachingRemoteClient::new(&remote_config("broken", &broken)).unwrap()),
    ];
    let engine = HybridQueryEngine::new(sources);

    let result = engine.search_symbols("parser", 10).await;
    assert_eq!(result.sources.len(), 2);
    assert!(
        result
            .sources
            .iter()
            .any(|s| s.name == "broken" && s.status == SourceStatus::Error)
    );
    assert_eq!(result.errors.len(), 1);
    assert!(!result.symbols.is_empty(), "healthy sources still answer");
}

#[tokio::test]
async fn limit_is_distributed_across_repos() {
    // One remote serving two repos: each per-repo search must request
    // roughly half the total limit.
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/repos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "repos": [{"uid": "r1", "name": "r1"}, {"uid": "r2", "name": "r2"}]
        })))
        .mount(&server)
        .await;
    for repo in ["r1", "r2"] {
        Mock::given(method("GET"))
            .and(path(format!("/api/repos/{repo}/symbols/search")))
            .and(wiremock::matchers::query_param("limit", "5"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"symbols": []})),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    let sources: Vec<Arc<dyn SymbolSource>> = vec![Arc::new(
        CachingRemoteClient::new(&remote_config("peer", &server)).unwrap(),
    )];
    let engine = HybridQueryEngine::new(sources);
    let result = engine.search_symbols("anything", 10).await;
    assert_eq!(result.sources[0].status, SourceStatus::Success);
}
