// SPDX-License-Identifier: MIT OR Apache-2.0
//! The hybrid query engine.
//!
//! Fans a symbol search out across the local federation and every enabled
//! remote server in parallel under a per-request timeout. Results are
//! annotated with their source; failures degrade to per-source error
//! records, never to a failed query.

use crate::cache::CachingRemoteClient;
use crate::client::{RemoteError, RemoteSymbol};
use async_trait::async_trait;
use ckb_federation::FederationIndex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Default per-request fan-out timeout.
pub const DEFAULT_FANOUT_TIMEOUT: Duration = Duration::from_secs(30);

/// One source's participation in a fan-out query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySource {
    /// Source name.
    pub name: String,
    /// Source URL (empty for the local federation).
    pub url: String,
    /// How the source fared.
    pub status: SourceStatus,
    /// Symbols contributed.
    pub result_count: usize,
    /// Wall-clock latency in milliseconds.
    pub latency_ms: u64,
}

/// Outcome class for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    /// The source answered.
    Success,
    /// The source failed.
    Error,
    /// The per-request timeout elapsed.
    Timeout,
}

/// A non-fatal per-source failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryError {
    /// The failing source.
    pub source: String,
    /// Failure detail.
    pub message: String,
}

/// A symbol annotated with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedSymbol {
    /// The hit itself.
    #[serde(flatten)]
    pub symbol: RemoteSymbol,
    /// Source server name.
    pub source: String,
    /// Repository the hit belongs to.
    pub repo: String,
}

/// The merged fan-out result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HybridResult {
    /// Merged, annotated symbols.
    pub symbols: Vec<AnnotatedSymbol>,
    /// One entry per source consulted.
    pub sources: Vec<QuerySource>,
    /// Per-source failures; never fatal.
    pub errors: Vec<QueryError>,
}

/// Anything the engine can fan out to.
#[async_trait]
pub trait SymbolSource: Send + Sync {
    /// Display name.
    fn source_name(&self) -> String;
    /// URL for provenance (empty for local).
    fn source_url(&self) -> String;
    /// Repositories the source serves.
    async fn repos(&self) -> Result<Vec<String>, RemoteError>;
    /// Per-repo symbol search.
    async fn search(
        &self,
        repo: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RemoteSymbol>, RemoteError>;
}

#[async_trait]
impl SymbolSource for CachingRemoteClient {
    fn source_name(&self) -> String {
        self.name().to_string()
    }

    fn source_url(&self) -> String {
        self.base_url().to_string()
    }

    async fn repos(&self) -> Result<Vec<String>, RemoteError> {
        Ok(self
            .list_repos()
            .await?
            .into_iter()
            .map(|r| r.uid)
            .collect())
    }

    async fn search(
        &self,
        repo: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RemoteSymbol>, RemoteError> {
        self.search_symbols(repo, query, limit).await
    }
}

/// The local federation as a fan-out source: module search approximates
/// symbol search over everything the catalog materializes.
pub struct LocalFederationSource {
    store: Arc<FederationIndex>,
}

impl LocalFederationSource {
    /// Wrap the local catalog.
    #[must_use]
    pub fn new(store: Arc<FederationIndex>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SymbolSource for LocalFederationSource {
    fn source_name(&self) -> String {
        "local-federation".to_string()
    }

    fn source_url(&self) -> String {
        String::new()
    }

    async fn repos(&self) -> Result<Vec<String>, RemoteError> {
        self.store
            .list_repos()
            .map(|repos| repos.into_iter().map(|r| r.repo_uid).collect())
            .map_err(|e| RemoteError::Network(e.to_string()))
    }

    async fn search(
        &self,
        repo: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RemoteSymbol>, RemoteError> {
        let hits = self
            .store
            .search_modules(query, limit)
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Ok(hits
            .into_iter()
            .filter(|m| m.repo_uid == repo)
            .map(|m| RemoteSymbol {
                stable_id: format!("ckb:{}:mod:{}", m.repo_uid, m.module_id),
                name: m.name,
                kind: "module".into(),
                path: Some(m.path),
                score: 0.5,
            })
            .collect())
    }
}

/// The fan-out engine.
pub struct HybridQueryEngine {
    sources: Vec<Arc<dyn SymbolSource>>,
    fanout_timeout: Duration,
}

impl HybridQueryEngine {
    /// Build an engine over the given sources.
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn SymbolSource>>) -> Self {
        Self {
            sources,
            fanout_timeout: DEFAULT_FANOUT_TIMEOUT,
        }
    }

    /// Override the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, fanout_timeout: Duration) -> Self {
        self.fanout_timeout = fanout_timeout;
        self
    }

    /// Fan a symbol search out across every source.
    ///
    /// Each source gets `total_limit / repo_count` per repo so one large
    /// source cannot starve the rest.
    pub async fn search_symbols(&self, query: &str, total_limit: usize) -> HybridResult {
        let futures: Vec<_> = self
            .sources
            .iter()
            .map(|source| {
                let source = source.clone();
                let query = query.to_string();
                let deadline = self.fanout_timeout;
                async move { query_one_source(source, &query, total_limit, deadline).await }
            })
            .collect();

        let outcomes = futures::future::join_all(futures).await;

        let mut result = HybridResult::default();
        for (symbols, source, error) in outcomes {
            result.symbols.extend(symbols);
            result.sources.push(source);
            if let Some(error) = error {
                result.errors.push(error);
            }
        }
        result.symbols.sort_by(|a, b| {
            b.symbol
                .score
                .partial_cmp(&a.symbol.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.stable_id.cmp(&b.symbol.stable_id))
        });
        result.symbols.truncate(total_limit);
        debug!(
            target: "ckb.remote.hybrid",
            sources = result.sources.len(),
            symbols = result.symbols.len(),
            errors = result.errors.len(),
            "fan-out complete"
        );
        result
    }
}

async fn query_one_source(
    source: Arc<dyn SymbolSource>,
    query: &str,
    total_limit: usize,
    deadline: Duration,
) -> (Vec<AnnotatedSymbol>, QuerySource, Option<QueryError>) {
    let name = source.source_name();
    let url = source.source_url();
    let started = Instant::now();

    let outcome = timeout(deadline, async {
        let repos = source.repos().await?;
        let per_repo_limit = (total_limit / repos.len().max(1)).max(1);
        let mut symbols = Vec::new();
        for repo in &repos {
            let hits = source.search(repo, query, per_repo_limit).await?;
            symbols.extend(hits.into_iter().map(|symbol| AnnotatedSymbol {
                symbol,
                source: name.clone(),
                repo: repo.clone(),
            }));
        }
        Ok::<_, RemoteError>(symbols)
    })
    .await;

    let latency_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(Ok(symbols)) => {
            let entry = QuerySource {
                name,
                url,
                status: SourceStatus::Success,
                result_count: symbols.len(),
                latency_ms,
            };
            (symbols, entry, None)
        }
        Ok(Err(err)) => {
            warn!(target: "ckb.remote.hybrid", source = %name, error = %err, "source failed");
            let entry = QuerySource {
                name: name.clone(),
                url,
                status: SourceStatus::Error,
                result_count: 0,
                latency_ms,
            };
            (
                Vec::new(),
                entry,
                Some(QueryError {
                    source: name,
                    message: err.to_string(),
                }),
            )
        }
        Err(_) => {
            warn!(target: "ckb.remote.hybrid", source = %name, "source timed out");
            let entry = QuerySource {
                name: name.clone(),
                url,
                status: SourceStatus::Timeout,
                result_count: 0,
                latency_ms,
            };
            (
                Vec::new(),
                entry,
                Some(QueryError {
                    source: name,
                    message: "fan-out timeout".into(),
                }),
            )
        }
    }
}
