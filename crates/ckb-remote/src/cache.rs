// SPDX-License-Identifier: MIT OR Apache-2.0
//! TTL cache over the remote client.
//!
//! Serialized responses are stored keyed by a digest of the request
//! components, with a per-endpoint freshness policy. Symbol, reference,
//! call-graph, file-listing, and batch-get endpoints are never cached.

use crate::client::{RemoteClient, RemoteError, RemoteRepo, RemoteServerConfig, RemoteSymbol};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Cacheable endpoint classes with their TTLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Repository listing: one hour.
    ListRepos,
    /// Repository metadata: one hour.
    RepoMeta,
    /// Symbol search: fifteen minutes.
    SymbolSearch,
    /// File search: fifteen minutes.
    FileSearch,
}

impl Endpoint {
    /// The freshness policy.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        match self {
            Self::ListRepos | Self::RepoMeta => Duration::from_secs(3600),
            Self::SymbolSearch | Self::FileSearch => Duration::from_secs(900),
        }
    }
}

fn request_key(server: &str, endpoint: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(server.as_bytes());
    hasher.update([0x1f]);
    hasher.update(endpoint.as_bytes());
    for part in parts {
        hasher.update([0x1f]);
        hasher.update(part.as_bytes());
    }
    ckb_core::hex_lower(&hasher.finalize()[..16])
}

#[derive(Debug)]
struct CacheEntry {
    value: serde_json::Value,
    inserted_at: Instant,
    ttl: Duration,
}

/// The caching wrapper. Uncached endpoints delegate straight through.
#[derive(Debug)]
pub struct CachingRemoteClient {
    client: RemoteClient,
    entries: Mutex<HashMap<String, CacheEntry>>,
    /// Repo summaries materialized from the last repo listing.
    summaries: Mutex<Vec<RemoteRepo>>,
}

impl CachingRemoteClient {
    /// Wrap a client built from `config`.
    pub fn new(config: &RemoteServerConfig) -> Result<Self, RemoteError> {
        Ok(Self {
            client: RemoteClient::new(config)?,
            entries: Mutex::new(HashMap::new()),
            summaries: Mutex::new(Vec::new()),
        })
    }

    /// The wrapped client's name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.client.name()
    }

    /// The wrapped client's base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }

    /// The underlying client, for never-cached calls.
    #[must_use]
    pub fn client(&self) -> &RemoteClient {
        &self.client
    }

    fn cached(&self, key: &str) -> Option<serde_json::Value> {
        let mut entries = self.entries.lock().expect("remote cache lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < entry.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn store(&self, key: String, value: serde_json::Value, ttl: Duration) {
        self.entries
            .lock()
            .expect("remote cache lock poisoned")
            .insert(
                key,
                CacheEntry {
                    value,
                    inserted_at: Instant::now(),
                    ttl,
                },
            );
    }

    /// Cached repository listing. A fresh fetch also materializes the repo
    /// summaries for offline listing.
    pub async fn list_repos(&self) -> Result<Vec<RemoteRepo>, RemoteError> {
        let key = request_key(self.client.name(), "list_repos", &[]);
        if let Some(value) = self.cached(&key) {
            debug!(target: "ckb.remote.cache", server = self.client.name(), "list_repos hit");
            return serde_json::from_value(value).map_err(|e| RemoteError::Decode(e.to_string()));
        }
        let repos = self.client.list_repos().await?;
        *self.summaries.lock().expect("remote cache lock poisoned") = repos.clone();
        if let Ok(value) = serde_json::to_value(&repos) {
            self.store(key, value, Endpoint::ListRepos.ttl());
        }
        Ok(repos)
    }

    /// Repo summaries from the last successful listing, available offline.
    #[must_use]
    pub fn repo_summaries(&self) -> Vec<RemoteRepo> {
        self.summaries
            .lock()
            .expect("remote cache lock poisoned")
            .clone()
    }

    /// Cached repository metadata.
    pub async fn repo_meta(&self, uid: &str) -> Result<serde_json::Value, RemoteError> {
        let key = request_key(self.client.name(), "repo_meta", &[uid]);
        if let Some(value) = self.cached(&key) {
            return Ok(value);
        }
        let value = self.client.repo_meta(uid).await?;
        self.store(key, value.clone(), Endpoint::RepoMeta.ttl());
        Ok(value)
    }

    /// Cached symbol search.
    pub async fn search_symbols(
        &self,
        repo: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RemoteSymbol>, RemoteError> {
        let limit_s = limit.to_string();
        let key = request_key(
            self.client.name(),
            "symbol_search",
            &[repo, query, &limit_s],
        );
        if let Some(value) = self.cached(&key) {
            return serde_json::from_value(value).map_err(|e| RemoteError::Decode(e.to_string()));
        }
        let symbols = self.client.search_symbols(repo, query, limit).await?;
        if let Ok(value) = serde_json::to_value(&symbols) {
            self.store(key, value, Endpoint::SymbolSearch.ttl());
        }
        Ok(symbols)
    }

    /// Cached file search.
    pub async fn search_files(
        &self,
        repo: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<String>, RemoteError> {
        let limit_s = limit.to_string();
        let key = request_key(self.client.name(), "file_search", &[repo, query, &limit_s]);
        if let Some(value) = self.cached(&key) {
            return serde_json::from_value(value).map_err(|e| RemoteError::Decode(e.to_string()));
        }
        let files = self.client.search_files(repo, query, limit).await?;
        if let Ok(value) = serde_json::to_value(&files) {
            self.store(key, value, Endpoint::FileSearch.ttl());
        }
        Ok(files)
    }

    /// Symbol fetch — never cached.
    pub async fn get_symbol(
        &self,
        repo: &str,
        stable_id: &str,
    ) -> Result<serde_json::Value, RemoteError> {
        self.client.get_symbol(repo, stable_id).await
    }

    /// Reference listing — never cached.
    pub async fn find_references(
        &self,
        repo: &str,
        stable_id: &str,
        limit: usize,
    ) -> Result<serde_json::Value, RemoteError> {
        self.client.find_references(repo, stable_id, limit).await
    }

    /// Batch get — never cached.
    pub async fn batch_get(
        &self,
        repo: &str,
        stable_ids: &[String],
    ) -> Result<serde_json::Value, RemoteError> {
        self.client.batch_get(repo, stable_ids).await
    }
}
