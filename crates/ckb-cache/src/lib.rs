// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! ckb-cache
//!
//! Three cache tiers with distinct keys and lifetimes:
//!
//! - **Query cache** — metadata-only tools, key includes the HEAD commit,
//!   TTL 300 s.
//! - **View cache** — location-sensitive tools, key includes the full
//!   repo-state fingerprint and the config hash, TTL 3600 s.
//! - **Negative cache** — per error class, short TTLs; a
//!   `WORKSPACE_NOT_READY` entry additionally queues a warmup request.
//!
//! Invalidation: HEAD change flushes the query tier; repo-state or
//! config-hash change flushes the view tier; a schema-version bump flushes
//! everything.

use ckb_core::ErrorCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Build a cache key from the tool name, its normalized parameters, and the
/// state key (HEAD commit or full fingerprint, per the tool's mode).
#[must_use]
pub fn cache_key(tool: &str, normalized_params: &serde_json::Value, state_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool.as_bytes());
    hasher.update([0x1f]);
    hasher.update(ckb_core::canon::canonical_json(normalized_params).as_bytes());
    hasher.update([0x1f]);
    hasher.update(state_key.as_bytes());
    ckb_core::hex_lower(&hasher.finalize()[..16])
}

// ---------------------------------------------------------------------------
// Configuration and statistics
// ---------------------------------------------------------------------------

/// Tunable lifetimes. Defaults follow the cache contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Query-tier TTL (default 300 s).
    #[serde(with = "duration_secs")]
    pub query_ttl: Duration,
    /// View-tier TTL (default 3600 s).
    #[serde(with = "duration_secs")]
    pub view_ttl: Duration,
    /// Schema version; bumping it flushes every tier.
    pub schema_version: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            query_ttl: Duration::from_secs(300),
            view_ttl: Duration::from_secs(3600),
            schema_version: 1,
        }
    }
}

/// Serde helper — `Duration` as integer seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(val: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        val.as_secs().serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let secs: u64 = u64::deserialize(de)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Hit/miss/eviction counters for one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierStats {
    /// Reads that found a live entry.
    pub hits: u64,
    /// Reads that found nothing (or an expired entry).
    pub misses: u64,
    /// Entries removed by expiry or flush.
    pub evictions: u64,
}

/// Counters across all three tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Query-tier counters.
    pub query: TierStats,
    /// View-tier counters.
    pub view: TierStats,
    /// Negative-tier counters.
    pub negative: TierStats,
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Entry {
    value: serde_json::Value,
    inserted_at: Instant,
}

#[derive(Debug, Clone)]
struct NegativeEntry {
    code: ErrorCode,
    inserted_at: Instant,
    ttl: Duration,
}

/// A queued request to pre-start a language server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmupRequest {
    /// Language whose server should be started.
    pub language: String,
}

// ---------------------------------------------------------------------------
// CacheTiers
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct TiersInner {
    query: HashMap<String, Entry>,
    view: HashMap<String, Entry>,
    negative: HashMap<String, NegativeEntry>,
    warmups: Vec<WarmupRequest>,
    stats: CacheStats,
    last_head: Option<String>,
}

/// The three cache tiers behind one lock.
#[derive(Debug)]
pub struct CacheTiers {
    config: CacheConfig,
    inner: Mutex<TiersInner>,
}

impl CacheTiers {
    /// Create empty tiers with the given configuration.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(TiersInner::default()),
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Read from the query tier. Returns the value and its age.
    pub fn get_query(&self, key: &str) -> Option<(serde_json::Value, Duration)> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let ttl = self.config.query_ttl;
        match Self::get_entry(&mut inner.query, key, ttl) {
            Lookup::Hit(value, age) => {
                inner.stats.query.hits += 1;
                Some((value, age))
            }
            Lookup::Expired => {
                inner.stats.query.misses += 1;
                inner.stats.query.evictions += 1;
                None
            }
            Lookup::Absent => {
                inner.stats.query.misses += 1;
                None
            }
        }
    }

    /// Insert into the query tier.
    pub fn put_query(&self, key: impl Into<String>, value: serde_json::Value) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.query.insert(
            key.into(),
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Read from the view tier. Returns the value and its age.
    pub fn get_view(&self, key: &str) -> Option<(serde_json::Value, Duration)> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let ttl = self.config.view_ttl;
        match Self::get_entry(&mut inner.view, key, ttl) {
            Lookup::Hit(value, age) => {
                inner.stats.view.hits += 1;
                Some((value, age))
            }
            Lookup::Expired => {
                inner.stats.view.misses += 1;
                inner.stats.view.evictions += 1;
                None
            }
            Lookup::Absent => {
                inner.stats.view.misses += 1;
                None
            }
        }
    }

    /// Insert into the view tier.
    pub fn put_view(&self, key: impl Into<String>, value: serde_json::Value) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.view.insert(
            key.into(),
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Record a negative result for an error class. Classes without a
    /// negative TTL are not cached. A `WORKSPACE_NOT_READY` entry also
    /// queues a warmup for `language`, when given.
    pub fn put_negative(&self, key: impl Into<String>, code: ErrorCode, language: Option<&str>) {
        let Some(ttl_secs) = code.negative_cache_ttl_secs() else {
            return;
        };
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.negative.insert(
            key.into(),
            NegativeEntry {
                code,
                inserted_at: Instant::now(),
                ttl: Duration::from_secs(ttl_secs),
            },
        );
        if code == ErrorCode::WorkspaceNotReady
            && let Some(lang) = language
        {
            let req = WarmupRequest {
                language: lang.to_string(),
            };
            if !inner.warmups.contains(&req) {
                inner.warmups.push(req);
            }
        }
    }

    /// Check the negative tier. A hit means the error class is still fresh
    /// and adapters must not be consulted.
    pub fn get_negative(&self, key: &str) -> Option<ErrorCode> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        match inner.negative.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < entry.ttl => {
                let code = entry.code;
                inner.stats.negative.hits += 1;
                Some(code)
            }
            Some(_) => {
                inner.negative.remove(key);
                inner.stats.negative.misses += 1;
                inner.stats.negative.evictions += 1;
                None
            }
            None => {
                inner.stats.negative.misses += 1;
                None
            }
        }
    }

    /// Drain pending warmup requests.
    pub fn take_warmups(&self) -> Vec<WarmupRequest> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        std::mem::take(&mut inner.warmups)
    }

    /// Observe the current HEAD commit; a change flushes the query tier.
    pub fn observe_head(&self, head: &str) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        if inner.last_head.as_deref() == Some(head) {
            return;
        }
        if inner.last_head.is_some() {
            let evicted = inner.query.len() as u64;
            inner.query.clear();
            inner.stats.query.evictions += evicted;
            debug!(target: "ckb.cache", head, evicted, "HEAD changed; query tier flushed");
        }
        inner.last_head = Some(head.to_string());
    }

    /// Flush the view tier (repo-state change or config-hash change).
    pub fn flush_view(&self) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let evicted = inner.view.len() as u64;
        inner.view.clear();
        inner.stats.view.evictions += evicted;
    }

    /// Flush every tier (schema-version bump).
    pub fn flush_all(&self) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let q = inner.query.len() as u64;
        let v = inner.view.len() as u64;
        let n = inner.negative.len() as u64;
        inner.query.clear();
        inner.view.clear();
        inner.negative.clear();
        inner.stats.query.evictions += q;
        inner.stats.view.evictions += v;
        inner.stats.negative.evictions += n;
    }

    /// Snapshot the counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().expect("cache lock poisoned").stats
    }

    fn get_entry(map: &mut HashMap<String, Entry>, key: &str, ttl: Duration) -> Lookup {
        match map.get(key) {
            Some(entry) => {
                let age = entry.inserted_at.elapsed();
                if age < ttl {
                    Lookup::Hit(entry.value.clone(), age)
                } else {
                    map.remove(key);
                    Lookup::Expired
                }
            }
            None => Lookup::Absent,
        }
    }
}

enum Lookup {
    Hit(serde_json::Value, Duration),
    Expired,
    Absent,
}

impl Default for CacheTiers {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tiny_ttl() -> CacheTiers {
        CacheTiers::new(CacheConfig {
            query_ttl: Duration::from_millis(30),
            view_ttl: Duration::from_millis(30),
            schema_version: 1,
        })
    }

    #[test]
    fn cache_key_depends_on_all_components() {
        let params = json!({"symbol": "foo"});
        let a = cache_key("get_symbol", &params, "head1");
        assert_eq!(a, cache_key("get_symbol", &params, "head1"));
        assert_ne!(a, cache_key("references", &params, "head1"));
        assert_ne!(a, cache_key("get_symbol", &json!({"symbol": "bar"}), "head1"));
        assert_ne!(a, cache_key("get_symbol", &params, "head2"));
    }

    #[test]
    fn cache_key_ignores_param_order() {
        let a = cache_key("t", &json!({"a": 1, "b": 2}), "s");
        let b = cache_key("t", &json!({"b": 2, "a": 1}), "s");
        assert_eq!(a, b);
    }

    #[test]
    fn query_hit_and_miss_counting() {
        let tiers = CacheTiers::default();
        assert!(tiers.get_query("k").is_none());
        tiers.put_query("k", json!(1));
        assert_eq!(tiers.get_query("k").unwrap().0, json!(1));
        let stats = tiers.stats();
        assert_eq!(stats.query.hits, 1);
        assert_eq!(stats.query.misses, 1);
    }

    #[test]
    fn expired_entries_are_misses() {
        let tiers = tiny_ttl();
        tiers.put_query("k", json!(1));
        std::thread::sleep(Duration::from_millis(50));
        assert!(tiers.get_query("k").is_none());
    }

    #[test]
    fn head_change_flushes_query_tier_only() {
        let tiers = CacheTiers::default();
        tiers.observe_head("aaa");
        tiers.put_query("q", json!(1));
        tiers.put_view("v", json!(2));
        tiers.observe_head("bbb");
        assert!(tiers.get_query("q").is_none());
        assert!(tiers.get_view("v").is_some());
        assert_eq!(tiers.stats().query.evictions, 1);
    }

    #[test]
    fn same_head_does_not_flush() {
        let tiers = CacheTiers::default();
        tiers.observe_head("aaa");
        tiers.put_query("q", json!(1));
        tiers.observe_head("aaa");
        assert!(tiers.get_query("q").is_some());
    }

    #[test]
    fn flush_view_and_flush_all() {
        let tiers = CacheTiers::default();
        tiers.put_query("q", json!(1));
        tiers.put_view("v", json!(2));
        tiers.put_negative("n", ErrorCode::SymbolNotFound, None);
        tiers.flush_view();
        assert!(tiers.get_view("v").is_none());
        assert!(tiers.get_query("q").is_some());
        tiers.flush_all();
        assert!(tiers.get_query("q").is_none());
        assert!(tiers.get_negative("n").is_none());
    }

    #[test]
    fn negative_cache_respects_per_class_ttl() {
        let tiers = CacheTiers::default();
        tiers.put_negative("k", ErrorCode::SymbolNotFound, None);
        assert_eq!(tiers.get_negative("k"), Some(ErrorCode::SymbolNotFound));
        // Classes without a TTL are never stored.
        tiers.put_negative("x", ErrorCode::AliasCycle, None);
        assert_eq!(tiers.get_negative("x"), None);
    }

    #[test]
    fn workspace_not_ready_queues_warmup_once() {
        let tiers = CacheTiers::default();
        tiers.put_negative("a", ErrorCode::WorkspaceNotReady, Some("rust"));
        tiers.put_negative("b", ErrorCode::WorkspaceNotReady, Some("rust"));
        tiers.put_negative("c", ErrorCode::WorkspaceNotReady, Some("go"));
        let warmups = tiers.take_warmups();
        assert_eq!(
            warmups,
            vec![
                WarmupRequest { language: "rust".into() },
                WarmupRequest { language: "go".into() },
            ]
        );
        assert!(tiers.take_warmups().is_empty(), "drain empties the queue");
    }

    #[test]
    fn other_codes_do_not_queue_warmups() {
        let tiers = CacheTiers::default();
        tiers.put_negative("a", ErrorCode::BackendUnavailable, Some("rust"));
        assert!(tiers.take_warmups().is_empty());
    }

    #[test]
    fn age_is_reported_on_hits() {
        let tiers = CacheTiers::default();
        tiers.put_view("k", json!("v"));
        std::thread::sleep(Duration::from_millis(10));
        let (_, age) = tiers.get_view("k").unwrap();
        assert!(age >= Duration::from_millis(5));
    }
}
