// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! ckb-orchestrator
//!
//! The entry point for every structural query. A query resolves identity,
//! consults the cache tiers, dispatches to fact-source adapters under
//! per-backend semaphores and timeouts, merges answers (prefer-first by
//! default, union on request), applies the response budget, and stamps
//! provenance with the repo state this call observed.

/// Request coalescing via a short-lived in-flight map.
pub mod coalesce;
/// Confidence factor assembly.
pub mod confidence;
/// Prefer-first supplementation and union merge.
pub mod merge;
/// Effective query policy.
pub mod policy;

pub use policy::{OrchestratorPolicy, ToolClass};

use crate::coalesce::{Admission, InflightMap};
use crate::confidence::{Participant, build_confidence};
use ckb_backend::{AdapterError, BackendAdapter, ReferenceScope, SymbolQuery};
use ckb_backend::indexed::IndexedAdapter;
use ckb_cache::{CacheTiers, cache_key};
use ckb_compress::{
    ArchitectureView, DrilldownContext, ModuleView, ResponseBudget, compress_architecture,
    compress_impact, compress_references, generate_drilldowns,
};
use ckb_core::{
    BackendKind, BackendProvenance, CacheMeta, CkbError, CompletenessReason, Drilldown, Envelope,
    ErrorCode, FactorStatus, ImpactItem, LocationFreshness, MergeMode, MetadataConflict,
    Provenance, Reference, ResponseMeta, SuggestedFix, SymbolFacts, SymbolId, TruncationMeta,
};
use ckb_identity::{IdentityStore, Resolution};
use ckb_repostate::{RepoState, RepoStateMode};
use ckb_supervisor::Supervisor;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    repo: String,
    root: PathBuf,
    policy: OrchestratorPolicy,
    budget: ResponseBudget,
    adapters: Vec<Arc<dyn BackendAdapter>>,
    indexed: Option<Arc<IndexedAdapter>>,
    identity: Option<Arc<IdentityStore>>,
    cache: Option<Arc<CacheTiers>>,
    supervisor: Option<Supervisor>,
}

impl OrchestratorBuilder {
    /// Start building an orchestrator for the repository at `root`.
    #[must_use]
    pub fn new(repo: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            root: root.into(),
            policy: OrchestratorPolicy::default(),
            budget: ResponseBudget::default(),
            adapters: Vec::new(),
            indexed: None,
            identity: None,
            cache: None,
            supervisor: None,
        }
    }

    /// Override the query policy.
    #[must_use]
    pub fn policy(mut self, policy: OrchestratorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the response budget.
    #[must_use]
    pub fn budget(mut self, budget: ResponseBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Register a fact-source adapter.
    #[must_use]
    pub fn adapter(mut self, adapter: Arc<dyn BackendAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Register the indexed adapter, keeping a typed handle for staleness
    /// probing alongside the generic registration.
    #[must_use]
    pub fn indexed_adapter(mut self, adapter: Arc<IndexedAdapter>) -> Self {
        self.indexed = Some(adapter.clone());
        self.adapters.push(adapter);
        self
    }

    /// Use an existing identity store.
    #[must_use]
    pub fn identity(mut self, identity: Arc<IdentityStore>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Use an existing cache.
    #[must_use]
    pub fn cache(mut self, cache: Arc<CacheTiers>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Attach the language-server supervisor for warmup routing.
    #[must_use]
    pub fn supervisor(mut self, supervisor: Supervisor) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> Orchestrator {
        let mut semaphores = BTreeMap::new();
        for kind in [
            BackendKind::IndexedSemantic,
            BackendKind::CrossRepo,
            BackendKind::LanguageServer,
            BackendKind::Vcs,
            BackendKind::Scanner,
        ] {
            semaphores.insert(
                kind,
                Arc::new(Semaphore::new(self.policy.concurrency_for(kind))),
            );
        }
        let identity = self
            .identity
            .unwrap_or_else(|| Arc::new(IdentityStore::new(self.repo.clone())));
        let cache = self.cache.unwrap_or_default();
        let config_hash = self.policy.config_hash();
        Orchestrator {
            repo: self.repo,
            root: self.root,
            policy: self.policy,
            budget: self.budget,
            adapters: self.adapters,
            indexed: self.indexed,
            identity,
            cache,
            supervisor: self.supervisor,
            semaphores,
            inflight: InflightMap::new(),
            config_hash,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// The query entry point.
pub struct Orchestrator {
    repo: String,
    root: PathBuf,
    policy: OrchestratorPolicy,
    budget: ResponseBudget,
    adapters: Vec<Arc<dyn BackendAdapter>>,
    indexed: Option<Arc<IndexedAdapter>>,
    identity: Arc<IdentityStore>,
    cache: Arc<CacheTiers>,
    supervisor: Option<Supervisor>,
    semaphores: BTreeMap<BackendKind, Arc<Semaphore>>,
    inflight: InflightMap,
    config_hash: String,
}

/// One backend's observed participation in a query.
struct Consulted {
    kind: BackendKind,
    status: FactorStatus,
    completeness: f64,
    reason: CompletenessReason,
    primary: bool,
}

/// Everything needed to stamp an envelope.
struct QueryOutcome {
    consulted: Vec<Consulted>,
    conflicts: Vec<MetadataConflict>,
    warnings: Vec<String>,
    merge_mode: MergeMode,
    truncation: Option<TruncationMeta>,
    drilldowns: Vec<Drilldown>,
}

impl QueryOutcome {
    fn new(merge_mode: MergeMode) -> Self {
        Self {
            consulted: Vec::new(),
            conflicts: Vec::new(),
            warnings: Vec::new(),
            merge_mode,
            truncation: None,
            drilldowns: Vec::new(),
        }
    }

    fn primary(&self) -> Option<&Consulted> {
        self.consulted.iter().find(|c| c.primary)
    }
}

/// Report returned by the `status` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    /// Repository identifier.
    pub repo: String,
    /// Per-backend availability.
    pub backends: Vec<BackendAvailability>,
    /// Supervised language-server processes.
    #[serde(default)]
    pub language_servers: Vec<ckb_supervisor::ProcessStats>,
    /// Cache tier counters.
    pub cache: ckb_cache::CacheStats,
    /// Identity store size: active records, aliases, tombstones.
    pub identity: IdentityCounts,
}

/// Availability of one backend class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendAvailability {
    /// Backend class.
    pub backend: BackendKind,
    /// Whether it answered its availability probe.
    pub available: bool,
}

/// Identity store population counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityCounts {
    /// Rows in the active state.
    pub active: u64,
    /// Alias edges.
    pub aliases: u64,
    /// Tombstoned rows.
    pub tombstones: u64,
}

impl Orchestrator {
    /// The identity store backing this orchestrator.
    #[must_use]
    pub fn identity(&self) -> &Arc<IdentityStore> {
        &self.identity
    }

    /// The cache tiers backing this orchestrator.
    #[must_use]
    pub fn cache(&self) -> &Arc<CacheTiers> {
        &self.cache
    }

    // -- tools --------------------------------------------------------------

    /// Symbol lookup. Metadata-only: cached by HEAD commit.
    pub async fn get_symbol(&self, stable_id: &str) -> Envelope<SymbolFacts> {
        let params = serde_json::json!({ "stable_id": stable_id });
        self.run_tool("get_symbol", params, ToolClass::Metadata, |state| {
            let stable_id = stable_id.to_string();
            async move { self.execute_get_symbol(&stable_id, &state).await }
        })
        .await
    }

    /// Reference enumeration. Location-sensitive: cached by fingerprint.
    pub async fn find_references(
        &self,
        stable_id: &str,
        scope: ReferenceScope,
        limit: usize,
        merge: Option<MergeMode>,
    ) -> Envelope<Vec<Reference>> {
        let merge_mode = merge.unwrap_or(self.policy.merge_mode);
        let params = serde_json::json!({
            "stable_id": stable_id,
            "scope": &scope,
            "limit": limit,
            "merge": merge_mode,
        });
        self.run_tool("references", params, ToolClass::LocationSensitive, |state| {
            let stable_id = stable_id.to_string();
            let scope = scope.clone();
            async move {
                self.execute_find_references(&stable_id, &scope, limit, merge_mode, &state)
                    .await
            }
        })
        .await
    }

    /// Impact analysis. Location-sensitive.
    pub async fn impact(&self, stable_id: &str, depth: u32) -> Envelope<Vec<ImpactItem>> {
        let params = serde_json::json!({ "stable_id": stable_id, "depth": depth });
        self.run_tool("impact", params, ToolClass::LocationSensitive, |state| {
            let stable_id = stable_id.to_string();
            async move { self.execute_impact(&stable_id, depth, &state).await }
        })
        .await
    }

    /// Architecture view. Location-sensitive.
    pub async fn architecture(&self) -> Envelope<ArchitectureView> {
        let params = serde_json::json!({});
        self.run_tool("architecture", params, ToolClass::LocationSensitive, |state| async move {
            self.execute_architecture(&state).await
        })
        .await
    }

    /// Status report. Metadata-only, never cached.
    pub async fn status(&self) -> Envelope<StatusReport> {
        let state = match RepoState::current(&self.root) {
            Ok(s) => s,
            Err(err) => {
                return self.internal_error_envelope(err.to_string());
            }
        };
        self.cache.observe_head(&state.head_commit);

        let mut backends = Vec::new();
        for adapter in &self.adapters {
            backends.push(BackendAvailability {
                backend: adapter.kind(),
                available: adapter.is_available().await,
            });
        }

        let records = self.identity.records();
        let tombstones = records
            .iter()
            .filter(|r| r.state == ckb_identity::SymbolState::Deleted)
            .count() as u64;
        let report = StatusReport {
            repo: self.repo.clone(),
            backends,
            language_servers: self
                .supervisor
                .as_ref()
                .map(Supervisor::stats)
                .unwrap_or_default(),
            cache: self.cache.stats(),
            identity: IdentityCounts {
                active: records.len() as u64 - tombstones,
                aliases: self.identity.aliases().len() as u64,
                tombstones,
            },
        };

        let outcome = QueryOutcome::new(self.policy.merge_mode);
        Envelope::ok(report, self.response_meta(&state, &outcome, None))
    }

    // -- shared query plumbing ----------------------------------------------

    /// Run one tool: repo state, cache tiers, coalescing, then `execute`.
    async fn run_tool<'a, T, F, Fut>(
        &'a self,
        tool: &str,
        params: serde_json::Value,
        class: ToolClass,
        execute: F,
    ) -> Envelope<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(RepoState) -> Fut,
        Fut: Future<Output = Envelope<T>> + 'a,
    {
        let state = match RepoState::current(&self.root) {
            Ok(s) => s,
            Err(err) => return self.internal_error_envelope(err.to_string()),
        };
        self.cache.observe_head(&state.head_commit);

        let mode = match class {
            ToolClass::Metadata => RepoStateMode::Head,
            ToolClass::LocationSensitive => RepoStateMode::Full,
        };
        let state_key = match mode {
            RepoStateMode::Head => state.state_key(RepoStateMode::Head).to_string(),
            RepoStateMode::Full => {
                format!("{}:{}", state.state_key(RepoStateMode::Full), self.config_hash)
            }
        };
        let key = cache_key(tool, &params, &state_key);

        // Negative tier first: a fresh failure short-circuits the adapters.
        if let Some(code) = self.cache.get_negative(&key) {
            let err = CkbError::new(code, code.description()).with_context("cached", "true");
            let mut envelope = self.error_envelope_with_state(err, &state);
            envelope.meta.cache = Some(CacheMeta { hit: true, age_secs: 0 });
            return envelope;
        }

        // Positive tier.
        let cached = match class {
            ToolClass::Metadata => self.cache.get_query(&key),
            ToolClass::LocationSensitive => self.cache.get_view(&key),
        };
        if let Some((value, age)) = cached
            && let Ok(mut envelope) = serde_json::from_value::<Envelope<T>>(value)
        {
            envelope.meta.cache = Some(CacheMeta {
                hit: true,
                age_secs: age.as_secs(),
            });
            debug!(target: "ckb.orchestrator", tool, "cache hit");
            return envelope;
        }

        // Coalesce identical concurrent executions.
        match self.inflight.admit(&key) {
            Admission::Joiner(cell) => {
                if let Some(value) = InflightMap::wait(&cell).await
                    && let Ok(envelope) = serde_json::from_value::<Envelope<T>>(value)
                {
                    debug!(target: "ckb.orchestrator", tool, "coalesced");
                    return envelope;
                }
                // Leader failed to publish; compute independently.
                execute(state).await
            }
            Admission::Leader(guard) => {
                let envelope = execute(state).await;
                if let Ok(value) = serde_json::to_value(&envelope) {
                    guard.complete(value.clone());
                    match &envelope.error {
                        None => match class {
                            ToolClass::Metadata => self.cache.put_query(&key, value),
                            ToolClass::LocationSensitive => self.cache.put_view(&key, value),
                        },
                        Some(err) => {
                            let language = err.context.get("language").map(String::as_str);
                            self.cache.put_negative(&key, err.code, language);
                            self.drain_warmups();
                        }
                    }
                }
                envelope
            }
        }
    }

    fn drain_warmups(&self) {
        if let Some(supervisor) = &self.supervisor {
            for request in self.cache.take_warmups() {
                debug!(
                    target: "ckb.orchestrator",
                    language = %request.language,
                    "warmup requested"
                );
                supervisor.warmup(&request.language);
            }
        }
    }

    // -- tool bodies ---------------------------------------------------------

    async fn execute_get_symbol(
        &self,
        stable_id: &str,
        state: &RepoState,
    ) -> Envelope<SymbolFacts> {
        let mut outcome = QueryOutcome::new(MergeMode::PreferFirst);

        let (record, redirected_from) = match self.resolve_identity(stable_id, state) {
            Ok(pair) => pair,
            Err(envelope) => return envelope,
        };
        if let Some(from) = &redirected_from {
            outcome
                .warnings
                .push(format!("redirected from retired id {from}"));
        }

        let query = self.symbol_query(&record);
        let available = self.availability().await;

        // Ladder descent: the highest-preference available symbol source
        // answers; lower rungs only run when the answer falls short.
        let mut facts: Option<SymbolFacts> = None;
        let mut primary_kind: Option<BackendKind> = None;
        for kind in self.policy.preference.clone() {
            let Some(adapter) = self.adapter_of(kind) else {
                continue;
            };
            if !adapter.capabilities().symbols {
                continue;
            }
            if !available.get(&kind).copied().unwrap_or(false) {
                outcome.consulted.push(Consulted {
                    kind,
                    status: FactorStatus::Unavailable,
                    completeness: 0.0,
                    reason: CompletenessReason::NoBackendAvailable,
                    primary: false,
                });
                continue;
            }
            match self.call_get_symbol(&adapter, &query).await {
                Ok(result) => {
                    let has_data = result.data.is_some();
                    let is_primary = has_data && facts.is_none();
                    outcome.consulted.push(Consulted {
                        kind,
                        status: if is_primary {
                            FactorStatus::Available
                        } else {
                            FactorStatus::AvailableUnused
                        },
                        completeness: result.completeness,
                        reason: result.completeness_reason,
                        primary: is_primary,
                    });
                    if is_primary {
                        facts = result.data;
                        primary_kind = Some(kind);
                        if result.completeness >= self.policy.completeness_threshold {
                            break;
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        target: "ckb.orchestrator",
                        backend = kind.name(),
                        error = %err,
                        "symbol source failed"
                    );
                    outcome.consulted.push(Consulted {
                        kind,
                        status: FactorStatus::Unavailable,
                        completeness: 0.0,
                        reason: reason_for(&err),
                        primary: false,
                    });
                }
            }
        }

        // Supplement whitelisted metadata from equal-or-higher-precedence
        // peers. References, locations, and stable IDs never move here.
        if let (Some(primary), Some(p_kind)) = (&mut facts, primary_kind) {
            for adapter in &self.adapters {
                let kind = adapter.kind();
                if kind == p_kind
                    || kind.precedence() > p_kind.precedence()
                    || !adapter.capabilities().symbols
                    || !available.get(&kind).copied().unwrap_or(false)
                {
                    continue;
                }
                if let Ok(result) = self.call_get_symbol(adapter, &query).await
                    && let Some(peer) = result.data
                {
                    // Supplementers participate in this call's backend set.
                    if !outcome.consulted.iter().any(|c| c.kind == kind) {
                        outcome.consulted.push(Consulted {
                            kind,
                            status: FactorStatus::Available,
                            completeness: result.completeness,
                            reason: result.completeness_reason,
                            primary: false,
                        });
                    }
                    merge::supplement_whitelist(
                        primary,
                        p_kind,
                        &peer,
                        kind,
                        &mut outcome.conflicts,
                    );
                }
            }
        }

        // Fall back to the identity record when no source answered.
        let mut facts = facts.unwrap_or_else(|| SymbolFacts {
            stable_id: None,
            name: record.fingerprint.name.clone(),
            container: record.fingerprint.container.clone(),
            kind: record.fingerprint.kind,
            arity: record.fingerprint.arity,
            signature_full: None,
            signature_normalized: record.fingerprint.normalized_signature.clone(),
            visibility: None,
            visibility_confidence: None,
            module_id: None,
            location: record.location.clone(),
            location_freshness: record.location_freshness,
            ref_count: None,
            confidence: 0.5,
        });

        // The orchestrator, not the adapter, stamps the identity anchor.
        facts.stable_id = Some(record.stable_id.clone());

        // Visibility cascade tail: when no source reported modifiers,
        // naming conventions give a low-confidence verdict.
        if facts.visibility.is_none() {
            let looks_internal = facts.name.starts_with('_')
                || facts
                    .container
                    .split(&['/', '.', ':'][..])
                    .any(|part| part == "internal" || part == "private");
            if looks_internal {
                facts.visibility = Some(ckb_core::Visibility::Internal);
                facts.visibility_confidence = Some(0.4);
            }
        }

        self.apply_freshness(&mut facts, state, &mut outcome);

        let completeness = outcome.primary().map_or(0.0, |p| p.completeness);
        let reason = outcome
            .primary()
            .map_or(CompletenessReason::NoBackendAvailable, |p| p.reason);
        outcome.drilldowns = generate_drilldowns(
            &DrilldownContext {
                tool: "get_symbol".into(),
                truncation: None,
                top_truncated_module: None,
                completeness,
                completeness_reason: reason,
            },
            &self.budget,
        );
        if state.dirty {
            outcome.drilldowns.push(
                Drilldown::new(
                    "references",
                    "re-run under the full repo-state mode",
                    "locations may be stale against the dirty working tree",
                    0.85,
                )
                .with_param("repo_state_mode", serde_json::json!("full")),
            );
        }

        let meta = self.response_meta(state, &outcome, None);
        let mut envelope = Envelope::ok(facts, meta);
        envelope.warnings = outcome.warnings;
        envelope.suggested_next_calls = ckb_core::rank_and_cap(
            outcome.drilldowns,
            self.budget.max_drilldowns,
        );
        envelope
    }

    async fn execute_find_references(
        &self,
        stable_id: &str,
        scope: &ReferenceScope,
        limit: usize,
        merge_mode: MergeMode,
        state: &RepoState,
    ) -> Envelope<Vec<Reference>> {
        let mut outcome = QueryOutcome::new(merge_mode);

        let (record, redirected_from) = match self.resolve_identity(stable_id, state) {
            Ok(pair) => pair,
            Err(envelope) => return envelope,
        };
        if let Some(from) = &redirected_from {
            outcome
                .warnings
                .push(format!("redirected from retired id {from}"));
        }
        let query = self.symbol_query(&record);
        let available = self.availability().await;

        let references = match merge_mode {
            MergeMode::PreferFirst => {
                // One primary source; peers appear in provenance untouched.
                let mut references = Vec::new();
                for kind in self.policy.preference.clone() {
                    let Some(adapter) = self.adapter_of(kind) else {
                        continue;
                    };
                    if !adapter.capabilities().references {
                        continue;
                    }
                    if !available.get(&kind).copied().unwrap_or(false) {
                        outcome.consulted.push(Consulted {
                            kind,
                            status: FactorStatus::Unavailable,
                            completeness: 0.0,
                            reason: CompletenessReason::NoBackendAvailable,
                            primary: false,
                        });
                        continue;
                    }
                    if outcome.primary().is_some() {
                        outcome.consulted.push(Consulted {
                            kind,
                            status: FactorStatus::AvailableUnused,
                            completeness: 0.0,
                            reason: CompletenessReason::Unknown,
                            primary: false,
                        });
                        continue;
                    }
                    match self.call_find_references(&adapter, &query, scope, limit).await {
                        Ok(result) => {
                            outcome.consulted.push(Consulted {
                                kind,
                                status: FactorStatus::Available,
                                completeness: result.completeness,
                                reason: if result.truncated {
                                    CompletenessReason::Truncated
                                } else {
                                    result.completeness_reason
                                },
                                primary: true,
                            });
                            references = result.data;
                        }
                        Err(err) => {
                            outcome.consulted.push(Consulted {
                                kind,
                                status: FactorStatus::Unavailable,
                                completeness: 0.0,
                                reason: reason_for(&err),
                                primary: false,
                            });
                        }
                    }
                }
                references
            }
            MergeMode::Union => {
                let mut per_backend = Vec::new();
                let calls = self.adapters.iter().filter(|a| {
                    a.capabilities().references
                        && available.get(&a.kind()).copied().unwrap_or(false)
                });
                let futures: Vec<_> = calls
                    .map(|adapter| {
                        let adapter = adapter.clone();
                        let query = query.clone();
                        let scope = scope.clone();
                        async move {
                            let kind = adapter.kind();
                            let result = self
                                .call_find_references(&adapter, &query, &scope, limit)
                                .await;
                            (kind, result)
                        }
                    })
                    .collect();
                let joined = timeout(
                    self.policy.union_timeout,
                    futures::future::join_all(futures),
                )
                .await
                .unwrap_or_default();

                let mut first = true;
                for (kind, result) in joined {
                    match result {
                        Ok(result) => {
                            outcome.consulted.push(Consulted {
                                kind,
                                status: FactorStatus::Available,
                                completeness: result.completeness,
                                reason: result.completeness_reason,
                                primary: std::mem::take(&mut first),
                            });
                            per_backend.push((kind, result.data));
                        }
                        Err(err) => {
                            outcome.consulted.push(Consulted {
                                kind,
                                status: FactorStatus::Unavailable,
                                completeness: 0.0,
                                reason: reason_for(&err),
                                primary: false,
                            });
                        }
                    }
                }
                merge::union_references(per_backend, &mut outcome.conflicts)
            }
        };

        // No source answered at all: the failure is fatal and negative-
        // cacheable, with the not-ready class additionally queueing warmup.
        if outcome.primary().is_none() {
            let not_ready = outcome
                .consulted
                .iter()
                .any(|c| c.reason == CompletenessReason::WorkspaceNotReady);
            let timed_out = outcome
                .consulted
                .iter()
                .any(|c| c.reason == CompletenessReason::TimedOut);
            let mut err = if not_ready {
                CkbError::new(
                    ErrorCode::WorkspaceNotReady,
                    "no reference source is ready yet",
                )
            } else if timed_out {
                CkbError::new(ErrorCode::Timeout, "every reference source timed out")
            } else {
                CkbError::new(
                    ErrorCode::BackendUnavailable,
                    "no reference source is available",
                )
            };
            if let Some(language) = &query.language {
                err = err.with_context("language", language);
            }
            err = err.with_drilldown(Drilldown::new(
                "status",
                "check backend status",
                "every reference source failed for this call",
                0.9,
            ));
            let mut envelope = self.error_envelope_with_state(err, state);
            envelope.meta.provenance.backends = outcome
                .consulted
                .iter()
                .map(|c| BackendProvenance {
                    backend: c.kind,
                    completeness: c.completeness,
                    completeness_reason: c.reason,
                })
                .collect();
            return envelope;
        }

        let (references, truncation) = compress_references(references, &self.budget);
        outcome.truncation = truncation;

        let completeness = outcome.primary().map_or(0.0, |p| p.completeness);
        let reason = outcome
            .primary()
            .map_or(CompletenessReason::NoBackendAvailable, |p| p.reason);
        outcome.drilldowns = generate_drilldowns(
            &DrilldownContext {
                tool: "references".into(),
                truncation: outcome.truncation.clone(),
                top_truncated_module: None,
                completeness,
                completeness_reason: reason,
            },
            &self.budget,
        );

        let meta = self.response_meta(state, &outcome, outcome.truncation.clone());
        let mut envelope = Envelope::ok(references, meta);
        envelope.warnings = outcome.warnings;
        envelope.suggested_next_calls = outcome.drilldowns;
        envelope
    }

    async fn execute_impact(
        &self,
        stable_id: &str,
        depth: u32,
        state: &RepoState,
    ) -> Envelope<Vec<ImpactItem>> {
        let mut outcome = QueryOutcome::new(MergeMode::PreferFirst);
        let (record, redirected_from) = match self.resolve_identity(stable_id, state) {
            Ok(pair) => pair,
            Err(envelope) => return envelope,
        };
        if let Some(from) = &redirected_from {
            outcome
                .warnings
                .push(format!("redirected from retired id {from}"));
        }
        let query = self.symbol_query(&record);
        let available = self.availability().await;

        // Call graphs come only from indexed-class sources.
        let mut items = Vec::new();
        for kind in self.policy.preference.clone() {
            let Some(adapter) = self.adapter_of(kind) else {
                continue;
            };
            if !adapter.capabilities().impact {
                continue;
            }
            if !available.get(&kind).copied().unwrap_or(false) {
                outcome.consulted.push(Consulted {
                    kind,
                    status: FactorStatus::Unavailable,
                    completeness: 0.0,
                    reason: CompletenessReason::NoBackendAvailable,
                    primary: false,
                });
                continue;
            }
            match self.call_impact(&adapter, &query, depth).await {
                Ok(result) => {
                    outcome.consulted.push(Consulted {
                        kind,
                        status: FactorStatus::Available,
                        completeness: result.completeness,
                        reason: result.completeness_reason,
                        primary: true,
                    });
                    items = result.data;
                    break;
                }
                Err(err) => {
                    outcome.consulted.push(Consulted {
                        kind,
                        status: FactorStatus::Unavailable,
                        completeness: 0.0,
                        reason: reason_for(&err),
                        primary: false,
                    });
                }
            }
        }

        let (items, truncation) = compress_impact(items, &self.budget);
        outcome.truncation = truncation;

        let completeness = outcome.primary().map_or(0.0, |p| p.completeness);
        let reason = outcome
            .primary()
            .map_or(CompletenessReason::NoBackendAvailable, |p| p.reason);
        outcome.drilldowns = generate_drilldowns(
            &DrilldownContext {
                tool: "impact".into(),
                truncation: outcome.truncation.clone(),
                top_truncated_module: None,
                completeness,
                completeness_reason: reason,
            },
            &self.budget,
        );

        let meta = self.response_meta(state, &outcome, outcome.truncation.clone());
        let mut envelope = Envelope::ok(items, meta);
        envelope.warnings = outcome.warnings;
        envelope.suggested_next_calls = outcome.drilldowns;
        envelope
    }

    async fn execute_architecture(&self, state: &RepoState) -> Envelope<ArchitectureView> {
        let mut outcome = QueryOutcome::new(MergeMode::PreferFirst);
        let available = self.availability().await;

        let mut modules = Vec::new();
        for kind in self.policy.preference.clone() {
            let Some(adapter) = self.adapter_of(kind) else {
                continue;
            };
            if !adapter.capabilities().modules {
                continue;
            }
            if !available.get(&kind).copied().unwrap_or(false) {
                outcome.consulted.push(Consulted {
                    kind,
                    status: FactorStatus::Unavailable,
                    completeness: 0.0,
                    reason: CompletenessReason::NoBackendAvailable,
                    primary: false,
                });
                continue;
            }
            match self.call_list_modules(&adapter).await {
                Ok(result) => {
                    outcome.consulted.push(Consulted {
                        kind,
                        status: FactorStatus::Available,
                        completeness: result.completeness,
                        reason: result.completeness_reason,
                        primary: true,
                    });
                    modules = result.data;
                    break;
                }
                Err(err) => {
                    outcome.consulted.push(Consulted {
                        kind,
                        status: FactorStatus::Unavailable,
                        completeness: 0.0,
                        reason: reason_for(&err),
                        primary: false,
                    });
                }
            }
        }

        let views = modules
            .into_iter()
            .map(|module| ModuleView {
                module,
                symbols: Vec::new(),
            })
            .collect();
        let (view, trunc_outcome) = compress_architecture(views, &self.budget);
        outcome.truncation = trunc_outcome.meta.clone();

        let completeness = outcome.primary().map_or(0.0, |p| p.completeness);
        let reason = outcome
            .primary()
            .map_or(CompletenessReason::NoBackendAvailable, |p| p.reason);
        outcome.drilldowns = generate_drilldowns(
            &DrilldownContext {
                tool: "architecture".into(),
                truncation: trunc_outcome.meta,
                top_truncated_module: trunc_outcome.top_truncated_module,
                completeness,
                completeness_reason: reason,
            },
            &self.budget,
        );

        let meta = self.response_meta(state, &outcome, outcome.truncation.clone());
        let mut envelope = Envelope::ok(view, meta);
        envelope.suggested_next_calls = outcome.drilldowns;
        envelope
    }

    // -- helpers ------------------------------------------------------------

    /// Resolve identity, or produce the error envelope for the caller.
    #[allow(clippy::result_large_err)]
    fn resolve_identity<T>(
        &self,
        stable_id: &str,
        state: &RepoState,
    ) -> Result<(ckb_identity::IdentityRecord, Option<String>), Envelope<T>> {
        // Validate the ID shape first so malformed input reads as not-found
        // with a hint rather than an internal error.
        if let Err(parse_err) = SymbolId::parse(stable_id) {
            let err = CkbError::new(
                ErrorCode::SymbolNotFound,
                format!("malformed symbol id: {parse_err}"),
            )
            .with_context("stable_id", stable_id);
            return Err(self.error_envelope_with_state(err, state));
        }
        match self.identity.resolve(stable_id) {
            Ok(Resolution::Active {
                record,
                redirected_from,
            }) => Ok((record, redirected_from)),
            Ok(Resolution::Deleted {
                record,
                deleted_at,
                deleted_in_state,
            }) => {
                let mut err = CkbError::new(
                    ErrorCode::SymbolDeleted,
                    format!("symbol '{}' was deleted", record.fingerprint.name),
                )
                .with_context("stable_id", stable_id);
                if let Some(at) = deleted_at {
                    err = err.with_context("deleted_at", at.to_rfc3339());
                }
                if let Some(in_state) = deleted_in_state {
                    err = err.with_context("deleted_in_state", in_state);
                }
                Err(self.error_envelope_with_state(err, state))
            }
            Ok(Resolution::NotFound) => {
                let err = CkbError::new(
                    ErrorCode::SymbolNotFound,
                    format!("no symbol with id '{stable_id}'"),
                )
                .with_context("stable_id", stable_id)
                .with_fix(SuggestedFix::RunCommand {
                    command: "ckb index refresh".into(),
                    rationale: "the symbol may exist in a newer index".into(),
                });
                Err(self.error_envelope_with_state(err, state))
            }
            Err(err) => Err(self.error_envelope_with_state(err, state)),
        }
    }

    fn symbol_query(&self, record: &ckb_identity::IdentityRecord) -> SymbolQuery {
        let native_hint = record
            .backend_mappings
            .iter()
            .find(|m| m.backend == BackendKind::IndexedSemantic)
            .map(|m| m.native_id.clone());
        let file_hint = record.location.as_ref().map(|l| l.file.clone());
        let language = file_hint
            .as_deref()
            .and_then(ckb_backend::lsp::language_from_path);
        SymbolQuery {
            id: SymbolId::new(self.repo.clone(), record.fingerprint.stable_hash()),
            name: record.fingerprint.name.clone(),
            container: record.fingerprint.container.clone(),
            native_hint,
            file_hint,
            language,
        }
    }

    fn adapter_of(&self, kind: BackendKind) -> Option<Arc<dyn BackendAdapter>> {
        self.adapters.iter().find(|a| a.kind() == kind).cloned()
    }

    async fn availability(&self) -> BTreeMap<BackendKind, bool> {
        let mut map = BTreeMap::new();
        for adapter in &self.adapters {
            let available = adapter.is_available().await;
            map.insert(adapter.kind(), available);
        }
        map
    }

    /// Dirty working trees and stale indexes both downgrade freshness and
    /// surface as warnings.
    fn apply_freshness(
        &self,
        facts: &mut SymbolFacts,
        state: &RepoState,
        outcome: &mut QueryOutcome,
    ) {
        if state.dirty {
            facts.location_freshness = LocationFreshness::MayBeStale;
            outcome.warnings.push(
                "working tree is dirty; locations were computed against the last index".into(),
            );
        }
        if let Some(indexed) = &self.indexed
            && let Ok(commit) = indexed.generated_commit()
            && commit != state.head_commit
        {
            facts.location_freshness = LocationFreshness::MayBeStale;
            outcome
                .warnings
                .push(format!("index was generated at {commit}, HEAD has moved"));
            for consulted in &mut outcome.consulted {
                if consulted.kind == BackendKind::IndexedSemantic && consulted.primary {
                    consulted.reason = CompletenessReason::IndexStale;
                }
            }
        }
    }

    async fn call_get_symbol(
        &self,
        adapter: &Arc<dyn BackendAdapter>,
        query: &SymbolQuery,
    ) -> Result<ckb_backend::PartialResult<Option<SymbolFacts>>, AdapterError> {
        let _permit = self.acquire(adapter.kind()).await?;
        timeout(self.policy.backend_timeout, adapter.get_symbol(query))
            .await
            .map_err(|_| AdapterError::Timeout)?
    }

    async fn call_find_references(
        &self,
        adapter: &Arc<dyn BackendAdapter>,
        query: &SymbolQuery,
        scope: &ReferenceScope,
        limit: usize,
    ) -> Result<ckb_backend::PartialResult<Vec<Reference>>, AdapterError> {
        let _permit = self.acquire(adapter.kind()).await?;
        timeout(
            self.policy.backend_timeout,
            adapter.find_references(query, scope, limit),
        )
        .await
        .map_err(|_| AdapterError::Timeout)?
    }

    async fn call_impact(
        &self,
        adapter: &Arc<dyn BackendAdapter>,
        query: &SymbolQuery,
        depth: u32,
    ) -> Result<ckb_backend::PartialResult<Vec<ImpactItem>>, AdapterError> {
        let _permit = self.acquire(adapter.kind()).await?;
        timeout(self.policy.backend_timeout, adapter.impact(query, depth))
            .await
            .map_err(|_| AdapterError::Timeout)?
    }

    async fn call_list_modules(
        &self,
        adapter: &Arc<dyn BackendAdapter>,
    ) -> Result<ckb_backend::PartialResult<Vec<ckb_core::ModuleFacts>>, AdapterError> {
        let _permit = self.acquire(adapter.kind()).await?;
        timeout(self.policy.backend_timeout, adapter.list_modules())
            .await
            .map_err(|_| AdapterError::Timeout)?
    }

    async fn acquire(
        &self,
        kind: BackendKind,
    ) -> Result<tokio::sync::OwnedSemaphorePermit, AdapterError> {
        let semaphore = self
            .semaphores
            .get(&kind)
            .cloned()
            .ok_or_else(|| AdapterError::Internal("no semaphore for backend".into()))?;
        semaphore
            .acquire_owned()
            .await
            .map_err(|_| AdapterError::Unavailable("semaphore closed".into()))
    }

    fn response_meta(
        &self,
        state: &RepoState,
        outcome: &QueryOutcome,
        truncation: Option<TruncationMeta>,
    ) -> ResponseMeta {
        let participants: Vec<Participant> = outcome
            .consulted
            .iter()
            .map(|c| Participant {
                backend: c.kind,
                status: c.status,
                completeness: c.completeness,
                primary: c.primary,
            })
            .collect();
        ResponseMeta {
            provenance: Provenance {
                backends: outcome
                    .consulted
                    .iter()
                    .map(|c| BackendProvenance {
                        backend: c.kind,
                        completeness: c.completeness,
                        completeness_reason: c.reason,
                    })
                    .collect(),
                merge_mode: outcome.merge_mode,
                repo_state: state.stamp(),
                metadata_conflicts: outcome.conflicts.clone(),
            },
            confidence: build_confidence(&participants, state.dirty),
            cache: Some(CacheMeta {
                hit: false,
                age_secs: 0,
            }),
            truncation,
        }
    }

    fn error_envelope_with_state<T>(&self, error: CkbError, state: &RepoState) -> Envelope<T> {
        let outcome = QueryOutcome::new(self.policy.merge_mode);
        Envelope::err(error, self.response_meta(state, &outcome, None))
    }

    fn internal_error_envelope<T>(&self, message: String) -> Envelope<T> {
        let error = CkbError::new(ErrorCode::InternalError, message);
        let meta = ResponseMeta {
            provenance: Provenance {
                backends: Vec::new(),
                merge_mode: self.policy.merge_mode,
                repo_state: ckb_core::RepoStateStamp {
                    fingerprint: String::new(),
                    head_commit: String::new(),
                    dirty: false,
                },
                metadata_conflicts: Vec::new(),
            },
            confidence: build_confidence(&[], false),
            cache: None,
            truncation: None,
        };
        Envelope::err(error, meta)
    }
}

fn reason_for(err: &AdapterError) -> CompletenessReason {
    match err {
        AdapterError::NotReady { .. } => CompletenessReason::WorkspaceNotReady,
        AdapterError::Timeout => CompletenessReason::TimedOut,
        _ => CompletenessReason::NoBackendAvailable,
    }
}
