// SPDX-License-Identifier: MIT OR Apache-2.0
//! Scripted adapter doubles.
//!
//! `MockAdapter` returns canned results, records every call, and can be
//! told to fail, stall, or report itself unavailable. The orchestrator's
//! merge-law tests are built on these.

use crate::{
    AdapterCapabilities, AdapterError, BackendAdapter, PartialResult, ReferenceScope, SymbolQuery,
};
use async_trait::async_trait;
use ckb_core::{
    BackendKind, CompletenessReason, ImpactItem, ModuleFacts, Reference, SymbolFacts,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A recorded call against a mock adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    /// `get_symbol` with the queried name.
    GetSymbol(String),
    /// `find_references` with the queried name and limit.
    FindReferences(String, usize),
    /// `list_modules`.
    ListModules,
    /// `impact` with the queried name and depth.
    Impact(String, u32),
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<RecordedCall>,
}

/// A scripted fact source.
#[derive(Debug, Clone)]
pub struct MockAdapter {
    kind: BackendKind,
    capabilities: AdapterCapabilities,
    available: bool,
    delay: Option<Duration>,
    fail_with: Option<fn() -> AdapterError>,
    symbol: Option<SymbolFacts>,
    symbol_completeness: f64,
    symbol_reason: CompletenessReason,
    references: Vec<Reference>,
    modules: Vec<ModuleFacts>,
    impact: Vec<ImpactItem>,
    state: Arc<Mutex<MockState>>,
}

impl MockAdapter {
    /// A mock of the given class, fully capable and available.
    #[must_use]
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            capabilities: AdapterCapabilities {
                symbols: true,
                references: true,
                modules: true,
                impact: true,
                mints_stable_ids: kind == BackendKind::IndexedSemantic,
                visibility: true,
            },
            available: true,
            delay: None,
            fail_with: None,
            symbol: None,
            symbol_completeness: 1.0,
            symbol_reason: CompletenessReason::FullBackend,
            references: Vec::new(),
            modules: Vec::new(),
            impact: Vec::new(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Script the symbol answer.
    #[must_use]
    pub fn with_symbol(mut self, symbol: SymbolFacts) -> Self {
        self.symbol = Some(symbol);
        self
    }

    /// Script the symbol completeness and reason.
    #[must_use]
    pub fn with_completeness(mut self, completeness: f64, reason: CompletenessReason) -> Self {
        self.symbol_completeness = completeness;
        self.symbol_reason = reason;
        self
    }

    /// Script the reference set.
    #[must_use]
    pub fn with_references(mut self, references: Vec<Reference>) -> Self {
        self.references = references;
        self
    }

    /// Script the module list.
    #[must_use]
    pub fn with_modules(mut self, modules: Vec<ModuleFacts>) -> Self {
        self.modules = modules;
        self
    }

    /// Script the impact list.
    #[must_use]
    pub fn with_impact(mut self, impact: Vec<ImpactItem>) -> Self {
        self.impact = impact;
        self
    }

    /// Mark the source unavailable.
    #[must_use]
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Delay every answer (for timeout and coalescing tests).
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every call with the produced error.
    #[must_use]
    pub fn failing(mut self, make: fn() -> AdapterError) -> Self {
        self.fail_with = Some(make);
        self
    }

    /// Every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().expect("mock lock poisoned").calls.clone()
    }

    /// Number of calls recorded so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.state.lock().expect("mock lock poisoned").calls.len()
    }

    async fn pre(&self, call: RecordedCall) -> Result<(), AdapterError> {
        self.state
            .lock()
            .expect("mock lock poisoned")
            .calls
            .push(call);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(make) = self.fail_with {
            return Err(make());
        }
        Ok(())
    }
}

#[async_trait]
impl BackendAdapter for MockAdapter {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn capabilities(&self) -> AdapterCapabilities {
        self.capabilities
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn get_symbol(
        &self,
        query: &SymbolQuery,
    ) -> Result<PartialResult<Option<SymbolFacts>>, AdapterError> {
        self.pre(RecordedCall::GetSymbol(query.name.clone())).await?;
        Ok(PartialResult::partial(
            self.symbol.clone(),
            self.symbol_completeness,
            self.symbol_reason,
        ))
    }

    async fn find_references(
        &self,
        query: &SymbolQuery,
        scope: &ReferenceScope,
        limit: usize,
    ) -> Result<PartialResult<Vec<Reference>>, AdapterError> {
        self.pre(RecordedCall::FindReferences(query.name.clone(), limit))
            .await?;
        let mut refs: Vec<Reference> = self
            .references
            .iter()
            .filter(|r| scope.contains(&r.location.file))
            .cloned()
            .collect();
        let truncated = refs.len() > limit;
        refs.truncate(limit);
        let result =
            PartialResult::partial(refs, self.symbol_completeness, self.symbol_reason);
        Ok(if truncated { result.truncated() } else { result })
    }

    async fn list_modules(&self) -> Result<PartialResult<Vec<ModuleFacts>>, AdapterError> {
        self.pre(RecordedCall::ListModules).await?;
        Ok(PartialResult::partial(
            self.modules.clone(),
            self.symbol_completeness,
            self.symbol_reason,
        ))
    }

    async fn impact(
        &self,
        query: &SymbolQuery,
        depth: u32,
    ) -> Result<PartialResult<Vec<ImpactItem>>, AdapterError> {
        self.pre(RecordedCall::Impact(query.name.clone(), depth))
            .await?;
        Ok(PartialResult::partial(
            self.impact.clone(),
            self.symbol_completeness,
            self.symbol_reason,
        ))
    }
}
