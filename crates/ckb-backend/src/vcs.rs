// SPDX-License-Identifier: MIT OR Apache-2.0
//! Adapter over the version-control system.
//!
//! Always consulted. Contributes textual references (`git grep`) and a
//! coarse module listing derived from the tracked file tree; it never
//! answers symbol or impact queries.

use crate::{
    AdapterCapabilities, AdapterError, BackendAdapter, PartialResult, ReferenceScope, SymbolQuery,
};
use async_trait::async_trait;
use ckb_core::{
    BackendKind, CompletenessReason, ImpactItem, Location, ModuleFacts, Reference, ReferenceKind,
    SymbolFacts,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// Confidence attached to grep-derived references.
const VCS_CONFIDENCE: f64 = 0.4;

/// Adapter rooted at one repository checkout.
#[derive(Debug, Clone)]
pub struct VcsAdapter {
    root: PathBuf,
}

impl VcsAdapter {
    /// Create an adapter for the repository at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn git(&self, args: &[&str]) -> Result<String, AdapterError> {
        let out = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .await?;
        if !out.status.success() {
            // `git grep` exits 1 on no matches; that is not a failure.
            if args.first() == Some(&"grep") && out.status.code() == Some(1) {
                return Ok(String::new());
            }
            return Err(AdapterError::Unavailable(format!(
                "git {:?} failed (code={:?})",
                args,
                out.status.code()
            )));
        }
        Ok(String::from_utf8_lossy(&out.stdout).to_string())
    }
}

#[async_trait]
impl BackendAdapter for VcsAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Vcs
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            symbols: false,
            references: true,
            modules: true,
            impact: false,
            mints_stable_ids: false,
            visibility: false,
        }
    }

    async fn is_available(&self) -> bool {
        self.git(&["rev-parse", "--is-inside-work-tree"])
            .await
            .map(|out| out.trim() == "true")
            .unwrap_or(false)
    }

    async fn get_symbol(
        &self,
        _query: &SymbolQuery,
    ) -> Result<PartialResult<Option<SymbolFacts>>, AdapterError> {
        Ok(PartialResult::partial(
            None,
            0.0,
            CompletenessReason::NoBackendAvailable,
        ))
    }

    async fn find_references(
        &self,
        query: &SymbolQuery,
        scope: &ReferenceScope,
        limit: usize,
    ) -> Result<PartialResult<Vec<Reference>>, AdapterError> {
        let output = self
            .git(&["grep", "-n", "--column", "-w", &query.name])
            .await?;

        let mut references = Vec::new();
        let mut truncated = false;
        for line in output.lines() {
            // file:line:column:content
            let mut parts = line.splitn(4, ':');
            let (Some(file), Some(line_no), Some(column)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let (Ok(line_no), Ok(column)) = (line_no.parse::<u32>(), column.parse::<u32>()) else {
                continue;
            };
            let file = ckb_core::paths::canonicalize_rel(file);
            if !scope.contains(&file) {
                continue;
            }
            if references.len() >= limit {
                truncated = true;
                break;
            }
            references.push(Reference {
                location: Location {
                    file,
                    start_line: line_no,
                    start_column: column,
                    end_line: line_no,
                    end_column: column + query.name.len() as u32,
                },
                kind: ReferenceKind::Use,
                confidence: VCS_CONFIDENCE,
            });
        }

        debug!(
            target: "ckb.backend.vcs",
            name = %query.name,
            count = references.len(),
            "grep references"
        );

        let result = PartialResult::partial(
            references,
            VCS_CONFIDENCE,
            CompletenessReason::SingleFileOnly,
        );
        Ok(if truncated { result.truncated() } else { result })
    }

    async fn list_modules(&self) -> Result<PartialResult<Vec<ModuleFacts>>, AdapterError> {
        let output = self.git(&["ls-files"]).await?;
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for path in output.lines() {
            let top = path.split('/').next().unwrap_or(path);
            if top == path {
                // Top-level files do not form a module.
                continue;
            }
            *counts.entry(top.to_string()).or_insert(0) += 1;
        }
        let modules = counts
            .into_iter()
            .map(|(id, count)| ModuleFacts {
                name: id.clone(),
                id,
                symbol_count: count,
                impact_count: 0,
            })
            .collect();
        Ok(PartialResult::partial(
            modules,
            0.5,
            CompletenessReason::Unknown,
        ))
    }

    async fn impact(
        &self,
        _query: &SymbolQuery,
        _depth: u32,
    ) -> Result<PartialResult<Vec<ImpactItem>>, AdapterError> {
        Ok(PartialResult::partial(
            Vec::new(),
            0.0,
            CompletenessReason::NoBackendAvailable,
        ))
    }
}
