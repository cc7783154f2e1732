// SPDX-License-Identifier: MIT OR Apache-2.0
//! Plain-text scanner fallback.
//!
//! Walks the working tree (including uncommitted files, which the VCS
//! adapter misses) and finds word-boundary matches. Lowest fidelity,
//! lowest precedence; file contents are read transiently and never stored.

use crate::{
    AdapterCapabilities, AdapterError, BackendAdapter, PartialResult, ReferenceScope, SymbolQuery,
};
use async_trait::async_trait;
use ckb_core::{
    BackendKind, CompletenessReason, ImpactItem, Location, ModuleFacts, Reference, ReferenceKind,
    SymbolFacts,
};
use regex::Regex;
use std::path::PathBuf;
use tracing::debug;
use walkdir::WalkDir;

/// Directories never scanned.
const SKIP_DIRS: &[&str] = &["node_modules", "vendor", "target", "dist", ".git"];

/// Files larger than this are skipped.
const MAX_FILE_BYTES: u64 = 1_048_576;

/// Confidence attached to scan-derived references.
const SCAN_CONFIDENCE: f64 = 0.3;

/// Adapter scanning one checkout root.
#[derive(Debug, Clone)]
pub struct ScannerAdapter {
    root: PathBuf,
}

impl ScannerAdapter {
    /// Create a scanner rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn scan(
        root: &PathBuf,
        name: &str,
        scope: &ReferenceScope,
        limit: usize,
    ) -> Result<(Vec<Reference>, bool), AdapterError> {
        let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(name)))
            .map_err(|e| AdapterError::Internal(format!("bad scan pattern: {e}")))?;

        let mut references = Vec::new();
        let mut truncated = false;

        let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
            let file_name = entry.file_name().to_string_lossy();
            !(entry.depth() > 0
                && (file_name.starts_with('.') || SKIP_DIRS.contains(&file_name.as_ref())))
        });

        'files: for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX) > MAX_FILE_BYTES {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();
            let rel = ckb_core::paths::canonicalize_rel(&rel);
            if !scope.contains(&rel) {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                // Binary or unreadable; skip.
                continue;
            };
            for (line_idx, line) in content.lines().enumerate() {
                for m in pattern.find_iter(line) {
                    if references.len() >= limit {
                        truncated = true;
                        break 'files;
                    }
                    references.push(Reference {
                        location: Location {
                            file: rel.clone(),
                            start_line: line_idx as u32 + 1,
                            start_column: m.start() as u32 + 1,
                            end_line: line_idx as u32 + 1,
                            end_column: m.end() as u32 + 1,
                        },
                        kind: ReferenceKind::Use,
                        confidence: SCAN_CONFIDENCE,
                    });
                }
            }
        }

        Ok((references, truncated))
    }
}

#[async_trait]
impl BackendAdapter for ScannerAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Scanner
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            symbols: false,
            references: true,
            modules: false,
            impact: false,
            mints_stable_ids: false,
            visibility: false,
        }
    }

    async fn is_available(&self) -> bool {
        self.root.is_dir()
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
        let root = self.root.clone();
        let name = query.name.clone();
        let scope = scope.clone();
        // File walking is blocking work.
        let (references, truncated) =
            tokio::task::spawn_blocking(move || Self::scan(&root, &name, &scope, limit))
                .await
                .map_err(|e| AdapterError::Internal(format!("scan task failed: {e}")))??;

        debug!(
            target: "ckb.backend.scanner",
            name = %query.name,
            count = references.len(),
            truncated,
            "text scan"
        );

        let result =
            PartialResult::partial(references, SCAN_CONFIDENCE, CompletenessReason::Unknown);
        Ok(if truncated {
            PartialResult {
                completeness_reason: CompletenessReason::Truncated,
                ..result.truncated()
            }
        } else {
            result
        })
    }

    async fn list_modules(&self) -> Result<PartialResult<Vec<ModuleFacts>>, AdapterError> {
        Ok(PartialResult::partial(
            Vec::new(),
            0.0,
            CompletenessReason::NoBackendAvailable,
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
