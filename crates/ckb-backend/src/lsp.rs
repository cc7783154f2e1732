// SPDX-License-Identifier: MIT OR Apache-2.0
//! Adapter over a supervised language-server subprocess.
//!
//! Best-effort by contract: the language server never mints stable IDs,
//! never contributes call graphs, and its answers carry
//! `best-effort-lsp` completeness.

use crate::{
    AdapterCapabilities, AdapterError, BackendAdapter, PartialResult, ReferenceScope, SymbolQuery,
};
use async_trait::async_trait;
use ckb_core::{
    BackendKind, CompletenessReason, ImpactItem, Location, LocationFreshness, ModuleFacts,
    Reference, ReferenceKind, SymbolFacts, SymbolKind,
};
use ckb_supervisor::{Supervisor, SupervisorError};
use serde_json::json;
use tracing::debug;

/// Completeness assigned to language-server answers.
const LSP_COMPLETENESS: f64 = 0.6;

/// Adapter routing queries to the supervisor.
#[derive(Debug, Clone)]
pub struct LspAdapter {
    supervisor: Supervisor,
}

impl LspAdapter {
    /// Wrap a supervisor.
    #[must_use]
    pub fn new(supervisor: Supervisor) -> Self {
        Self { supervisor }
    }

    fn language_of(query: &SymbolQuery) -> Option<String> {
        if let Some(lang) = &query.language {
            return Some(lang.clone());
        }
        let file = query.file_hint.as_deref()?;
        language_from_path(file)
    }

    async fn call(
        &self,
        language: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, AdapterError> {
        self.supervisor
            .request(language, &payload)
            .await
            .map_err(|err| match err {
                SupervisorError::WorkspaceNotReady { language } => {
                    AdapterError::NotReady { language }
                }
                SupervisorError::RateLimited { .. } => AdapterError::RateLimited,
                SupervisorError::Timeout { .. } => AdapterError::Timeout,
                SupervisorError::UnknownLanguage(lang) => {
                    AdapterError::Unavailable(format!("no server for '{lang}'"))
                }
                SupervisorError::RequestFailed { message, .. } => {
                    AdapterError::Unavailable(message)
                }
                SupervisorError::ShuttingDown => {
                    AdapterError::Unavailable("supervisor shutting down".into())
                }
            })
    }
}

/// Map a file path to a language key by extension.
#[must_use]
pub fn language_from_path(path: &str) -> Option<String> {
    let ext = path.rsplit('.').next()?;
    let lang = match ext {
        "rs" => "rust",
        "go" => "go",
        "py" => "python",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" => "javascript",
        "java" => "java",
        "kt" => "kotlin",
        _ => return None,
    };
    Some(lang.to_string())
}

fn parse_location(value: &serde_json::Value) -> Option<Location> {
    Some(Location {
        file: value.get("file")?.as_str()?.to_string(),
        start_line: value.get("line")?.as_u64()? as u32,
        start_column: value.get("column").and_then(|v| v.as_u64()).unwrap_or(1) as u32,
        end_line: value.get("end_line").and_then(|v| v.as_u64()).unwrap_or(
            value.get("line")?.as_u64()?,
        ) as u32,
        end_column: value.get("end_column").and_then(|v| v.as_u64()).unwrap_or(1) as u32,
    })
}

fn parse_kind(value: Option<&serde_json::Value>) -> SymbolKind {
    match value.and_then(|v| v.as_str()) {
        Some("module") => SymbolKind::Module,
        Some("type") => SymbolKind::Type,
        Some("function") => SymbolKind::Function,
        Some("field") => SymbolKind::Field,
        Some("constant") => SymbolKind::Constant,
        Some("variable") => SymbolKind::Variable,
        _ => SymbolKind::Unknown,
    }
}

#[async_trait]
impl BackendAdapter for LspAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::LanguageServer
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            symbols: true,
            references: true,
            modules: false,
            impact: false,
            mints_stable_ids: false,
            visibility: false,
        }
    }

    async fn is_available(&self) -> bool {
        !self.supervisor.registered_languages().is_empty()
    }

    async fn get_symbol(
        &self,
        query: &SymbolQuery,
    ) -> Result<PartialResult<Option<SymbolFacts>>, AdapterError> {
        let Some(language) = Self::language_of(query) else {
            return Ok(PartialResult::partial(
                None,
                0.0,
                CompletenessReason::NoBackendAvailable,
            ));
        };
        let response = self
            .call(
                &language,
                json!({
                    "method": "symbol/info",
                    "name": query.name,
                    "container": query.container,
                    "file": query.file_hint,
                }),
            )
            .await?;

        let facts = response.get("symbol").map(|sym| SymbolFacts {
            // The language server never mints stable IDs.
            stable_id: None,
            name: sym
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or(&query.name)
                .to_string(),
            container: sym
                .get("container")
                .and_then(|v| v.as_str())
                .unwrap_or(&query.container)
                .to_string(),
            kind: parse_kind(sym.get("kind")),
            arity: sym.get("arity").and_then(|v| v.as_u64()).map(|a| a as u32),
            signature_full: sym
                .get("signature")
                .and_then(|v| v.as_str())
                .map(String::from),
            signature_normalized: sym
                .get("signature_normalized")
                .and_then(|v| v.as_str())
                .map(String::from),
            visibility: None,
            visibility_confidence: None,
            module_id: None,
            location: sym.get("location").and_then(parse_location),
            location_freshness: LocationFreshness::Fresh,
            ref_count: None,
            confidence: LSP_COMPLETENESS,
        });

        debug!(target: "ckb.backend.lsp", language = %language, found = facts.is_some(), "symbol/info");
        Ok(PartialResult::partial(
            facts,
            LSP_COMPLETENESS,
            CompletenessReason::BestEffortLsp,
        ))
    }

    async fn find_references(
        &self,
        query: &SymbolQuery,
        scope: &ReferenceScope,
        limit: usize,
    ) -> Result<PartialResult<Vec<Reference>>, AdapterError> {
        let Some(language) = Self::language_of(query) else {
            return Ok(PartialResult::partial(
                Vec::new(),
                0.0,
                CompletenessReason::NoBackendAvailable,
            ));
        };
        let response = self
            .call(
                &language,
                json!({
                    "method": "references",
                    "name": query.name,
                    "container": query.container,
                    "file": query.file_hint,
                    "limit": limit,
                }),
            )
            .await?;

        let mut references: Vec<Reference> = response
            .get("references")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let location = parse_location(item)?;
                        if !scope.contains(&location.file) {
                            return None;
                        }
                        Some(Reference {
                            location,
                            kind: match item.get("kind").and_then(|v| v.as_str()) {
                                Some("definition") => ReferenceKind::Definition,
                                Some("write") => ReferenceKind::Write,
                                Some("import") => ReferenceKind::Import,
                                _ => ReferenceKind::Use,
                            },
                            confidence: LSP_COMPLETENESS,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let truncated = references.len() > limit;
        references.truncate(limit);
        let result = PartialResult::partial(
            references,
            LSP_COMPLETENESS,
            CompletenessReason::BestEffortLsp,
        );
        Ok(if truncated { result.truncated() } else { result })
    }

    async fn list_modules(&self) -> Result<PartialResult<Vec<ModuleFacts>>, AdapterError> {
        // Module structure comes from indexed sources only.
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
        // Call graphs come from indexed sources only.
        Ok(PartialResult::partial(
            Vec::new(),
            0.0,
            CompletenessReason::NoBackendAvailable,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ckb_core::SymbolId;
    use ckb_supervisor::{LanguageServerSpec, SupervisorConfig};
    use std::collections::BTreeMap;
    use std::time::Duration;

    /// A server that answers `symbol/info` and `references` with canned
    /// JSON, driven entirely by shell.
    fn canned_spec(language: &str) -> LanguageServerSpec {
        let script = r#"
read line; printf '{}\n'
while IFS= read -r line; do
  case "$line" in
    *symbol/info*) printf '{"symbol":{"name":"parse","container":"lib","kind":"function","location":{"file":"src/lib.rs","line":10,"column":4}}}\n' ;;
    *references*) printf '{"references":[{"file":"src/eval.rs","line":20,"column":9},{"file":"src/main.rs","line":4,"column":1}]}\n' ;;
    *) printf '{}\n' ;;
  esac
done
"#;
        LanguageServerSpec {
            language: language.into(),
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    fn query_for(file: &str) -> SymbolQuery {
        SymbolQuery {
            id: SymbolId::new("demo", "abcd"),
            name: "parse".into(),
            container: "lib".into(),
            native_hint: None,
            file_hint: Some(file.into()),
            language: None,
        }
    }

    async fn ready_supervisor(language: &str) -> Supervisor {
        let sup = Supervisor::new(SupervisorConfig {
            backoff_base: Duration::from_millis(10),
            ..Default::default()
        });
        sup.register(canned_spec(language));
        sup.warmup(language);
        for _ in 0..200 {
            if sup
                .stats()
                .iter()
                .any(|s| s.state == ckb_supervisor::ProcessState::Ready)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sup
    }

    #[test]
    fn language_detection_from_extension() {
        assert_eq!(language_from_path("src/lib.rs").as_deref(), Some("rust"));
        assert_eq!(language_from_path("pkg/main.go").as_deref(), Some("go"));
        assert_eq!(language_from_path("app.tsx").as_deref(), Some("typescript"));
        assert_eq!(language_from_path("README.md"), None);
    }

    #[tokio::test]
    async fn symbol_info_parses_without_minting_ids() {
        let sup = ready_supervisor("rust").await;
        let adapter = LspAdapter::new(sup.clone());

        let result = adapter.get_symbol(&query_for("src/lib.rs")).await.unwrap();
        assert_eq!(
            result.completeness_reason,
            CompletenessReason::BestEffortLsp
        );
        let facts = result.data.unwrap();
        assert_eq!(facts.name, "parse");
        assert!(facts.stable_id.is_none());
        assert_eq!(facts.location.unwrap().start_line, 10);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn references_parse_and_scope() {
        let sup = ready_supervisor("rust").await;
        let adapter = LspAdapter::new(sup.clone());

        let all = adapter
            .find_references(&query_for("src/lib.rs"), &ReferenceScope::default(), 10)
            .await
            .unwrap();
        assert_eq!(all.data.len(), 2);

        let scoped = adapter
            .find_references(
                &query_for("src/lib.rs"),
                &ReferenceScope {
                    file: Some("src/eval.rs".into()),
                    module: None,
                },
                10,
            )
            .await
            .unwrap();
        assert_eq!(scoped.data.len(), 1);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_language_yields_no_backend() {
        let sup = ready_supervisor("rust").await;
        let adapter = LspAdapter::new(sup.clone());
        let mut q = query_for("notes.txt");
        q.file_hint = Some("notes.txt".into());
        let result = adapter.get_symbol(&q).await.unwrap();
        assert!(result.data.is_none());
        assert_eq!(
            result.completeness_reason,
            CompletenessReason::NoBackendAvailable
        );
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn not_ready_maps_to_adapter_error() {
        let sup = Supervisor::new(SupervisorConfig::default());
        sup.register(canned_spec("rust"));
        let adapter = LspAdapter::new(sup.clone());
        // First request races the spawn; not-ready is the contract.
        let err = adapter
            .get_symbol(&query_for("src/lib.rs"))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::NotReady { .. }));
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn modules_and_impact_are_not_this_adapters_job() {
        let sup = ready_supervisor("rust").await;
        let adapter = LspAdapter::new(sup.clone());
        assert!(!adapter.capabilities().modules);
        assert!(!adapter.capabilities().impact);
        assert!(!adapter.capabilities().mints_stable_ids);
        let modules = adapter.list_modules().await.unwrap();
        assert!(modules.data.is_empty());
        sup.shutdown().await;
    }
}
