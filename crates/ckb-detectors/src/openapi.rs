// SPDX-License-Identifier: MIT OR Apache-2.0
//! OpenAPI / Swagger contract detector.
//!
//! Minimal parsing of OpenAPI 3.x and Swagger 2.0 documents: title,
//! version, and server URLs. Generator configurations count as declared
//! consumption; generator marker directories count as derived.

use crate::types::{
    ContractDetector, ContractType, ContractVisibility, DetectedContract, DetectedReference,
    DetectorOutput, EvidenceTier,
};
use crate::walker::{path_has_segment, walk_repo};
use anyhow::Result;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

/// Basenames (without extension) that identify a spec file.
const SPEC_BASENAMES: &[&str] = &["openapi", "swagger", "api"];

/// Path segments that mark a spec as internal.
const INTERNAL_SEGMENTS: &[&str] = &["internal", "testdata", "examples", "tmp", "vendor"];

/// Leading path segments that mark a spec as published.
const PUBLIC_ROOTS: &[&str] = &["api", "apis", "openapi", "spec", "specs", "schemas", "contracts", "docs"];

static ORVAL_INPUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:input|target)\s*:\s*['"]([^'"]+\.(?:ya?ml|json))['"]"#).expect("orval regex")
});

/// The minimal facts pulled from one spec document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenapiFacts {
    /// `openapi: 3.x` or `swagger: 2.0`.
    pub spec_version: Option<String>,
    /// `info.title`.
    pub title: Option<String>,
    /// `info.version`.
    pub version: Option<String>,
    /// Server URLs (3.x `servers[].url`, 2.0 `host` + `basePath`).
    pub servers: Vec<String>,
}

/// Parse a spec body that may be YAML or JSON.
#[must_use]
pub fn parse_spec(content: &str) -> Option<OpenapiFacts> {
    let value: serde_yaml::Value = serde_yaml::from_str(content).ok()?;
    let spec_version = value
        .get("openapi")
        .or_else(|| value.get("swagger"))
        .and_then(|v| match v {
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })?;

    let mut facts = OpenapiFacts {
        spec_version: Some(spec_version),
        ..OpenapiFacts::default()
    };
    if let Some(info) = value.get("info") {
        facts.title = info
            .get("title")
            .and_then(|v| v.as_str())
            .map(String::from);
        facts.version = info
            .get("version")
            .and_then(|v| v.as_str())
            .map(String::from);
    }

    // OpenAPI 3.x servers.
    if let Some(servers) = value.get("servers").and_then(|s| s.as_sequence()) {
        for server in servers {
            if let Some(url) = server.get("url").and_then(|u| u.as_str()) {
                facts.servers.push(url.to_string());
            }
        }
    }
    // Swagger 2.0 host + basePath.
    if let Some(host) = value.get("host").and_then(|h| h.as_str()) {
        let base = value
            .get("basePath")
            .and_then(|b| b.as_str())
            .unwrap_or("");
        facts.servers.push(format!("{host}{base}"));
    }

    Some(facts)
}

fn is_spec_file(rel: &str) -> bool {
    let base = ckb_core::paths::basename(rel);
    let Some((stem, ext)) = base.rsplit_once('.') else {
        return false;
    };
    matches!(ext, "yaml" | "yml" | "json") && SPEC_BASENAMES.contains(&stem)
}

fn is_localhost(url: &str) -> bool {
    url.contains("localhost") || url.contains("127.0.0.1") || url.contains("0.0.0.0")
}

/// Visibility classification for a spec.
#[must_use]
pub fn classify_visibility(
    rel_path: &str,
    facts: &OpenapiFacts,
) -> (ContractVisibility, &'static str, f64) {
    if path_has_segment(rel_path, INTERNAL_SEGMENTS) {
        return (ContractVisibility::Internal, "path-internal", 0.9);
    }
    if let Some((first, _)) = rel_path.split_once('/')
        && PUBLIC_ROOTS.contains(&first)
    {
        return (ContractVisibility::Public, "path-root", 0.85);
    }
    if facts.servers.iter().any(|url| !is_localhost(url)) {
        return (ContractVisibility::Public, "server-url", 0.7);
    }
    (ContractVisibility::Unknown, "no-signal", 0.5)
}

/// Import keys for a spec: the path, the path minus its public root, and
/// the bare basename.
#[must_use]
pub fn import_keys(rel_path: &str) -> Vec<String> {
    let mut keys = vec![rel_path.to_string()];
    if let Some((first, rest)) = rel_path.split_once('/')
        && PUBLIC_ROOTS.contains(&first)
        && !rest.is_empty()
    {
        keys.push(rest.to_string());
    }
    let base = ckb_core::paths::basename(rel_path).to_string();
    if !keys.contains(&base) {
        keys.push(base);
    }
    keys
}

/// The OpenAPI contract detector.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenapiDetector;

impl OpenapiDetector {
    /// Create the detector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ContractDetector for OpenapiDetector {
    fn name(&self) -> &'static str {
        "openapi"
    }

    fn detect(&self, root: &Path) -> Result<DetectorOutput> {
        let mut output = DetectorOutput::default();

        for file in walk_repo(root) {
            let base = ckb_core::paths::basename(&file.rel);

            if is_spec_file(&file.rel) {
                let Ok(content) = std::fs::read_to_string(&file.abs) else {
                    continue;
                };
                let Some(facts) = parse_spec(&content) else {
                    continue;
                };
                let (visibility, basis, confidence) = classify_visibility(&file.rel, &facts);
                output.contracts.push(DetectedContract {
                    path: file.rel.clone(),
                    contract_type: ContractType::Openapi,
                    metadata: serde_json::json!({
                        "spec_version": facts.spec_version,
                        "title": facts.title,
                        "version": facts.version,
                        "servers": facts.servers,
                    }),
                    visibility,
                    visibility_basis: basis.into(),
                    confidence,
                    import_keys: import_keys(&file.rel),
                });
            } else if base == "openapitools.json" {
                let Ok(content) = std::fs::read_to_string(&file.abs) else {
                    continue;
                };
                let Ok(value) = serde_json::from_str::<serde_json::Value>(&content) else {
                    continue;
                };
                if let Some(generators) = value
                    .pointer("/generator-cli/generators")
                    .and_then(|g| g.as_object())
                {
                    for config in generators.values() {
                        // A generator entry without an inputSpec is a no-op:
                        // fabricating an edge would be a guess.
                        if let Some(spec) = config.get("inputSpec").and_then(|s| s.as_str()) {
                            output.references.push(DetectedReference {
                                consumer_path: file.rel.clone(),
                                import_key: ckb_core::paths::canonicalize_rel(spec),
                                tier: EvidenceTier::Declared,
                                evidence_type: "generator-config".into(),
                                confidence: 0.9,
                                detector: self.name().into(),
                            });
                        }
                    }
                }
            } else if base.starts_with("orval.") {
                let Ok(content) = std::fs::read_to_string(&file.abs) else {
                    continue;
                };
                for caps in ORVAL_INPUT_RE.captures_iter(&content) {
                    output.references.push(DetectedReference {
                        consumer_path: file.rel.clone(),
                        import_key: ckb_core::paths::canonicalize_rel(&caps[1]),
                        tier: EvidenceTier::Declared,
                        evidence_type: "generator-config".into(),
                        confidence: 0.85,
                        detector: self.name().into(),
                    });
                }
            } else if file.rel.contains(".openapi-generator/") && base == "FILES" {
                // The marker directory proves generated output exists even
                // when the producing config is gone.
                output.references.push(DetectedReference {
                    consumer_path: file.rel.clone(),
                    import_key: "openapi.yaml".into(),
                    tier: EvidenceTier::Derived,
                    evidence_type: "generator-marker".into(),
                    confidence: 0.5,
                    detector: self.name().into(),
                });
            }
        }

        debug!(
            target: "ckb.detectors.openapi",
            contracts = output.contracts.len(),
            references = output.references.len(),
            "openapi detection complete"
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const OPENAPI3: &str = r#"
openapi: "3.0.3"
info:
  title: User API
  version: "1.4.0"
servers:
  - url: https://api.acme.dev/v1
  - url: http://localhost:8080
paths: {}
"#;

    const SWAGGER2: &str = r#"{
  "swagger": "2.0",
  "info": { "title": "Legacy API", "version": "0.9" },
  "host": "legacy.acme.dev",
  "basePath": "/v2"
}"#;

    #[test]
    fn parses_openapi_3() {
        let facts = parse_spec(OPENAPI3).unwrap();
        assert_eq!(facts.spec_version.as_deref(), Some("3.0.3"));
        assert_eq!(facts.title.as_deref(), Some("User API"));
        assert_eq!(facts.version.as_deref(), Some("1.4.0"));
        assert_eq!(facts.servers.len(), 2);
    }

    #[test]
    fn parses_swagger_2_json() {
        let facts = parse_spec(SWAGGER2).unwrap();
        assert_eq!(facts.spec_version.as_deref(), Some("2.0"));
        assert_eq!(facts.servers, vec!["legacy.acme.dev/v2"]);
    }

    #[test]
    fn non_spec_yaml_is_rejected() {
        assert!(parse_spec("name: just-a-config\nvalue: 3\n").is_none());
        assert!(parse_spec(":::\nthis: is: invalid: yaml:").is_none());
    }

    #[test]
    fn spec_filename_matching() {
        assert!(is_spec_file("api/openapi.yaml"));
        assert!(is_spec_file("swagger.json"));
        assert!(is_spec_file("docs/api.yml"));
        assert!(!is_spec_file("api/routes.yaml"));
        assert!(!is_spec_file("openapi.txt"));
    }

    #[test]
    fn internal_path_overrides_server_url() {
        let facts = parse_spec(OPENAPI3).unwrap();
        let (vis, basis, _) = classify_visibility("internal/openapi.yaml", &facts);
        assert_eq!(vis, ContractVisibility::Internal);
        assert_eq!(basis, "path-internal");
    }

    #[test]
    fn api_root_then_server_url_then_unknown() {
        let facts = parse_spec(OPENAPI3).unwrap();
        let (vis, basis, _) = classify_visibility("api/openapi.yaml", &facts);
        assert_eq!((vis, basis), (ContractVisibility::Public, "path-root"));

        let (vis, basis, _) = classify_visibility("misc/openapi.yaml", &facts);
        assert_eq!((vis, basis), (ContractVisibility::Public, "server-url"));

        let localhost_only = OpenapiFacts {
            servers: vec!["http://localhost:3000".into()],
            ..OpenapiFacts::default()
        };
        let (vis, _, confidence) = classify_visibility("misc/openapi.yaml", &localhost_only);
        assert_eq!(vis, ContractVisibility::Unknown);
        assert!((confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn import_key_variants() {
        assert_eq!(
            import_keys("api/v1/openapi.yaml"),
            vec!["api/v1/openapi.yaml", "v1/openapi.yaml", "openapi.yaml"]
        );
        assert_eq!(import_keys("openapi.yaml"), vec!["openapi.yaml"]);
    }

    #[test]
    fn detector_end_to_end() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("api")).unwrap();
        fs::create_dir_all(dir.path().join("client/.openapi-generator")).unwrap();
        fs::write(dir.path().join("api/openapi.yaml"), OPENAPI3).unwrap();
        fs::write(
            dir.path().join("openapitools.json"),
            r#"{"generator-cli":{"generators":{"ts":{"inputSpec":"./api/openapi.yaml"},"broken":{}}}}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("orval.config.js"),
            "module.exports = { api: { input: './api/openapi.yaml' } };\n",
        )
        .unwrap();
        fs::write(dir.path().join("client/.openapi-generator/FILES"), "a.ts\n").unwrap();

        let output = OpenapiDetector::new().detect(dir.path()).unwrap();
        assert_eq!(output.contracts.len(), 1);
        assert_eq!(output.contracts[0].visibility, ContractVisibility::Public);

        let declared: Vec<_> = output
            .references
            .iter()
            .filter(|r| r.tier == EvidenceTier::Declared)
            .collect();
        // openapitools (one valid generator) + orval = 2; the generator
        // without inputSpec contributes nothing.
        assert_eq!(declared.len(), 2);
        assert!(declared.iter().all(|r| r.import_key == "api/openapi.yaml"));

        let derived: Vec<_> = output
            .references
            .iter()
            .filter(|r| r.tier == EvidenceTier::Derived)
            .collect();
        assert_eq!(derived.len(), 1);
        assert_eq!(derived[0].evidence_type, "generator-marker");
    }
}
