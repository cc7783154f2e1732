// SPDX-License-Identifier: MIT OR Apache-2.0
//! Protocol-buffer contract detector.
//!
//! Line-level parsing only: `package`, `import` (with optional `public`),
//! `service`, and `option` statements, skipping comment lines. Each
//! contract gets four import-key variants so cross-repo resolution works
//! across heterogeneous import styles.

use crate::types::{
    ContractDetector, ContractType, ContractVisibility, DetectedContract, DetectedImport,
    DetectedReference, DetectorOutput, EvidenceTier,
};
use crate::walker::{path_has_segment, walk_repo};
use anyhow::{Context, Result};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

/// Path segments that mark a contract as internal.
const INTERNAL_SEGMENTS: &[&str] = &["internal", "testdata", "examples", "tmp", "vendor"];

/// Leading path segments that mark a contract as published.
const PUBLIC_ROOTS: &[&str] = &["proto", "protos", "api", "idl", "schemas", "contracts"];

static PACKAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*package\s+([A-Za-z0-9_.]+)\s*;"#).expect("package regex"));
static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*import\s+(public\s+)?"([^"]+)"\s*;"#).expect("import regex")
});
static SERVICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*service\s+([A-Za-z_][A-Za-z0-9_]*)"#).expect("service regex")
});
static OPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*option\s+([A-Za-z_.()]+)\s*=\s*(.+);"#).expect("option regex")
});
static VERSION_PKG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.v\d+(alpha|beta)?\d*$").expect("version package regex")
});
static GENERATED_SOURCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"source:\s*([A-Za-z0-9_\-./]+\.proto)").expect("generated source regex")
});

/// What line-level parsing extracted from one `.proto` file.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProtoFileFacts {
    /// Declared package, when present.
    pub package: Option<String>,
    /// Import statements: `(path, is_public)`.
    pub imports: Vec<(String, bool)>,
    /// Declared service names.
    pub services: Vec<String>,
    /// `option` statements as `(name, value)`.
    pub options: Vec<(String, String)>,
}

/// Parse the interesting statements out of proto source text.
#[must_use]
pub fn parse_proto(content: &str) -> ProtoFileFacts {
    let mut facts = ProtoFileFacts::default();
    let mut in_block_comment = false;

    for raw in content.lines() {
        let line = raw.trim();
        if in_block_comment {
            if let Some(end) = line.find("*/") {
                in_block_comment = false;
                let rest = &line[end + 2..];
                parse_statement(rest, &mut facts);
            }
            continue;
        }
        if line.starts_with("//") {
            continue;
        }
        if let Some(start) = line.find("/*") {
            let before = &line[..start];
            parse_statement(before, &mut facts);
            if !line[start..].contains("*/") {
                in_block_comment = true;
            }
            continue;
        }
        parse_statement(line, &mut facts);
    }
    facts
}

fn parse_statement(line: &str, facts: &mut ProtoFileFacts) {
    if let Some(caps) = PACKAGE_RE.captures(line) {
        facts.package = Some(caps[1].to_string());
    } else if let Some(caps) = IMPORT_RE.captures(line) {
        facts
            .imports
            .push((caps[2].to_string(), caps.get(1).is_some()));
    } else if let Some(caps) = SERVICE_RE.captures(line) {
        facts.services.push(caps[1].to_string());
    } else if let Some(caps) = OPTION_RE.captures(line) {
        facts
            .options
            .push((caps[1].to_string(), caps[2].trim().trim_matches('"').to_string()));
    }
}

/// The four import-key variants for a contract at `rel_path` with an
/// optional package, deduplicated.
#[must_use]
pub fn import_keys(rel_path: &str, package: Option<&str>) -> Vec<String> {
    let mut keys = vec![rel_path.to_string()];

    // Variant 2: the path with its public root stripped.
    if let Some((first, rest)) = rel_path.split_once('/')
        && PUBLIC_ROOTS.contains(&first)
        && !rest.is_empty()
    {
        keys.push(rest.to_string());
    }

    if let Some(pkg) = package {
        let base = ckb_core::paths::basename(rel_path);
        let pkg_as_path = pkg.replace('.', "/");
        // Variant 3: the package rendered as a path plus the basename.
        keys.push(format!("{pkg_as_path}/{base}"));
        // Variant 4: the package directory (dropping the final segment,
        // typically a version) plus the basename.
        if let Some((pkg_dir, _)) = pkg_as_path.rsplit_once('/') {
            keys.push(format!("{pkg_dir}/{base}"));
        }
    }

    let mut seen = std::collections::BTreeSet::new();
    keys.retain(|k| seen.insert(k.clone()));
    keys
}

/// Visibility classification for a proto contract.
#[must_use]
pub fn classify_visibility(
    rel_path: &str,
    facts: &ProtoFileFacts,
) -> (ContractVisibility, &'static str, f64) {
    let base = ckb_core::paths::basename(rel_path);
    let looks_like_test =
        base.starts_with("test_") || base.contains("_test.") || base.contains(".test.");
    if path_has_segment(rel_path, INTERNAL_SEGMENTS) || looks_like_test {
        return (ContractVisibility::Internal, "path-internal", 0.9);
    }

    if let Some(pkg) = &facts.package {
        let dotted = format!(".{pkg}.");
        if dotted.contains(".internal.") || dotted.contains(".private.") || dotted.contains(".test.")
        {
            return (ContractVisibility::Internal, "package-internal", 0.9);
        }
    }

    if let Some((first, _)) = rel_path.split_once('/')
        && PUBLIC_ROOTS.contains(&first)
    {
        return (ContractVisibility::Public, "path-root", 0.85);
    }

    if let Some(pkg) = &facts.package
        && VERSION_PKG_RE.is_match(pkg)
    {
        return (ContractVisibility::Public, "package-version", 0.8);
    }

    if !facts.services.is_empty() {
        return (ContractVisibility::Public, "has-service", 0.65);
    }

    (ContractVisibility::Unknown, "no-signal", 0.5)
}

/// Extensions that mark protoc-generated output.
fn is_generated_proto_output(rel: &str) -> bool {
    let base = ckb_core::paths::basename(rel);
    base.contains(".pb.") || base.ends_with("_pb.js") || base.contains("_pb2.")
}

/// The proto contract detector.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtoDetector;

impl ProtoDetector {
    /// Create the detector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ContractDetector for ProtoDetector {
    fn name(&self) -> &'static str {
        "proto"
    }

    fn detect(&self, root: &Path) -> Result<DetectorOutput> {
        let mut output = DetectorOutput::default();

        for file in walk_repo(root) {
            if file.rel.ends_with(".proto") {
                let content = std::fs::read_to_string(&file.abs)
                    .with_context(|| format!("read {}", file.rel))?;
                let facts = parse_proto(&content);
                let (visibility, basis, confidence) = classify_visibility(&file.rel, &facts);
                let keys = import_keys(&file.rel, facts.package.as_deref());

                for (import, public) in &facts.imports {
                    output.imports.push(DetectedImport {
                        importer_path: file.rel.clone(),
                        import_path: import.clone(),
                        public: *public,
                    });
                    output.references.push(DetectedReference {
                        consumer_path: file.rel.clone(),
                        import_key: import.clone(),
                        tier: EvidenceTier::Declared,
                        evidence_type: "proto-import".into(),
                        confidence: 0.95,
                        detector: self.name().into(),
                    });
                }

                output.contracts.push(DetectedContract {
                    path: file.rel.clone(),
                    contract_type: ContractType::Proto,
                    metadata: serde_json::json!({
                        "package": facts.package,
                        "services": facts.services,
                        "options": facts
                            .options
                            .iter()
                            .map(|(k, v)| serde_json::json!({ "name": k, "value": v }))
                            .collect::<Vec<_>>(),
                        "import_count": facts.imports.len(),
                    }),
                    visibility,
                    visibility_basis: basis.into(),
                    confidence,
                    import_keys: keys,
                });
            } else if is_generated_proto_output(&file.rel) {
                // protoc stamps the source proto into generated output.
                let Ok(content) = std::fs::read_to_string(&file.abs) else {
                    continue;
                };
                for line in content.lines().take(40) {
                    if let Some(caps) = GENERATED_SOURCE_RE.captures(line) {
                        output.references.push(DetectedReference {
                            consumer_path: file.rel.clone(),
                            import_key: caps[1].to_string(),
                            tier: EvidenceTier::Derived,
                            evidence_type: "generated-code".into(),
                            confidence: 0.7,
                            detector: self.name().into(),
                        });
                        break;
                    }
                }
            } else if ckb_core::paths::basename(&file.rel) == "buf.yaml" {
                let Ok(content) = std::fs::read_to_string(&file.abs) else {
                    continue;
                };
                if let Ok(value) = serde_yaml::from_str::<serde_yaml::Value>(&content)
                    && let Some(deps) = value.get("deps").and_then(|d| d.as_sequence())
                {
                    for dep in deps.iter().filter_map(|d| d.as_str()) {
                        output.references.push(DetectedReference {
                            consumer_path: file.rel.clone(),
                            import_key: dep.to_string(),
                            tier: EvidenceTier::Declared,
                            evidence_type: "buf-deps".into(),
                            confidence: 0.9,
                            detector: self.name().into(),
                        });
                    }
                }
            }
        }

        debug!(
            target: "ckb.detectors.proto",
            contracts = output.contracts.len(),
            references = output.references.len(),
            imports = output.imports.len(),
            "proto detection complete"
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const USER_PROTO: &str = r#"
syntax = "proto3";

// The user API.
package acme.user.v1;

import "proto/common/types.proto";
import public "proto/common/base.proto";

option go_package = "github.com/acme/user/v1;userv1";

service UserService {
  rpc GetUser(GetUserRequest) returns (GetUserResponse);
}

message GetUserRequest { string id = 1; }
"#;

    #[test]
    fn parses_package_imports_services_options() {
        let facts = parse_proto(USER_PROTO);
        assert_eq!(facts.package.as_deref(), Some("acme.user.v1"));
        assert_eq!(
            facts.imports,
            vec![
                ("proto/common/types.proto".to_string(), false),
                ("proto/common/base.proto".to_string(), true),
            ]
        );
        assert_eq!(facts.services, vec!["UserService"]);
        assert_eq!(facts.options.len(), 1);
        assert_eq!(facts.options[0].0, "go_package");
    }

    #[test]
    fn comment_lines_are_skipped() {
        let facts = parse_proto(
            "// package fake.commented;\n/* import \"nope.proto\"; */\npackage real.pkg;\n",
        );
        assert_eq!(facts.package.as_deref(), Some("real.pkg"));
        assert!(facts.imports.is_empty());
    }

    #[test]
    fn block_comments_span_lines() {
        let facts = parse_proto("/*\npackage hidden.pkg;\n*/\npackage visible.pkg;\n");
        assert_eq!(facts.package.as_deref(), Some("visible.pkg"));
    }

    #[test]
    fn import_key_variants() {
        let keys = import_keys("proto/api/v1/user.proto", Some("acme.user.v1"));
        assert_eq!(
            keys,
            vec![
                "proto/api/v1/user.proto",
                "api/v1/user.proto",
                "acme/user/v1/user.proto",
                "acme/user/user.proto",
            ]
        );
    }

    #[test]
    fn import_keys_without_package_or_root() {
        let keys = import_keys("misc/user.proto", None);
        assert_eq!(keys, vec!["misc/user.proto"]);
    }

    #[test]
    fn visibility_path_internal_overrides_everything() {
        let facts = parse_proto("package acme.user.v1;\nservice S {}\n");
        let (vis, basis, _) = classify_visibility("proto/internal/user.proto", &facts);
        assert_eq!(vis, ContractVisibility::Internal);
        assert_eq!(basis, "path-internal");
    }

    #[test]
    fn visibility_test_naming_is_internal() {
        let facts = ProtoFileFacts::default();
        let (vis, _, _) = classify_visibility("misc/user_test.proto", &facts);
        assert_eq!(vis, ContractVisibility::Internal);
    }

    #[test]
    fn visibility_package_internal() {
        let facts = parse_proto("package acme.internal.user;\n");
        let (vis, basis, _) = classify_visibility("misc/user.proto", &facts);
        assert_eq!(vis, ContractVisibility::Internal);
        assert_eq!(basis, "package-internal");
    }

    #[test]
    fn visibility_path_root_is_public() {
        let facts = ProtoFileFacts::default();
        let (vis, basis, confidence) = classify_visibility("proto/api/v1/user.proto", &facts);
        assert_eq!(vis, ContractVisibility::Public);
        assert_eq!(basis, "path-root");
        assert!(confidence > 0.8);
    }

    #[test]
    fn visibility_version_package_is_public() {
        let facts = parse_proto("package acme.user.v1beta1;\n");
        let (vis, basis, _) = classify_visibility("misc/user.proto", &facts);
        assert_eq!(vis, ContractVisibility::Public);
        assert_eq!(basis, "package-version");
    }

    #[test]
    fn visibility_service_is_public_lower_confidence() {
        let facts = parse_proto("service S {}\n");
        let (vis, basis, confidence) = classify_visibility("misc/user.proto", &facts);
        assert_eq!(vis, ContractVisibility::Public);
        assert_eq!(basis, "has-service");
        assert!(confidence < 0.8);
    }

    #[test]
    fn visibility_no_signal_is_unknown_at_half() {
        let facts = ProtoFileFacts::default();
        let (vis, basis, confidence) = classify_visibility("misc/user.proto", &facts);
        assert_eq!(vis, ContractVisibility::Unknown);
        assert_eq!(basis, "no-signal");
        assert!((confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn detector_end_to_end() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("proto/api/v1")).unwrap();
        fs::create_dir_all(dir.path().join("gen")).unwrap();
        fs::write(dir.path().join("proto/api/v1/user.proto"), USER_PROTO).unwrap();
        fs::write(
            dir.path().join("gen/user.pb.go"),
            "// Code generated by protoc-gen-go. DO NOT EDIT.\n// source: proto/api/v1/user.proto\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("buf.yaml"),
            "version: v1\ndeps:\n  - buf.build/acme/common\n",
        )
        .unwrap();

        let output = ProtoDetector::new().detect(dir.path()).unwrap();
        assert_eq!(output.contracts.len(), 1);
        let contract = &output.contracts[0];
        assert_eq!(contract.visibility, ContractVisibility::Public);
        assert!(contract.import_keys.contains(&"api/v1/user.proto".to_string()));

        // Two proto imports, one generated-code reference, one buf dep.
        assert_eq!(output.imports.len(), 2);
        assert!(output.imports[1].public);
        let derived: Vec<_> = output
            .references
            .iter()
            .filter(|r| r.tier == EvidenceTier::Derived)
            .collect();
        assert_eq!(derived.len(), 1);
        assert_eq!(derived[0].import_key, "proto/api/v1/user.proto");
        assert!(
            output
                .references
                .iter()
                .any(|r| r.evidence_type == "buf-deps" && r.import_key == "buf.build/acme/common")
        );
    }
}
