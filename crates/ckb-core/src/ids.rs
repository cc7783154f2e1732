// SPDX-License-Identifier: MIT OR Apache-2.0
//! Public identifier forms.
//!
//! Symbols: `ckb:<repo>:sym:<stableFingerprint>` with an optional
//! `@<definitionVersionHash>` qualifier. Contracts: `<repoUid>:<path>`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors raised while parsing identifier strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdParseError {
    /// The string does not start with the `ckb:` scheme.
    #[error("missing ckb: scheme in '{0}'")]
    MissingScheme(String),
    /// The string is not of the form `ckb:<repo>:sym:<fp>`.
    #[error("malformed symbol id '{0}'")]
    Malformed(String),
    /// A component that must be non-empty is empty.
    #[error("empty component in '{0}'")]
    EmptyComponent(String),
}

/// A parsed symbol identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolId {
    /// Repository name.
    pub repo: String,
    /// Stable fingerprint component.
    pub fingerprint: String,
    /// Optional definition-version qualifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl SymbolId {
    /// Construct an unversioned symbol id.
    #[must_use]
    pub fn new(repo: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            fingerprint: fingerprint.into(),
            version: None,
        }
    }

    /// Attach a definition-version qualifier.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Parse `ckb:<repo>:sym:<fp>[@<version>]`.
    pub fn parse(s: &str) -> Result<Self, IdParseError> {
        let rest = s
            .strip_prefix("ckb:")
            .ok_or_else(|| IdParseError::MissingScheme(s.to_string()))?;
        let mut parts = rest.splitn(3, ':');
        let repo = parts.next().unwrap_or_default();
        let tag = parts.next().unwrap_or_default();
        let fp_and_version = parts.next().unwrap_or_default();
        if tag != "sym" {
            return Err(IdParseError::Malformed(s.to_string()));
        }
        if repo.is_empty() || fp_and_version.is_empty() {
            return Err(IdParseError::EmptyComponent(s.to_string()));
        }
        let (fingerprint, version) = match fp_and_version.split_once('@') {
            Some((fp, ver)) => {
                if fp.is_empty() || ver.is_empty() {
                    return Err(IdParseError::EmptyComponent(s.to_string()));
                }
                (fp.to_string(), Some(ver.to_string()))
            }
            None => (fp_and_version.to_string(), None),
        };
        Ok(Self {
            repo: repo.to_string(),
            fingerprint,
            version,
        })
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ckb:{}:sym:{}", self.repo, self.fingerprint)?;
        if let Some(ref v) = self.version {
            write!(f, "@{v}")?;
        }
        Ok(())
    }
}

/// A parsed contract identifier: `<repoUid>:<repoRelativePath>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractId {
    /// Repository UID within the federation.
    pub repo_uid: String,
    /// Repo-relative forward-slash path of the contract file.
    pub path: String,
}

impl ContractId {
    /// Construct from components.
    #[must_use]
    pub fn new(repo_uid: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            repo_uid: repo_uid.into(),
            path: path.into(),
        }
    }

    /// Parse `<repoUid>:<path>`. The path may itself contain colons on no
    /// supported platform, so the first colon splits.
    pub fn parse(s: &str) -> Result<Self, IdParseError> {
        let (repo_uid, path) = s
            .split_once(':')
            .ok_or_else(|| IdParseError::Malformed(s.to_string()))?;
        if repo_uid.is_empty() || path.is_empty() {
            return Err(IdParseError::EmptyComponent(s.to_string()));
        }
        Ok(Self {
            repo_uid: repo_uid.to_string(),
            path: path.to_string(),
        })
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repo_uid, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_id_roundtrip() {
        let id = SymbolId::new("foo", "ABCD1234");
        let s = id.to_string();
        assert_eq!(s, "ckb:foo:sym:ABCD1234");
        assert_eq!(SymbolId::parse(&s).unwrap(), id);
    }

    #[test]
    fn versioned_symbol_id_roundtrip() {
        let id = SymbolId::new("foo", "ABCD").with_version("99ff");
        let s = id.to_string();
        assert_eq!(s, "ckb:foo:sym:ABCD@99ff");
        let back = SymbolId::parse(&s).unwrap();
        assert_eq!(back.version.as_deref(), Some("99ff"));
    }

    #[test]
    fn rejects_missing_scheme() {
        assert!(matches!(
            SymbolId::parse("foo:sym:ABCD"),
            Err(IdParseError::MissingScheme(_))
        ));
    }

    #[test]
    fn rejects_wrong_tag() {
        assert!(matches!(
            SymbolId::parse("ckb:foo:mod:ABCD"),
            Err(IdParseError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_empty_components() {
        assert!(SymbolId::parse("ckb::sym:ABCD").is_err());
        assert!(SymbolId::parse("ckb:foo:sym:").is_err());
        assert!(SymbolId::parse("ckb:foo:sym:AB@").is_err());
    }

    #[test]
    fn contract_id_splits_on_first_colon() {
        let c = ContractId::parse("repo-uid-1:proto/api/v1/user.proto").unwrap();
        assert_eq!(c.repo_uid, "repo-uid-1");
        assert_eq!(c.path, "proto/api/v1/user.proto");
        assert_eq!(c.to_string(), "repo-uid-1:proto/api/v1/user.proto");
    }

    #[test]
    fn contract_id_rejects_empty() {
        assert!(ContractId::parse("nocolon").is_err());
        assert!(ContractId::parse(":path").is_err());
        assert!(ContractId::parse("uid:").is_err());
    }
}
