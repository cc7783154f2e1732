// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and hashing for CKB.
//!
//! This crate provides [`CkbConfig`] — the settings outer surfaces load
//! from TOML and hand to the core — together with semantic validation
//! that reports every problem at once and advisory [`ConfigWarning`]s
//! that never fail a load. The stable [`CkbConfig::config_hash`]
//! participates in the view-cache key so a config edit invalidates
//! location-sensitive cache entries.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors and warnings
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },
    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },
    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// Advisory-level issues that do not prevent operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A remote server entry is disabled.
    DisabledRemote {
        /// Server name.
        name: String,
    },
    /// A backend timeout is unusually large.
    LargeTimeout {
        /// Which timeout.
        field: String,
        /// Timeout value in milliseconds.
        millis: u64,
    },
    /// A recommended optional field is missing.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::DisabledRemote { name } => {
                write!(f, "remote server '{name}' is disabled")
            }
            ConfigWarning::LargeTimeout { field, millis } => {
                write!(f, "'{field}' has a large timeout ({millis} ms)")
            }
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// One language-server entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LanguageServerEntry {
    /// Executable to spawn.
    pub command: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Orchestrator tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct OrchestratorSection {
    /// Per-backend call timeout in milliseconds.
    pub backend_timeout_ms: u64,
    /// Union-mode overall timeout in milliseconds.
    pub union_timeout_ms: u64,
    /// Coalescing window in milliseconds.
    pub coalescing_window_ms: u64,
    /// Primary-completeness threshold.
    pub completeness_threshold: f64,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            backend_timeout_ms: 10_000,
            union_timeout_ms: 60_000,
            coalescing_window_ms: 50,
            completeness_threshold: 0.8,
        }
    }
}

/// Federation catalog settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct FederationSection {
    /// Path of the catalog database file.
    pub store_path: Option<String>,
    /// Repositories to sync, keyed by repo UID.
    pub repos: BTreeMap<String, FederationRepoEntry>,
}

/// One federated repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FederationRepoEntry {
    /// Checkout path.
    pub root: String,
    /// Display name; defaults to the UID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One peer fact server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RemoteServerEntry {
    /// Display name.
    pub name: String,
    /// Base URL.
    pub url: String,
    /// Bearer token, typically a `${VAR}` environment reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Whether the server participates in fan-out.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-server timeout in milliseconds.
    #[serde(default = "default_remote_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_remote_timeout_ms() -> u64 {
    10_000
}

/// Job engine tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct JobsSection {
    /// Path of the job database file.
    pub store_path: Option<String>,
    /// In-memory queue capacity.
    pub channel_capacity: usize,
    /// Recovery scan interval in milliseconds.
    pub recovery_interval_ms: u64,
}

impl Default for JobsSection {
    fn default() -> Self {
        Self {
            store_path: None,
            channel_capacity: 64,
            recovery_interval_ms: 30_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

/// Top-level runtime configuration for CKB.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CkbConfig {
    /// Repository name used in stable IDs.
    pub repo: Option<String>,
    /// Repository root path.
    pub root: Option<String>,
    /// Path of the semantic index file.
    pub index_path: Option<String>,
    /// Language servers keyed by language.
    pub language_servers: BTreeMap<String, LanguageServerEntry>,
    /// Orchestrator tunables.
    pub orchestrator: OrchestratorSection,
    /// Federation settings.
    pub federation: FederationSection,
    /// Peer fact servers.
    pub remotes: Vec<RemoteServerEntry>,
    /// Job engine settings.
    pub jobs: JobsSection,
}

impl CkbConfig {
    /// Parse a TOML string.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::ParseError {
            reason: e.to_string(),
        })
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        Self::from_toml(&raw)
    }

    /// Validate semantics, collecting every problem, and return advisory
    /// warnings on success.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut reasons = Vec::new();
        let mut warnings = Vec::new();

        if !(0.0..=1.0).contains(&self.orchestrator.completeness_threshold) {
            reasons.push(format!(
                "orchestrator.completeness_threshold must be in [0, 1], got {}",
                self.orchestrator.completeness_threshold
            ));
        }
        if self.orchestrator.backend_timeout_ms == 0 {
            reasons.push("orchestrator.backend_timeout_ms must be positive".into());
        }
        if self.orchestrator.backend_timeout_ms > 120_000 {
            warnings.push(ConfigWarning::LargeTimeout {
                field: "orchestrator.backend_timeout_ms".into(),
                millis: self.orchestrator.backend_timeout_ms,
            });
        }

        let mut seen_names = std::collections::BTreeSet::new();
        for remote in &self.remotes {
            if remote.name.is_empty() {
                reasons.push("remote server with empty name".into());
            }
            if !seen_names.insert(&remote.name) {
                reasons.push(format!("duplicate remote server name '{}'", remote.name));
            }
            if !remote.url.starts_with("http://") && !remote.url.starts_with("https://") {
                reasons.push(format!(
                    "remote server '{}' has a non-http url '{}'",
                    remote.name, remote.url
                ));
            }
            if !remote.enabled {
                warnings.push(ConfigWarning::DisabledRemote {
                    name: remote.name.clone(),
                });
            }
            if remote.timeout_ms > 120_000 {
                warnings.push(ConfigWarning::LargeTimeout {
                    field: format!("remotes.{}.timeout_ms", remote.name),
                    millis: remote.timeout_ms,
                });
            }
        }

        for (language, entry) in &self.language_servers {
            if entry.command.is_empty() {
                reasons.push(format!("language server '{language}' has an empty command"));
            }
        }

        if self.index_path.is_none() {
            warnings.push(ConfigWarning::MissingOptionalField {
                field: "index_path".into(),
                hint: "without a semantic index only best-effort sources answer".into(),
            });
        }

        if reasons.is_empty() {
            Ok(warnings)
        } else {
            Err(ConfigError::ValidationError { reasons })
        }
    }

    /// Stable hash of the effective configuration; part of the view-cache
    /// key so a config edit invalidates location-sensitive entries.
    #[must_use]
    pub fn config_hash(&self) -> String {
        let serialized = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(serialized.as_bytes());
        ckb_core::hex_lower(&hasher.finalize()[..8])
    }
}
