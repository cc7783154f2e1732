// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP client for one peer fact server.
//!
//! Bearer-token auth with `${VAR}` expansion from the environment,
//! exponential-backoff retry on network errors and 5xx (4xx surfaces
//! immediately), per-server timeout, and a response-body size cap.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Response bodies above this size are refused.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Retry attempts after the initial try.
const MAX_RETRIES: u32 = 3;

/// Base backoff delay.
const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Configuration for one peer server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteServerConfig {
    /// Display name.
    pub name: String,
    /// Base URL (no trailing slash required).
    pub url: String,
    /// Bearer token; `${VAR}` expands from the environment at client
    /// construction, never at config parse time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Whether the server participates in fan-out queries.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-server request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    10_000
}

/// Errors from remote calls, by class.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// 4xx from the server; never retried.
    #[error("client error {status}: {message}")]
    Client {
        /// HTTP status code.
        status: u16,
        /// Response body or status text.
        message: String,
    },
    /// 5xx after retries were exhausted.
    #[error("server error {status} after retries")]
    Server {
        /// HTTP status code.
        status: u16,
    },
    /// Connection-level failure after retries.
    #[error("network error: {0}")]
    Network(String),
    /// The per-server timeout elapsed.
    #[error("request timed out")]
    Timeout,
    /// The response body exceeded the size cap.
    #[error("response body exceeds {MAX_BODY_BYTES} bytes")]
    BodyTooLarge,
    /// The body was not the JSON we expected.
    #[error("malformed response: {0}")]
    Decode(String),
    /// A referenced environment variable is unset.
    #[error("token variable '{0}' is not set")]
    TokenVariable(String),
}

impl RemoteError {
    /// Whether the failure class is eligible for retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Server { .. } | Self::Network(_))
    }
}

/// Expand `${VAR}` references from the environment.
pub fn expand_token(raw: &str) -> Result<String, RemoteError> {
    if let Some(rest) = raw.strip_prefix("${")
        && let Some(var) = rest.strip_suffix('}')
    {
        return std::env::var(var).map_err(|_| RemoteError::TokenVariable(var.to_string()));
    }
    Ok(raw.to_string())
}

/// A repository summary from a peer server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRepo {
    /// Repository UID on the peer.
    pub uid: String,
    /// Display name.
    pub name: String,
    /// When the peer last indexed it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_indexed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A symbol hit from a peer search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSymbol {
    /// Stable ID on the peer.
    pub stable_id: String,
    /// Symbol name.
    pub name: String,
    /// Symbol kind string.
    #[serde(default)]
    pub kind: String,
    /// Defining file, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Search score.
    #[serde(default)]
    pub score: f64,
}

/// The HTTP client for one peer.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    name: String,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
    http: reqwest::Client,
}

impl RemoteClient {
    /// Build a client, expanding the token from the environment.
    pub fn new(config: &RemoteServerConfig) -> Result<Self, RemoteError> {
        let token = config.token.as_deref().map(expand_token).transpose()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Ok(Self {
            name: config.name.clone(),
            base_url: config.url.trim_end_matches('/').to_string(),
            token,
            timeout: Duration::from_millis(config.timeout_ms),
            http,
        })
    }

    /// The server's display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The server's base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, RemoteError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0u32;
        loop {
            let mut request = self.http.get(&url).query(query);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            let outcome = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return read_body(response).await;
                    }
                    if status.is_client_error() {
                        let message = response.text().await.unwrap_or_default();
                        return Err(RemoteError::Client {
                            status: status.as_u16(),
                            message,
                        });
                    }
                    Err(RemoteError::Server {
                        status: status.as_u16(),
                    })
                }
                Err(err) if err.is_timeout() => Err(RemoteError::Timeout),
                Err(err) => Err(RemoteError::Network(err.to_string())),
            };

            match outcome {
                Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                    let delay = BACKOFF_BASE * 2u32.saturating_pow(attempt);
                    warn!(
                        target: "ckb.remote",
                        server = %self.name,
                        attempt,
                        error = %err,
                        "retrying after backoff"
                    );
                    tokio::time::sleep(delay.min(self.timeout)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
                Ok(value) => return Ok(value),
            }
        }
    }

    /// `GET /api/repos` — repositories on the peer.
    pub async fn list_repos(&self) -> Result<Vec<RemoteRepo>, RemoteError> {
        let value = self.get_json("/api/repos", &[]).await?;
        decode_list(&value, "repos")
    }

    /// `GET /api/repos/{uid}` — one repository's metadata.
    pub async fn repo_meta(&self, uid: &str) -> Result<serde_json::Value, RemoteError> {
        self.get_json(&format!("/api/repos/{uid}"), &[]).await
    }

    /// `GET /api/repos/{uid}/symbols/search` — symbol search.
    pub async fn search_symbols(
        &self,
        repo: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RemoteSymbol>, RemoteError> {
        let value = self
            .get_json(
                &format!("/api/repos/{repo}/symbols/search"),
                &[("q", query.to_string()), ("limit", limit.to_string())],
            )
            .await?;
        decode_list(&value, "symbols")
    }

    /// `GET /api/repos/{uid}/files/search` — file search.
    pub async fn search_files(
        &self,
        repo: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<String>, RemoteError> {
        let value = self
            .get_json(
                &format!("/api/repos/{repo}/files/search"),
                &[("q", query.to_string()), ("limit", limit.to_string())],
            )
            .await?;
        decode_list(&value, "files")
    }

    /// `GET /api/repos/{uid}/symbols/{id}` — one symbol, always fresh.
    pub async fn get_symbol(
        &self,
        repo: &str,
        stable_id: &str,
    ) -> Result<serde_json::Value, RemoteError> {
        self.get_json(&format!("/api/repos/{repo}/symbols/{stable_id}"), &[])
            .await
    }

    /// `GET /api/repos/{uid}/symbols/{id}/references` — always fresh.
    pub async fn find_references(
        &self,
        repo: &str,
        stable_id: &str,
        limit: usize,
    ) -> Result<serde_json::Value, RemoteError> {
        self.get_json(
            &format!("/api/repos/{repo}/symbols/{stable_id}/references"),
            &[("limit", limit.to_string())],
        )
        .await
    }

    /// `POST /api/repos/{uid}/symbols/batch` — batch get, always fresh.
    pub async fn batch_get(
        &self,
        repo: &str,
        stable_ids: &[String],
    ) -> Result<serde_json::Value, RemoteError> {
        let url = format!("{}/api/repos/{repo}/symbols/batch", self.base_url);
        let mut request = self.http.post(&url).json(&serde_json::json!({
            "ids": stable_ids,
        }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RemoteError::Timeout
                } else {
                    RemoteError::Network(e.to_string())
                }
            })?;
        let status = response.status();
        if status.is_client_error() {
            return Err(RemoteError::Client {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        if !status.is_success() {
            return Err(RemoteError::Server {
                status: status.as_u16(),
            });
        }
        read_body(response).await
    }
}

async fn read_body(response: reqwest::Response) -> Result<serde_json::Value, RemoteError> {
    if let Some(len) = response.content_length()
        && len as usize > MAX_BODY_BYTES
    {
        return Err(RemoteError::BodyTooLarge);
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| RemoteError::Network(e.to_string()))?;
    if bytes.len() > MAX_BODY_BYTES {
        return Err(RemoteError::BodyTooLarge);
    }
    debug!(target: "ckb.remote", bytes = bytes.len(), "response received");
    serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode(e.to_string()))
}

fn decode_list<T: serde::de::DeserializeOwned>(
    value: &serde_json::Value,
    field: &str,
) -> Result<Vec<T>, RemoteError> {
    let list = value
        .get(field)
        .cloned()
        .unwrap_or_else(|| serde_json::Value::Array(Vec::new()));
    serde_json::from_value(list).map_err(|e| RemoteError::Decode(e.to_string()))
}
