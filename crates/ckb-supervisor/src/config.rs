// SPDX-License-Identifier: MIT OR Apache-2.0
//! Supervisor configuration and language-server specifications.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Serde helper — `Duration` as integer milliseconds.
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(val: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        val.as_millis().serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let ms: u64 = u64::deserialize(de)?;
        Ok(Duration::from_millis(ms))
    }
}

/// How to launch the language server for one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageServerSpec {
    /// Language key (e.g. `"rust"`, `"go"`).
    pub language: String,
    /// Executable to spawn.
    pub command: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory, defaulting to the supervisor's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

/// Supervisor tuning. Defaults follow the pool contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Hard cap on concurrently running server processes.
    pub max_processes: usize,
    /// Per-language request queue depth.
    pub queue_depth: usize,
    /// Maximum wait for a queue slot before failing `RATE_LIMITED`.
    #[serde(with = "duration_millis")]
    pub max_queue_wait: Duration,
    /// Per-request I/O timeout.
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
    /// Timeout for the initialize exchange after spawn.
    #[serde(with = "duration_millis")]
    pub init_timeout: Duration,
    /// Base delay for restart backoff.
    #[serde(with = "duration_millis")]
    pub backoff_base: Duration,
    /// Cap for restart backoff.
    #[serde(with = "duration_millis")]
    pub backoff_cap: Duration,
    /// Consecutive failures before a process is marked dead.
    pub failure_threshold: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_processes: 4,
            queue_depth: 10,
            max_queue_wait: Duration::from_millis(200),
            request_timeout: Duration::from_secs(10),
            init_timeout: Duration::from_secs(10),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            failure_threshold: 3,
        }
    }
}

impl SupervisorConfig {
    /// Backoff delay before the `n`-th restart (zero-indexed), capped.
    #[must_use]
    pub fn backoff_delay(&self, restarts: u32) -> Duration {
        let exp = 2u64.saturating_pow(restarts.min(16));
        let ms = (self.backoff_base.as_millis() as u64).saturating_mul(exp);
        Duration::from_millis(ms.min(self.backoff_cap.as_millis() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_contract() {
        let c = SupervisorConfig::default();
        assert_eq!(c.max_processes, 4);
        assert_eq!(c.queue_depth, 10);
        assert_eq!(c.max_queue_wait, Duration::from_millis(200));
        assert_eq!(c.backoff_base, Duration::from_secs(1));
        assert_eq!(c.backoff_cap, Duration::from_secs(30));
        assert_eq!(c.failure_threshold, 3);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let c = SupervisorConfig::default();
        assert_eq!(c.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(c.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(c.backoff_delay(3), Duration::from_secs(8));
        assert_eq!(c.backoff_delay(10), Duration::from_secs(30));
        assert_eq!(c.backoff_delay(u32::MAX), Duration::from_secs(30));
    }
}
