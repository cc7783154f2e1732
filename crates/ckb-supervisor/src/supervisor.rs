// SPDX-License-Identifier: MIT OR Apache-2.0
//! The supervisor: one owner for every language-server subprocess.
//!
//! Processes live in a map keyed by language, each with its own state
//! machine and bounded queue; nothing shares mutable state across
//! processes. The map mutates under a single lock; per-process I/O runs
//! under a per-process async mutex.

use crate::config::{LanguageServerSpec, SupervisorConfig};
use crate::process::ServerProcess;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// States and errors
// ---------------------------------------------------------------------------

/// Lifecycle state of one supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// The executable is being spawned.
    Starting,
    /// Spawned; the initialize exchange is in flight.
    Initializing,
    /// Serving requests.
    Ready,
    /// Serving, but at least one recent request failed.
    Unhealthy,
    /// Not serving; a backoff restart is scheduled.
    Dead,
}

/// Errors surfaced to callers of [`Supervisor::request`].
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// No server specification is registered for the language.
    #[error("no language server registered for '{0}'")]
    UnknownLanguage(String),
    /// The process exists but is not ready; a start was triggered.
    #[error("language server for '{language}' is not ready")]
    WorkspaceNotReady {
        /// The language whose server is unavailable.
        language: String,
    },
    /// The per-language queue stayed full past the allowed wait.
    #[error("request queue for '{language}' is full")]
    RateLimited {
        /// The language whose queue is saturated.
        language: String,
    },
    /// The request itself failed at the process boundary.
    #[error("request to '{language}' failed: {message}")]
    RequestFailed {
        /// The language that failed.
        language: String,
        /// Failure detail.
        message: String,
    },
    /// The per-request timeout elapsed.
    #[error("request to '{language}' timed out")]
    Timeout {
        /// The language that timed out.
        language: String,
    },
    /// The supervisor is shutting down.
    #[error("supervisor is shutting down")]
    ShuttingDown,
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SlotMeta {
    consecutive_failures: u32,
    last_success: Option<Instant>,
    restarts: u32,
    pid: Option<u32>,
}

#[derive(Debug)]
struct Slot {
    language: String,
    spec: LanguageServerSpec,
    state: Mutex<ProcessState>,
    meta: Mutex<SlotMeta>,
    io: AsyncMutex<Option<ServerProcess>>,
    queue: Arc<Semaphore>,
}

impl Slot {
    fn state(&self) -> ProcessState {
        *self.state.lock().expect("slot state lock poisoned")
    }

    fn set_state(&self, state: ProcessState) {
        *self.state.lock().expect("slot state lock poisoned") = state;
    }
}

/// Point-in-time view of one supervised process, for the status surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStats {
    /// Language key.
    pub language: String,
    /// Lifecycle state.
    pub state: ProcessState,
    /// Free request-queue slots.
    pub queue_available: usize,
    /// Consecutive failures since the last success.
    pub consecutive_failures: u32,
    /// Milliseconds since the last successful response, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_age_ms: Option<u64>,
    /// Restart count.
    pub restarts: u32,
    /// OS process ID, while alive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Inner {
    config: SupervisorConfig,
    specs: Mutex<BTreeMap<String, LanguageServerSpec>>,
    slots: Mutex<BTreeMap<String, Arc<Slot>>>,
    shutting_down: AtomicBool,
}

/// Supervises every language-server subprocess behind a hard cap.
#[derive(Debug, Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Create a supervisor with the given tuning.
    #[must_use]
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                specs: Mutex::new(BTreeMap::new()),
                slots: Mutex::new(BTreeMap::new()),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Register the server specification for a language.
    pub fn register(&self, spec: LanguageServerSpec) {
        let mut specs = self.inner.specs.lock().expect("specs lock poisoned");
        specs.insert(spec.language.clone(), spec);
    }

    /// Languages with a registered specification.
    #[must_use]
    pub fn registered_languages(&self) -> Vec<String> {
        let specs = self.inner.specs.lock().expect("specs lock poisoned");
        specs.keys().cloned().collect()
    }

    /// Pre-start the server for a language without sending a request.
    ///
    /// Returns `false` when the language is unknown or the supervisor is
    /// shutting down; idempotent otherwise.
    pub fn warmup(&self, language: &str) -> bool {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return false;
        }
        self.ensure_slot(language).is_some()
    }

    /// Send one request to the language's server.
    ///
    /// # Errors
    ///
    /// - [`SupervisorError::WorkspaceNotReady`] when the process is not in a
    ///   serving state — a start or restart is triggered as a side effect.
    /// - [`SupervisorError::RateLimited`] when the queue stays full past the
    ///   configured wait.
    /// - [`SupervisorError::Timeout`] / [`SupervisorError::RequestFailed`]
    ///   on per-request failures; both count toward the failure threshold.
    pub async fn request(
        &self,
        language: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, SupervisorError> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(SupervisorError::ShuttingDown);
        }
        if !self
            .inner
            .specs
            .lock()
            .expect("specs lock poisoned")
            .contains_key(language)
        {
            return Err(SupervisorError::UnknownLanguage(language.to_string()));
        }

        let slot = self
            .ensure_slot(language)
            .ok_or(SupervisorError::ShuttingDown)?;

        match slot.state() {
            ProcessState::Ready | ProcessState::Unhealthy => {}
            ProcessState::Starting | ProcessState::Initializing | ProcessState::Dead => {
                return Err(SupervisorError::WorkspaceNotReady {
                    language: language.to_string(),
                });
            }
        }

        // Queue admission: try immediately, then wait up to the limit.
        let permit = match slot.queue.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => match timeout(
                self.inner.config.max_queue_wait,
                slot.queue.clone().acquire_owned(),
            )
            .await
            {
                Ok(Ok(p)) => p,
                _ => {
                    return Err(SupervisorError::RateLimited {
                        language: language.to_string(),
                    });
                }
            },
        };

        let mut io = slot.io.lock().await;
        let Some(process) = io.as_mut() else {
            drop(io);
            drop(permit);
            return Err(SupervisorError::WorkspaceNotReady {
                language: language.to_string(),
            });
        };

        let outcome = timeout(self.inner.config.request_timeout, process.roundtrip(payload)).await;
        drop(io);
        drop(permit);

        match outcome {
            Ok(Ok(response)) => {
                self.on_success(&slot);
                Ok(response)
            }
            Ok(Err(err)) => {
                self.on_failure(&slot).await;
                Err(SupervisorError::RequestFailed {
                    language: language.to_string(),
                    message: err.to_string(),
                })
            }
            Err(_) => {
                self.on_failure(&slot).await;
                Err(SupervisorError::Timeout {
                    language: language.to_string(),
                })
            }
        }
    }

    /// Point-in-time view of every supervised process.
    #[must_use]
    pub fn stats(&self) -> Vec<ProcessStats> {
        let slots = self.inner.slots.lock().expect("slots lock poisoned");
        slots
            .values()
            .map(|slot| {
                let meta = slot.meta.lock().expect("slot meta lock poisoned");
                ProcessStats {
                    language: slot.language.clone(),
                    state: slot.state(),
                    queue_available: slot.queue.available_permits(),
                    consecutive_failures: meta.consecutive_failures,
                    last_success_age_ms: meta
                        .last_success
                        .map(|t| t.elapsed().as_millis() as u64),
                    restarts: meta.restarts,
                    pid: meta.pid,
                }
            })
            .collect()
    }

    /// Stop every subprocess and refuse further work. Orphan processes are
    /// reaped before this returns.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        let slots: Vec<Arc<Slot>> = {
            let mut map = self.inner.slots.lock().expect("slots lock poisoned");
            std::mem::take(&mut *map).into_values().collect()
        };
        for slot in slots {
            let mut io = slot.io.lock().await;
            if let Some(mut process) = io.take() {
                process.kill().await;
            }
            slot.set_state(ProcessState::Dead);
        }
        info!(target: "ckb.supervisor", "supervisor shut down");
    }

    // -- internal ----------------------------------------------------------

    /// Get or create the slot for a language, spawning its init task.
    /// Returns `None` when shutting down or the language has no spec.
    fn ensure_slot(&self, language: &str) -> Option<Arc<Slot>> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return None;
        }
        {
            let slots = self.inner.slots.lock().expect("slots lock poisoned");
            if let Some(slot) = slots.get(language) {
                return Some(slot.clone());
            }
        }
        let spec = {
            let specs = self.inner.specs.lock().expect("specs lock poisoned");
            specs.get(language)?.clone()
        };

        let slot = {
            let mut slots = self.inner.slots.lock().expect("slots lock poisoned");
            // Lost the race?
            if let Some(existing) = slots.get(language) {
                return Some(existing.clone());
            }
            if slots.len() >= self.inner.config.max_processes {
                Self::evict_lru(&mut slots);
            }
            let slot = Arc::new(Slot {
                language: language.to_string(),
                spec,
                state: Mutex::new(ProcessState::Starting),
                meta: Mutex::new(SlotMeta::default()),
                io: AsyncMutex::new(None),
                queue: Arc::new(Semaphore::new(self.inner.config.queue_depth)),
            });
            slots.insert(language.to_string(), slot.clone());
            slot
        };

        let this = self.clone();
        let init_slot = slot.clone();
        tokio::spawn(async move {
            this.init_slot(init_slot).await;
        });
        Some(slot)
    }

    /// Evict the least-recently-successful slot to make room.
    fn evict_lru(slots: &mut BTreeMap<String, Arc<Slot>>) {
        let victim = slots
            .values()
            .min_by_key(|slot| {
                slot.meta
                    .lock()
                    .expect("slot meta lock poisoned")
                    .last_success
            })
            .map(|slot| slot.language.clone());
        if let Some(language) = victim {
            if let Some(slot) = slots.remove(&language) {
                warn!(target: "ckb.supervisor", language = %language, "evicting LRU server");
                tokio::spawn(async move {
                    let mut io = slot.io.lock().await;
                    if let Some(mut process) = io.take() {
                        process.kill().await;
                    }
                    slot.set_state(ProcessState::Dead);
                });
            }
        }
    }

    /// Spawn the process and run the initialize exchange.
    async fn init_slot(&self, slot: Arc<Slot>) {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        slot.set_state(ProcessState::Starting);
        let mut process = match ServerProcess::spawn(&slot.spec) {
            Ok(p) => p,
            Err(err) => {
                warn!(
                    target: "ckb.supervisor",
                    language = %slot.language,
                    error = %err,
                    "spawn failed"
                );
                slot.set_state(ProcessState::Dead);
                self.schedule_restart(slot);
                return;
            }
        };

        {
            let mut meta = slot.meta.lock().expect("slot meta lock poisoned");
            meta.pid = process.pid();
        }

        slot.set_state(ProcessState::Initializing);
        let init = serde_json::json!({"method": "initialize"});
        match timeout(self.inner.config.init_timeout, process.roundtrip(&init)).await {
            Ok(Ok(_)) => {
                let mut io = slot.io.lock().await;
                *io = Some(process);
                slot.set_state(ProcessState::Ready);
                debug!(target: "ckb.supervisor", language = %slot.language, "server ready");
            }
            Ok(Err(err)) => {
                warn!(
                    target: "ckb.supervisor",
                    language = %slot.language,
                    error = %err,
                    "initialize failed"
                );
                process.kill().await;
                slot.set_state(ProcessState::Dead);
                self.schedule_restart(slot);
            }
            Err(_) => {
                warn!(
                    target: "ckb.supervisor",
                    language = %slot.language,
                    "initialize timed out"
                );
                process.kill().await;
                slot.set_state(ProcessState::Dead);
                self.schedule_restart(slot);
            }
        }
    }

    fn on_success(&self, slot: &Arc<Slot>) {
        let mut meta = slot.meta.lock().expect("slot meta lock poisoned");
        meta.consecutive_failures = 0;
        meta.last_success = Some(Instant::now());
        drop(meta);
        slot.set_state(ProcessState::Ready);
    }

    async fn on_failure(&self, slot: &Arc<Slot>) {
        let failures = {
            let mut meta = slot.meta.lock().expect("slot meta lock poisoned");
            meta.consecutive_failures += 1;
            meta.consecutive_failures
        };
        if failures >= self.inner.config.failure_threshold {
            warn!(
                target: "ckb.supervisor",
                language = %slot.language,
                failures,
                "failure threshold reached; marking dead"
            );
            slot.set_state(ProcessState::Dead);
            let mut io = slot.io.lock().await;
            if let Some(mut process) = io.take() {
                process.kill().await;
            }
            drop(io);
            self.schedule_restart(slot.clone());
        } else {
            slot.set_state(ProcessState::Unhealthy);
        }
    }

    /// Schedule an exponential-backoff restart for a dead slot.
    fn schedule_restart(&self, slot: Arc<Slot>) {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        let restarts = {
            let mut meta = slot.meta.lock().expect("slot meta lock poisoned");
            let r = meta.restarts;
            meta.restarts += 1;
            r
        };
        let delay = self.inner.config.backoff_delay(restarts);
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if this.inner.shutting_down.load(Ordering::SeqCst) {
                return;
            }
            // The slot may have been evicted while sleeping.
            let still_tracked = {
                let slots = this.inner.slots.lock().expect("slots lock poisoned");
                slots
                    .get(&slot.language)
                    .is_some_and(|s| Arc::ptr_eq(s, &slot))
            };
            if still_tracked {
                debug!(
                    target: "ckb.supervisor",
                    language = %slot.language,
                    restarts = restarts + 1,
                    "restarting server"
                );
                this.init_slot(slot).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn echo_spec(language: &str) -> LanguageServerSpec {
        LanguageServerSpec {
            language: language.into(),
            command: "sh".into(),
            args: vec![
                "-c".into(),
                "while IFS= read -r line; do printf '%s\\n' \"$line\"; done".into(),
            ],
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    /// Answers the initialize line, then exits, so every later request
    /// fails with EOF.
    fn flaky_spec(language: &str) -> LanguageServerSpec {
        LanguageServerSpec {
            language: language.into(),
            command: "sh".into(),
            args: vec!["-c".into(), "read line; printf '{}\\n'; exit 0".into()],
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    /// Answers initialize, then sleeps before answering each request.
    fn slow_spec(language: &str) -> LanguageServerSpec {
        LanguageServerSpec {
            language: language.into(),
            command: "sh".into(),
            args: vec![
                "-c".into(),
                "read line; printf '{}\\n'; while IFS= read -r line; do sleep 2; printf '%s\\n' \"$line\"; done"
                    .into(),
            ],
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    fn test_config() -> SupervisorConfig {
        SupervisorConfig {
            max_queue_wait: Duration::from_millis(50),
            request_timeout: Duration::from_secs(5),
            init_timeout: Duration::from_secs(5),
            backoff_base: Duration::from_millis(20),
            backoff_cap: Duration::from_millis(100),
            ..Default::default()
        }
    }

    async fn wait_ready(sup: &Supervisor, language: &str) {
        for _ in 0..200 {
            if sup
                .stats()
                .iter()
                .any(|s| s.language == language && s.state == ProcessState::Ready)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server for '{language}' never became ready");
    }

    #[tokio::test]
    async fn unknown_language_is_an_error() {
        let sup = Supervisor::new(test_config());
        let err = sup
            .request("cobol", &serde_json::json!({"method": "ping"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::UnknownLanguage(_)));
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn first_request_fails_not_ready_then_recovers() {
        let sup = Supervisor::new(test_config());
        sup.register(echo_spec("rust"));

        let err = sup
            .request("rust", &serde_json::json!({"method": "ping"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::WorkspaceNotReady { .. }));

        wait_ready(&sup, "rust").await;
        let resp = sup
            .request("rust", &serde_json::json!({"method": "ping", "seq": 1}))
            .await
            .unwrap();
        assert_eq!(resp["method"], "ping");
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn warmup_pre_starts_the_server() {
        let sup = Supervisor::new(test_config());
        sup.register(echo_spec("go"));
        assert!(sup.warmup("go"));
        assert!(!sup.warmup("not-registered"));
        wait_ready(&sup, "go").await;
        assert!(sup.request("go", &serde_json::json!({"q": 1})).await.is_ok());
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn three_failures_mark_dead_and_restart() {
        let sup = Supervisor::new(test_config());
        sup.register(flaky_spec("ts"));
        sup.warmup("ts");
        wait_ready(&sup, "ts").await;

        for _ in 0..3 {
            let _ = sup.request("ts", &serde_json::json!({"q": 1})).await;
        }
        let stats = sup.stats();
        let ts = stats.iter().find(|s| s.language == "ts").unwrap();
        assert_eq!(ts.state, ProcessState::Dead);

        // Backoff is tiny in the test config; the restart brings it back.
        wait_ready(&sup, "ts").await;
        let stats = sup.stats();
        let ts = stats.iter().find(|s| s.language == "ts").unwrap();
        assert!(ts.restarts >= 1);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn success_resets_failure_counter() {
        let sup = Supervisor::new(test_config());
        sup.register(echo_spec("rust"));
        sup.warmup("rust");
        wait_ready(&sup, "rust").await;
        sup.request("rust", &serde_json::json!({"a": 1})).await.unwrap();
        let stats = sup.stats();
        assert_eq!(stats[0].consecutive_failures, 0);
        assert!(stats[0].last_success_age_ms.is_some());
    }

    #[tokio::test]
    async fn saturated_queue_rate_limits() {
        let config = SupervisorConfig {
            queue_depth: 1,
            max_queue_wait: Duration::from_millis(30),
            ..test_config()
        };
        let sup = Supervisor::new(config);
        sup.register(slow_spec("java"));
        sup.warmup("java");
        wait_ready(&sup, "java").await;

        let sup2 = sup.clone();
        let slow = tokio::spawn(async move {
            sup2.request("java", &serde_json::json!({"q": "slow"})).await
        });
        // Give the first request time to occupy the queue slot.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let err = sup
            .request("java", &serde_json::json!({"q": "fast"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::RateLimited { .. }));

        let _ = slow.await;
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn cap_evicts_least_recently_successful() {
        let config = SupervisorConfig {
            max_processes: 1,
            ..test_config()
        };
        let sup = Supervisor::new(config);
        sup.register(echo_spec("a"));
        sup.register(echo_spec("b"));

        sup.warmup("a");
        wait_ready(&sup, "a").await;
        sup.request("a", &serde_json::json!({"q": 1})).await.unwrap();

        sup.warmup("b");
        wait_ready(&sup, "b").await;

        let stats = sup.stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].language, "b");
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_refuses_further_work() {
        let sup = Supervisor::new(test_config());
        sup.register(echo_spec("rust"));
        sup.warmup("rust");
        wait_ready(&sup, "rust").await;
        sup.shutdown().await;
        let err = sup
            .request("rust", &serde_json::json!({"q": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::ShuttingDown));
        assert!(sup.stats().is_empty());
    }
}
