// SPDX-License-Identifier: MIT OR Apache-2.0
//! The job engine: one worker, a bounded queue, and a recovery loop.
//!
//! `submit` persists first, then offers the ID to the in-memory channel
//! with a short grace; a full channel is not an error because the
//! recovery loop re-enqueues persisted `queued` rows on an interval.
//! Handlers never panic the runner: errors persist as `failed`, observed
//! cancellation persists as `cancelled`.

use crate::cancel::CancelToken;
use crate::store::{JobStore, JobStoreError};
use crate::types::{Job, JobStatus};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Context handed to a running handler.
pub struct JobContext {
    /// The job row as claimed.
    pub job: Job,
    /// Cancelled on user cancel or engine shutdown.
    pub cancel: CancelToken,
    store: Arc<JobStore>,
}

impl JobContext {
    /// Best-effort progress write-through; storage failures are swallowed.
    pub fn report_progress(&self, progress: u8) {
        if let Err(err) = self.store.set_progress(&self.job.id, progress) {
            warn!(target: "ckb.jobs", job = %self.job.id, error = %err, "progress write failed");
        }
    }
}

/// A registered handler: receives the context, returns the result payload.
pub type JobHandler =
    Arc<dyn Fn(JobContext) -> BoxFuture<'static, anyhow::Result<serde_json::Value>> + Send + Sync>;

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEngineConfig {
    /// In-memory queue capacity.
    pub channel_capacity: usize,
    /// How long `submit` waits for a queue slot before relying on recovery.
    #[serde(with = "duration_millis")]
    pub enqueue_grace: Duration,
    /// Interval between recovery scans for persisted `queued` rows.
    #[serde(with = "duration_millis")]
    pub recovery_interval: Duration,
    /// Grace for the worker to drain on shutdown.
    #[serde(with = "duration_millis")]
    pub shutdown_grace: Duration,
}

impl Default for JobEngineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            enqueue_grace: Duration::from_millis(100),
            recovery_interval: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

mod duration_millis {
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

/// Errors from submitting or cancelling.
#[derive(Debug, thiserror::Error)]
pub enum JobEngineError {
    /// No handler is registered for the job type.
    #[error("no handler registered for job type '{0}'")]
    UnknownType(String),
    /// The store failed.
    #[error(transparent)]
    Store(#[from] JobStoreError),
    /// The engine has been shut down.
    #[error("job engine is shut down")]
    ShutDown,
}

struct EngineInner {
    store: Arc<JobStore>,
    handlers: Mutex<BTreeMap<String, JobHandler>>,
    running: Mutex<HashMap<String, CancelToken>>,
    queue_tx: mpsc::Sender<String>,
    shutdown_tx: watch::Sender<bool>,
}

/// The persistent queue with one default worker.
pub struct JobEngine {
    inner: Arc<EngineInner>,
    queue_rx: Mutex<Option<mpsc::Receiver<String>>>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
    recovery: Mutex<Option<tokio::task::JoinHandle<()>>>,
    config: JobEngineConfig,
}

impl JobEngine {
    /// Build the engine. Handlers register before [`start`](Self::start)
    /// spawns the loops, so recovered rows never race their handler.
    #[must_use]
    pub fn new(store: Arc<JobStore>, config: JobEngineConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.channel_capacity);
        let (shutdown_tx, _) = watch::channel(false);

        let inner = Arc::new(EngineInner {
            store,
            handlers: Mutex::new(BTreeMap::new()),
            running: Mutex::new(HashMap::new()),
            queue_tx,
            shutdown_tx,
        });

        Self {
            inner,
            queue_rx: Mutex::new(Some(queue_rx)),
            worker: Mutex::new(None),
            recovery: Mutex::new(None),
            config,
        }
    }

    /// Spawn the worker and recovery loops. Idempotent.
    pub fn start(&self) {
        let Some(queue_rx) = self.queue_rx.lock().expect("queue lock poisoned").take() else {
            return;
        };
        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        let worker = tokio::spawn(worker_loop(
            self.inner.clone(),
            queue_rx,
            shutdown_rx.clone(),
        ));
        let recovery = tokio::spawn(recovery_loop(
            self.inner.clone(),
            self.config.recovery_interval,
            shutdown_rx,
        ));
        *self.worker.lock().expect("worker lock poisoned") = Some(worker);
        *self.recovery.lock().expect("recovery lock poisoned") = Some(recovery);
    }

    /// Register the handler for a job type.
    pub fn register(&self, job_type: impl Into<String>, handler: JobHandler) {
        self.inner
            .handlers
            .lock()
            .expect("handlers lock poisoned")
            .insert(job_type.into(), handler);
    }

    /// Submit a job: persist the `queued` row, then offer it to the
    /// in-memory queue. A full queue within the grace window is fine — the
    /// recovery loop will pick the row up.
    pub async fn submit(
        &self,
        job_type: &str,
        scope: serde_json::Value,
    ) -> Result<String, JobEngineError> {
        if *self.inner.shutdown_tx.borrow() {
            return Err(JobEngineError::ShutDown);
        }
        if !self
            .inner
            .handlers
            .lock()
            .expect("handlers lock poisoned")
            .contains_key(job_type)
        {
            return Err(JobEngineError::UnknownType(job_type.to_string()));
        }

        let job = Job::new(job_type, scope);
        self.inner.store.insert(&job)?;

        match timeout(
            self.config.enqueue_grace,
            self.inner.queue_tx.send(job.id.clone()),
        )
        .await
        {
            Ok(Ok(())) => {}
            _ => {
                debug!(
                    target: "ckb.jobs",
                    job = %job.id,
                    "queue full; leaving persisted for recovery"
                );
            }
        }
        Ok(job.id)
    }

    /// Cancel a job. Queued rows flip straight to `cancelled`; running
    /// jobs get their context token signalled and the worker persists the
    /// terminal state when the handler observes it.
    pub fn cancel(&self, id: &str) -> Result<bool, JobEngineError> {
        if let Some(token) = self
            .inner
            .running
            .lock()
            .expect("running lock poisoned")
            .get(id)
        {
            token.cancel();
            return Ok(true);
        }
        Ok(self.inner.store.mark_cancelled(id)?)
    }

    /// Fetch a job's current state.
    pub fn get(&self, id: &str) -> Result<Option<Job>, JobEngineError> {
        Ok(self.inner.store.get(id)?)
    }

    /// List jobs in submission order.
    pub fn list(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, JobEngineError> {
        Ok(self.inner.store.list(status, limit)?)
    }

    /// Remove terminal rows older than the retention window.
    pub fn prune_terminal(
        &self,
        older_than: chrono::Duration,
    ) -> Result<usize, JobEngineError> {
        let cutoff = chrono::Utc::now() - older_than;
        Ok(self.inner.store.prune_terminal(cutoff)?)
    }

    /// Shut down: stop accepting work, cancel running contexts, and wait
    /// for the worker with bounded grace.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        {
            let running = self.inner.running.lock().expect("running lock poisoned");
            for token in running.values() {
                token.cancel();
            }
        }
        let worker = self.worker.lock().expect("worker lock poisoned").take();
        if let Some(handle) = worker
            && timeout(self.config.shutdown_grace, handle).await.is_err()
        {
            warn!(target: "ckb.jobs", "worker did not drain within the shutdown grace");
        }
        let recovery = self.recovery.lock().expect("recovery lock poisoned").take();
        if let Some(handle) = recovery {
            handle.abort();
            let _ = handle.await;
        }
        info!(target: "ckb.jobs", "job engine shut down");
    }
}

async fn worker_loop(
    inner: Arc<EngineInner>,
    mut queue_rx: mpsc::Receiver<String>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let job_id = tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
            received = queue_rx.recv() => match received {
                Some(id) => id,
                None => break,
            },
        };
        process_one(&inner, &job_id).await;
    }
    debug!(target: "ckb.jobs", "worker loop exited");
}

async fn process_one(inner: &Arc<EngineInner>, job_id: &str) {
    // The claim is the dedup point: recovery may enqueue an ID the channel
    // already carries, and cancelled rows refuse the claim.
    match inner.store.claim_running(job_id) {
        Ok(true) => {}
        Ok(false) => return,
        Err(err) => {
            warn!(target: "ckb.jobs", job = job_id, error = %err, "claim failed");
            return;
        }
    }

    let Ok(Some(job)) = inner.store.get(job_id) else {
        return;
    };
    let handler = inner
        .handlers
        .lock()
        .expect("handlers lock poisoned")
        .get(&job.job_type)
        .cloned();
    let Some(handler) = handler else {
        let _ = inner
            .store
            .mark_failed(job_id, &format!("no handler for '{}'", job.job_type));
        return;
    };

    let token = CancelToken::new();
    inner
        .running
        .lock()
        .expect("running lock poisoned")
        .insert(job_id.to_string(), token.clone());

    let context = JobContext {
        job,
        cancel: token.clone(),
        store: inner.store.clone(),
    };

    debug!(target: "ckb.jobs", job = job_id, "running");
    let outcome = handler(context).await;

    inner
        .running
        .lock()
        .expect("running lock poisoned")
        .remove(job_id);

    let result = match outcome {
        Ok(value) => inner.store.mark_completed(job_id, &value).map(|_| ()),
        Err(_) if token.is_cancelled() => inner.store.mark_cancelled(job_id).map(|_| ()),
        Err(err) => inner.store.mark_failed(job_id, &err.to_string()).map(|_| ()),
    };
    if let Err(err) = result {
        warn!(target: "ckb.jobs", job = job_id, error = %err, "terminal write failed");
    }
}

async fn recovery_loop(
    inner: Arc<EngineInner>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let queued = match inner.store.queued(256) {
                    Ok(jobs) => jobs,
                    Err(err) => {
                        warn!(target: "ckb.jobs", error = %err, "recovery scan failed");
                        continue;
                    }
                };
                let mut recovered = 0usize;
                for job in queued {
                    // Fill what the channel can take; the rest waits for
                    // the next scan.
                    if inner.queue_tx.try_send(job.id).is_err() {
                        break;
                    }
                    recovered += 1;
                }
                if recovered > 0 {
                    debug!(target: "ckb.jobs", recovered, "recovery re-enqueued jobs");
                }
            }
        }
    }
}
