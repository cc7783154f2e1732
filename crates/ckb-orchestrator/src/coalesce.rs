// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request coalescing.
//!
//! Identical concurrent queries share a single execution: the first caller
//! becomes the leader and computes; late joiners await the leader's result
//! through a short-lived in-flight map keyed by the cache key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Shared slot a leader publishes into and joiners await on.
#[derive(Debug, Default)]
pub struct Cell {
    notify: Notify,
    result: Mutex<Option<serde_json::Value>>,
}

/// Outcome of trying to join an in-flight execution.
pub enum Admission {
    /// This caller computes; it must call [`LeaderGuard::complete`].
    Leader(LeaderGuard),
    /// Another caller is computing the same key.
    Joiner(Arc<Cell>),
}

/// Held by the leader; completing or dropping it releases joiners.
pub struct LeaderGuard {
    key: String,
    map: Arc<Mutex<HashMap<String, Arc<Cell>>>>,
    cell: Arc<Cell>,
    completed: bool,
}

impl LeaderGuard {
    /// Publish the result and wake every joiner.
    pub fn complete(mut self, value: serde_json::Value) {
        *self.cell.result.lock().expect("inflight lock poisoned") = Some(value);
        self.completed = true;
        self.finish();
    }

    fn finish(&mut self) {
        self.map
            .lock()
            .expect("inflight lock poisoned")
            .remove(&self.key);
        self.cell.notify.notify_waiters();
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        if !self.completed {
            // The leader failed before publishing; wake joiners so they can
            // retry as leaders instead of hanging.
            self.finish();
        }
    }
}

/// The short-lived in-flight map.
#[derive(Debug, Default, Clone)]
pub struct InflightMap {
    inner: Arc<Mutex<HashMap<String, Arc<Cell>>>>,
}

impl InflightMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Join or lead the execution for `key`.
    pub fn admit(&self, key: &str) -> Admission {
        let mut map = self.inner.lock().expect("inflight lock poisoned");
        if let Some(cell) = map.get(key) {
            return Admission::Joiner(cell.clone());
        }
        let cell = Arc::new(Cell::default());
        map.insert(key.to_string(), cell.clone());
        Admission::Leader(LeaderGuard {
            key: key.to_string(),
            map: self.inner.clone(),
            cell,
            completed: false,
        })
    }

    /// Await the leader's result. Returns `None` when the leader failed
    /// without publishing (the caller should retry).
    pub async fn wait(cell: &Arc<Cell>) -> Option<serde_json::Value> {
        let notified = cell.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if let Some(value) = cell
            .result
            .lock()
            .expect("inflight lock poisoned")
            .clone()
        {
            return Some(value);
        }
        notified.await;
        cell.result.lock().expect("inflight lock poisoned").clone()
    }

    /// Number of executions currently in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("inflight lock poisoned").len()
    }

    /// Whether nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn leader_then_joiner_shares_result() {
        let map = InflightMap::new();
        let Admission::Leader(guard) = map.admit("k") else {
            panic!("first admit must lead");
        };
        let Admission::Joiner(cell) = map.admit("k") else {
            panic!("second admit must join");
        };

        let waiter = tokio::spawn(async move { InflightMap::wait(&cell).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        guard.complete(serde_json::json!({"answer": 42}));

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got["answer"], 42);
        assert!(map.is_empty(), "entry removed after completion");
    }

    #[tokio::test]
    async fn joiner_after_publish_still_sees_result() {
        let map = InflightMap::new();
        let Admission::Leader(guard) = map.admit("k") else {
            panic!("must lead");
        };
        let Admission::Joiner(cell) = map.admit("k") else {
            panic!("must join");
        };
        guard.complete(serde_json::json!(7));
        // Result was published before this joiner awaited.
        assert_eq!(InflightMap::wait(&cell).await, Some(serde_json::json!(7)));
    }

    #[tokio::test]
    async fn dropped_leader_releases_joiners_empty_handed() {
        let map = InflightMap::new();
        let Admission::Leader(guard) = map.admit("k") else {
            panic!("must lead");
        };
        let Admission::Joiner(cell) = map.admit("k") else {
            panic!("must join");
        };
        let waiter = tokio::spawn(async move { InflightMap::wait(&cell).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(guard);
        assert_eq!(waiter.await.unwrap(), None);
        // The key is free again; a retry leads.
        assert!(matches!(map.admit("k"), Admission::Leader(_)));
    }

    #[tokio::test]
    async fn distinct_keys_do_not_coalesce() {
        let map = InflightMap::new();
        let _a = map.admit("a");
        assert!(matches!(map.admit("b"), Admission::Leader(_)));
    }
}
