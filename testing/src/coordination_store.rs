//! In-memory coordination store standing in for Redis in tests.
//!
//! Unlike the real Redis-backed implementation, this fake never fails:
//! `acquire_lock` always succeeds and `check_and_increment_rate_limit`
//! never needs its fail-open fallback. Tests that need to exercise the
//! fatal-lock-failure or fail-open-rate-limit paths should wrap this
//! type or construct a purpose-built failing double instead.

use saga_core::coordination::{CoordinationError, CoordinationStore};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct Inner {
    locks: HashSet<String>,
    rate_limit_counts: HashMap<String, u32>,
    active_snapshots: HashMap<String, String>,
    pending_queue: HashMap<String, i64>,
    metadata: HashMap<String, HashMap<String, String>>,
}

/// `HashMap`-backed [`CoordinationStore`] for tests.
#[derive(Default)]
pub struct InMemoryCoordinationStore {
    inner: Mutex<Inner>,
}

impl InMemoryCoordinationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CoordinationStore for InMemoryCoordinationStore {
    fn acquire_lock(
        &self,
        request_id: &str,
        _ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<bool, CoordinationError>> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            Ok(inner.locks.insert(request_id))
        })
    }

    fn release_lock(&self, request_id: &str) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.locks.remove(&request_id);
        })
    }

    fn check_and_increment_rate_limit(
        &self,
        user_id: &str,
        max: u32,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let count = inner.rate_limit_counts.entry(user_id).or_insert(0);
            *count += 1;
            *count <= max
        })
    }

    fn set_active_snapshot(
        &self,
        request_id: &str,
        snapshot_json: &str,
        _ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let request_id = request_id.to_string();
        let snapshot_json = snapshot_json.to_string();
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.active_snapshots.insert(request_id, snapshot_json);
        })
    }

    fn get_active_snapshot(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.active_snapshots.get(&request_id).cloned()
        })
    }

    fn clear_active_snapshot(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.active_snapshots.remove(&request_id);
        })
    }

    fn increment_step_counter(
        &self,
        _request_id: &str,
        _marker: &str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {})
    }

    fn enqueue_pending(
        &self,
        request_id: &str,
        admitted_at_unix_ms: i64,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.pending_queue.insert(request_id, admitted_at_unix_ms);
        })
    }

    fn dequeue_pending(&self, request_id: &str) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.pending_queue.remove(&request_id);
        })
    }

    fn list_pending_older_than(
        &self,
        older_than_unix_ms: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, CoordinationError>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            Ok(inner
                .pending_queue
                .iter()
                .filter(|(_, admitted_at)| **admitted_at < older_than_unix_ms)
                .map(|(request_id, _)| request_id.clone())
                .collect())
        })
    }

    fn set_metadata(
        &self,
        request_id: &str,
        field: &str,
        value: &str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let request_id = request_id.to_string();
        let field = field.to_string();
        let value = value.to_string();
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner
                .metadata
                .entry(request_id)
                .or_default()
                .insert(field, value);
        })
    }

    fn cleanup(&self, request_id: &str) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.locks.remove(&request_id);
            inner.active_snapshots.remove(&request_id);
            inner.pending_queue.remove(&request_id);
            inner.metadata.remove(&request_id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let store = InMemoryCoordinationStore::new();
        assert!(store.acquire_lock("req-1", Duration::from_secs(5)).await.unwrap());
        assert!(!store.acquire_lock("req-1", Duration::from_secs(5)).await.unwrap());
        store.release_lock("req-1").await;
        assert!(store.acquire_lock("req-1", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn rate_limit_allows_up_to_max() {
        let store = InMemoryCoordinationStore::new();
        assert!(store.check_and_increment_rate_limit("user-1", 2).await);
        assert!(store.check_and_increment_rate_limit("user-1", 2).await);
        assert!(!store.check_and_increment_rate_limit("user-1", 2).await);
    }
}
