//! Coordination store abstraction: short-lived, advisory, best-effort
//! state — locks, the active-snapshot cache, step counters, the pending
//! queue, and per-user rate-limit buckets.
//!
//! Every operation here is advisory. A coordination-store outage must
//! never halt confirmations or forbid aggregation; only the lock-acquire
//! and rate-limit steps of admission treat its failures as meaningful
//! (lock failure is fatal to admission, rate limiting fails *open*). The
//! Redis backing implementation uses a `redis::pipe().atomic()`
//! sliding-window for rate limiting and `set_ex` + secondary-index
//! patterns elsewhere, with the default on transport failure set to
//! "allow" for the rate limiter rather than "deny" — booking admission
//! availability outweighs a narrow abuse window here (see DESIGN.md).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a coordination store operation. Callers decide
/// per-operation whether an error is fatal (lock acquire) or swallowed
/// (everything else).
#[derive(Error, Debug, Clone)]
pub enum CoordinationError {
    /// The underlying transport (Redis) is unreachable or returned an
    /// error.
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),
}

/// Coordination store: advisory, best-effort state backing admission
/// dedup, mutual exclusion, rate limiting, and sweeper bookkeeping.
pub trait CoordinationStore: Send + Sync {
    /// Attempt to acquire `lock:{request_id}` with the given TTL.
    ///
    /// Returns `Ok(true)` if acquired, `Ok(false)` if already held.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinationError::Unavailable`] if the store is
    /// unreachable — admission treats this as lock-acquire failure
    /// (fatal, saga -> Failed).
    fn acquire_lock(
        &self,
        request_id: &str,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<bool, CoordinationError>> + Send + '_>>;

    /// Release `lock:{request_id}`. Best-effort: failures are logged, not
    /// propagated, since the lock will expire via TTL regardless.
    fn release_lock(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Atomically increment `ratelimit:{user_id}`'s 60s sliding window and
    /// report whether the post-increment count is within `max`.
    ///
    /// **Fails open**: if the store is unreachable, returns `Ok(true)`
    /// (allow) rather than propagating an error, per spec §4.2/§7.
    fn check_and_increment_rate_limit(
        &self,
        user_id: &str,
        max: u32,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;

    /// Cache a serialised "active" snapshot for `request_id` with the
    /// given TTL. Best-effort; a failure here must not block admission.
    fn set_active_snapshot(
        &self,
        request_id: &str,
        snapshot_json: &str,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Read back the cached active snapshot, if any and not expired.
    /// Advisory only — callers must never branch correctness on its
    /// contents beyond "a duplicate admission is already in progress".
    fn get_active_snapshot(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>>;

    /// Clear the active snapshot for `request_id`. Best-effort.
    fn clear_active_snapshot(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Increment the observational step counter for `request_id`/`marker`.
    /// Purely diagnostic; never consulted for join-point correctness.
    fn increment_step_counter(
        &self,
        request_id: &str,
        marker: &str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Add `request_id` to the pending queue with the given admission
    /// timestamp (used as the sorted-set score).
    fn enqueue_pending(
        &self,
        request_id: &str,
        admitted_at_unix_ms: i64,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Remove `request_id` from the pending queue.
    fn dequeue_pending(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// List pending-queue entries admitted before the given unix-ms
    /// timestamp, for the stuck-saga sweeper.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinationError::Unavailable`] if the store is
    /// unreachable — the sweeper simply skips this tick.
    fn list_pending_older_than(
        &self,
        older_than_unix_ms: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, CoordinationError>> + Send + '_>>;

    /// Record a free-form diagnostic field (e.g. last error, failed-at
    /// timestamp) in `metadata:{request_id}`. Best-effort.
    fn set_metadata(
        &self,
        request_id: &str,
        field: &str,
        value: &str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Best-effort cleanup of every coordination key family for
    /// `request_id` (lock, active snapshot, step counters, metadata,
    /// pending-queue entry) in one batch, called once a saga reaches a
    /// terminal state.
    fn cleanup(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}
