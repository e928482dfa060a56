//! Redis-backed [`CoordinationStore`]: locks, rate limiting, the active
//! snapshot cache, step counters, the pending queue, and per-request
//! metadata.
//!
//! Every operation here is advisory and best-effort except lock
//! acquisition, whose failure is fatal to admission. The rate limiter
//! deliberately diverges from a typical login-attempt rate limiter
//! that fails *closed* on a pipeline error (deny access): here a Redis
//! outage must not block booking admission, so
//! [`RedisCoordinationStore::check_and_increment_rate_limit`] fails
//! *open* instead (see DESIGN.md).

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use saga_core::coordination::{CoordinationError, CoordinationStore};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

const ACTIVE_SNAPSHOT_TTL_SECS: u64 = 60 * 60;
const STEP_COUNTER_TTL_SECS: i64 = 2 * 60 * 60;
const METADATA_TTL_SECS: i64 = 2 * 60 * 60;
const RATE_LIMIT_WINDOW_SECS: u64 = 60;
const RATE_LIMIT_KEY_TTL_SECS: i64 = 120;
const PENDING_QUEUE_KEY: &str = "pending";

fn lock_key(request_id: &str) -> String {
    format!("lock:{request_id}")
}

fn active_key(request_id: &str) -> String {
    format!("active:{request_id}")
}

fn steps_key(request_id: &str) -> String {
    format!("steps:{request_id}")
}

fn metadata_key(request_id: &str) -> String {
    format!("metadata:{request_id}")
}

fn rate_limit_key(user_id: &str) -> String {
    format!("ratelimit:{user_id}")
}

#[allow(clippy::cast_possible_truncation)] // timestamps fit in i64 until year 292 billion
fn now_unix_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as i64
}

/// Redis-backed coordination store.
///
/// Cloning shares the underlying [`ConnectionManager`] and its
/// connection pool.
#[derive(Clone)]
pub struct RedisCoordinationStore {
    conn_manager: ConnectionManager,
}

impl RedisCoordinationStore {
    /// Connect to Redis at `redis_url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// # Errors
    ///
    /// Returns [`CoordinationError::Unavailable`] if the client cannot be
    /// constructed or the initial connection fails.
    pub async fn new(redis_url: &str) -> Result<Self, CoordinationError> {
        let client = Client::open(redis_url)
            .map_err(|e| CoordinationError::Unavailable(format!("invalid redis url: {e}")))?;

        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| CoordinationError::Unavailable(format!("redis connect failed: {e}")))?;

        Ok(Self { conn_manager })
    }
}

impl CoordinationStore for RedisCoordinationStore {
    fn acquire_lock(
        &self,
        request_id: &str,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<bool, CoordinationError>> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = lock_key(&request_id);
            let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);

            let acquired: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(1_u8)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    tracing::error!(request_id = %request_id, error = %e, "lock acquire failed");
                    CoordinationError::Unavailable(e.to_string())
                })?;

            Ok(acquired.is_some())
        })
    }

    fn release_lock(&self, request_id: &str) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = lock_key(&request_id);
            if let Err(e) = conn.del::<_, ()>(&key).await {
                tracing::warn!(request_id = %request_id, error = %e, "lock release failed, will expire via TTL");
            }
        })
    }

    fn check_and_increment_rate_limit(
        &self,
        user_id: &str,
        max: u32,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = rate_limit_key(&user_id);
            let now_ms = now_unix_ms();
            let window_start = now_ms - (RATE_LIMIT_WINDOW_SECS as i64 * 1000);

            let result: redis::RedisResult<(u64,)> = redis::pipe()
                .atomic()
                .zrembyscore(&key, 0, window_start)
                .ignore()
                .zcard(&key)
                .zadd(&key, now_ms, now_ms)
                .ignore()
                .expire(&key, RATE_LIMIT_KEY_TTL_SECS)
                .ignore()
                .query_async(&mut conn)
                .await;

            match result {
                Ok((count_before_this_attempt,)) => {
                    let within_limit = count_before_this_attempt < u64::from(max);
                    if !within_limit {
                        metrics::counter!("saga_ratelimit_rejected_total").increment(1);
                        tracing::warn!(
                            user_id = %user_id,
                            count = count_before_this_attempt,
                            max,
                            "rate limit exceeded"
                        );
                    }
                    within_limit
                }
                Err(e) => {
                    tracing::error!(
                        user_id = %user_id,
                        error = %e,
                        "rate limit check failed, failing open"
                    );
                    true
                }
            }
        })
    }

    fn set_active_snapshot(
        &self,
        request_id: &str,
        snapshot_json: &str,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let request_id = request_id.to_string();
        let snapshot_json = snapshot_json.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = active_key(&request_id);
            let ttl_secs = u64::try_from(ttl.as_secs()).unwrap_or(ACTIVE_SNAPSHOT_TTL_SECS);
            if let Err(e) = conn.set_ex::<_, _, ()>(&key, snapshot_json, ttl_secs).await {
                tracing::warn!(request_id = %request_id, error = %e, "set_active_snapshot failed");
            }
        })
    }

    fn get_active_snapshot(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = active_key(&request_id);
            match conn.get::<_, Option<String>>(&key).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!(request_id = %request_id, error = %e, "get_active_snapshot failed");
                    None
                }
            }
        })
    }

    fn clear_active_snapshot(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = active_key(&request_id);
            if let Err(e) = conn.del::<_, ()>(&key).await {
                tracing::warn!(request_id = %request_id, error = %e, "clear_active_snapshot failed");
            }
        })
    }

    fn increment_step_counter(
        &self,
        request_id: &str,
        marker: &str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let request_id = request_id.to_string();
        let marker = marker.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = steps_key(&request_id);
            let result: redis::RedisResult<()> = redis::pipe()
                .atomic()
                .hincr(&key, &marker, 1)
                .ignore()
                .expire(&key, STEP_COUNTER_TTL_SECS)
                .ignore()
                .query_async(&mut conn)
                .await;
            if let Err(e) = result {
                tracing::debug!(request_id = %request_id, marker = %marker, error = %e, "increment_step_counter failed (observational only)");
            }
        })
    }

    fn enqueue_pending(
        &self,
        request_id: &str,
        admitted_at_unix_ms: i64,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            if let Err(e) = conn
                .zadd::<_, _, _, ()>(PENDING_QUEUE_KEY, &request_id, admitted_at_unix_ms)
                .await
            {
                tracing::warn!(request_id = %request_id, error = %e, "enqueue_pending failed");
            }
        })
    }

    fn dequeue_pending(&self, request_id: &str) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            if let Err(e) = conn
                .zrem::<_, _, ()>(PENDING_QUEUE_KEY, &request_id)
                .await
            {
                tracing::warn!(request_id = %request_id, error = %e, "dequeue_pending failed");
            }
        })
    }

    fn list_pending_older_than(
        &self,
        older_than_unix_ms: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, CoordinationError>> + Send + '_>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            conn.zrangebyscore::<_, _, _, Vec<String>>(
                PENDING_QUEUE_KEY,
                0,
                older_than_unix_ms - 1,
            )
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "list_pending_older_than failed, sweeper will skip this tick");
                CoordinationError::Unavailable(e.to_string())
            })
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
            let mut conn = self.conn_manager.clone();
            let key = metadata_key(&request_id);
            let result: redis::RedisResult<()> = redis::pipe()
                .atomic()
                .hset(&key, &field, &value)
                .ignore()
                .expire(&key, METADATA_TTL_SECS)
                .ignore()
                .query_async(&mut conn)
                .await;
            if let Err(e) = result {
                tracing::warn!(request_id = %request_id, field = %field, error = %e, "set_metadata failed");
            }
        })
    }

    fn cleanup(&self, request_id: &str) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let result: redis::RedisResult<()> = redis::pipe()
                .atomic()
                .del(lock_key(&request_id))
                .ignore()
                .del(active_key(&request_id))
                .ignore()
                .del(steps_key(&request_id))
                .ignore()
                .del(metadata_key(&request_id))
                .ignore()
                .zrem(PENDING_QUEUE_KEY, &request_id)
                .ignore()
                .query_async(&mut conn)
                .await;
            if let Err(e) = result {
                tracing::warn!(request_id = %request_id, error = %e, "cleanup failed");
            }
        })
    }
}
