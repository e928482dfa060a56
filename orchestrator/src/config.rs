//! Runtime configuration, sourced from the environment with the defaults
//! the external-interfaces table specifies.

/// Tunables for the saga orchestrator. Every field has a spec-mandated
/// default and can be overridden by the matching environment variable.
#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Max admissions per user per 60s sliding window. `RATE_LIMIT_PER_MIN`.
    pub rate_limit_per_min: u32,
    /// Admission lock TTL, seconds. `LOCK_TTL_SECONDS`.
    pub lock_ttl_seconds: u64,
    /// Active-snapshot cache TTL, seconds. `ACTIVE_STATE_TTL_SECONDS`.
    pub active_state_ttl_seconds: u64,
    /// Age, in milliseconds, past which a pending saga is considered
    /// stuck. `STUCK_SAGA_THRESHOLD_MS`.
    pub stuck_saga_threshold_ms: i64,
    /// Webhook delivery timeout, milliseconds. `WEBHOOK_TIMEOUT_MS`.
    pub webhook_timeout_ms: u64,
    /// Postgres connection string. `DATABASE_URL`.
    pub database_url: String,
    /// Redis connection string. `REDIS_URL`.
    pub redis_url: String,
    /// Comma-separated Kafka/Redpanda bootstrap brokers. `KAFKA_BROKERS`.
    pub kafka_brokers: String,
    /// Prometheus exporter bind address. `METRICS_ADDR`.
    pub metrics_addr: String,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_min: 5,
            lock_ttl_seconds: 300,
            active_state_ttl_seconds: 3600,
            stuck_saga_threshold_ms: 1_800_000,
            webhook_timeout_ms: 5_000,
            database_url: "postgres://localhost/saga".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            kafka_brokers: "localhost:9092".to_string(),
            metrics_addr: "0.0.0.0:9000".to_string(),
        }
    }
}

impl SagaConfig {
    /// Build configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            rate_limit_per_min: env_parsed("RATE_LIMIT_PER_MIN", defaults.rate_limit_per_min),
            lock_ttl_seconds: env_parsed("LOCK_TTL_SECONDS", defaults.lock_ttl_seconds),
            active_state_ttl_seconds: env_parsed(
                "ACTIVE_STATE_TTL_SECONDS",
                defaults.active_state_ttl_seconds,
            ),
            stuck_saga_threshold_ms: env_parsed(
                "STUCK_SAGA_THRESHOLD_MS",
                defaults.stuck_saga_threshold_ms,
            ),
            webhook_timeout_ms: env_parsed("WEBHOOK_TIMEOUT_MS", defaults.webhook_timeout_ms),
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            kafka_brokers: std::env::var("KAFKA_BROKERS").unwrap_or(defaults.kafka_brokers),
            metrics_addr: std::env::var("METRICS_ADDR").unwrap_or(defaults.metrics_addr),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
