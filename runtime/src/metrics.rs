//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the saga runtime's components:
//! durable store operations, broker publish/subscribe, circuit breaker state,
//! reducer execution, and effect handling.
//!
//! # Example
//!
//! ```rust,no_run
//! use saga_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Start metrics server on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
    /// Failed to bind HTTP server
    #[error("Failed to bind metrics server: {0}")]
    Bind(#[from] std::io::Error),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Initialize metrics and start the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns error if metrics exporter cannot be installed or server cannot bind.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this will fail
    /// with `MetricsError::Install`. In production, ensure this is only called once.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Durable store metrics
    describe_counter!(
        "durable_store_records_created_total",
        "Total number of saga records created"
    );
    describe_counter!(
        "durable_store_status_updates_total",
        "Total number of saga status transitions persisted"
    );
    describe_counter!(
        "durable_store_booking_id_conflicts_total",
        "Total number of booking id conflicts from concurrent aggregation"
    );
    describe_histogram!(
        "durable_store_operation_duration_seconds",
        "Time taken to complete a durable store operation"
    );

    // Broker metrics
    describe_counter!(
        "broker_messages_published_total",
        "Total number of messages published to the broker"
    );
    describe_counter!(
        "broker_messages_consumed_total",
        "Total number of confirmation messages consumed from the broker"
    );
    describe_counter!(
        "broker_publish_errors_total",
        "Total number of publish errors"
    );
    describe_counter!(
        "broker_consume_errors_total",
        "Total number of consume errors"
    );
    describe_histogram!(
        "broker_publish_duration_seconds",
        "Time taken to publish a message"
    );

    // Reducer metrics
    describe_counter!(
        "reducer_actions_processed_total",
        "Total number of actions processed by reducers"
    );
    describe_counter!("reducer_errors_total", "Total number of reducer errors");
    describe_histogram!(
        "reducer_execution_duration_seconds",
        "Time taken to execute reducers"
    );

    // Effect metrics
    describe_counter!("effects_executed_total", "Total number of effects executed");
    describe_counter!(
        "effects_failed_total",
        "Total number of effects that failed"
    );
    describe_histogram!(
        "effect_execution_duration_seconds",
        "Time taken to execute effects"
    );

    // Circuit breaker metrics
    describe_gauge!(
        "circuit_breaker_state",
        "Current circuit breaker state (0=closed, 1=half-open, 2=open)"
    );
    describe_counter!(
        "circuit_breaker_calls_total",
        "Total number of calls through circuit breaker"
    );
    describe_counter!(
        "circuit_breaker_successes_total",
        "Total number of successful calls"
    );
    describe_counter!(
        "circuit_breaker_failures_total",
        "Total number of failed calls"
    );
    describe_counter!(
        "circuit_breaker_rejections_total",
        "Total number of rejected calls (circuit open)"
    );

    // Retry metrics
    describe_counter!("retry_attempts_total", "Total number of retry attempts");
    describe_counter!(
        "retry_successes_total",
        "Total number of successful retries"
    );
    describe_counter!(
        "retry_exhausted_total",
        "Total number of retry attempts that exhausted max retries"
    );
}

/// Durable store metrics recorder.
pub struct DurableStoreMetrics;

impl DurableStoreMetrics {
    /// Record a saga record creation.
    pub fn record_create(duration: Duration) {
        counter!("durable_store_records_created_total").increment(1);
        histogram!("durable_store_operation_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a status transition.
    pub fn record_status_update(duration: Duration) {
        counter!("durable_store_status_updates_total").increment(1);
        histogram!("durable_store_operation_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a booking id conflict (expected/benign under concurrent aggregation).
    pub fn record_booking_id_conflict() {
        counter!("durable_store_booking_id_conflicts_total").increment(1);
    }
}

/// Broker metrics recorder.
pub struct BrokerMetrics;

impl BrokerMetrics {
    /// Record a message publish.
    pub fn record_publish(duration: Duration) {
        counter!("broker_messages_published_total").increment(1);
        histogram!("broker_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a message consumption.
    pub fn record_consume() {
        counter!("broker_messages_consumed_total").increment(1);
    }

    /// Record a publish error.
    pub fn record_publish_error() {
        counter!("broker_publish_errors_total").increment(1);
    }

    /// Record a consume error.
    pub fn record_consume_error() {
        counter!("broker_consume_errors_total").increment(1);
    }
}

/// Reducer metrics recorder.
pub struct ReducerMetrics;

impl ReducerMetrics {
    /// Record an action processed.
    pub fn record_action(duration: Duration) {
        counter!("reducer_actions_processed_total").increment(1);
        histogram!("reducer_execution_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a reducer error.
    pub fn record_error() {
        counter!("reducer_errors_total").increment(1);
    }
}

/// Effect metrics recorder.
pub struct EffectMetrics;

impl EffectMetrics {
    /// Record an effect execution.
    pub fn record_execution(duration: Duration) {
        counter!("effects_executed_total").increment(1);
        histogram!("effect_execution_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record an effect failure.
    pub fn record_failure() {
        counter!("effects_failed_total").increment(1);
    }
}

/// Circuit breaker metrics recorder.
pub struct CircuitBreakerMetrics;

impl CircuitBreakerMetrics {
    /// Record circuit breaker state.
    ///
    /// 0 = Closed, 1 = `HalfOpen`, 2 = Open
    pub fn record_state(state: f64) {
        gauge!("circuit_breaker_state").set(state);
    }

    /// Record a call attempt.
    pub fn record_call() {
        counter!("circuit_breaker_calls_total").increment(1);
    }

    /// Record a successful call.
    pub fn record_success() {
        counter!("circuit_breaker_successes_total").increment(1);
    }

    /// Record a failed call.
    pub fn record_failure() {
        counter!("circuit_breaker_failures_total").increment(1);
    }

    /// Record a rejected call (circuit open).
    pub fn record_rejection() {
        counter!("circuit_breaker_rejections_total").increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
    }

    #[tokio::test]
    async fn test_metrics_server_start() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);

        let result = server.start();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_durable_store_metrics() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        DurableStoreMetrics::record_create(Duration::from_millis(10));
        DurableStoreMetrics::record_status_update(Duration::from_millis(5));
        DurableStoreMetrics::record_booking_id_conflict();

        if let Some(rendered) = server.render() {
            assert!(rendered.contains("durable_store_records_created_total"));
            assert!(rendered.contains("durable_store_booking_id_conflicts_total"));
        }
    }

    #[tokio::test]
    async fn test_broker_metrics() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        BrokerMetrics::record_publish(Duration::from_millis(50));
        BrokerMetrics::record_consume();

        if let Some(rendered) = server.render() {
            assert!(rendered.contains("broker_messages_published_total"));
            assert!(rendered.contains("broker_messages_consumed_total"));
        }
    }
}
