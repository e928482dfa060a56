//! Broker gateway abstraction for outbound reservation requests and inbound
//! confirmations.
//!
//! This module provides the [`BrokerGateway`] trait used by the Saga
//! Orchestrator to publish `reservation.{flight,hotel,car}.requested`
//! messages and by the Reservation Service Adapters to subscribe to
//! `reservation.{flight,hotel,car}.confirmed` messages.
//!
//! # Key Principles
//!
//! - **At-least-once delivery**: messages may be delivered multiple times;
//!   handlers must be idempotent (see `update_reservation_id`'s
//!   idempotent-append semantics in [`crate::durable_store`]).
//! - **Manual acknowledgement**: a message is only considered handled once
//!   the subscriber's handler future resolves successfully. A handler error
//!   must leave the message unacknowledged so the broker redelivers it.
//!
//! # Dyn Compatibility
//!
//! This trait uses explicit `Pin<Box<dyn Future>>` returns instead of
//! `async fn` so it can be used as a trait object (`Arc<dyn BrokerGateway>`)
//! — required because the orchestrator and adapters hold the gateway behind
//! a shared pointer rather than a generic parameter.

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during broker gateway operations.
#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    /// Failed to connect to the broker.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic.
    #[error("publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to subscribe to topics.
    #[error("subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe.
        topics: Vec<String>,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to deserialize a message.
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Generic transport error.
    #[error("transport error: {0}")]
    TransportError(String),
}

/// A reservation-leg confirmation delivered by the broker.
///
/// Mirrors the inbound wire shape from the external interface table:
/// `{requestId, userId, reservationId, amount, timestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfirmationMessage {
    /// Idempotency key correlating this confirmation to a saga.
    pub request_id: String,
    /// The user who placed the booking.
    pub user_id: String,
    /// The downstream reservation id assigned to this leg.
    pub reservation_id: String,
    /// The amount charged for this leg, in cents.
    pub amount_cents: i64,
    /// When the downstream service confirmed the reservation.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Stream of inbound confirmation messages from a subscription.
pub type ConfirmationStream =
    Pin<Box<dyn Stream<Item = Result<ConfirmationMessage, BrokerError>> + Send>>;

/// Trait for broker gateway implementations.
///
/// Publishes outbound reservation-requested messages and subscribes to
/// inbound confirmation messages, with manual-ack semantics: a message is
/// acknowledged only after the caller's handler completes successfully.
pub trait BrokerGateway: Send + Sync {
    /// Publish a JSON-serialisable payload to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::PublishFailed`] if the publish operation
    /// fails (e.g. broker unreachable).
    fn publish(
        &self,
        topic: &str,
        payload: &serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;

    /// Subscribe to one or more confirmation topics.
    ///
    /// Implementations must configure the underlying consumer so that each
    /// message stays unacknowledged (uncommitted) until it has been fully
    /// consumed from the returned stream and the caller's handler for it
    /// has resolved; `prefetch = 1` ordering is the caller's responsibility
    /// to preserve by awaiting one item fully before requesting the next.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<ConfirmationStream, BrokerError>> + Send + '_>>;
}
