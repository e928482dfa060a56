//! Redpanda-backed [`BrokerGateway`]: publishes `reservation.*.requested`
//! messages and subscribes to `reservation.*.confirmed` confirmations.
//!
//! Uses rdkafka (Kafka-compatible client) against Redpanda, matching the
//! teacher's own broker crate's reasons for that choice: Kafka protocol
//! compatibility, simpler self-hosted operations than Kafka itself.
//!
//! # Delivery Semantics
//!
//! At-least-once delivery with manual offset commits: a message is
//! committed only after it has been forwarded to the subscriber's channel,
//! so a crash before commit causes redelivery rather than loss. Handlers
//! (the reservation adapters) must be idempotent, which they are by
//! construction — `update_reservation_id`'s `completed_steps` append is a
//! no-op on replay.
//!
//! # Example
//!
//! ```no_run
//! use saga_redpanda::RedpandaBrokerGateway;
//! use saga_core::broker::BrokerGateway;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = RedpandaBrokerGateway::new("localhost:9092")?;
//!
//! gateway.publish("reservation.hotel.requested", &serde_json::json!({"requestId": "r-1"})).await?;
//!
//! let mut stream = gateway.subscribe(&["reservation.hotel.confirmed"]).await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(confirmation) => println!("confirmed: {}", confirmation.reservation_id),
//!         Err(e) => eprintln!("error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use saga_core::broker::{BrokerError, BrokerGateway, ConfirmationMessage, ConfirmationStream};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Redpanda-backed broker gateway.
///
/// - **At-least-once delivery**: messages may be redelivered after a crash.
/// - **Ordering within partition**: events keyed by `requestId` so all of
///   one saga's confirmations land on the same partition.
/// - **Consumer groups**: multiple orchestrator instances share a topic's
///   workload.
pub struct RedpandaBrokerGateway {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: Option<String>,
    buffer_size: usize,
    auto_offset_reset: String,
}

impl RedpandaBrokerGateway {
    /// Create a gateway with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if the producer cannot be
    /// created (invalid broker addresses, unreachable cluster).
    pub fn new(brokers: &str) -> Result<Self, BrokerError> {
        Self::builder().brokers(brokers).build()
    }

    /// Start building a gateway with custom configuration.
    #[must_use]
    pub fn builder() -> RedpandaBrokerGatewayBuilder {
        RedpandaBrokerGatewayBuilder::default()
    }

    /// The configured broker addresses.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for [`RedpandaBrokerGateway`].
#[derive(Default)]
pub struct RedpandaBrokerGatewayBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaBrokerGatewayBuilder {
    /// Comma-separated broker addresses, e.g. `"localhost:9092"`.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgment mode: `"0"`, `"1"`, or `"all"`. Default `"1"`.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Producer send timeout. Default 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Explicit consumer group id, for load-balancing across orchestrator
    /// instances. Auto-generated from sorted topic names if unset.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Inbound confirmation buffer size. Default 1000.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_size` is 0.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        assert!(buffer_size > 0, "buffer_size must be greater than 0");
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Where new consumer groups start reading: `"earliest"` or `"latest"`
    /// (default).
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the gateway.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if brokers are unset or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaBrokerGateway, BrokerError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BrokerError::ConnectionFailed("brokers not configured".to_string()))?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("1"))
            .set(
                "compression.type",
                self.compression.as_deref().unwrap_or("none"),
            );

        let producer: FutureProducer = producer_config
            .create()
            .map_err(|e| BrokerError::ConnectionFailed(format!("failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            acks = self.producer_acks.as_deref().unwrap_or("1"),
            compression = self.compression.as_deref().unwrap_or("none"),
            "broker gateway producer created"
        );

        Ok(RedpandaBrokerGateway {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group: self.consumer_group,
            buffer_size: self.buffer_size.unwrap_or(1000),
            auto_offset_reset: self.auto_offset_reset.unwrap_or_else(|| "latest".to_string()),
        })
    }
}

impl BrokerGateway for RedpandaBrokerGateway {
    fn publish(
        &self,
        topic: &str,
        payload: &serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let topic = topic.to_string();
        let payload_bytes = payload.to_string().into_bytes();
        let timeout = self.timeout;
        // Key by requestId so every message for one saga lands on the same
        // partition; fall back to the topic name if the payload doesn't
        // carry one (it always should for reservation requests).
        let key = payload
            .get("requestId")
            .and_then(serde_json::Value::as_str)
            .map_or_else(|| topic.clone(), str::to_string);

        Box::pin(async move {
            let record = FutureRecord::to(&topic).payload(&payload_bytes).key(&key);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        "reservation message published"
                    );
                    metrics::counter!("saga_broker_published_total", "topic" => topic.clone())
                        .increment(1);
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(topic = %topic, error = %kafka_error, "publish failed");
                    Err(BrokerError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    #[allow(clippy::too_many_lines)]
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<ConfirmationStream, BrokerError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let brokers = self.brokers.clone();
        let consumer_group = self.consumer_group.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let consumer_group_id = consumer_group.unwrap_or_else(|| {
                let mut sorted_topics = topics.clone();
                sorted_topics.sort();
                format!("saga-coordinator-{}", sorted_topics.join("-"))
            });

            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| BrokerError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| BrokerError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("failed to subscribe: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %consumer_group_id,
                "subscribed to confirmation topics"
            );

            // `buffer_size` only bounds how many undelivered messages may
            // queue up; it does not gate when an offset is committed. The
            // `ack` rendezvous below is what enforces prefetch = 1: the
            // consumer task blocks on `ack_rx.recv()` after handing a
            // message off, and only commits once `ack_tx.send(())` fires —
            // which the yielded stream only does right before asking the
            // channel for the *next* item, i.e. after the caller's own
            // loop body (the reservation handler) has returned for the
            // previous one.
            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);
            let (ack_tx, mut ack_rx) = tokio::sync::mpsc::channel::<()>(1);

            tokio::spawn(async move {
                use futures::StreamExt;
                use rdkafka::consumer::CommitMode;

                let mut stream = consumer.stream();

                while let Some(msg_result) = stream.next().await {
                    match msg_result {
                        Ok(message) => {
                            let confirmation_result = match message.payload() {
                                None => Err(BrokerError::DeserializationFailed(
                                    "message has no payload".to_string(),
                                )),
                                Some(payload) => {
                                    serde_json::from_slice::<ConfirmationMessage>(payload).map_err(
                                        |e| {
                                            BrokerError::DeserializationFailed(format!(
                                                "failed to deserialize confirmation: {e}"
                                            ))
                                        },
                                    )
                                }
                            };
                            let owned_message = message.detach();

                            if tx.send(confirmation_result).await.is_err() {
                                tracing::debug!("confirmation receiver dropped, exiting consumer task");
                                break;
                            }

                            // Wait for the handler to finish this message
                            // before committing its offset or pulling the
                            // next one off the partition.
                            if ack_rx.recv().await.is_none() {
                                tracing::debug!("ack channel closed, exiting consumer task without committing");
                                break;
                            }

                            let mut commit_tpl = rdkafka::TopicPartitionList::new();
                            let _ = commit_tpl.add_partition_offset(
                                owned_message.topic(),
                                owned_message.partition(),
                                rdkafka::Offset::Offset(owned_message.offset() + 1),
                            );

                            if let Err(e) = consumer.commit(&commit_tpl, CommitMode::Async) {
                                tracing::warn!(
                                    topic = owned_message.topic(),
                                    partition = owned_message.partition(),
                                    offset = owned_message.offset(),
                                    error = %e,
                                    "failed to commit offset, message may be redelivered"
                                );
                            }
                        }
                        Err(e) => {
                            let err = BrokerError::TransportError(format!(
                                "failed to receive message: {e}"
                            ));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                            // No message, so nothing to commit — but still
                            // wait for the matching ack to keep the
                            // handshake one-to-one with the stream side's
                            // unconditional send-after-yield.
                            if ack_rx.recv().await.is_none() {
                                tracing::debug!("ack channel closed, exiting consumer task");
                                break;
                            }
                        }
                    }
                }

                tracing::debug!("confirmation consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                    if ack_tx.send(()).await.is_err() {
                        break;
                    }
                }
            };

            Ok(Box::pin(stream) as ConfirmationStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_gateway_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaBrokerGateway>();
        assert_sync::<RedpandaBrokerGateway>();
    }

    #[test]
    fn builder_requires_brokers() {
        let result = RedpandaBrokerGateway::builder().build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_default_works() {
        let gateway = RedpandaBrokerGateway::builder()
            .brokers("localhost:9092")
            .build()
            .expect("build should succeed with brokers set");
        assert_eq!(gateway.brokers(), "localhost:9092");
    }

    #[test]
    #[should_panic(expected = "buffer_size must be greater than 0")]
    fn buffer_size_zero_panics() {
        let _ = RedpandaBrokerGateway::builder().buffer_size(0);
    }
}
