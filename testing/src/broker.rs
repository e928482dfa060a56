//! In-memory broker gateway standing in for the Kafka-compatible broker
//! in tests. Publishes are broadcast to every active subscription whose
//! topic list contains the published topic; there is no persistence and
//! no redelivery, since tests control publish/subscribe ordering
//! directly rather than relying on manual-ack recovery.

use futures::StreamExt;
use saga_core::broker::{BrokerError, BrokerGateway, ConfirmationMessage, ConfirmationStream};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::broadcast;

/// Broadcast-channel-backed [`BrokerGateway`] for tests.
pub struct InMemoryBrokerGateway {
    sender: broadcast::Sender<(String, serde_json::Value)>,
}

impl InMemoryBrokerGateway {
    /// Create a gateway with the given broadcast buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for InMemoryBrokerGateway {
    fn default() -> Self {
        Self::new(256)
    }
}

impl BrokerGateway for InMemoryBrokerGateway {
    fn publish(
        &self,
        topic: &str,
        payload: &serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let topic = topic.to_string();
        let payload = payload.clone();
        Box::pin(async move {
            // No receivers yet is not an error: it just means nothing is
            // subscribed, matching a broker with zero active consumers.
            let _ = self.sender.send((topic, payload));
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<ConfirmationStream, BrokerError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|t| (*t).to_string()).collect();
        let mut receiver = self.sender.subscribe();
        Box::pin(async move {
            let stream = async_stream::stream! {
                loop {
                    match receiver.recv().await {
                        Ok((topic, payload)) => {
                            if !topics.contains(&topic) {
                                continue;
                            }
                            let parsed = serde_json::from_value::<ConfirmationMessage>(payload)
                                .map_err(|e| BrokerError::DeserializationFailed(e.to_string()));
                            yield parsed;
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
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
    use chrono::Utc;

    #[tokio::test]
    async fn subscriber_receives_published_confirmation() {
        let gateway = InMemoryBrokerGateway::default();
        let mut stream = gateway
            .subscribe(&["reservation.flight.confirmed"])
            .await
            .unwrap();

        let message = ConfirmationMessage {
            request_id: "req-1".to_string(),
            user_id: "user-1".to_string(),
            reservation_id: "res-1".to_string(),
            amount_cents: 4000,
            timestamp: Utc::now(),
        };
        gateway
            .publish(
                "reservation.flight.confirmed",
                &serde_json::to_value(&message).unwrap(),
            )
            .await
            .unwrap();

        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received, message);
    }

    #[tokio::test]
    async fn subscriber_ignores_other_topics() {
        let gateway = InMemoryBrokerGateway::default();
        let mut stream = gateway
            .subscribe(&["reservation.flight.confirmed"])
            .await
            .unwrap();

        gateway
            .publish("reservation.hotel.confirmed", &serde_json::json!({}))
            .await
            .unwrap();

        tokio::time::timeout(std::time::Duration::from_millis(50), stream.next())
            .await
            .unwrap_err();
    }
}
