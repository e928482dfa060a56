//! In-memory notification hub for tests. Webhook registrations are
//! recorded rather than actually dispatched over HTTP, so tests can
//! assert on what *would* have been sent.

use saga_core::notification::{BookingEvent, NotificationPort};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use tokio::sync::oneshot;

#[derive(Default)]
struct Inner {
    subscribers: HashMap<String, oneshot::Sender<BookingEvent>>,
    webhooks: HashMap<String, String>,
    delivered_webhooks: Vec<(String, BookingEvent)>,
}

/// `HashMap`-backed [`NotificationPort`] for tests.
#[derive(Default)]
pub struct InMemoryNotificationHub {
    inner: Mutex<Inner>,
}

impl InMemoryNotificationHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Webhook deliveries recorded so far, in delivery order.
    #[must_use]
    pub fn delivered_webhooks(&self) -> Vec<(String, BookingEvent)> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .delivered_webhooks
            .clone()
    }
}

impl NotificationPort for InMemoryNotificationHub {
    fn subscribe_once(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = oneshot::Receiver<BookingEvent>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let (tx, rx) = oneshot::channel();
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.subscribers.insert(key, tx);
            rx
        })
    }

    fn register_webhook(
        &self,
        key: &str,
        callback_url: &str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let key = key.to_string();
        let callback_url = callback_url.to_string();
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.webhooks.insert(key, callback_url);
        })
    }

    fn notify(
        &self,
        key: &str,
        event: BookingEvent,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(tx) = inner.subscribers.remove(&key) {
                let _ = tx.send(event.clone());
            }
            if inner.webhooks.remove(&key).is_some() {
                inner.delivered_webhooks.push((key, event));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_delivers_to_push_subscriber() {
        let hub = InMemoryNotificationHub::new();
        let rx = hub.subscribe_once("req-1").await;
        hub.notify(
            "req-1",
            BookingEvent::Failed {
                error: "timeout".to_string(),
            },
        )
        .await;
        let event = rx.await.unwrap();
        assert!(matches!(event, BookingEvent::Failed { .. }));
    }

    #[tokio::test]
    async fn notify_records_webhook_delivery() {
        let hub = InMemoryNotificationHub::new();
        hub.register_webhook("req-1", "https://example.com/hook")
            .await;
        hub.notify(
            "req-1",
            BookingEvent::Failed {
                error: "timeout".to_string(),
            },
        )
        .await;
        assert_eq!(hub.delivered_webhooks().len(), 1);
    }
}
