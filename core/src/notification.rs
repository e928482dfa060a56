//! Notification hub abstraction: per-booking push stream plus a one-shot
//! webhook callback, fired once a saga reaches a terminal event.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// The terminal event a saga can notify subscribers about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum BookingEvent {
    /// All three legs confirmed and aggregated.
    Confirmed {
        /// Customer-facing confirmation number.
        booking_id: String,
        /// The three downstream reservation ids.
        flight_reservation_id: String,
        /// .
        hotel_reservation_id: String,
        /// .
        car_reservation_id: String,
    },
    /// The saga failed (admission error, invariant violation, or
    /// compensation outcome).
    Failed {
        /// Human-readable failure reason.
        error: String,
    },
}

/// Push-stream plus one-shot-webhook notification hub.
///
/// Matches the concurrency policy in the system overview: "notification
/// hub's internal channel single-writer-per-event, registration map
/// guarded by standard mutex."
pub trait NotificationPort: Send + Sync {
    /// Register a one-shot push-stream subscription keyed by `key`
    /// (either a `requestId` during the Pending phase or a `bookingId`
    /// once assigned). The first matching notification is delivered and
    /// the subscription auto-closes; late subscribers get nothing.
    fn subscribe_once(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = tokio::sync::oneshot::Receiver<BookingEvent>> + Send + '_>>;

    /// Register a callback URL against `booking_id`; on the next terminal
    /// event for that key, one `POST` attempt is made with a 5s timeout,
    /// and the registration is deleted afterward regardless of outcome.
    fn register_webhook(
        &self,
        key: &str,
        callback_url: &str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Publish a terminal event for `key`, delivering it to the push
    /// subscriber (if any) and firing the webhook (if any).
    fn notify(
        &self,
        key: &str,
        event: BookingEvent,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}
