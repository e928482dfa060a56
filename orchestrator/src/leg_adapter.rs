//! Generic reservation-confirmation handler, collapsing the three
//! near-identical per-leg "Reservation Service Adapters" into one type
//! parameterised by [`Leg`].

use saga_core::broker::ConfirmationMessage;
use saga_core::coordination::CoordinationStore;
use saga_core::domain::Leg;
use saga_core::durable_store::{DurableStore, SagaStoreError};
use saga_core::notification::{BookingEvent, NotificationPort};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Saga-completion capability injected into every [`LegAdapter`] at
/// construction. Resolves the adapter/orchestrator cyclic reference: an
/// adapter calls forward into this closure at the join point instead of
/// holding a full orchestrator reference.
pub type AggregateFn = Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Handles inbound `reservation.{leg}.confirmed` messages for one leg.
pub struct LegAdapter {
    leg: Leg,
    durable: Arc<dyn DurableStore>,
    coordination: Arc<dyn CoordinationStore>,
    notifications: Arc<dyn NotificationPort>,
    aggregate: AggregateFn,
}

impl LegAdapter {
    /// Build an adapter for one leg.
    #[must_use]
    pub fn new(
        leg: Leg,
        durable: Arc<dyn DurableStore>,
        coordination: Arc<dyn CoordinationStore>,
        notifications: Arc<dyn NotificationPort>,
        aggregate: AggregateFn,
    ) -> Self {
        Self {
            leg,
            durable,
            coordination,
            notifications,
            aggregate,
        }
    }

    /// Handle one `reservation.{leg}.confirmed` message, per the
    /// confirmation protocol: atomically record the reservation id and
    /// step marker, bump the observational step counter, and trigger
    /// aggregation once this is the confirmation that completes the set.
    ///
    /// # Errors
    ///
    /// Propagates [`SagaStoreError`] from the durable update so the
    /// caller (the broker subscription loop) leaves the message
    /// unacknowledged and lets the broker redeliver it.
    pub async fn confirm_reservation(&self, confirmation: ConfirmationMessage) -> Result<(), SagaStoreError> {
        let request_id = confirmation.request_id.clone();

        let record = match self
            .durable
            .update_reservation_id(
                &request_id,
                self.leg,
                &confirmation.reservation_id,
                self.leg.confirmed_marker(),
            )
            .await
        {
            Ok(record) => record,
            Err(e) => {
                self.notify_failure(&request_id, e.to_string()).await;
                return Err(e);
            }
        };

        self.coordination
            .increment_step_counter(&request_id, self.leg.confirmed_marker())
            .await;

        if record.all_legs_confirmed() {
            (self.aggregate)(request_id).await;
        }

        Ok(())
    }

    async fn notify_failure(&self, request_id: &str, error: String) {
        self.notifications.notify(request_id, BookingEvent::Failed { error }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use saga_core::domain::{CarSpec, FlightSpec, HotelSpec, SagaRecord, SagaStatus};
    use saga_testing::{InMemoryCoordinationStore, InMemoryDurableStore, InMemoryNotificationHub};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(request_id: &str) -> SagaRecord {
        let now = Utc::now();
        SagaRecord {
            request_id: request_id.to_string(),
            booking_id: None,
            user_id: "u1".to_string(),
            total_amount_cents: 10_000,
            original_request: saga_core::domain::BookingRequest {
                request_id: Some(request_id.to_string()),
                user_id: "u1".to_string(),
                total_amount_cents: 10_000,
                flight: FlightSpec {
                    origin: "SFO".to_string(),
                    destination: "JFK".to_string(),
                    depart_date: now,
                    return_date: now,
                },
                hotel: HotelSpec {
                    hotel_id: "h1".to_string(),
                    check_in: now,
                    check_out: now,
                },
                car: CarSpec {
                    pickup_location: "JFK".to_string(),
                    dropoff_location: "JFK".to_string(),
                    pickup_date: now,
                    dropoff_date: now,
                },
            },
            status: SagaStatus::Pending,
            flight_reservation_id: None,
            hotel_reservation_id: None,
            car_reservation_id: None,
            completed_steps: Vec::new(),
            error_message: None,
            error_stack: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn confirmation(request_id: &str, reservation_id: &str) -> ConfirmationMessage {
        ConfirmationMessage {
            request_id: request_id.to_string(),
            user_id: "u1".to_string(),
            reservation_id: reservation_id.to_string(),
            amount_cents: 1_000,
            timestamp: Utc::now(),
        }
    }

    fn no_op_aggregate() -> AggregateFn {
        Arc::new(|_request_id| Box::pin(async {}))
    }

    #[tokio::test]
    async fn confirm_reservation_does_not_aggregate_until_all_legs_land() {
        let durable = Arc::new(InMemoryDurableStore::new());
        durable.create(record("r-1")).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let aggregate: AggregateFn = Arc::new(move |_request_id| {
            let calls = Arc::clone(&calls_clone);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        });

        let adapter = LegAdapter::new(
            Leg::Hotel,
            durable.clone(),
            Arc::new(InMemoryCoordinationStore::new()),
            Arc::new(InMemoryNotificationHub::new()),
            aggregate,
        );

        adapter.confirm_reservation(confirmation("r-1", "hotel-res-1")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn confirm_reservation_triggers_aggregate_on_final_leg() {
        let durable = Arc::new(InMemoryDurableStore::new());
        durable.create(record("r-2")).await.unwrap();
        for leg in [Leg::Hotel, Leg::Flight] {
            durable
                .update_reservation_id("r-2", leg, &format!("{leg}-res"), leg.confirmed_marker())
                .await
                .unwrap();
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let aggregate: AggregateFn = Arc::new(move |_request_id| {
            let calls = Arc::clone(&calls_clone);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        });

        let adapter = LegAdapter::new(
            Leg::Car,
            durable,
            Arc::new(InMemoryCoordinationStore::new()),
            Arc::new(InMemoryNotificationHub::new()),
            aggregate,
        );

        adapter.confirm_reservation(confirmation("r-2", "car-res-1")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn confirm_reservation_notifies_failure_and_propagates_on_missing_record() {
        let notifications = Arc::new(InMemoryNotificationHub::new());
        let rx = notifications.subscribe_once("r-missing").await;

        let adapter = LegAdapter::new(
            Leg::Flight,
            Arc::new(InMemoryDurableStore::new()),
            Arc::new(InMemoryCoordinationStore::new()),
            Arc::clone(&notifications) as Arc<dyn NotificationPort>,
            no_op_aggregate(),
        );

        let result = adapter.confirm_reservation(confirmation("r-missing", "flight-res-1")).await;
        assert!(result.is_err());

        let event = rx.await.unwrap();
        assert!(matches!(event, BookingEvent::Failed { .. }));
    }
}
