//! The saga orchestrator: admission (`execute`) and join-point aggregation
//! (`aggregate`). The legacy synchronous compensation path (`execute_old`)
//! lives in [`crate::legacy`].

use crate::config::SagaConfig;
use crate::leg_adapter::AggregateFn;
use crate::reducer::{SagaEvent, SagaReducer};
use saga_core::broker::BrokerGateway;
use saga_core::coordination::CoordinationStore;
use saga_core::domain::{BookingRequest, Leg, SagaRecord, SagaStatus};
use saga_core::durable_store::{DurableStore, SagaStoreError};
use saga_core::environment::{Clock, IdGenerator};
use saga_core::notification::{BookingEvent, NotificationPort};
use saga_core::reducer::Reducer;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Response returned by [`SagaOrchestrator::execute`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdmissionResult {
    /// The idempotency key this admission resolved to.
    pub request_id: String,
    /// Saga status immediately after admission.
    pub status: SagaStatus,
    /// Human-readable detail, present on rejection or partial failure.
    pub message: Option<String>,
}

/// Result of a successful [`SagaOrchestrator::aggregate`] call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfirmedResult {
    /// The saga's idempotency key.
    pub request_id: String,
    /// Customer-facing confirmation number.
    pub booking_id: String,
    /// Flight leg reservation id.
    pub flight_reservation_id: String,
    /// Hotel leg reservation id.
    pub hotel_reservation_id: String,
    /// Car leg reservation id.
    pub car_reservation_id: String,
}

/// Errors from the aggregation path. Admission (`execute`) never returns
/// `Err` — failures there are reported as an [`AdmissionResult`] with
/// `status: Failed`, per the admission pipeline's own error handling.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// The durable store rejected or failed an operation.
    #[error(transparent)]
    Store(#[from] SagaStoreError),
    /// A hard invariant was violated (missing record, missing reservation
    /// ids at the join point, confirmed record with no booking id).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

fn validate_request(request: &BookingRequest) -> Result<(), String> {
    if request.user_id.trim().is_empty() {
        return Err("userId must not be empty".to_string());
    }
    if request.total_amount_cents <= 0 {
        return Err("totalAmount must be positive".to_string());
    }
    if request.flight.depart_date >= request.flight.return_date {
        return Err("flight departDate must precede returnDate".to_string());
    }
    if request.hotel.check_in >= request.hotel.check_out {
        return Err("hotel checkIn must precede checkOut".to_string());
    }
    if request.car.pickup_date >= request.car.dropoff_date {
        return Err("car pickupDate must precede dropoffDate".to_string());
    }
    Ok(())
}

pub(crate) fn leg_requested_payload(leg: Leg, request_id: &str, request: &BookingRequest) -> serde_json::Value {
    let amount = leg.amount_cents(request.total_amount_cents);
    match leg {
        Leg::Flight => json!({
            "requestId": request_id,
            "userId": request.user_id,
            "origin": request.flight.origin,
            "destination": request.flight.destination,
            "departureDate": request.flight.depart_date,
            "returnDate": request.flight.return_date,
            "amount": amount,
        }),
        Leg::Hotel => json!({
            "requestId": request_id,
            "userId": request.user_id,
            "hotelId": request.hotel.hotel_id,
            "checkInDate": request.hotel.check_in,
            "checkOutDate": request.hotel.check_out,
            "amount": amount,
        }),
        Leg::Car => json!({
            "requestId": request_id,
            "userId": request.user_id,
            "pickupLocation": request.car.pickup_location,
            "dropoffLocation": request.car.dropoff_location,
            "pickupDate": request.car.pickup_date,
            "dropoffDate": request.car.dropoff_date,
            "amount": amount,
        }),
    }
}

/// The saga orchestrator. Holds every provider as a trait object behind
/// `Arc`, so a single instance can be shared across the admission path,
/// the broker consumer tasks feeding [`crate::leg_adapter::LegAdapter`],
/// and the stuck-saga sweeper.
pub struct SagaOrchestrator {
    pub durable: Arc<dyn DurableStore>,
    pub coordination: Arc<dyn CoordinationStore>,
    pub broker: Arc<dyn BrokerGateway>,
    pub notifications: Arc<dyn NotificationPort>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub config: SagaConfig,
}

impl SagaOrchestrator {
    /// Assemble an orchestrator from its providers.
    #[must_use]
    pub fn new(
        durable: Arc<dyn DurableStore>,
        coordination: Arc<dyn CoordinationStore>,
        broker: Arc<dyn BrokerGateway>,
        notifications: Arc<dyn NotificationPort>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        config: SagaConfig,
    ) -> Self {
        Self {
            durable,
            coordination,
            broker,
            notifications,
            clock,
            ids,
            config,
        }
    }

    /// Build the saga-completion capability injected into each
    /// [`crate::leg_adapter::LegAdapter`] at construction, resolving the
    /// adapter/orchestrator cyclic reference from the design notes: the
    /// adapter calls forward into this closure rather than holding a full
    /// orchestrator reference.
    #[must_use]
    pub fn aggregate_fn(self: &Arc<Self>) -> AggregateFn {
        let orchestrator = Arc::clone(self);
        Arc::new(move |request_id: String| {
            let orchestrator = Arc::clone(&orchestrator);
            Box::pin(async move {
                if let Err(e) = orchestrator.aggregate(&request_id).await {
                    tracing::error!(request_id = %request_id, error = %e, "aggregation failed at join point");
                }
            })
        })
    }

    /// Admit a booking request. Never fails outright: every rejection is
    /// reported via `status: Failed` on the returned [`AdmissionResult`],
    /// per the admission pipeline's own error-handling design.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn execute(&self, request: BookingRequest) -> AdmissionResult {
        if let Err(reason) = validate_request(&request) {
            return AdmissionResult {
                request_id: request.request_id.clone().unwrap_or_default(),
                status: SagaStatus::Failed,
                message: Some(reason),
            };
        }

        let request_id = request
            .request_id
            .clone()
            .unwrap_or_else(|| self.ids.generate_request_id());

        match self.durable.find_by_request_id(&request_id).await {
            Ok(Some(existing)) => {
                return AdmissionResult {
                    request_id,
                    status: existing.status,
                    message: None,
                };
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(request_id = %request_id, error = %e, "durable dedup lookup failed");
                return AdmissionResult {
                    request_id,
                    status: SagaStatus::Failed,
                    message: Some(format!("durable store unavailable: {e}")),
                };
            }
        }

        if self.coordination.get_active_snapshot(&request_id).await.is_some() {
            return AdmissionResult {
                request_id,
                status: SagaStatus::Pending,
                message: Some("booking already in progress".to_string()),
            };
        }

        let lock_ttl = Duration::from_secs(self.config.lock_ttl_seconds);
        match self.coordination.acquire_lock(&request_id, lock_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                return AdmissionResult {
                    request_id,
                    status: SagaStatus::Pending,
                    message: Some("booking already in progress".to_string()),
                };
            }
            Err(e) => {
                tracing::error!(request_id = %request_id, error = %e, "lock acquire failed");
                return AdmissionResult {
                    request_id,
                    status: SagaStatus::Failed,
                    message: Some(format!("lock acquire failed: {e}")),
                };
            }
        }

        let result = self.execute_locked(&request_id, request).await;

        self.coordination.release_lock(&request_id).await;
        self.coordination.clear_active_snapshot(&request_id).await;

        result
    }

    async fn execute_locked(&self, request_id: &str, request: BookingRequest) -> AdmissionResult {
        let allowed = self
            .coordination
            .check_and_increment_rate_limit(&request.user_id, self.config.rate_limit_per_min)
            .await;
        if !allowed {
            return AdmissionResult {
                request_id: request_id.to_string(),
                status: SagaStatus::Failed,
                message: Some("Rate limit exceeded".to_string()),
            };
        }

        let now = self.clock.now();
        let record = SagaRecord {
            request_id: request_id.to_string(),
            booking_id: None,
            user_id: request.user_id.clone(),
            total_amount_cents: request.total_amount_cents,
            original_request: request.clone(),
            status: SagaStatus::Pending,
            flight_reservation_id: None,
            hotel_reservation_id: None,
            car_reservation_id: None,
            completed_steps: Vec::new(),
            error_message: None,
            error_stack: None,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.durable.create(record).await {
            tracing::error!(request_id = %request_id, error = %e, "saga create failed");
            return AdmissionResult {
                request_id: request_id.to_string(),
                status: SagaStatus::Failed,
                message: Some(format!("failed to create saga record: {e}")),
            };
        }

        let snapshot = json!({"requestId": request_id, "status": SagaStatus::Pending.as_wire_str()}).to_string();
        self.coordination
            .set_active_snapshot(
                request_id,
                &snapshot,
                Duration::from_secs(self.config.active_state_ttl_seconds),
            )
            .await;
        self.coordination.enqueue_pending(request_id, now.timestamp_millis()).await;

        for leg in Leg::publish_order() {
            let payload = leg_requested_payload(leg, request_id, &request);
            if let Err(e) = self.broker.publish(leg.requested_topic(), &payload).await {
                tracing::error!(request_id = %request_id, leg = %leg, error = %e, "partial publish failure, saga left Pending for the sweeper");
                let _ = self
                    .durable
                    .set_error(request_id, &format!("failed to publish {leg} request: {e}"), None)
                    .await;
                return AdmissionResult {
                    request_id: request_id.to_string(),
                    status: SagaStatus::Pending,
                    message: Some(format!("partial publish failure: {e}")),
                };
            }
            self.coordination.increment_step_counter(request_id, leg.requested_marker()).await;
        }

        metrics::counter!("saga_admitted_total").increment(1);
        AdmissionResult {
            request_id: request_id.to_string(),
            status: SagaStatus::Pending,
            message: None,
        }
    }

    /// Join-point aggregation. Invoked at most once per saga by whichever
    /// leg adapter observes all three `_confirmed` markers.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvariantViolation`] if the record is
    /// missing or reservation ids are incomplete at the join point (a hard
    /// bug, not a recoverable condition), or [`OrchestratorError::Store`]
    /// on storage failure.
    #[tracing::instrument(skip(self))]
    pub async fn aggregate(&self, request_id: &str) -> Result<ConfirmedResult, OrchestratorError> {
        let record = self
            .durable
            .find_by_request_id(request_id)
            .await?
            .ok_or_else(|| OrchestratorError::InvariantViolation(format!("no saga record for {request_id}")))?;

        if record.status == SagaStatus::Confirmed {
            return self.confirmed_result_from(&record);
        }

        if !record.all_reservation_ids_present() {
            let msg = "incomplete reservation ids at join point".to_string();
            let _ = self.durable.set_error(request_id, &msg, None).await;
            self.notifications
                .notify(request_id, BookingEvent::Failed { error: msg.clone() })
                .await;
            return Err(OrchestratorError::InvariantViolation(msg));
        }

        let mut next_status = record.status;
        SagaReducer.reduce(&mut next_status, SagaEvent::Aggregated, &());
        if next_status != SagaStatus::Confirmed {
            let msg = format!("illegal transition: cannot aggregate saga {request_id} in status {}", record.status);
            return Err(OrchestratorError::InvariantViolation(msg));
        }

        let booking_id = self.ids.generate_booking_id(self.clock.now());

        let confirmed = match self.durable.update_status(request_id, SagaStatus::Confirmed, Some(booking_id)).await {
            Ok(_) => self.durable.mark_aggregated(request_id).await?,
            Err(SagaStoreError::BookingIdConflict(_)) => {
                // A concurrent aggregator already won; treat this as
                // benign and return its (now Confirmed) result.
                self.durable
                    .find_by_request_id(request_id)
                    .await?
                    .ok_or_else(|| OrchestratorError::InvariantViolation(format!("saga {request_id} vanished after booking-id conflict")))?
            }
            Err(e) => return Err(e.into()),
        };

        self.coordination.increment_step_counter(request_id, "aggregated").await;
        self.coordination.dequeue_pending(request_id).await;
        self.coordination.cleanup(request_id).await;

        let result = self.confirmed_result_from(&confirmed)?;
        metrics::counter!("saga_confirmed_total").increment(1);

        self.notifications
            .notify(
                request_id,
                BookingEvent::Confirmed {
                    booking_id: result.booking_id.clone(),
                    flight_reservation_id: result.flight_reservation_id.clone(),
                    hotel_reservation_id: result.hotel_reservation_id.clone(),
                    car_reservation_id: result.car_reservation_id.clone(),
                },
            )
            .await;

        Ok(result)
    }

    fn confirmed_result_from(&self, record: &SagaRecord) -> Result<ConfirmedResult, OrchestratorError> {
        let booking_id = record.booking_id.clone().ok_or_else(|| {
            OrchestratorError::InvariantViolation(format!("saga {} confirmed without a booking id", record.request_id))
        })?;
        Ok(ConfirmedResult {
            request_id: record.request_id.clone(),
            booking_id,
            flight_reservation_id: record.flight_reservation_id.clone().unwrap_or_default(),
            hotel_reservation_id: record.hotel_reservation_id.clone().unwrap_or_default(),
            car_reservation_id: record.car_reservation_id.clone().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::UuidIdGenerator;
    use chrono::Duration as ChronoDuration;
    use saga_core::domain::{CarSpec, FlightSpec, HotelSpec};
    use saga_testing::{
        InMemoryBrokerGateway, InMemoryCoordinationStore, InMemoryDurableStore, InMemoryNotificationHub,
        SequentialIdGenerator, test_clock,
    };

    fn booking_request(request_id: Option<&str>, user_id: &str) -> BookingRequest {
        let now = chrono::Utc::now();
        BookingRequest {
            request_id: request_id.map(str::to_string),
            user_id: user_id.to_string(),
            total_amount_cents: 10_000,
            flight: FlightSpec {
                origin: "SFO".to_string(),
                destination: "JFK".to_string(),
                depart_date: now,
                return_date: now + ChronoDuration::days(5),
            },
            hotel: HotelSpec {
                hotel_id: "hotel-1".to_string(),
                check_in: now,
                check_out: now + ChronoDuration::days(5),
            },
            car: CarSpec {
                pickup_location: "JFK".to_string(),
                dropoff_location: "JFK".to_string(),
                pickup_date: now,
                dropoff_date: now + ChronoDuration::days(5),
            },
        }
    }

    fn test_orchestrator() -> SagaOrchestrator {
        SagaOrchestrator::new(
            Arc::new(InMemoryDurableStore::new()),
            Arc::new(InMemoryCoordinationStore::new()),
            Arc::new(InMemoryBrokerGateway::default()),
            Arc::new(InMemoryNotificationHub::new()),
            Arc::new(test_clock()),
            Arc::new(SequentialIdGenerator::new()),
            SagaConfig::default(),
        )
    }

    #[tokio::test]
    async fn happy_path_admits_and_publishes_three_requests() {
        let orchestrator = test_orchestrator();
        let request = booking_request(Some("r-001"), "u1");

        let result = orchestrator.execute(request).await;

        assert_eq!(result.request_id, "r-001");
        assert_eq!(result.status, SagaStatus::Pending);
        assert!(result.message.is_none());

        let record = orchestrator
            .durable
            .find_by_request_id("r-001")
            .await
            .unwrap()
            .expect("record should exist");
        assert_eq!(record.status, SagaStatus::Pending);
    }

    #[tokio::test]
    async fn duplicate_admission_does_not_create_a_second_record() {
        let orchestrator = test_orchestrator();
        let first = orchestrator.execute(booking_request(Some("r-002"), "u1")).await;
        let second = orchestrator.execute(booking_request(Some("r-002"), "u1")).await;

        assert_eq!(first.request_id, second.request_id);
        assert_eq!(second.status, SagaStatus::Pending);
    }

    #[tokio::test]
    async fn rate_limit_rejects_sixth_request_in_window() {
        let orchestrator = test_orchestrator();
        let mut statuses = Vec::new();
        for i in 0..6 {
            let request = booking_request(Some(&format!("r-rl-{i}")), "u2");
            statuses.push(orchestrator.execute(request).await);
        }

        assert!(statuses[..5].iter().all(|r| r.status == SagaStatus::Pending));
        assert_eq!(statuses[5].status, SagaStatus::Failed);
        assert!(statuses[5].message.as_deref().unwrap_or_default().contains("Rate limit"));
    }

    #[tokio::test]
    async fn aggregate_is_fatal_on_incomplete_reservation_ids() {
        let orchestrator = test_orchestrator();
        orchestrator.execute(booking_request(Some("r-003"), "u1")).await;

        let result = orchestrator.aggregate("r-003").await;
        assert!(matches!(result, Err(OrchestratorError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn aggregate_confirms_once_all_three_legs_land() {
        let orchestrator = test_orchestrator();
        orchestrator.execute(booking_request(Some("r-004"), "u1")).await;

        for leg in Leg::publish_order() {
            orchestrator
                .durable
                .update_reservation_id("r-004", leg, &format!("{leg}-res"), leg.confirmed_marker())
                .await
                .unwrap();
        }

        let result = orchestrator.aggregate("r-004").await.expect("aggregate should succeed");
        assert_eq!(result.request_id, "r-004");
        assert!(result.booking_id.starts_with("TRV-"));

        let record = orchestrator.durable.find_by_request_id("r-004").await.unwrap().unwrap();
        assert_eq!(record.status, SagaStatus::Confirmed);
        assert!(record.completed_steps.contains(&"aggregated".to_string()));
    }

    #[tokio::test]
    async fn aggregate_is_idempotent_for_a_second_concurrent_caller() {
        let orchestrator = test_orchestrator();
        orchestrator.execute(booking_request(Some("r-005"), "u1")).await;
        for leg in Leg::publish_order() {
            orchestrator
                .durable
                .update_reservation_id("r-005", leg, &format!("{leg}-res"), leg.confirmed_marker())
                .await
                .unwrap();
        }

        let first = orchestrator.aggregate("r-005").await.expect("first aggregate");
        let second = orchestrator.aggregate("r-005").await.expect("second aggregate is benign");
        assert_eq!(first.booking_id, second.booking_id);
    }

    #[tokio::test]
    async fn aggregate_rejects_a_saga_already_past_pending_even_with_full_reservation_ids() {
        let orchestrator = test_orchestrator();
        orchestrator
            .durable
            .create(SagaRecord {
                request_id: "r-006".to_string(),
                booking_id: None,
                user_id: "u1".to_string(),
                total_amount_cents: 10_000,
                original_request: booking_request(Some("r-006"), "u1"),
                status: SagaStatus::Compensating,
                flight_reservation_id: Some("flight-res".to_string()),
                hotel_reservation_id: Some("hotel-res".to_string()),
                car_reservation_id: Some("car-res".to_string()),
                completed_steps: Vec::new(),
                error_message: None,
                error_stack: None,
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let result = orchestrator.aggregate("r-006").await;
        assert!(matches!(result, Err(OrchestratorError::InvariantViolation(_))));

        let record = orchestrator.durable.find_by_request_id("r-006").await.unwrap().unwrap();
        assert_eq!(record.status, SagaStatus::Compensating);
    }

    #[test]
    fn uuid_id_generator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<UuidIdGenerator>();
    }
}
