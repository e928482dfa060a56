//! The legacy synchronous compensation path.
//!
//! Before the broker-driven admission/aggregation flow in
//! [`crate::orchestrator`] existed, a saga could be driven end to end
//! synchronously: reserve flight and hotel, then car; if car fails,
//! unwind whatever was already reserved in strict reverse order. This
//! path still exists for callers that can't tolerate the asynchronous
//! confirmation round trip and accept the latency of calling downstream
//! services inline instead.
//!
//! The downstream flight/hotel/car services are external collaborators —
//! only their request/confirm/cancel message contract matters here, so it
//! is modeled as a small local trait rather than anything in `saga-core`.

use crate::orchestrator::{AdmissionResult, SagaOrchestrator};
use crate::reducer::{SagaEvent, SagaReducer};
use saga_core::domain::{BookingRequest, Leg, SagaStatus};
use saga_core::reducer::Reducer;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Synchronous per-leg reservation contract used only by
/// [`SagaOrchestrator::execute_old`]. Implementations wrap whatever
/// transport the downstream flight/hotel/car services actually expose
/// (REST, gRPC, ...); that transport is out of scope here.
pub trait LegService: Send + Sync {
    /// Reserve this leg synchronously, returning the downstream
    /// reservation id.
    fn reserve(
        &self,
        leg: Leg,
        request: &BookingRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, LegServiceError>> + Send + '_>>;

    /// Cancel a previously made reservation.
    fn cancel(
        &self,
        leg: Leg,
        reservation_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), LegServiceError>> + Send + '_>>;
}

/// A downstream reservation or cancellation attempt failed.
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct LegServiceError(pub String);

/// Sink for legs whose compensation (cancellation) itself failed and has
/// nowhere left to retry inside this system.
pub trait DeadLetterSink: Send + Sync {
    /// Record a failed cancellation attempt.
    fn record(
        &self,
        request_id: &str,
        leg: Leg,
        reservation_id: Option<&str>,
        error_message: &str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

impl DeadLetterSink for saga_postgres::DeadLetterQueue {
    fn record(
        &self,
        request_id: &str,
        leg: Leg,
        reservation_id: Option<&str>,
        error_message: &str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let request_id = request_id.to_string();
        let reservation_id = reservation_id.map(str::to_string);
        let error_message = error_message.to_string();
        Box::pin(async move {
            if let Err(e) = self
                .add_entry(&request_id, leg, reservation_id.as_deref(), &error_message, None)
                .await
            {
                tracing::error!(request_id = %request_id, leg = %leg, error = %e, "failed to record compensation failure in dead-letter queue");
            }
        })
    }
}

impl SagaOrchestrator {
    /// Drive a booking synchronously: reserve flight and hotel, then car.
    /// On car failure, compensate whatever was already reserved in strict
    /// reverse order (car, hotel, flight); a cancellation failure for one
    /// leg does not stop attempts on the others, and is recorded to
    /// `dead_letter` independently.
    pub async fn execute_old(
        &self,
        request_id: &str,
        request: &BookingRequest,
        legs: &dyn LegService,
        dead_letter: &dyn DeadLetterSink,
    ) -> AdmissionResult {
        let mut reserved: Vec<(Leg, String)> = Vec::new();

        for leg in [Leg::Flight, Leg::Hotel] {
            match legs.reserve(leg, request).await {
                Ok(reservation_id) => reserved.push((leg, reservation_id)),
                Err(e) => {
                    // Nothing salvageable here even after unwinding whatever
                    // was already reserved: the booking never had all three
                    // legs in flight, so the net outcome is Failed, not
                    // Compensated.
                    self.compensate(request_id, &reserved, legs, dead_letter, SagaStatus::Failed).await;
                    return AdmissionResult {
                        request_id: request_id.to_string(),
                        status: SagaStatus::Failed,
                        message: Some(e.0),
                    };
                }
            }
        }

        match legs.reserve(Leg::Car, request).await {
            Ok(reservation_id) => {
                reserved.push((Leg::Car, reservation_id));
                AdmissionResult {
                    request_id: request_id.to_string(),
                    status: SagaStatus::Confirmed,
                    message: None,
                }
            }
            Err(e) => {
                self.compensate(request_id, &reserved, legs, dead_letter, SagaStatus::Compensated).await;
                AdmissionResult {
                    request_id: request_id.to_string(),
                    status: SagaStatus::Compensated,
                    message: Some(e.0),
                }
            }
        }
    }

    /// Unwind whatever in `reserved` was already booked, then persist
    /// `finalize_as` (`Compensated` or `Failed`) as the saga's terminal
    /// status. Both the `Compensating` entry and the terminal exit are
    /// gated through [`SagaReducer`] so a caller can't drive the record
    /// into a status the transition table doesn't allow.
    async fn compensate(
        &self,
        request_id: &str,
        reserved: &[(Leg, String)],
        legs: &dyn LegService,
        dead_letter: &dyn DeadLetterSink,
        finalize_as: SagaStatus,
    ) {
        let mut status = SagaStatus::Pending;
        SagaReducer.reduce(&mut status, SagaEvent::SyncPathFailed, &());
        let _ = self.durable.update_status(request_id, status, None).await;

        for leg in Leg::compensation_order() {
            let Some((_, reservation_id)) = reserved.iter().find(|(l, _)| *l == leg) else {
                continue;
            };
            if let Err(e) = legs.cancel(leg, reservation_id).await {
                dead_letter.record(request_id, leg, Some(reservation_id), &e.0).await;
                if let Some(payload) = compensation_failed_payload(request_id, leg, reservation_id, &e.0) {
                    let _ = self.broker.publish("compensation.failed", &payload).await;
                }
            }
        }

        let event = if finalize_as == SagaStatus::Compensated {
            SagaEvent::CompensationFinalized
        } else {
            SagaEvent::CompensationUninitializable
        };
        SagaReducer.reduce(&mut status, event, &());
        let _ = self.durable.update_status(request_id, status, None).await;
    }
}

fn compensation_failed_payload(
    request_id: &str,
    leg: Leg,
    reservation_id: &str,
    error_message: &str,
) -> Option<serde_json::Value> {
    Some(serde_json::json!({
        "requestId": request_id,
        "leg": leg.to_string(),
        "reservationId": reservation_id,
        "errorMessage": error_message,
        "retryCount": 0,
    }))
}

/// Test-only [`LegService`] double, scripted per leg.
#[cfg(test)]
pub(crate) struct ScriptedLegService {
    car_fails: bool,
    cancel_fails_for: Vec<Leg>,
}

#[cfg(test)]
impl ScriptedLegService {
    pub(crate) fn new(car_fails: bool, cancel_fails_for: Vec<Leg>) -> Self {
        Self { car_fails, cancel_fails_for }
    }
}

#[cfg(test)]
impl LegService for ScriptedLegService {
    fn reserve(
        &self,
        leg: Leg,
        _request: &BookingRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, LegServiceError>> + Send + '_>> {
        Box::pin(async move {
            if leg == Leg::Car && self.car_fails {
                return Err(LegServiceError("car inventory exhausted".to_string()));
            }
            Ok(format!("{leg}-res-scripted"))
        })
    }

    fn cancel(
        &self,
        leg: Leg,
        _reservation_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), LegServiceError>> + Send + '_>> {
        Box::pin(async move {
            if self.cancel_fails_for.contains(&leg) {
                return Err(LegServiceError(format!("{leg} cancellation endpoint returned 500")));
            }
            Ok(())
        })
    }
}

/// Test-only [`DeadLetterSink`] double, recording entries in memory.
#[cfg(test)]
pub(crate) struct InMemoryDeadLetterSink {
    entries: std::sync::Mutex<Vec<(String, Leg, String)>>,
}

#[cfg(test)]
impl InMemoryDeadLetterSink {
    pub(crate) fn new() -> Self {
        Self { entries: std::sync::Mutex::new(Vec::new()) }
    }

    pub(crate) fn entries(&self) -> Vec<(String, Leg, String)> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
impl DeadLetterSink for InMemoryDeadLetterSink {
    fn record(
        &self,
        request_id: &str,
        leg: Leg,
        _reservation_id: Option<&str>,
        error_message: &str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let request_id = request_id.to_string();
        let error_message = error_message.to_string();
        Box::pin(async move {
            self.entries
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((request_id, leg, error_message));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SagaConfig;
    use chrono::Duration as ChronoDuration;
    use saga_core::domain::{CarSpec, FlightSpec, HotelSpec};
    use saga_testing::{
        InMemoryBrokerGateway, InMemoryCoordinationStore, InMemoryDurableStore, InMemoryNotificationHub,
        SequentialIdGenerator, test_clock,
    };

    fn booking_request() -> BookingRequest {
        let now = chrono::Utc::now();
        BookingRequest {
            request_id: Some("r-legacy".to_string()),
            user_id: "u1".to_string(),
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
    async fn happy_path_confirms_all_three_legs() {
        let orchestrator = test_orchestrator();
        orchestrator
            .durable
            .create(saga_core::domain::SagaRecord {
                request_id: "r-legacy".to_string(),
                booking_id: None,
                user_id: "u1".to_string(),
                total_amount_cents: 10_000,
                original_request: booking_request(),
                status: SagaStatus::Pending,
                flight_reservation_id: None,
                hotel_reservation_id: None,
                car_reservation_id: None,
                completed_steps: Vec::new(),
                error_message: None,
                error_stack: None,
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let legs = ScriptedLegService::new(false, vec![]);
        let dlq = InMemoryDeadLetterSink::new();

        let result = orchestrator.execute_old("r-legacy", &booking_request(), &legs, &dlq).await;
        assert_eq!(result.status, SagaStatus::Confirmed);
        assert!(dlq.entries().is_empty());
    }

    #[tokio::test]
    async fn car_failure_compensates_hotel_and_flight_in_reverse_order() {
        let orchestrator = test_orchestrator();
        orchestrator
            .durable
            .create(saga_core::domain::SagaRecord {
                request_id: "r-legacy-2".to_string(),
                booking_id: None,
                user_id: "u1".to_string(),
                total_amount_cents: 10_000,
                original_request: booking_request(),
                status: SagaStatus::Pending,
                flight_reservation_id: None,
                hotel_reservation_id: None,
                car_reservation_id: None,
                completed_steps: Vec::new(),
                error_message: None,
                error_stack: None,
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let legs = ScriptedLegService::new(true, vec![]);
        let dlq = InMemoryDeadLetterSink::new();

        let result = orchestrator.execute_old("r-legacy-2", &booking_request(), &legs, &dlq).await;
        assert_eq!(result.status, SagaStatus::Compensated);
        assert!(dlq.entries().is_empty());

        let record = orchestrator.durable.find_by_request_id("r-legacy-2").await.unwrap().unwrap();
        assert_eq!(record.status, SagaStatus::Compensated);
    }

    #[tokio::test]
    async fn compensation_cancel_failure_is_dead_lettered_and_does_not_stop_other_cancels() {
        let orchestrator = test_orchestrator();
        orchestrator
            .durable
            .create(saga_core::domain::SagaRecord {
                request_id: "r-legacy-3".to_string(),
                booking_id: None,
                user_id: "u1".to_string(),
                total_amount_cents: 10_000,
                original_request: booking_request(),
                status: SagaStatus::Pending,
                flight_reservation_id: None,
                hotel_reservation_id: None,
                car_reservation_id: None,
                completed_steps: Vec::new(),
                error_message: None,
                error_stack: None,
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let legs = ScriptedLegService::new(true, vec![Leg::Hotel]);
        let dlq = InMemoryDeadLetterSink::new();

        let result = orchestrator.execute_old("r-legacy-3", &booking_request(), &legs, &dlq).await;
        assert_eq!(result.status, SagaStatus::Compensated);

        let entries = dlq.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1, Leg::Hotel);
    }
}
