//! Stuck-saga sweeper: periodically reconciles pending-queue entries that
//! have sat admitted for longer than `stuck_saga_threshold_ms` without
//! reaching a terminal state.

use crate::orchestrator::{SagaOrchestrator, leg_requested_payload};
use saga_core::domain::{Leg, SagaRecord, SagaStatus};
use std::sync::Arc;
use std::time::Duration;

/// Run the sweeper loop forever, ticking every `interval`. Intended to be
/// spawned as its own task alongside the broker consumer loops.
pub async fn run(orchestrator: Arc<SagaOrchestrator>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        sweep_once(&orchestrator).await;
    }
}

/// One sweep: find pending-queue entries older than the configured
/// threshold, re-publish whichever leg requests are still missing, or give
/// up and mark the saga `Failed` with a `stuck` annotation. Either way the
/// pending-queue entry is removed so the same saga isn't reconsidered every
/// tick.
async fn sweep_once(orchestrator: &SagaOrchestrator) {
    let threshold = orchestrator.clock.now().timestamp_millis() - orchestrator.config.stuck_saga_threshold_ms;

    let stuck_ids = match orchestrator.coordination.list_pending_older_than(threshold).await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::warn!(error = %e, "sweeper: coordination store unavailable, skipping tick");
            return;
        }
    };

    for request_id in stuck_ids {
        reconcile(orchestrator, &request_id).await;
    }
}

async fn reconcile(orchestrator: &SagaOrchestrator, request_id: &str) {
    let record = match orchestrator.durable.find_by_request_id(request_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            orchestrator.coordination.dequeue_pending(request_id).await;
            return;
        }
        Err(e) => {
            tracing::warn!(request_id, error = %e, "sweeper: durable store lookup failed, will retry next tick");
            return;
        }
    };

    if record.status.is_terminal() {
        orchestrator.coordination.dequeue_pending(request_id).await;
        return;
    }

    let missing: Vec<Leg> = Leg::publish_order()
        .into_iter()
        .filter(|leg| record.reservation_id(*leg).is_none())
        .collect();

    if missing.is_empty() {
        // Every reservation id is present but the join point never fired;
        // trigger aggregation directly instead of leaving it stranded.
        if let Err(e) = orchestrator.aggregate(request_id).await {
            tracing::error!(request_id, error = %e, "sweeper: aggregation retry failed");
        }
        orchestrator.coordination.dequeue_pending(request_id).await;
        return;
    }

    if republish_missing_legs(orchestrator, request_id, &record, &missing).await {
        tracing::info!(request_id, legs = ?missing, "sweeper: republished missing leg requests");
        orchestrator
            .coordination
            .enqueue_pending(request_id, orchestrator.clock.now().timestamp_millis())
            .await;
        return;
    }

    tracing::warn!(request_id, legs = ?missing, "sweeper: marking stuck saga as failed");
    let msg = format!("stuck: no confirmation for {missing:?} within threshold");
    let _ = orchestrator.durable.set_error(request_id, &msg, None).await;
    let _ = orchestrator
        .durable
        .update_status(request_id, SagaStatus::Failed, None)
        .await;
    orchestrator
        .notifications
        .notify(request_id, saga_core::notification::BookingEvent::Failed { error: msg })
        .await;
    orchestrator.coordination.dequeue_pending(request_id).await;
    orchestrator.coordination.cleanup(request_id).await;
    metrics::counter!("saga_stuck_total").increment(1);
}

/// Republish `reservation.{leg}.requested` for every leg in `missing`,
/// rebuilding each payload from the saga's own original request. Shared by
/// the sweeper and the admin `retry` command. Returns `false` on the first
/// publish failure, so the caller can fall back to a terminal `Failed`.
pub(crate) async fn republish_missing_legs(
    orchestrator: &SagaOrchestrator,
    request_id: &str,
    record: &SagaRecord,
    missing: &[Leg],
) -> bool {
    for leg in missing {
        let payload = leg_requested_payload(*leg, request_id, &record.original_request);
        if let Err(e) = orchestrator.broker.publish(leg.requested_topic(), &payload).await {
            tracing::warn!(request_id, leg = %leg, error = %e, "republish of missing leg request failed");
            return false;
        }
        orchestrator.coordination.increment_step_counter(request_id, leg.requested_marker()).await;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SagaConfig;
    use chrono::Duration as ChronoDuration;
    use saga_core::broker::{BrokerError, BrokerGateway, ConfirmationStream};
    use saga_core::domain::{BookingRequest, CarSpec, FlightSpec, HotelSpec, SagaRecord};
    use saga_testing::{
        InMemoryBrokerGateway, InMemoryCoordinationStore, InMemoryDurableStore, InMemoryNotificationHub,
        SequentialIdGenerator, test_clock,
    };
    use std::future::Future;
    use std::pin::Pin;

    /// Broker double whose every publish fails, for exercising the
    /// sweeper's fall-back-to-`Failed` path when republishing is itself
    /// impossible.
    struct AlwaysFailingBroker;

    impl BrokerGateway for AlwaysFailingBroker {
        fn publish(
            &self,
            topic: &str,
            _payload: &serde_json::Value,
        ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
            let topic = topic.to_string();
            Box::pin(async move {
                Err(BrokerError::PublishFailed { topic, reason: "broker unavailable".to_string() })
            })
        }

        fn subscribe(
            &self,
            topics: &[&str],
        ) -> Pin<Box<dyn Future<Output = Result<ConfirmationStream, BrokerError>> + Send + '_>> {
            let topics: Vec<String> = topics.iter().map(|t| (*t).to_string()).collect();
            Box::pin(async move {
                Err(BrokerError::SubscriptionFailed { topics, reason: "broker unavailable".to_string() })
            })
        }
    }

    fn booking_request() -> BookingRequest {
        let now = chrono::Utc::now();
        BookingRequest {
            request_id: Some("r-stuck".to_string()),
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

    fn record(request_id: &str, status: SagaStatus) -> SagaRecord {
        let now = chrono::Utc::now();
        SagaRecord {
            request_id: request_id.to_string(),
            booking_id: None,
            user_id: "u1".to_string(),
            total_amount_cents: 10_000,
            original_request: booking_request(),
            status,
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
    async fn sweep_republishes_missing_requests_and_leaves_saga_pending() {
        let orchestrator = test_orchestrator();
        orchestrator.durable.create(record("r-stuck", SagaStatus::Pending)).await.unwrap();
        orchestrator.coordination.enqueue_pending("r-stuck", 0).await;

        let mut stream = orchestrator
            .broker
            .subscribe(&[Leg::Flight.requested_topic(), Leg::Hotel.requested_topic(), Leg::Car.requested_topic()])
            .await
            .unwrap();

        sweep_once(&orchestrator).await;

        let updated = orchestrator.durable.find_by_request_id("r-stuck").await.unwrap().unwrap();
        assert_eq!(updated.status, SagaStatus::Pending);

        // All three legs were missing, so all three should have been
        // republished.
        use futures::StreamExt;
        for _ in 0..3 {
            tokio::time::timeout(std::time::Duration::from_millis(50), stream.next())
                .await
                .expect("expected a republished leg request")
                .expect("stream item should not error");
        }
    }

    #[tokio::test]
    async fn sweep_marks_saga_failed_when_republish_fails() {
        let orchestrator = SagaOrchestrator::new(
            Arc::new(InMemoryDurableStore::new()),
            Arc::new(InMemoryCoordinationStore::new()),
            Arc::new(AlwaysFailingBroker),
            Arc::new(InMemoryNotificationHub::new()),
            Arc::new(test_clock()),
            Arc::new(SequentialIdGenerator::new()),
            SagaConfig::default(),
        );
        orchestrator.durable.create(record("r-stuck-fail", SagaStatus::Pending)).await.unwrap();
        orchestrator.coordination.enqueue_pending("r-stuck-fail", 0).await;

        sweep_once(&orchestrator).await;

        let updated = orchestrator.durable.find_by_request_id("r-stuck-fail").await.unwrap().unwrap();
        assert_eq!(updated.status, SagaStatus::Failed);
        assert!(updated.error_message.unwrap_or_default().contains("stuck"));
    }

    #[tokio::test]
    async fn sweep_aggregates_instead_of_failing_when_all_reservations_landed() {
        let orchestrator = test_orchestrator();
        orchestrator.durable.create(record("r-stuck-2", SagaStatus::Pending)).await.unwrap();
        for leg in Leg::publish_order() {
            orchestrator
                .durable
                .update_reservation_id("r-stuck-2", leg, &format!("{leg}-res"), leg.confirmed_marker())
                .await
                .unwrap();
        }
        orchestrator.coordination.enqueue_pending("r-stuck-2", 0).await;

        sweep_once(&orchestrator).await;

        let updated = orchestrator.durable.find_by_request_id("r-stuck-2").await.unwrap().unwrap();
        assert_eq!(updated.status, SagaStatus::Confirmed);
    }

    #[tokio::test]
    async fn sweep_leaves_terminal_sagas_alone_but_dequeues_them() {
        let orchestrator = test_orchestrator();
        orchestrator.durable.create(record("r-done", SagaStatus::Confirmed)).await.unwrap();
        orchestrator.coordination.enqueue_pending("r-done", 0).await;

        sweep_once(&orchestrator).await;

        let updated = orchestrator.durable.find_by_request_id("r-done").await.unwrap().unwrap();
        assert_eq!(updated.status, SagaStatus::Confirmed);
    }
}
