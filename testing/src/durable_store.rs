//! In-memory durable store for fast, deterministic saga orchestrator
//! tests. Complements [`crate::coordination_store::InMemoryCoordinationStore`]
//! and [`crate::broker::InMemoryBrokerGateway`] to provide a complete
//! in-memory testing stack.

use chrono::{DateTime, Utc};
use saga_core::domain::{Leg, SagaRecord, SagaStatus};
use saga_core::durable_store::{DurableStore, SagaStoreError, UserStats};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

/// `HashMap`-backed [`DurableStore`] for tests.
#[derive(Default)]
pub struct InMemoryDurableStore {
    records: Mutex<HashMap<String, SagaRecord>>,
    booking_index: Mutex<HashMap<String, String>>,
}

impl InMemoryDurableStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for InMemoryDurableStore {
    fn create(
        &self,
        record: SagaRecord,
    ) -> Pin<Box<dyn Future<Output = Result<SagaRecord, SagaStoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            records.insert(record.request_id.clone(), record.clone());
            Ok(record)
        })
    }

    fn find_by_request_id(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SagaRecord>, SagaStoreError>> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            Ok(records.get(&request_id).cloned())
        })
    }

    fn find_by_booking_id(
        &self,
        booking_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SagaRecord>, SagaStoreError>> + Send + '_>> {
        let booking_id = booking_id.to_string();
        Box::pin(async move {
            let index = self.booking_index.lock().unwrap_or_else(|e| e.into_inner());
            let Some(request_id) = index.get(&booking_id) else {
                return Ok(None);
            };
            let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            Ok(records.get(request_id).cloned())
        })
    }

    fn update_status(
        &self,
        request_id: &str,
        status: SagaStatus,
        booking_id: Option<String>,
    ) -> Pin<Box<dyn Future<Output = Result<SagaRecord, SagaStoreError>> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            let record = records
                .get_mut(&request_id)
                .ok_or_else(|| SagaStoreError::NotFound(request_id.clone()))?;

            if let Some(booking_id) = booking_id {
                if record.booking_id.is_none() {
                    let mut index = self.booking_index.lock().unwrap_or_else(|e| e.into_inner());
                    if index.contains_key(&booking_id) {
                        return Err(SagaStoreError::BookingIdConflict(booking_id));
                    }
                    index.insert(booking_id.clone(), request_id.clone());
                    record.booking_id = Some(booking_id);
                }
            }
            record.status = status;
            record.updated_at = Utc::now();
            Ok(record.clone())
        })
    }

    fn update_reservation_id(
        &self,
        request_id: &str,
        leg: Leg,
        reservation_id: &str,
        step_marker: &str,
    ) -> Pin<Box<dyn Future<Output = Result<SagaRecord, SagaStoreError>> + Send + '_>> {
        let request_id = request_id.to_string();
        let reservation_id = reservation_id.to_string();
        let step_marker = step_marker.to_string();
        Box::pin(async move {
            let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            let record = records
                .get_mut(&request_id)
                .ok_or_else(|| SagaStoreError::NotFound(request_id.clone()))?;

            let already_applied = record.completed_steps.iter().any(|m| m == &step_marker);
            if !already_applied {
                match leg {
                    Leg::Flight => record.flight_reservation_id = Some(reservation_id),
                    Leg::Hotel => record.hotel_reservation_id = Some(reservation_id),
                    Leg::Car => record.car_reservation_id = Some(reservation_id),
                }
                record.completed_steps.push(step_marker);
                record.updated_at = Utc::now();
            }
            Ok(record.clone())
        })
    }

    fn set_error(
        &self,
        request_id: &str,
        error_message: &str,
        error_stack: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<SagaRecord, SagaStoreError>> + Send + '_>> {
        let request_id = request_id.to_string();
        let error_message = error_message.to_string();
        let error_stack = error_stack.map(str::to_string);
        Box::pin(async move {
            let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            let record = records
                .get_mut(&request_id)
                .ok_or_else(|| SagaStoreError::NotFound(request_id.clone()))?;
            record.error_message = Some(error_message);
            record.error_stack = error_stack;
            record.updated_at = Utc::now();
            Ok(record.clone())
        })
    }

    fn find_pending(
        &self,
        older_than: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SagaRecord>, SagaStoreError>> + Send + '_>> {
        Box::pin(async move {
            let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            Ok(records
                .values()
                .filter(|r| r.status == SagaStatus::Pending && r.created_at < older_than)
                .cloned()
                .collect())
        })
    }

    fn aggregate_stats_by_user(
        &self,
        user_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<UserStats, SagaStoreError>> + Send + '_>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            let mine = records.values().filter(|r| r.user_id == user_id);
            let mut stats = UserStats {
                user_id: user_id.clone(),
                total: 0,
                confirmed: 0,
                failed: 0,
                compensated: 0,
            };
            for record in mine {
                stats.total += 1;
                match record.status {
                    SagaStatus::Confirmed => stats.confirmed += 1,
                    SagaStatus::Failed => stats.failed += 1,
                    SagaStatus::Compensated => stats.compensated += 1,
                    SagaStatus::Pending | SagaStatus::Compensating => {}
                }
            }
            Ok(stats)
        })
    }

    fn mark_aggregated(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<SagaRecord, SagaStoreError>> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            let record = records
                .get_mut(&request_id)
                .ok_or_else(|| SagaStoreError::NotFound(request_id.clone()))?;
            if !record.completed_steps.iter().any(|m| m == "aggregated") {
                record.completed_steps.push("aggregated".to_string());
                record.updated_at = Utc::now();
            }
            Ok(record.clone())
        })
    }
}
