//! Durable state store abstraction: the single source of truth for saga
//! records.
//!
//! # Design
//!
//! The trait is deliberately minimal and focused on exactly what the
//! orchestrator, adapters, and sweeper need:
//!
//! - Create and look up saga records (by `requestId` or `bookingId`)
//! - Atomically set a reservation id and append a step marker in one
//!   statement, so the join-point check in
//!   [`crate::domain::SagaRecord::all_legs_confirmed`] is always reading
//!   consistent post-update state
//! - Update status / record errors
//! - Query pending records older than a threshold, for the sweeper
//! - Aggregate per-user stats, for admin/recovery tooling
//!
//! It does NOT provide event replay, projections, or complex querying —
//! those concerns belong to the caller.
//!
//! # Dyn Compatibility
//!
//! Uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn` so it
//! can be held as `Arc<dyn DurableStore>` by the orchestrator, adapters,
//! and sweeper.

use crate::domain::{Leg, SagaRecord, SagaStatus};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during durable store operations.
#[derive(Error, Debug)]
pub enum SagaStoreError {
    /// No record exists for the given request id.
    #[error("no saga record for request id {0}")]
    NotFound(String),

    /// A `bookingId` uniqueness conflict — the expected outcome when two
    /// concurrent aggregators race to confirm the same saga; the loser
    /// should reload and treat the existing `Confirmed` record as success.
    #[error("booking id {0} already assigned")]
    BookingIdConflict(String),

    /// Database connection or query failure.
    #[error("database error: {0}")]
    DatabaseError(String),

    /// Failed to (de)serialise the original request snapshot.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

/// Per-user aggregate booking statistics, for admin/recovery tooling.
#[derive(Debug, Clone, PartialEq)]
pub struct UserStats {
    /// The user these stats describe.
    pub user_id: String,
    /// Total saga records for this user.
    pub total: i64,
    /// How many are `Confirmed`.
    pub confirmed: i64,
    /// How many are `Failed`.
    pub failed: i64,
    /// How many are `Compensated`.
    pub compensated: i64,
}

/// Durable state store: the authoritative record of every saga.
pub trait DurableStore: Send + Sync {
    /// Create a new saga record. Callers must have already established
    /// (via [`crate::coordination::CoordinationStore`] dedup and this
    /// store's own unique `request_id` constraint) that no record exists.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::DatabaseError`] on storage failure.
    fn create(
        &self,
        record: SagaRecord,
    ) -> Pin<Box<dyn Future<Output = Result<SagaRecord, SagaStoreError>> + Send + '_>>;

    /// Look up a saga record by its idempotency key.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::DatabaseError`] on storage failure. A
    /// missing record is `Ok(None)`, not an error.
    fn find_by_request_id(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SagaRecord>, SagaStoreError>> + Send + '_>>;

    /// Look up a saga record by its customer-facing confirmation number.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::DatabaseError`] on storage failure.
    fn find_by_booking_id(
        &self,
        booking_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SagaRecord>, SagaStoreError>> + Send + '_>>;

    /// Update a saga's status. Used for admission failures, aggregation
    /// success, and compensation-path transitions.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::NotFound`] if no record exists, or
    /// [`SagaStoreError::DatabaseError`] on storage failure.
    fn update_status(
        &self,
        request_id: &str,
        status: SagaStatus,
        booking_id: Option<String>,
    ) -> Pin<Box<dyn Future<Output = Result<SagaRecord, SagaStoreError>> + Send + '_>>;

    /// Atomically set a leg's reservation id and append its confirmed step
    /// marker, in one statement. Idempotent: re-applying the same marker
    /// for a leg that already has it recorded is a no-op (the update's
    /// `WHERE` clause excludes rows that already contain the marker), so a
    /// replayed confirmation never double-appends.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::NotFound`] if no record exists, or
    /// [`SagaStoreError::DatabaseError`] on storage failure.
    fn update_reservation_id(
        &self,
        request_id: &str,
        leg: Leg,
        reservation_id: &str,
        step_marker: &str,
    ) -> Pin<Box<dyn Future<Output = Result<SagaRecord, SagaStoreError>> + Send + '_>>;

    /// Record an error on a saga record without necessarily changing its
    /// status (used e.g. for "Pending with error metadata" after a
    /// partial-publish failure).
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::NotFound`] if no record exists, or
    /// [`SagaStoreError::DatabaseError`] on storage failure.
    fn set_error(
        &self,
        request_id: &str,
        error_message: &str,
        error_stack: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<SagaRecord, SagaStoreError>> + Send + '_>>;

    /// Find pending records created before the given instant, for the
    /// stuck-saga sweeper.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::DatabaseError`] on storage failure.
    fn find_pending(
        &self,
        older_than: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SagaRecord>, SagaStoreError>> + Send + '_>>;

    /// Aggregate per-user booking statistics, for admin/recovery tooling.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::DatabaseError`] on storage failure.
    fn aggregate_stats_by_user(
        &self,
        user_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<UserStats, SagaStoreError>> + Send + '_>>;

    /// Append the `"aggregated"` marker to `completed_steps`, idempotently.
    /// Used by the orchestrator's join-point aggregation alongside
    /// [`DurableStore::update_status`] to satisfy invariant 3 (`status =
    /// Confirmed` implies `aggregated ⊆ completedSteps`).
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::NotFound`] if no record exists, or
    /// [`SagaStoreError::DatabaseError`] on storage failure.
    fn mark_aggregated(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<SagaRecord, SagaStoreError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_error_display() {
        let error = SagaStoreError::NotFound("r-001".to_string());
        assert!(format!("{error}").contains("r-001"));
    }

    #[test]
    fn booking_id_conflict_display() {
        let error = SagaStoreError::BookingIdConflict("TRV-1-ABC".to_string());
        assert!(format!("{error}").contains("TRV-1-ABC"));
    }
}
