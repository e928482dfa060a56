//! Dead-letter sink for legs whose compensation (cancellation) itself
//! failed.
//!
//! A reservation that cannot be confirmed is handled by the saga's own
//! compensation path; a reservation that cannot be *cancelled* during
//! compensation has nowhere left to retry inside this system, so it is
//! persisted here for an operator or an external consumer to resolve,
//! narrowed to the `compensation.failed` wire shape.

use chrono::{DateTime, Utc};
use saga_core::domain::Leg;
use saga_core::durable_store::SagaStoreError;
use sqlx::{PgPool, Row};

/// Status of a compensation-failure entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DLQStatus {
    /// Pending investigation or manual reprocessing.
    Pending,
    /// Picked up by an operator/consumer and being worked.
    Processing,
    /// The leg was successfully cancelled out of band.
    Resolved,
    /// Permanently unresolvable (e.g. the downstream booking no longer
    /// exists).
    Discarded,
}

impl DLQStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse from the database string representation.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::DatabaseError`] if the string doesn't
    /// match a known status.
    pub fn parse(s: &str) -> Result<Self, SagaStoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            other => Err(SagaStoreError::DatabaseError(format!(
                "invalid dead-letter status: {other}"
            ))),
        }
    }
}

fn leg_from_str(s: &str) -> Result<Leg, SagaStoreError> {
    match s {
        "flight" => Ok(Leg::Flight),
        "hotel" => Ok(Leg::Hotel),
        "car" => Ok(Leg::Car),
        other => Err(SagaStoreError::DatabaseError(format!(
            "invalid leg in dead-letter entry: {other}"
        ))),
    }
}

/// A leg whose compensation could not be completed.
///
/// Mirrors the `compensation.failed` event's wire fields plus
/// operator-facing resolution metadata.
/// `retry_count` is always `0`: this system never retries a compensation
/// failure itself, leaving that to whatever external consumer reads the
/// entry.
#[derive(Debug, Clone)]
pub struct CompensationFailure {
    /// Unique identifier for this entry.
    pub id: i64,
    /// The saga's idempotency key.
    pub request_id: String,
    /// Which leg's cancellation failed.
    pub leg: Leg,
    /// The downstream reservation id that could not be cancelled, if one
    /// had been assigned.
    pub reservation_id: Option<String>,
    /// Human-readable error message from the failed cancellation attempt.
    pub error_message: String,
    /// Full error detail (debug output, stack trace), if captured.
    pub error_stack: Option<String>,
    /// Always `0`; carried for wire-shape parity with `compensation.failed`.
    pub retry_count: i32,
    /// When this entry was first recorded.
    pub first_failed_at: DateTime<Utc>,
    /// When this entry was last touched.
    pub last_failed_at: DateTime<Utc>,
    /// Current resolution status.
    pub status: DLQStatus,
    /// When the entry was resolved, if it has been.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who or what resolved it.
    pub resolved_by: Option<String>,
    /// Free-form resolution notes.
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL`-backed dead-letter sink for failed compensations.
pub struct DeadLetterQueue {
    pool: PgPool,
}

impl DeadLetterQueue {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `compensation_failures` table if it doesn't already
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::DatabaseError`] if the DDL fails.
    pub async fn migrate(&self) -> Result<(), SagaStoreError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS compensation_failures (
                id BIGSERIAL PRIMARY KEY,
                request_id TEXT NOT NULL,
                leg TEXT NOT NULL,
                reservation_id TEXT,
                error_message TEXT NOT NULL,
                error_stack TEXT,
                retry_count INT NOT NULL DEFAULT 0,
                first_failed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                last_failed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                status TEXT NOT NULL DEFAULT 'pending',
                resolved_at TIMESTAMPTZ,
                resolved_by TEXT,
                resolution_notes TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_compensation_failures_status
                ON compensation_failures (status, first_failed_at);
            CREATE INDEX IF NOT EXISTS idx_compensation_failures_request_id
                ON compensation_failures (request_id);
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SagaStoreError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    /// Record a leg whose compensation failed.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::DatabaseError`] if the insert fails.
    pub async fn add_entry(
        &self,
        request_id: &str,
        leg: Leg,
        reservation_id: Option<&str>,
        error_message: &str,
        error_stack: Option<&str>,
    ) -> Result<i64, SagaStoreError> {
        let leg_str = leg.to_string();
        let id: (i64,) = sqlx::query_as(
            r"
            INSERT INTO compensation_failures (
                request_id, leg, reservation_id, error_message, error_stack, retry_count
            ) VALUES ($1, $2, $3, $4, $5, 0)
            RETURNING id
            ",
        )
        .bind(request_id)
        .bind(&leg_str)
        .bind(reservation_id)
        .bind(error_message)
        .bind(error_stack)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SagaStoreError::DatabaseError(e.to_string()))?;

        tracing::warn!(
            dlq_id = id.0,
            request_id = request_id,
            leg = %leg,
            error = error_message,
            "compensation failure recorded"
        );

        metrics::counter!("saga_dlq_added_total", "leg" => leg_str).increment(1);

        Ok(id.0)
    }

    /// List pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::DatabaseError`] if the query fails.
    pub async fn list_pending(
        &self,
        limit: i64,
    ) -> Result<Vec<CompensationFailure>, SagaStoreError> {
        self.list_by_status(DLQStatus::Pending, limit).await
    }

    /// List entries by status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::DatabaseError`] if the query fails.
    pub async fn list_by_status(
        &self,
        status: DLQStatus,
        limit: i64,
    ) -> Result<Vec<CompensationFailure>, SagaStoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, request_id, leg, reservation_id, error_message, error_stack,
                   retry_count, first_failed_at, last_failed_at, status,
                   resolved_at, resolved_by, resolution_notes
            FROM compensation_failures
            WHERE status = $1
            ORDER BY first_failed_at ASC
            LIMIT $2
            ",
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SagaStoreError::DatabaseError(e.to_string()))?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    /// Fetch a single entry by id.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::DatabaseError`] if the query fails or no
    /// row matches.
    pub async fn get_by_id(&self, id: i64) -> Result<CompensationFailure, SagaStoreError> {
        let row = sqlx::query(
            r"
            SELECT id, request_id, leg, reservation_id, error_message, error_stack,
                   retry_count, first_failed_at, last_failed_at, status,
                   resolved_at, resolved_by, resolution_notes
            FROM compensation_failures
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SagaStoreError::DatabaseError(e.to_string()))?;

        Self::row_to_entry(&row)
    }

    /// Mark an entry resolved (the leg was cancelled out of band).
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::DatabaseError`] if the update fails.
    pub async fn mark_resolved(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), SagaStoreError> {
        sqlx::query(
            r"
            UPDATE compensation_failures
            SET status = 'resolved', resolved_at = now(), resolved_by = $1, resolution_notes = $2
            WHERE id = $3
            ",
        )
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| SagaStoreError::DatabaseError(e.to_string()))?;

        tracing::info!(dlq_id = id, resolved_by, "compensation failure resolved");
        metrics::counter!("saga_dlq_resolved_total").increment(1);

        Ok(())
    }

    /// Mark an entry permanently unresolvable.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::DatabaseError`] if the update fails.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), SagaStoreError> {
        sqlx::query(
            r"
            UPDATE compensation_failures
            SET status = 'discarded', resolved_at = now(), resolution_notes = $1
            WHERE id = $2
            ",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| SagaStoreError::DatabaseError(e.to_string()))?;

        tracing::warn!(dlq_id = id, reason, "compensation failure discarded");
        metrics::counter!("saga_dlq_discarded_total").increment(1);

        Ok(())
    }

    /// Count pending entries, for health checks.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::DatabaseError`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, SagaStoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM compensation_failures WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| SagaStoreError::DatabaseError(e.to_string()))?;

        Ok(count)
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<CompensationFailure, SagaStoreError> {
        let leg_str: String = row.get("leg");
        let status_str: String = row.get("status");

        Ok(CompensationFailure {
            id: row.get("id"),
            request_id: row.get("request_id"),
            leg: leg_from_str(&leg_str)?,
            reservation_id: row.get("reservation_id"),
            error_message: row.get("error_message"),
            error_stack: row.get("error_stack"),
            retry_count: row.get("retry_count"),
            first_failed_at: row.get("first_failed_at"),
            last_failed_at: row.get("last_failed_at"),
            status: DLQStatus::parse(&status_str)?,
            resolved_at: row.get("resolved_at"),
            resolved_by: row.get("resolved_by"),
            resolution_notes: row.get("resolution_notes"),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn dlq_status_roundtrip() {
        for status in [
            DLQStatus::Pending,
            DLQStatus::Processing,
            DLQStatus::Resolved,
            DLQStatus::Discarded,
        ] {
            let parsed = DLQStatus::parse(status.as_str()).expect("valid status should parse");
            assert_eq!(status, parsed);
        }
    }

    #[test]
    fn dlq_status_invalid() {
        assert!(DLQStatus::parse("invalid").is_err());
    }

    #[test]
    fn leg_roundtrip() {
        for leg in Leg::publish_order() {
            let parsed = leg_from_str(&leg.to_string()).expect("valid leg should parse");
            assert_eq!(leg, parsed);
        }
    }

    #[test]
    fn leg_invalid() {
        assert!(leg_from_str("boat").is_err());
    }
}
