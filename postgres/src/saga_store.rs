//! Postgres-backed [`DurableStore`]: the single source of truth for saga
//! records, one row per request.
//!
//! Uses plain `sqlx::query`/`query_as` rather than the `query!`
//! compile-time macro, holds `PgPool` by value, and logs and counts
//! every write path via `tracing`+`metrics` rather than an ORM.

use chrono::{DateTime, Utc};
use saga_core::domain::{BookingRequest, Leg, SagaRecord, SagaStatus};
use saga_core::durable_store::{DurableStore, SagaStoreError, UserStats};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;

fn status_from_wire_str(s: &str) -> Result<SagaStatus, SagaStoreError> {
    match s {
        "PENDING" => Ok(SagaStatus::Pending),
        "CONFIRMED" => Ok(SagaStatus::Confirmed),
        "COMPENSATING" => Ok(SagaStatus::Compensating),
        "COMPENSATED" => Ok(SagaStatus::Compensated),
        "FAILED" => Ok(SagaStatus::Failed),
        other => Err(SagaStoreError::DatabaseError(format!(
            "unknown saga status in database: {other}"
        ))),
    }
}

fn row_to_record(row: &PgRow) -> Result<SagaRecord, SagaStoreError> {
    let status_str: String = row.get("status");
    let original_request_json: serde_json::Value = row.get("original_request");
    let original_request: BookingRequest = serde_json::from_value(original_request_json)
        .map_err(|e| SagaStoreError::SerializationError(e.to_string()))?;

    Ok(SagaRecord {
        request_id: row.get("request_id"),
        booking_id: row.get("booking_id"),
        user_id: row.get("user_id"),
        total_amount_cents: row.get("total_amount_cents"),
        original_request,
        status: status_from_wire_str(&status_str)?,
        flight_reservation_id: row.get("flight_reservation_id"),
        hotel_reservation_id: row.get("hotel_reservation_id"),
        car_reservation_id: row.get("car_reservation_id"),
        completed_steps: row.get("completed_steps"),
        error_message: row.get("error_message"),
        error_stack: row.get("error_stack"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn is_unique_violation(err: &sqlx::Error, constraint_substr: &str) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            return db_err
                .constraint()
                .is_some_and(|c| c.contains(constraint_substr));
        }
    }
    false
}

/// Postgres-backed durable saga store.
///
/// Cloning shares the underlying connection pool, matching
/// `sqlx::PgPool`'s own `Clone` semantics.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to Postgres at `database_url` and run the saga store's
    /// migrations.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::DatabaseError`] if the connection or
    /// migration fails.
    pub async fn new(database_url: &str) -> Result<Self, SagaStoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| SagaStoreError::DatabaseError(e.to_string()))?;
        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Create the `sagas` table and its indexes if they don't already
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::DatabaseError`] if the DDL fails.
    pub async fn migrate(&self) -> Result<(), SagaStoreError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS sagas (
                request_id TEXT PRIMARY KEY,
                booking_id TEXT,
                user_id TEXT NOT NULL,
                total_amount_cents BIGINT NOT NULL,
                original_request JSONB NOT NULL,
                status TEXT NOT NULL,
                flight_reservation_id TEXT,
                hotel_reservation_id TEXT,
                car_reservation_id TEXT,
                completed_steps TEXT[] NOT NULL DEFAULT '{}',
                error_message TEXT,
                error_stack TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_sagas_booking_id
                ON sagas (booking_id) WHERE booking_id IS NOT NULL;
            CREATE INDEX IF NOT EXISTS idx_sagas_user_status
                ON sagas (user_id, status);
            CREATE INDEX IF NOT EXISTS idx_sagas_status_created
                ON sagas (status, created_at);
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SagaStoreError::DatabaseError(e.to_string()))?;

        Ok(())
    }
}

impl DurableStore for PostgresSagaStore {
    fn create(
        &self,
        record: SagaRecord,
    ) -> Pin<Box<dyn Future<Output = Result<SagaRecord, SagaStoreError>> + Send + '_>> {
        Box::pin(async move {
            let original_request_json = serde_json::to_value(&record.original_request)
                .map_err(|e| SagaStoreError::SerializationError(e.to_string()))?;

            let row = sqlx::query(
                r"
                INSERT INTO sagas (
                    request_id, booking_id, user_id, total_amount_cents,
                    original_request, status, completed_steps, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING *
                ",
            )
            .bind(&record.request_id)
            .bind(&record.booking_id)
            .bind(&record.user_id)
            .bind(record.total_amount_cents)
            .bind(original_request_json)
            .bind(record.status.as_wire_str())
            .bind(&record.completed_steps)
            .bind(record.created_at)
            .bind(record.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(request_id = %record.request_id, error = %e, "saga create failed");
                SagaStoreError::DatabaseError(e.to_string())
            })?;

            metrics::counter!("saga_durable_store_records_created_total").increment(1);
            row_to_record(&row)
        })
    }

    fn find_by_request_id(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SagaRecord>, SagaStoreError>> + Send + '_>>
    {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM sagas WHERE request_id = $1")
                .bind(&request_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| SagaStoreError::DatabaseError(e.to_string()))?;

            row.as_ref().map(row_to_record).transpose()
        })
    }

    fn find_by_booking_id(
        &self,
        booking_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SagaRecord>, SagaStoreError>> + Send + '_>>
    {
        let booking_id = booking_id.to_string();
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM sagas WHERE booking_id = $1")
                .bind(&booking_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| SagaStoreError::DatabaseError(e.to_string()))?;

            row.as_ref().map(row_to_record).transpose()
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
            // The `booking_id IS NULL` guard makes this a compare-and-swap
            // when a booking id is being assigned: two concurrent
            // aggregators racing to confirm the same saga each generate
            // their own booking id, but only the first UPDATE (the row
            // still has no booking id) matches. The second sees zero rows
            // affected and is reported as a conflict below rather than
            // silently overwriting the winner's booking id.
            let row = sqlx::query(
                r"
                UPDATE sagas
                SET status = $1,
                    booking_id = COALESCE($2, booking_id),
                    updated_at = now()
                WHERE request_id = $3
                  AND ($2 IS NULL OR booking_id IS NULL)
                RETURNING *
                ",
            )
            .bind(status.as_wire_str())
            .bind(&booking_id)
            .bind(&request_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e, "booking_id") {
                    let conflicting = booking_id.clone().unwrap_or_default();
                    metrics::counter!("saga_durable_store_booking_id_conflicts_total")
                        .increment(1);
                    SagaStoreError::BookingIdConflict(conflicting)
                } else {
                    SagaStoreError::DatabaseError(e.to_string())
                }
            })?;

            if let Some(row) = row {
                metrics::counter!("saga_durable_store_status_updates_total").increment(1);
                return row_to_record(&row);
            }

            // No row matched. Either the request doesn't exist, or (when a
            // booking id was requested) the CAS guard rejected the update
            // because a concurrent aggregator already assigned one.
            // Disambiguate with a plain read.
            let existing = sqlx::query("SELECT * FROM sagas WHERE request_id = $1")
                .bind(&request_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| SagaStoreError::DatabaseError(e.to_string()))?;

            match existing {
                Some(row) if booking_id.is_some() => {
                    let existing_booking_id: Option<String> = row.get("booking_id");
                    metrics::counter!("saga_durable_store_booking_id_conflicts_total")
                        .increment(1);
                    Err(SagaStoreError::BookingIdConflict(
                        existing_booking_id.unwrap_or_default(),
                    ))
                }
                Some(row) => row_to_record(&row),
                None => Err(SagaStoreError::NotFound(request_id)),
            }
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
            let column = match leg {
                Leg::Flight => "flight_reservation_id",
                Leg::Hotel => "hotel_reservation_id",
                Leg::Car => "car_reservation_id",
            };

            let sql = format!(
                r"
                UPDATE sagas
                SET {column} = $1,
                    completed_steps = completed_steps || $2,
                    updated_at = now()
                WHERE request_id = $3
                  AND NOT completed_steps @> ARRAY[$2]
                RETURNING *
                "
            );

            let row = sqlx::query(&sql)
                .bind(&reservation_id)
                .bind(&step_marker)
                .bind(&request_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| SagaStoreError::DatabaseError(e.to_string()))?;

            if let Some(row) = row {
                return row_to_record(&row);
            }

            // Either the marker was already applied (idempotent replay) or
            // the request doesn't exist. Disambiguate with a plain read.
            let existing = sqlx::query("SELECT * FROM sagas WHERE request_id = $1")
                .bind(&request_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| SagaStoreError::DatabaseError(e.to_string()))?;

            match existing {
                Some(row) => {
                    tracing::debug!(
                        request_id = %request_id,
                        marker = %step_marker,
                        "duplicate confirmation ignored (marker already recorded)"
                    );
                    row_to_record(&row)
                }
                None => Err(SagaStoreError::NotFound(request_id)),
            }
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
            let row = sqlx::query(
                r"
                UPDATE sagas
                SET error_message = $1,
                    error_stack = $2,
                    updated_at = now()
                WHERE request_id = $3
                RETURNING *
                ",
            )
            .bind(&error_message)
            .bind(&error_stack)
            .bind(&request_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SagaStoreError::DatabaseError(e.to_string()))?;

            match row {
                Some(row) => row_to_record(&row),
                None => Err(SagaStoreError::NotFound(request_id)),
            }
        })
    }

    fn find_pending(
        &self,
        older_than: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SagaRecord>, SagaStoreError>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT * FROM sagas
                WHERE status = $1 AND created_at < $2
                ORDER BY created_at ASC
                ",
            )
            .bind(SagaStatus::Pending.as_wire_str())
            .bind(older_than)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SagaStoreError::DatabaseError(e.to_string()))?;

            rows.iter().map(row_to_record).collect()
        })
    }

    fn aggregate_stats_by_user(
        &self,
        user_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<UserStats, SagaStoreError>> + Send + '_>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT
                    COUNT(*) AS total,
                    COUNT(*) FILTER (WHERE status = 'CONFIRMED') AS confirmed,
                    COUNT(*) FILTER (WHERE status = 'FAILED') AS failed,
                    COUNT(*) FILTER (WHERE status = 'COMPENSATED') AS compensated
                FROM sagas
                WHERE user_id = $1
                ",
            )
            .bind(&user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SagaStoreError::DatabaseError(e.to_string()))?;

            Ok(UserStats {
                user_id,
                total: row.get("total"),
                confirmed: row.get("confirmed"),
                failed: row.get("failed"),
                compensated: row.get("compensated"),
            })
        })
    }

    fn mark_aggregated(
        &self,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<SagaRecord, SagaStoreError>> + Send + '_>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let row = sqlx::query(
                r"
                UPDATE sagas
                SET completed_steps = completed_steps || $1,
                    updated_at = now()
                WHERE request_id = $2
                  AND NOT completed_steps @> ARRAY[$1]
                RETURNING *
                ",
            )
            .bind("aggregated")
            .bind(&request_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SagaStoreError::DatabaseError(e.to_string()))?;

            if let Some(row) = row {
                return row_to_record(&row);
            }

            let existing = sqlx::query("SELECT * FROM sagas WHERE request_id = $1")
                .bind(&request_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| SagaStoreError::DatabaseError(e.to_string()))?;

            match existing {
                Some(row) => row_to_record(&row),
                None => Err(SagaStoreError::NotFound(request_id)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_round_trip() {
        for status in [
            SagaStatus::Pending,
            SagaStatus::Confirmed,
            SagaStatus::Compensating,
            SagaStatus::Compensated,
            SagaStatus::Failed,
        ] {
            let wire = status.as_wire_str();
            assert_eq!(status_from_wire_str(wire).unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_database_error() {
        assert!(status_from_wire_str("NOT_A_STATUS").is_err());
    }
}
