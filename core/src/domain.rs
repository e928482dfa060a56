//! Domain types shared by every crate in the workspace: the booking
//! request, the durable saga record, the closed status enum, and the leg
//! enum used to collapse the three near-identical reservation adapters into
//! one generic handler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the three independent downstream reservations a booking needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Leg {
    /// Flight reservation, 40% of the total amount.
    Flight,
    /// Hotel reservation, 35% of the total amount.
    Hotel,
    /// Car rental reservation, 25% of the total amount.
    Car,
}

impl Leg {
    /// All three legs, in the fixed publication order used by admission
    /// (hotel, flight, car) and the reverse order used by compensation
    /// (car, hotel, flight).
    #[must_use]
    pub const fn publish_order() -> [Leg; 3] {
        [Leg::Hotel, Leg::Flight, Leg::Car]
    }

    /// The three legs in strict reverse-compensation order.
    #[must_use]
    pub const fn compensation_order() -> [Leg; 3] {
        [Leg::Car, Leg::Hotel, Leg::Flight]
    }

    /// This leg's fraction of the total booking amount, expressed as a
    /// cents-exact integer fraction (numerator over 100) to avoid floating
    /// point error, matching the amount fields being modeled in cents.
    #[must_use]
    pub const fn fraction_numerator(self) -> i64 {
        match self {
            Leg::Flight => 40,
            Leg::Hotel => 35,
            Leg::Car => 25,
        }
    }

    /// Compute this leg's share of a total amount given in cents.
    #[must_use]
    pub const fn amount_cents(self, total_cents: i64) -> i64 {
        (total_cents * self.fraction_numerator()) / 100
    }

    /// The outbound "requested" broker topic for this leg.
    #[must_use]
    pub const fn requested_topic(self) -> &'static str {
        match self {
            Leg::Flight => "reservation.flight.requested",
            Leg::Hotel => "reservation.hotel.requested",
            Leg::Car => "reservation.car.requested",
        }
    }

    /// The inbound "confirmed" broker topic for this leg.
    #[must_use]
    pub const fn confirmed_topic(self) -> &'static str {
        match self {
            Leg::Flight => "reservation.flight.confirmed",
            Leg::Hotel => "reservation.hotel.confirmed",
            Leg::Car => "reservation.car.confirmed",
        }
    }

    /// The `completedSteps` marker recorded when this leg's request is
    /// published.
    #[must_use]
    pub const fn requested_marker(self) -> &'static str {
        match self {
            Leg::Flight => "flight_requested",
            Leg::Hotel => "hotel_requested",
            Leg::Car => "car_requested",
        }
    }

    /// The `completedSteps` marker recorded when this leg's reservation is
    /// confirmed.
    #[must_use]
    pub const fn confirmed_marker(self) -> &'static str {
        match self {
            Leg::Flight => "flight_confirmed",
            Leg::Hotel => "hotel_confirmed",
            Leg::Car => "car_confirmed",
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Leg::Flight => "flight",
            Leg::Hotel => "hotel",
            Leg::Car => "car",
        };
        write!(f, "{s}")
    }
}

/// Closed status enum for a saga record. Serialised UPPERCASE at the wire
/// boundary only (see [`SagaStatus::as_wire_str`]); internally this is the
/// single source of truth rather than the loose strings the distilled
/// source oscillated between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaStatus {
    /// Admitted, legs requested, awaiting confirmations.
    Pending,
    /// All three legs confirmed and aggregated.
    Confirmed,
    /// A synchronous-path failure is unwinding already-made reservations.
    Compensating,
    /// Every attempted cancellation has been finalised.
    Compensated,
    /// Terminal failure with no reservations to unwind (or compensation
    /// itself could not be initiated).
    Failed,
}

impl SagaStatus {
    /// Whether this status is terminal (no further transitions allowed).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            SagaStatus::Confirmed | SagaStatus::Compensated | SagaStatus::Failed
        )
    }

    /// The UPPERCASE wire representation used at external boundaries.
    #[must_use]
    pub const fn as_wire_str(self) -> &'static str {
        match self {
            SagaStatus::Pending => "PENDING",
            SagaStatus::Confirmed => "CONFIRMED",
            SagaStatus::Compensating => "COMPENSATING",
            SagaStatus::Compensated => "COMPENSATED",
            SagaStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_wire_str())
    }
}

/// Status of an individual leg's reservation, tracked only by the legacy
/// synchronous compensation path. A cancelled leg gets its own `Cancelled`
/// variant rather than being reset to `Pending`, so its history stays
/// distinguishable from a leg that was never attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegStatus {
    /// Reservation request sent, no response yet.
    Requested,
    /// Downstream confirmed the reservation.
    Confirmed,
    /// Downstream reservation cancelled as part of compensation.
    Cancelled,
}

/// A flight reservation specification, part of a [`BookingRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlightSpec {
    /// Origin airport/city code.
    pub origin: String,
    /// Destination airport/city code.
    pub destination: String,
    /// Outbound departure date.
    pub depart_date: DateTime<Utc>,
    /// Return date.
    pub return_date: DateTime<Utc>,
}

/// A hotel reservation specification, part of a [`BookingRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HotelSpec {
    /// Hotel identifier.
    pub hotel_id: String,
    /// Check-in date.
    pub check_in: DateTime<Utc>,
    /// Check-out date.
    pub check_out: DateTime<Utc>,
}

/// A car rental reservation specification, part of a [`BookingRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CarSpec {
    /// Pickup location.
    pub pickup_location: String,
    /// Dropoff location.
    pub dropoff_location: String,
    /// Pickup date.
    pub pickup_date: DateTime<Utc>,
    /// Dropoff date.
    pub dropoff_date: DateTime<Utc>,
}

/// The input to [`crate::orchestrator::SagaOrchestrator::execute`].
///
/// Immutable once accepted. `request_id` is the idempotency key: clients
/// SHOULD supply one so retried admissions dedupe; if absent, a fresh UUID
/// is generated and no cross-retry deduplication is possible for that
/// booking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingRequest {
    /// Client-supplied idempotency key. Absence means "generate one and
    /// forgo retry deduplication".
    pub request_id: Option<String>,
    /// The user placing the booking.
    pub user_id: String,
    /// Total amount for all three legs, in cents.
    pub total_amount_cents: i64,
    /// Flight leg details.
    pub flight: FlightSpec,
    /// Hotel leg details.
    pub hotel: HotelSpec,
    /// Car leg details.
    pub car: CarSpec,
}

/// The durable saga record: one row per request, the sole source of truth
/// for saga state. See invariants 1-5 in the data model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SagaRecord {
    /// Coordination key; unique; never changes.
    pub request_id: String,
    /// Customer-facing confirmation number. Absent until the join point is
    /// reached (invariant 2).
    pub booking_id: Option<String>,
    /// The user who placed the booking.
    pub user_id: String,
    /// Total amount for all three legs, in cents.
    pub total_amount_cents: i64,
    /// Opaque snapshot of the original request, for audit/replay.
    pub original_request: BookingRequest,
    /// Current status.
    pub status: SagaStatus,
    /// Flight reservation id, filled on confirmation.
    pub flight_reservation_id: Option<String>,
    /// Hotel reservation id, filled on confirmation.
    pub hotel_reservation_id: Option<String>,
    /// Car reservation id, filled on confirmation.
    pub car_reservation_id: Option<String>,
    /// Ordered, monotone set of step markers (only ever grows).
    pub completed_steps: Vec<String>,
    /// Error message, set on failure.
    pub error_message: Option<String>,
    /// Error stack/detail, set on failure.
    pub error_stack: Option<String>,
    /// When this record was created.
    pub created_at: DateTime<Utc>,
    /// When this record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl SagaRecord {
    /// Reservation id for the given leg, if confirmed.
    #[must_use]
    pub fn reservation_id(&self, leg: Leg) -> Option<&str> {
        match leg {
            Leg::Flight => self.flight_reservation_id.as_deref(),
            Leg::Hotel => self.hotel_reservation_id.as_deref(),
            Leg::Car => self.car_reservation_id.as_deref(),
        }
    }

    /// Whether every leg has a recorded `_confirmed` marker — the
    /// join-point test, derived from this (post-update, durable-store)
    /// state rather than any local counter.
    #[must_use]
    pub fn all_legs_confirmed(&self) -> bool {
        Leg::publish_order()
            .iter()
            .all(|leg| self.completed_steps.iter().any(|m| m == leg.confirmed_marker()))
    }

    /// Whether every leg has a recorded reservation id.
    #[must_use]
    pub fn all_reservation_ids_present(&self) -> bool {
        self.flight_reservation_id.is_some()
            && self.hotel_reservation_id.is_some()
            && self.car_reservation_id.is_some()
    }
}
