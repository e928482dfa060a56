//! # Saga Testing
//!
//! Testing utilities for the saga coordinator: deterministic time and id
//! generation, and in-memory stand-ins for every provider trait a saga
//! orchestrator depends on (durable store, coordination store, broker
//! gateway, notification port), so orchestration logic can be exercised
//! without Postgres, Redis, or a broker running.
//!
//! ## Example
//!
//! ```ignore
//! use saga_testing::{test_clock, durable_store::InMemoryDurableStore};
//!
//! #[tokio::test]
//! async fn aggregates_once_all_three_legs_confirm() {
//!     let store = InMemoryDurableStore::new();
//!     // ... exercise the orchestrator against `store` ...
//! }
//! ```

use chrono::{DateTime, Utc};
use saga_core::environment::Clock;

pub mod broker;
pub mod coordination_store;
pub mod durable_store;
pub mod id_generator;
pub mod notification;
pub mod reducer_test;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use saga_testing::mocks::FixedClock;
    /// use saga_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

// Re-export commonly used items
pub use broker::InMemoryBrokerGateway;
pub use coordination_store::InMemoryCoordinationStore;
pub use durable_store::InMemoryDurableStore;
pub use id_generator::SequentialIdGenerator;
pub use mocks::{FixedClock, test_clock};
pub use notification::InMemoryNotificationHub;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }
}
