//! Deterministic id generation for tests.

use chrono::{DateTime, Utc};
use saga_core::environment::IdGenerator;
use std::sync::atomic::{AtomicU64, Ordering};

/// Generates predictable, strictly increasing ids instead of random ones.
///
/// # Example
///
/// ```
/// use saga_testing::SequentialIdGenerator;
/// use saga_core::environment::IdGenerator;
///
/// let r#gen = SequentialIdGenerator::new();
/// assert_eq!(r#gen.generate_request_id(), "req-1");
/// assert_eq!(r#gen.generate_request_id(), "req-2");
/// ```
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    /// Create a generator starting at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn generate_request_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        format!("req-{n}")
    }

    fn generate_booking_id(&self, now: DateTime<Utc>) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        format!("TRV-{}-{n}", now.timestamp())
    }
}
