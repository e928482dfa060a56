//! `PostgreSQL` persistence for the travel-booking saga coordinator.
//!
//! Two pieces live here:
//!
//! - [`saga_store::PostgresSagaStore`], the authoritative
//!   [`saga_core::durable_store::DurableStore`] implementation — one row
//!   per saga request.
//! - [`dead_letter_queue::DeadLetterQueue`], the sink for legs whose
//!   compensation itself failed and has nowhere left to retry inside this
//!   system.
//!
//! # Example
//!
//! ```ignore
//! use saga_postgres::PostgresSagaStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresSagaStore::new("postgres://localhost/saga").await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Dead-letter sink for failed compensations.
pub mod dead_letter_queue;
/// Durable saga record store.
pub mod saga_store;

pub use dead_letter_queue::{CompensationFailure, DLQStatus, DeadLetterQueue};
pub use saga_store::PostgresSagaStore;
