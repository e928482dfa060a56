//! Saga orchestrator: admission, join-point aggregation, legacy
//! synchronous compensation, notification delivery, and stuck-saga
//! recovery for multi-leg travel bookings.

pub mod admin;
pub mod config;
pub mod leg_adapter;
pub mod legacy;
pub mod notification_hub;
pub mod orchestrator;
pub mod providers;
pub mod reducer;
pub mod sweeper;

pub use config::SagaConfig;
pub use leg_adapter::{AggregateFn, LegAdapter};
pub use legacy::{DeadLetterSink, LegService, LegServiceError};
pub use notification_hub::BroadcastNotificationHub;
pub use orchestrator::{AdmissionResult, ConfirmedResult, OrchestratorError, SagaOrchestrator};
pub use providers::{SystemClock, UuidIdGenerator};
pub use reducer::{SagaEvent, SagaReducer};
