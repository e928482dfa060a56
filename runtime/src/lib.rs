//! # Saga Runtime
//!
//! Ambient production-hardening instrumentation the orchestrator binary
//! wires in at startup: a Prometheus exporter plus typed counters/histograms
//! for the durable store, the broker, and the reducer (see [`metrics`]).
//!
//! Saga state transitions are validated by `saga_orchestrator::reducer`
//! (a [`saga_core::reducer::Reducer`] impl) and carried out by plain async
//! orchestration against `Arc<dyn Trait>` providers; this crate does not
//! host a generic dispatch loop of its own.

pub mod metrics;
