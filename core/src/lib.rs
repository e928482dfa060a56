//! # Saga Core
//!
//! Core domain types and traits for the travel booking saga coordinator.
//!
//! This crate provides the fundamental abstractions the rest of the
//! workspace builds on: the booking/saga domain types, the provider traits
//! each infrastructure crate implements (durable store, coordination
//! store, broker gateway, notification hub), and a small Reducer/Effect
//! primitive set used to give the saga's own status transitions a single,
//! pure, exhaustively-matched function independent of I/O.
//!
//! ## Core Concepts
//!
//! - **State**: the saga's own in-memory transition state ([`domain::SagaStatus`])
//! - **Action**: events driving a transition (admission, confirmation, aggregation)
//! - **Reducer**: pure function `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: side effect descriptions (not execution)
//! - **Environment**: injected dependencies via traits
//!
//! Most of the orchestrator's actual work — admission, aggregation,
//! compensation — is plain async orchestration against `Arc<dyn Trait>`
//! providers rather than reducer dispatch; the reducer is reserved for the
//! state machine's legality checks (see `orchestrator` crate).
//!
//! ## Architecture Principles
//!
//! - Functional Core, Imperative Shell
//! - Unidirectional Data Flow
//! - Explicit Effects (no hidden I/O)
//! - Dependency Injection via Environment
//! - Zero-Cost Abstractions

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod broker;
pub mod coordination;
pub mod domain;
pub mod durable_store;
mod effect_macros;
pub mod notification;

/// Reducer module - the core trait for business logic.
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`.
/// They contain all business logic and are deterministic and testable.
pub mod reducer {
    use super::effect::Effect;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for SagaReducer {
    ///     type State = SagaStatus;
    ///     type Action = SagaEvent;
    ///     type Environment = ();
    ///
    ///     fn reduce(
    ///         &self,
    ///         state: &mut SagaStatus,
    ///         action: SagaEvent,
    ///         _env: &(),
    ///     ) -> Vec<Effect<SagaEvent>> {
    ///         match (*state, action) {
    ///             (SagaStatus::Pending, SagaEvent::Aggregated) => {
    ///                 *state = SagaStatus::Confirmed;
    ///                 vec![Effect::None]
    ///             }
    ///             _ => vec![Effect::None],
    ///         }
    ///     }
    /// }
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed
        ///
        /// # Arguments
        ///
        /// - `state`: Mutable reference to current state
        /// - `action`: The action to process
        /// - `env`: Reference to injected dependencies
        ///
        /// # Returns
        ///
        /// A vector of effects to be executed by the runtime
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Vec<Effect<Self::Action>>;
    }
}

/// Effect module - side effect descriptions.
///
/// Effects describe side effects to be performed by the runtime. They are
/// values (not execution) and are composable and cancellable.
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    /// Effect type - describes a side effect to be executed
    ///
    /// Effects are NOT executed immediately. They are descriptions of what should happen,
    /// returned from reducers and executed by the Store runtime.
    ///
    /// # Type Parameters
    ///
    /// - `Action`: The action type that effects can produce (feedback loop)
    #[allow(missing_docs)]
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects in parallel
        Parallel(Vec<Effect<Action>>),

        /// Run effects sequentially
        Sequential(Vec<Effect<Action>>),

        /// Delayed action (for timeouts, retries)
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after delay
            action: Box<Action>,
        },

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Combine effects to run in parallel
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Chain effects to run sequentially
        #[must_use]
        pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Sequential(effects)
        }

        /// Transform the action type of this effect
        ///
        /// This is useful for composing effects from different reducers or
        /// wrapping actions in a higher-level action type.
        ///
        /// # Type Parameters
        ///
        /// - `B`: The target action type
        /// - `F`: Function that transforms `Action` to `B`
        ///
        /// # Arguments
        ///
        /// - `f`: The transformation function
        ///
        /// # Returns
        ///
        /// A new effect that produces actions of type `B`
        ///
        /// # Examples
        ///
        /// ```rust,ignore
        /// // Transform counter actions to app-level actions
        /// let counter_effect: Effect<CounterAction> = Effect::Delay {
        ///     duration: Duration::from_secs(1),
        ///     action: Box::new(CounterAction::Increment),
        /// };
        ///
        /// let app_effect: Effect<AppAction> = counter_effect.map(|a| AppAction::Counter(a));
        /// ```
        pub fn map<B, F>(self, f: F) -> Effect<B>
        where
            F: Fn(Action) -> B + Send + Sync + 'static + Clone,
            Action: 'static,
            B: Send + 'static,
        {
            match self {
                Effect::None => Effect::None,
                Effect::Parallel(effects) => {
                    let mapped: Vec<Effect<B>> = effects
                        .into_iter()
                        .map(|e| {
                            let f_clone = f.clone();
                            map_effect(e, f_clone)
                        })
                        .collect();
                    Effect::Parallel(mapped)
                },
                Effect::Sequential(effects) => {
                    let mapped: Vec<Effect<B>> = effects
                        .into_iter()
                        .map(|e| {
                            let f_clone = f.clone();
                            map_effect(e, f_clone)
                        })
                        .collect();
                    Effect::Sequential(mapped)
                },
                Effect::Delay { duration, action } => Effect::Delay {
                    duration,
                    action: Box::new(f(*action)),
                },
                Effect::Future(fut) => {
                    Effect::Future(Box::pin(async move { fut.await.map(f) }))
                },
            }
        }
    }

    // Helper function to avoid recursion in type system
    fn map_effect<A, B, F>(effect: Effect<A>, f: F) -> Effect<B>
    where
        F: Fn(A) -> B + Send + Sync + 'static + Clone,
        A: 'static,
        B: Send + 'static,
    {
        match effect {
            Effect::None => Effect::None,
            Effect::Parallel(effects) => {
                let mapped: Vec<Effect<B>> = effects
                    .into_iter()
                    .map(|e| {
                        let f_clone = f.clone();
                        map_effect(e, f_clone)
                    })
                    .collect();
                Effect::Parallel(mapped)
            },
            Effect::Sequential(effects) => {
                let mapped: Vec<Effect<B>> = effects
                    .into_iter()
                    .map(|e| {
                        let f_clone = f.clone();
                        map_effect(e, f_clone)
                    })
                    .collect();
                Effect::Sequential(mapped)
            },
            Effect::Delay { duration, action } => Effect::Delay {
                duration,
                action: Box::new(f(*action)),
            },
            Effect::Future(fut) => {
                Effect::Future(Box::pin(async move { fut.await.map(f) }))
            },
        }
    }
}

/// Environment module - dependency injection traits shared across
/// reducers: [`environment::Clock`] for testable time and
/// [`environment::IdGenerator`] for testable id generation. The heavier
/// provider traits (durable store, coordination store, broker gateway,
/// notification hub) live in their own top-level modules since they're
/// used directly by the orchestrator as trait objects, not just by
/// reducers.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// struct SystemClock;
    /// impl Clock for SystemClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         Utc::now()
    ///     }
    /// }
    ///
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Id generator trait - abstracts request id and booking id generation
    /// for testability. Production implementations generate a random UUID
    /// v4 for request ids (when the client didn't supply one) and a
    /// `TRV-<timestamp>-<suffix>` booking id; test implementations can
    /// return deterministic sequences.
    pub trait IdGenerator: Send + Sync {
        /// Generate a fresh request id for a booking that didn't supply
        /// one. No cross-retry deduplication is possible for that
        /// booking, by design (see DESIGN.md).
        fn generate_request_id(&self) -> String;

        /// Generate a booking id matching `^TRV-\d+-[A-Z0-9]{9}$`: a
        /// monotonic timestamp component plus a short random suffix.
        fn generate_booking_id(&self, now: DateTime<Utc>) -> String;
    }
}

// Placeholder test module
#[cfg(test)]
#[allow(clippy::panic)] // Tests can panic for assertions
#[allow(clippy::similar_names)] // Test variable names can be similar
#[allow(clippy::redundant_closure)] // Test closures can be explicit for clarity
mod tests {
    use super::effect::Effect;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum TestAction {
        Action1,
        Action2,
        Action3,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum MappedAction {
        Mapped(TestAction),
    }

    #[test]
    fn test_effect_merge() {
        let effect1 = Effect::None;
        let effect2 = Effect::<TestAction>::None;

        let merged = Effect::merge(vec![effect1, effect2]);

        match merged {
            Effect::Parallel(effects) => {
                assert_eq!(effects.len(), 2);
            },
            _ => panic!("Expected Parallel effect"),
        }
    }

    #[test]
    fn test_effect_chain() {
        let effect1 = Effect::None;
        let effect2 = Effect::<TestAction>::None;

        let chained = Effect::chain(vec![effect1, effect2]);

        match chained {
            Effect::Sequential(effects) => {
                assert_eq!(effects.len(), 2);
            },
            _ => panic!("Expected Sequential effect"),
        }
    }

    #[test]
    fn test_effect_map_none() {
        let effect: Effect<TestAction> = Effect::None;
        let mapped: Effect<MappedAction> = effect.map(|a| MappedAction::Mapped(a));

        match mapped {
            Effect::None => {},
            _ => panic!("Expected None effect"),
        }
    }

    #[test]
    fn test_effect_map_delay() {
        let effect: Effect<TestAction> = Effect::Delay {
            duration: Duration::from_secs(1),
            action: Box::new(TestAction::Action1),
        };

        let mapped: Effect<MappedAction> = effect.map(|a| MappedAction::Mapped(a));

        match mapped {
            Effect::Delay { duration, action } => {
                assert_eq!(duration, Duration::from_secs(1));
                assert_eq!(*action, MappedAction::Mapped(TestAction::Action1));
            },
            _ => panic!("Expected Delay effect"),
        }
    }

    #[test]
    fn test_effect_map_parallel() {
        let effect: Effect<TestAction> = Effect::Parallel(vec![
            Effect::None,
            Effect::Delay {
                duration: Duration::from_millis(100),
                action: Box::new(TestAction::Action2),
            },
        ]);

        let mapped: Effect<MappedAction> = effect.map(|a| MappedAction::Mapped(a));

        match mapped {
            Effect::Parallel(effects) => {
                assert_eq!(effects.len(), 2);
                // First should be None
                matches!(effects[0], Effect::None);
                // Second should be Delay with mapped action
                match &effects[1] {
                    Effect::Delay { action, .. } => {
                        assert_eq!(**action, MappedAction::Mapped(TestAction::Action2));
                    },
                    _ => panic!("Expected Delay in parallel"),
                }
            },
            _ => panic!("Expected Parallel effect"),
        }
    }

    #[test]
    fn test_effect_map_sequential() {
        let effect: Effect<TestAction> = Effect::Sequential(vec![
            Effect::Delay {
                duration: Duration::from_millis(100),
                action: Box::new(TestAction::Action1),
            },
            Effect::Delay {
                duration: Duration::from_millis(200),
                action: Box::new(TestAction::Action2),
            },
        ]);

        let mapped: Effect<MappedAction> = effect.map(|a| MappedAction::Mapped(a));

        match mapped {
            Effect::Sequential(effects) => {
                assert_eq!(effects.len(), 2);
                // Verify both delays are mapped correctly
                for effect in effects {
                    match effect {
                        Effect::Delay { action, .. } => {
                            // Verify it's a Mapped variant
                            assert!(matches!(*action, MappedAction::Mapped(_)));
                        },
                        _ => panic!("Expected Delay in sequential"),
                    }
                }
            },
            _ => panic!("Expected Sequential effect"),
        }
    }

    #[tokio::test]
    async fn test_effect_map_future() {
        let effect: Effect<TestAction> = Effect::Future(Box::pin(async {
            Some(TestAction::Action1)
        }));

        let mapped: Effect<MappedAction> = effect.map(|a| MappedAction::Mapped(a));

        match mapped {
            Effect::Future(fut) => {
                let result = fut.await;
                assert_eq!(result, Some(MappedAction::Mapped(TestAction::Action1)));
            },
            _ => panic!("Expected Future effect"),
        }
    }

    #[tokio::test]
    async fn test_effect_map_future_none() {
        let effect: Effect<TestAction> = Effect::Future(Box::pin(async { None }));

        let mapped: Effect<MappedAction> = effect.map(|a| MappedAction::Mapped(a));

        match mapped {
            Effect::Future(fut) => {
                let result = fut.await;
                assert_eq!(result, None);
            },
            _ => panic!("Expected Future effect"),
        }
    }

    #[test]
    fn test_effect_map_nested() {
        // Test mapping nested effects (Parallel containing Sequential)
        let effect: Effect<TestAction> = Effect::Parallel(vec![
            Effect::Sequential(vec![
                Effect::Delay {
                    duration: Duration::from_millis(100),
                    action: Box::new(TestAction::Action1),
                },
                Effect::None,
            ]),
            Effect::Delay {
                duration: Duration::from_millis(200),
                action: Box::new(TestAction::Action3),
            },
        ]);

        let mapped: Effect<MappedAction> = effect.map(|a| MappedAction::Mapped(a));

        match mapped {
            Effect::Parallel(effects) => {
                assert_eq!(effects.len(), 2);
                // Verify nested structure is preserved
                match &effects[0] {
                    Effect::Sequential(inner) => {
                        assert_eq!(inner.len(), 2);
                    },
                    _ => panic!("Expected Sequential in Parallel"),
                }
            },
            _ => panic!("Expected Parallel effect"),
        }
    }
}
