//! Declarative macros for ergonomic effect construction.

/// Create an `Effect::Future` from an async block.
///
/// # Example
///
/// ```rust,ignore
/// use saga_core::async_effect;
///
/// async_effect! {
///     let confirmed = broker.publish(topic, &payload).await;
///     confirmed.ok().map(|()| SagaEvent::PublishSucceeded)
/// }
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::Future(
            ::std::boxed::Box::pin(async move { $($body)* })
        )
    };
}

/// Create an `Effect::Delay` for scheduling delayed actions.
///
/// # Example
///
/// ```rust,ignore
/// use saga_core::delay;
/// use std::time::Duration;
///
/// delay! {
///     duration: Duration::from_secs(1800),
///     action: SagaEvent::StuckSweepDue
/// }
/// ```
#[macro_export]
macro_rules! delay {
    (
        duration: $duration:expr,
        action: $action:expr
    ) => {
        $crate::effect::Effect::Delay {
            duration: $duration,
            action: ::std::boxed::Box::new($action),
        }
    };
}
