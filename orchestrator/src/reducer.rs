//! Pure reducer enforcing the closed saga-status transition table. Most of
//! the orchestrator's actual work is plain async orchestration against
//! `Arc<dyn Trait>` providers (see [`crate::orchestrator`]); this reducer
//! exists for the state machine's own legality checks, and is exercised
//! directly in tests without spinning up a store.

use saga_core::domain::SagaStatus;
use saga_core::effect::Effect;
use saga_core::reducer::Reducer;

/// Events driving a [`SagaStatus`] transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaEvent {
    /// The join point succeeded; `aggregate` assigned a booking id.
    Aggregated,
    /// The legacy synchronous path failed after at least one reservation
    /// had already been made, so compensation is required.
    SyncPathFailed,
    /// Admission failed before any reservation was made.
    AdmissionFailed,
    /// Every attempted cancellation has been finalised.
    CompensationFinalized,
    /// Compensation ran to completion, but too little had been reserved
    /// (or could be salvaged) for the saga to count as a clean
    /// compensation — the net outcome is a failure, not a Compensated
    /// booking.
    CompensationUninitializable,
}

/// Pure reducer over [`SagaStatus`]. Transitions not in the table are
/// ignored (the state is left unchanged); there is no illegal-transition
/// error type because reducers can't fail, only decline to act.
#[derive(Debug, Clone, Copy, Default)]
pub struct SagaReducer;

impl Reducer for SagaReducer {
    type State = SagaStatus;
    type Action = SagaEvent;
    type Environment = ();

    fn reduce(&self, state: &mut SagaStatus, action: SagaEvent, _env: &()) -> Vec<Effect<SagaEvent>> {
        let next = match (*state, &action) {
            (SagaStatus::Pending, SagaEvent::Aggregated) => Some(SagaStatus::Confirmed),
            (SagaStatus::Pending, SagaEvent::SyncPathFailed) => Some(SagaStatus::Compensating),
            (SagaStatus::Pending, SagaEvent::AdmissionFailed) => Some(SagaStatus::Failed),
            (SagaStatus::Compensating, SagaEvent::CompensationFinalized) => Some(SagaStatus::Compensated),
            (SagaStatus::Compensating, SagaEvent::CompensationUninitializable) => Some(SagaStatus::Failed),
            _ => None,
        };

        match next {
            Some(next_state) => *state = next_state,
            None => {
                tracing::warn!(from = ?state, event = ?action, "illegal saga state transition ignored");
            }
        }

        vec![Effect::None]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reduce(mut state: SagaStatus, action: SagaEvent) -> SagaStatus {
        SagaReducer.reduce(&mut state, action, &());
        state
    }

    #[test]
    fn pending_to_confirmed_on_aggregated() {
        assert_eq!(reduce(SagaStatus::Pending, SagaEvent::Aggregated), SagaStatus::Confirmed);
    }

    #[test]
    fn pending_to_compensating_on_sync_path_failure() {
        assert_eq!(reduce(SagaStatus::Pending, SagaEvent::SyncPathFailed), SagaStatus::Compensating);
    }

    #[test]
    fn pending_to_failed_on_admission_failure() {
        assert_eq!(reduce(SagaStatus::Pending, SagaEvent::AdmissionFailed), SagaStatus::Failed);
    }

    #[test]
    fn compensating_to_compensated_on_finalized() {
        assert_eq!(
            reduce(SagaStatus::Compensating, SagaEvent::CompensationFinalized),
            SagaStatus::Compensated
        );
    }

    #[test]
    fn compensating_to_failed_when_uninitializable() {
        assert_eq!(
            reduce(SagaStatus::Compensating, SagaEvent::CompensationUninitializable),
            SagaStatus::Failed
        );
    }

    #[test]
    fn terminal_states_reject_every_event() {
        for terminal in [SagaStatus::Confirmed, SagaStatus::Compensated, SagaStatus::Failed] {
            for event in [
                SagaEvent::Aggregated,
                SagaEvent::SyncPathFailed,
                SagaEvent::AdmissionFailed,
                SagaEvent::CompensationFinalized,
                SagaEvent::CompensationUninitializable,
            ] {
                assert_eq!(reduce(terminal, event), terminal);
            }
        }
    }

    #[test]
    fn pending_rejects_compensation_only_events() {
        assert_eq!(
            reduce(SagaStatus::Pending, SagaEvent::CompensationFinalized),
            SagaStatus::Pending
        );
        assert_eq!(
            reduce(SagaStatus::Pending, SagaEvent::CompensationUninitializable),
            SagaStatus::Pending
        );
    }
}
