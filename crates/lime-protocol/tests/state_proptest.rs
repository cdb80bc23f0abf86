//! Property tests for the session state machine.

use lime_protocol::{ChannelError, SessionStateMachine};
use lime_transport::SessionState;
use proptest::prelude::*;

fn any_state() -> impl Strategy<Value = SessionState> {
    prop_oneof![
        Just(SessionState::New),
        Just(SessionState::Negotiating),
        Just(SessionState::Authenticating),
        Just(SessionState::Established),
        Just(SessionState::Finishing),
        Just(SessionState::Finished),
        Just(SessionState::Failed),
    ]
}

/// Position along the happy path; `Failed` sits with `Finished` at the end.
fn rank(state: SessionState) -> u8 {
    match state {
        SessionState::New => 0,
        SessionState::Negotiating => 1,
        SessionState::Authenticating => 2,
        SessionState::Established => 3,
        SessionState::Finishing => 4,
        SessionState::Finished | SessionState::Failed => 5,
    }
}

proptest! {
    /// Whatever sequence is attempted, accepted transitions only move
    /// forward and nothing leaves a terminal state.
    #[test]
    fn transitions_never_go_backward(attempts in proptest::collection::vec(any_state(), 0..32)) {
        let mut machine = SessionStateMachine::new();
        for next in attempts {
            let before = machine.state();
            match machine.transition(next) {
                Ok(state) => {
                    prop_assert_eq!(state, next);
                    prop_assert!(rank(next) >= rank(before));
                    prop_assert!(!before.is_terminal());
                }
                Err(e) => {
                    prop_assert!(
                        matches!(e, ChannelError::InvalidState { .. }),
                        "unexpected error kind",
                    );
                    prop_assert_eq!(machine.state(), before);
                }
            }
        }
    }

    /// Every live state may fail.
    #[test]
    fn live_states_can_always_fail(from in any_state()) {
        prop_assume!(!from.is_terminal());
        prop_assert!(SessionStateMachine::is_allowed(from, SessionState::Failed));
    }
}
