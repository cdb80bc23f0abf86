/// Session state machine.
///
/// New → Negotiating → Authenticating → Established → Finishing → {Finished | Failed}
///
/// Negotiating and Authenticating may be skipped. Every non-terminal state
/// may fail or finish. Re-entering the current state is a no-op (multi-round
/// authentication, negotiation confirmation). Terminal states accept nothing.
use lime_transport::SessionState;

use crate::error::ChannelError;

/// Forward-only session state holder. The only way to change state is
/// [`SessionStateMachine::transition`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStateMachine {
    state: SessionState,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether `from → to` is a legal step.
    pub fn is_allowed(from: SessionState, to: SessionState) -> bool {
        use SessionState::*;

        if from.is_terminal() {
            return false;
        }
        if from == to {
            return true;
        }
        match (from, to) {
            (_, Failed) => true,
            (New, Negotiating | Authenticating | Established | Finished) => true,
            (Negotiating, Authenticating | Established | Finished) => true,
            (Authenticating, Established | Finished) => true,
            (Established, Finishing | Finished) => true,
            (Finishing, Finished) => true,
            _ => false,
        }
    }

    /// Move to `next`, returning the new state.
    pub fn transition(&mut self, next: SessionState) -> Result<SessionState, ChannelError> {
        if !Self::is_allowed(self.state, next) {
            return Err(ChannelError::InvalidState {
                operation: transition_operation(next),
                state: self.state,
            });
        }
        self.state = next;
        Ok(next)
    }
}

fn transition_operation(next: SessionState) -> &'static str {
    match next {
        SessionState::New => "move to new",
        SessionState::Negotiating => "move to negotiating",
        SessionState::Authenticating => "move to authenticating",
        SessionState::Established => "move to established",
        SessionState::Finishing => "move to finishing",
        SessionState::Finished => "move to finished",
        SessionState::Failed => "move to failed",
    }
}
