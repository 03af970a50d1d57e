use crate::{error::TpError, types::ChannelLifecycleState};

#[derive(Debug, Clone)]
pub struct ChannelStateMachine {
    state: ChannelLifecycleState,
}

impl Default for ChannelStateMachine {
    fn default() -> Self {
        Self {
            state: ChannelLifecycleState::Constructing,
        }
    }
}

impl ChannelStateMachine {
    pub fn state(&self) -> ChannelLifecycleState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ChannelLifecycleState::Ready
    }

    pub fn is_invalidated(&self) -> bool {
        self.state == ChannelLifecycleState::Invalidated
    }

    pub fn begin_introspection(&mut self) -> Result<(), TpError> {
        self.transition_from_state(
            ChannelLifecycleState::Constructing,
            ChannelLifecycleState::Introspecting,
            "begin_introspection",
        )
    }

    pub fn on_ready(&mut self) -> Result<(), TpError> {
        self.transition_from_state(
            ChannelLifecycleState::Introspecting,
            ChannelLifecycleState::Ready,
            "mark_ready",
        )
    }

    /// Enter the terminal state. Returns `false` if the channel was already invalidated.
    pub fn on_invalidated(&mut self) -> bool {
        if self.is_invalidated() {
            return false;
        }
        self.state = ChannelLifecycleState::Invalidated;
        true
    }

    fn transition_from_state(
        &mut self,
        expected: ChannelLifecycleState,
        next: ChannelLifecycleState,
        action: &str,
    ) -> Result<(), TpError> {
        if self.state != expected {
            return Err(TpError::not_ready(self.state, action));
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_happy_path_state_transitions() {
        let mut sm = ChannelStateMachine::default();
        assert_eq!(sm.state(), ChannelLifecycleState::Constructing);

        sm.begin_introspection()
            .expect("introspection should start");
        assert_eq!(sm.state(), ChannelLifecycleState::Introspecting);

        sm.on_ready().expect("ready should work");
        assert!(sm.is_ready());

        assert!(sm.on_invalidated());
        assert_eq!(sm.state(), ChannelLifecycleState::Invalidated);
    }

    #[test]
    fn rejects_ready_before_introspection() {
        let mut sm = ChannelStateMachine::default();
        let err = sm.on_ready().expect_err("ready must fail while constructing");
        assert!(err.message.contains("mark_ready"));
    }

    #[test]
    fn invalidated_is_terminal() {
        let mut sm = ChannelStateMachine::default();
        assert!(sm.on_invalidated());
        assert!(!sm.on_invalidated());
        sm.begin_introspection()
            .expect_err("no way back from invalidated");
        assert!(sm.is_invalidated());
    }
}
