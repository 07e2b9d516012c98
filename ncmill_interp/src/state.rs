//! Interpreter lifecycle state machine.
//!
//! States: Idle → Running ↔ Paused, Running → StoppedOnError | Ended.
//! StoppedOnError and Ended are terminal: a stopped interpreter emits
//! no further canonical commands until it is explicitly reset.

/// Lifecycle state of the interpreter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InterpState {
    /// Constructed or reset; no program started.
    #[default]
    Idle,
    /// Consuming blocks and emitting commands.
    Running,
    /// Feed-hold; resumable.
    Paused,
    /// Halted by a syntax or interpreter error. Terminal until reset.
    StoppedOnError,
    /// Program end reached. Terminal until reset.
    Ended,
}

impl InterpState {
    /// True for the two terminal states.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, InterpState::StoppedOnError | InterpState::Ended)
    }
}

/// Event driving a lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpEvent {
    /// Program start requested.
    ProgramStart,
    /// Feed-hold / optional-stop request (external signal).
    FeedHold,
    /// Resume from feed-hold.
    Resume,
    /// Unrecoverable syntax/interpreter error.
    Error,
    /// Program-end command executed.
    ProgramEnd,
    /// Explicit reset back to Idle.
    Reset,
}

/// Result of a transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition succeeded — new state.
    Ok(InterpState),
    /// Transition rejected — reason.
    Rejected(&'static str),
}

/// Holder of the current lifecycle state.
#[derive(Debug, Clone, Default)]
pub struct InterpStateMachine {
    state: InterpState,
}

impl InterpStateMachine {
    pub const fn new() -> Self {
        Self {
            state: InterpState::Idle,
        }
    }

    /// Current state.
    #[inline]
    pub const fn state(&self) -> InterpState {
        self.state
    }

    /// Attempt a transition.
    pub fn handle_event(&mut self, event: InterpEvent) -> TransitionResult {
        use InterpEvent::*;
        use InterpState::*;

        let next = match (self.state, event) {
            (Idle, ProgramStart) => Running,

            (Running, FeedHold) => Paused,
            (Paused, Resume) => Running,

            // Errors are observed from Running or Paused.
            (Running, Error) | (Paused, Error) => StoppedOnError,
            (Running, ProgramEnd) => Ended,

            (StoppedOnError, Reset) | (Ended, Reset) | (Paused, Reset) | (Running, Reset) => Idle,

            _ => return TransitionResult::Rejected(rejection_reason(self.state, event)),
        };
        self.state = next;
        TransitionResult::Ok(next)
    }
}

fn rejection_reason(state: InterpState, event: InterpEvent) -> &'static str {
    use InterpState::*;
    match (state, event) {
        (StoppedOnError, _) => "stopped on error: only Reset allowed",
        (Ended, _) => "program ended: only Reset allowed",
        (Idle, _) => "idle: only ProgramStart or Reset allowed",
        (Running, _) => "running: invalid event",
        (Paused, _) => "paused: only Resume, Error or Reset allowed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use InterpEvent::*;
    use InterpState::*;

    #[test]
    fn normal_run_lifecycle() {
        let mut sm = InterpStateMachine::new();
        assert_eq!(sm.state(), Idle);
        assert_eq!(sm.handle_event(ProgramStart), TransitionResult::Ok(Running));
        assert_eq!(sm.handle_event(ProgramEnd), TransitionResult::Ok(Ended));
        assert!(sm.state().is_terminal());
    }

    #[test]
    fn feed_hold_and_resume() {
        let mut sm = InterpStateMachine::new();
        sm.handle_event(ProgramStart);
        assert_eq!(sm.handle_event(FeedHold), TransitionResult::Ok(Paused));
        assert_eq!(sm.handle_event(Resume), TransitionResult::Ok(Running));
    }

    #[test]
    fn error_is_terminal_until_reset() {
        let mut sm = InterpStateMachine::new();
        sm.handle_event(ProgramStart);
        assert_eq!(sm.handle_event(Error), TransitionResult::Ok(StoppedOnError));

        // Nothing but Reset gets out.
        assert!(matches!(
            sm.handle_event(ProgramStart),
            TransitionResult::Rejected(_)
        ));
        assert!(matches!(
            sm.handle_event(Resume),
            TransitionResult::Rejected(_)
        ));
        assert_eq!(sm.handle_event(Reset), TransitionResult::Ok(Idle));
    }

    #[test]
    fn error_observed_while_paused() {
        let mut sm = InterpStateMachine::new();
        sm.handle_event(ProgramStart);
        sm.handle_event(FeedHold);
        assert_eq!(sm.handle_event(Error), TransitionResult::Ok(StoppedOnError));
    }

    #[test]
    fn ended_rejects_everything_but_reset() {
        let mut sm = InterpStateMachine::new();
        sm.handle_event(ProgramStart);
        sm.handle_event(ProgramEnd);
        assert!(matches!(
            sm.handle_event(ProgramStart),
            TransitionResult::Rejected(_)
        ));
        assert_eq!(sm.handle_event(Reset), TransitionResult::Ok(Idle));
    }
}
