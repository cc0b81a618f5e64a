//! Finite State Machine for a single backup invocation

use serde::Serialize;

/// Run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Invocation accepted, nothing checked yet
    Start,

    /// Reading the daily guard
    GuardCheck,

    /// Guard satisfied, no backup needed
    Skipped,

    /// Backup subprocess running
    Running,

    /// Backup subprocess exited with status 0
    Succeeded,

    /// Backup failed to start, exited non-zero, was cancelled or timed out
    Failed,

    /// Reporting the new date to the status API
    Notifying,

    /// Terminal
    Done,
}

/// Run event
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// Begin the guard check
    CheckGuard,

    /// A backup for today already exists
    AlreadyBackedUp,

    /// No backup for today, launch the command
    Launch,

    /// Command exited successfully
    Exited,

    /// Command failed
    Fail(String),

    /// Start the status notification
    Notify,

    /// Finish the invocation
    Finish,
}

/// Per-invocation state machine
#[derive(Debug, Clone)]
pub struct RunFsm {
    state: RunState,
    error: Option<String>,
}

impl RunFsm {
    /// Create a new FSM in the start state
    pub fn new() -> Self {
        Self {
            state: RunState::Start,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Failure reason, if the run failed
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: RunEvent) -> Result<RunState, String> {
        let new_state = match (self.state, &event) {
            (RunState::Start, RunEvent::CheckGuard) => RunState::GuardCheck,

            (RunState::GuardCheck, RunEvent::AlreadyBackedUp) => RunState::Skipped,
            (RunState::GuardCheck, RunEvent::Launch) => RunState::Running,

            (RunState::Running, RunEvent::Exited) => RunState::Succeeded,
            (RunState::Running, RunEvent::Fail(reason)) => {
                self.error = Some(reason.clone());
                RunState::Failed
            }

            (RunState::Succeeded, RunEvent::Notify) => RunState::Notifying,

            (RunState::Skipped, RunEvent::Finish)
            | (RunState::Notifying, RunEvent::Finish)
            | (RunState::Failed, RunEvent::Finish) => RunState::Done,

            (state, event) => {
                return Err(format!("Invalid transition from {:?} on {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }

    /// Whether the invocation reached its terminal state
    pub fn is_done(&self) -> bool {
        self.state == RunState::Done
    }
}

impl Default for RunFsm {
    fn default() -> Self {
        Self::new()
    }
}
