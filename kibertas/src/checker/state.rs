use std::fmt::{Display, Formatter};
use tracing::debug;

/// Phases of a check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    Initialized,
    ResourcesCreating,
    Converging,
    CleaningUp,
    Succeeded,
    Failed,
}

impl CheckState {
    /// Cleanup is reachable from every non-terminal phase after initialization, the terminal
    /// phases only from cleanup.
    pub fn can_transition_to(self, next: CheckState) -> bool {
        use CheckState::*;
        matches!(
            (self, next),
            (Initialized, ResourcesCreating)
                | (Initialized, CleaningUp)
                | (ResourcesCreating, Converging)
                | (ResourcesCreating, CleaningUp)
                | (Converging, CleaningUp)
                | (CleaningUp, Succeeded)
                | (CleaningUp, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CheckState::Succeeded | CheckState::Failed)
    }
}

impl Display for CheckState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            CheckState::Initialized => "initialized",
            CheckState::ResourcesCreating => "resources-creating",
            CheckState::Converging => "converging",
            CheckState::CleaningUp => "cleaning-up",
            CheckState::Succeeded => "succeeded",
            CheckState::Failed => "failed",
        };
        f.write_str(state)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid check state transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: CheckState,
    pub to: CheckState,
}

/// Current phase plus every phase visited so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMachine {
    history: Vec<CheckState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self {
            history: vec![CheckState::Initialized],
        }
    }
}

impl StateMachine {
    pub fn current(&self) -> CheckState {
        // history is never empty
        self.history
            .last()
            .copied()
            .unwrap_or(CheckState::Initialized)
    }

    pub fn history(&self) -> &[CheckState] {
        &self.history
    }

    pub fn transition(&mut self, next: CheckState) -> Result<(), InvalidTransition> {
        let current = self.current();
        if !current.can_transition_to(next) {
            return Err(InvalidTransition {
                from: current,
                to: next,
            });
        }
        debug!(from = %current, to = %next, "Check state transition");
        self.history.push(next);
        Ok(())
    }
}
