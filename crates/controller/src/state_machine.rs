use crate::error::ControllerError;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Idle,
    Running,
    Paused,
    Stopped,
}

impl LoopState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopState::Idle => "idle",
            LoopState::Running => "running",
            LoopState::Paused => "paused",
            LoopState::Stopped => "stopped",
        }
    }

    /// Resolve `action` against this state.
    ///
    /// Returns `Ok(None)` when the action is a no-op (already in the target
    /// state) and `Ok(Some(next))` when the state changes.
    pub fn next(self, action: LoopAction) -> Result<Option<LoopState>, ControllerError> {
        let next = match (self, action) {
            (LoopState::Idle | LoopState::Paused, LoopAction::Start) => LoopState::Running,
            (LoopState::Running, LoopAction::Start | LoopAction::Resume) => return Ok(None),

            (LoopState::Running, LoopAction::Pause) => LoopState::Paused,
            (LoopState::Paused, LoopAction::Pause) => return Ok(None),

            (LoopState::Paused, LoopAction::Resume) => LoopState::Running,

            (LoopState::Stopped, LoopAction::Stop) => return Ok(None),
            (_, LoopAction::Stop) => LoopState::Stopped,

            (from, action) => return Err(ControllerError::InvalidTransition { from, action }),
        };
        Ok(Some(next))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Stopped)
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Start,
    Pause,
    Resume,
    Stop,
}

impl fmt::Display for LoopAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoopAction::Start => "start",
            LoopAction::Pause => "pause",
            LoopAction::Resume => "resume",
            LoopAction::Stop => "stop",
        })
    }
}
