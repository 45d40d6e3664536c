use crate::state_machine::{LoopAction, LoopState};
use capture::SourceError;
use inference::InferenceError;
use std::fmt;
use thiserror::Error;

/// What kept the loop from entering `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    Source,
    Model,
    SourceAndModel,
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Missing::Source => "no active video source",
            Missing::Model => "no model loaded",
            Missing::SourceAndModel => "no active video source and no model loaded",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Detection loop not ready: {missing}")]
    NotReady { missing: Missing },

    #[error("Cannot {action} while {from}")]
    InvalidTransition { from: LoopState, action: LoopAction },

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Inference(#[from] InferenceError),
}
