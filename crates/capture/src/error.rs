use std::fmt;
use thiserror::Error;

/// Why a source could not be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    PermissionDenied,
    NotFound,
    Unreachable,
    Busy,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnavailableReason::PermissionDenied => "permission denied",
            UnavailableReason::NotFound => "not found",
            UnavailableReason::Unreachable => "unreachable",
            UnavailableReason::Busy => "busy",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Source {id} unavailable ({reason}): {detail}")]
    Unavailable {
        id: String,
        reason: UnavailableReason,
        detail: String,
    },

    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("No local cameras discovered")]
    NoLocalCameras,

    #[error("No active source")]
    NoActiveSource,

    #[error("Frame capture failed: {0}")]
    Capture(String),
}

impl SourceError {
    pub fn unavailable(id: &str, reason: UnavailableReason, detail: impl fmt::Display) -> Self {
        Self::Unavailable {
            id: id.to_string(),
            reason,
            detail: detail.to_string(),
        }
    }
}
