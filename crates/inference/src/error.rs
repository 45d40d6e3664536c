use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Failed to load model {id}: {reason}")]
    ModelLoad { id: String, reason: String },

    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("No model loaded")]
    NoModelLoaded,
}

impl InferenceError {
    pub(crate) fn load(id: &str, err: &anyhow::Error) -> Self {
        Self::ModelLoad {
            id: id.to_string(),
            reason: format!("{err:#}"),
        }
    }
}
