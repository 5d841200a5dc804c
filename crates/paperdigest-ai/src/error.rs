use paperdigest_core::DigestError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("API error [{status}]: {message}")]
    ApiError { status: u16, message: String },

    #[error("Backend returned an empty completion")]
    EmptyResponse,

    #[error("Assistant process failed: {0}")]
    Process(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LlmError {
    pub fn into_digest(self, backend: &str) -> DigestError {
        DigestError::Inference {
            backend: backend.to_string(),
            message: self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
