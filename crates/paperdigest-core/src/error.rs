use thiserror::Error;

/// All errors that can occur in paperdigest-core.
#[derive(Debug, Error)]
pub enum DigestError {
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("No inference backend available: {0}")]
    MissingCapability(String),

    #[error("Inference error from {backend}: {message}")]
    Inference { backend: String, message: String },

    #[error("Run cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Exit codes used by the `paperdigest` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    ConfigError = 3,
    Cancelled = 130,
}

impl DigestError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Config(_) | Self::MissingCapability(_) | Self::TomlParse(_) => {
                ExitCode::ConfigError
            }
            Self::Cancelled => ExitCode::Cancelled,
            _ => ExitCode::GeneralError,
        }
    }
}

pub type Result<T> = std::result::Result<T, DigestError>;
