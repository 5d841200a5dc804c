use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScienceError {
    #[error("invalid DOI: {0}")]
    InvalidDoi(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("rate limit from {0}, retry after {1}s")]
    RateLimit(String, u64),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("PDF extraction error: {0}")]
    PdfExtraction(String),

    #[error("not an image: {0}")]
    NotAnImage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScienceError {
    /// Whether the failure means "not available here" rather than a fault.
    ///
    /// Missing pages, access restrictions, throttling and transport errors are
    /// all expected on the open web; malformed payloads are not.
    pub fn is_soft(&self) -> bool {
        match self {
            Self::Status { status, .. } => {
                matches!(status, 401 | 403 | 404 | 410 | 429) || *status >= 500
            }
            Self::RateLimit(..) | Self::Http(_) | Self::NotAnImage(_) => true,
            Self::InvalidDoi(_) | Self::Parse(_) | Self::PdfExtraction(_) | Self::Io(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScienceError>;
