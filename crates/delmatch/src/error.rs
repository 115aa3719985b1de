use thiserror::Error;

use guru_core::ingest::SourceError;
use guru_core::store::StoreError;

#[derive(Debug, Error)]
pub enum DelMatchError {
    #[error("invalid Del Match URL format: `{0}`")]
    InvalidDomain(String),
    #[error("Del Match request failed: {0}")]
    Transport(String),
    #[error("Del Match rejected the credentials: {0}")]
    Unauthorized(String),
    #[error("Del Match returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("authentication failed: no token received")]
    EmptyToken,
    #[error("unexpected response from Del Match: {0}")]
    Decode(String),
    #[error("{0}")]
    NotConfigured(String),
    #[error("token could not be stored: {0}")]
    Store(#[from] StoreError),
}

impl From<reqwest::Error> for DelMatchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Decode(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

impl From<DelMatchError> for SourceError {
    fn from(value: DelMatchError) -> Self {
        match value {
            DelMatchError::InvalidDomain(_) | DelMatchError::NotConfigured(_) => {
                Self::NotConfigured(value.to_string())
            }
            DelMatchError::Unauthorized(_) | DelMatchError::EmptyToken => {
                Self::Unauthenticated(value.to_string())
            }
            DelMatchError::Decode(_) => Self::Unparsable(value.to_string()),
            DelMatchError::Transport(_) | DelMatchError::Status { .. } | DelMatchError::Store(_) => {
                Self::Unreachable(value.to_string())
            }
        }
    }
}
