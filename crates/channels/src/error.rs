use std::error::Error as StdError;

use waigaya_common::{Coded, ErrorCode};

/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed channel errors shared across the store and sink traits.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input payload or parameter is invalid.
    #[error("invalid channel input: {message}")]
    InvalidInput { message: String },

    /// Loading or saving persisted state failed.
    #[error("channel storage failed: {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn storage(context: impl Into<String>, source: impl StdError + Send + Sync + 'static) -> Self {
        Self::Storage {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

impl Coded for Error {
    fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidInput { .. } => ErrorCode::Data,
            Self::Storage { .. } => ErrorCode::Storage,
        }
    }
}
