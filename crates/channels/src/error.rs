use std::error::Error as StdError;

/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed channel errors shared by normalizers and outbound senders.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Inbound payload is malformed or carries no usable text.
    #[error("invalid channel input: {message}")]
    InvalidInput { message: String },

    /// Webhook authentication failed.
    #[error("channel request rejected: {message}")]
    Unauthorized { message: String },

    /// Operation is currently unavailable (not configured or not implemented).
    #[error("channel operation unavailable: {message}")]
    Unavailable { message: String },

    /// Wrapped source error from an external dependency.
    #[error("channel operation failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unauthorized(message: impl std::fmt::Display) -> Self {
        Self::Unauthorized {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

impl From<homegw_common::Error> for Error {
    fn from(err: homegw_common::Error) -> Self {
        match err {
            homegw_common::Error::InvalidInput(message) => Self::InvalidInput { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_message_keeps_its_reason() {
        let err: Error = homegw_common::NormalizedMessage::new("  ", homegw_common::MessageChannel::Http)
            .unwrap_err()
            .into();
        assert!(matches!(&err, Error::InvalidInput { message } if message.contains("must not be empty")));
    }
}
