use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Inbound input rejected before it reaches the resolution pipeline.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
