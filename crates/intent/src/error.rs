use homegw_providers::Error as LlmError;

/// Resolution failures. Business outcomes (no match, ambiguity, missing
/// parameters) are not errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The model could not be reached within the retry budget.
    #[error("intent service unavailable: {0}")]
    Unavailable(#[source] LlmError),

    /// The model answered with something that is not the expected structure.
    #[error("resolution response malformed: {0}")]
    Malformed(#[source] LlmError),
}

impl From<LlmError> for Error {
    fn from(err: LlmError) -> Self {
        if err.is_malformed() {
            Self::Malformed(err)
        } else {
            Self::Unavailable(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
