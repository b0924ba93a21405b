/// Errors from a language-model call.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connection, TLS or timeout failure before a response arrived.
    #[error("llm transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status.
    #[error("llm API error HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body carried an `error` object.
    #[error("llm API error: {message}")]
    Api { message: String },

    /// The response had no choices or an empty message.
    #[error("llm returned an empty response")]
    EmptyResponse,

    /// The HTTP body was not a chat-completion envelope.
    #[error("undecodable llm completion: {message}")]
    Envelope { message: String, raw: String },

    /// A payload was found but did not have the expected shape.
    #[error("malformed llm response: {message}")]
    Malformed { message: String, raw: String },

    /// No structured payload could be found in the model's text.
    #[error("no structured payload in llm response")]
    NoPayload { raw: String },
}

impl Error {
    /// The model answered, but not with usable structured data.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::Envelope { .. } | Self::Malformed { .. } | Self::NoPayload { .. }
        )
    }

    /// The model could not be reached or refused the request.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        !self.is_malformed()
    }

    /// Worth another attempt: network trouble, throttling, a server fault or
    /// a garbled completion envelope.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::EmptyResponse | Self::Api { .. } | Self::Envelope { .. } => {
                true
            },
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Malformed { .. } | Self::NoPayload { .. } => false,
        }
    }

    #[must_use]
    pub fn malformed(message: impl std::fmt::Display, raw: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.to_string(),
            raw: raw.into(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.without_url().to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
