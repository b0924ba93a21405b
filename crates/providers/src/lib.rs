//! Language-model access for intent resolution.
//!
//! [`LlmTransport`] is the seam the resolution pipeline talks to;
//! [`OpenAiCompatClient`] implements it for any OpenAI-compatible endpoint.

pub mod error;
pub mod json_extract;
pub mod openai_compat;

use {async_trait::async_trait, serde::de::DeserializeOwned, tracing::debug};

pub use {
    error::{Error, Result},
    json_extract::extract_json_payload,
    openai_compat::OpenAiCompatClient,
};

/// One system + user prompt exchange with a language model.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    /// Model identifier, for logs and health output.
    fn model(&self) -> &str;

    /// Send the prompts and return the model's raw text reply.
    ///
    /// Implementations own their retry policy. Dropping the future cancels
    /// the call.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Complete and decode the first JSON payload in the reply as `T`.
pub async fn complete_json<T: DeserializeOwned>(
    llm: &dyn LlmTransport,
    system: &str,
    user: &str,
) -> Result<T> {
    let raw = llm.complete(system, user).await?;
    let Some(payload) = extract_json_payload(&raw) else {
        debug!(model = llm.model(), "llm reply contained no JSON payload");
        return Err(Error::NoPayload { raw });
    };
    serde_json::from_str(payload).map_err(|e| Error::malformed(e, payload))
}
