//! OpenAI-compatible `/chat/completions` client.

use std::time::Duration;

use {
    async_trait::async_trait,
    homegw_config::LlmConfig,
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
    tracing::{debug, trace, warn},
};

use crate::{
    LlmTransport,
    error::{Error, Result},
};

pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<Secret<String>>,
    model: String,
    temperature: f32,
    max_retries: u32,
    retry_backoff: Duration,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

impl OpenAiCompatClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
        })
    }

    async fn request_once(&self, body: &serde_json::Value) -> Result<String> {
        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(body);
        if let Some(key) = self
            .api_key
            .as_ref()
            .map(|k| k.expose_secret())
            .filter(|k| !k.is_empty())
        {
            req = req.bearer_auth(key);
        }

        let http_resp = req.send().await?;
        let status = http_resp.status();
        let text = http_resp.text().await?;
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        trace!(response = %text, "llm raw response");

        let resp: ChatResponse = serde_json::from_str(&text).map_err(|e| Error::Envelope {
            message: e.to_string(),
            raw: text.clone(),
        })?;
        if let Some(err) = resp.error {
            let message = match err.kind {
                Some(kind) => format!("{} (type: {kind})", err.message),
                None => err.message,
            };
            return Err(Error::Api { message });
        }
        resp.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(Error::EmptyResponse)
    }
}

#[async_trait]
impl LlmTransport for OpenAiCompatClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let mut attempt = 0;
        loop {
            match self.request_once(&body).await {
                Ok(content) => {
                    debug!(model = %self.model, attempt, bytes = content.len(), "llm completion");
                    return Ok(content);
                },
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.retry_backoff * attempt;
                    warn!(
                        model = %self.model,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "llm request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(e) => {
                    warn!(model = %self.model, attempt, error = %e, "llm request failed");
                    return Err(e);
                },
            }
        }
    }
}
