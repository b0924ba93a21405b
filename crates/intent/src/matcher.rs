//! Intent Matcher: ranks enabled processors against the message text.

use std::{collections::HashSet, fmt::Write as _, sync::Arc};

use {
    homegw_protocol::{MatchCandidate, MatchResponse, ProcessorSpec},
    homegw_providers::{LlmTransport, complete_json},
    tracing::{debug, warn},
};

use crate::error::Result;

const MATCH_INSTRUCTIONS: &str = r#"Rank the processors above by how well each one fits the user's request.
Give each match a confidence between 0 and 1 and a short reason.
If the request is vague or could mean several processors, return several matches.
If no processor fits, return an empty "matches" array.

Reply with JSON only, in exactly this shape:
{
  "matches": [
    {"processor_id": "xxx", "confidence": 0.95, "reason": "why it fits"},
    {"processor_id": "yyy", "confidence": 0.75, "reason": "why it fits"}
  ]
}"#;

pub struct IntentMatcher {
    llm: Arc<dyn LlmTransport>,
}

impl IntentMatcher {
    pub fn new(llm: Arc<dyn LlmTransport>) -> Self {
        Self { llm }
    }

    /// Ask the model which processors `text` refers to.
    ///
    /// Disabled processors are never offered. The returned list keeps the
    /// model's order and is not sorted. Candidates naming a processor that
    /// was not offered are dropped and confidences are clamped to `[0, 1]`.
    pub async fn match_processors(
        &self,
        text: &str,
        processors: &[ProcessorSpec],
    ) -> Result<Vec<MatchCandidate>> {
        let offered: Vec<&ProcessorSpec> = processors.iter().filter(|p| p.enabled).collect();
        if offered.is_empty() {
            return Ok(Vec::new());
        }

        let system = build_match_prompt(&offered);
        let user = format!("User request: {text}");
        let response: MatchResponse = complete_json(self.llm.as_ref(), &system, &user).await?;

        let known: HashSet<&str> = offered.iter().map(|p| p.id.as_str()).collect();
        let candidates: Vec<MatchCandidate> = response
            .matches
            .into_iter()
            .filter_map(|mut c| {
                if !known.contains(c.processor_id.as_str()) {
                    warn!(processor_id = %c.processor_id, "model proposed an unknown processor");
                    return None;
                }
                if c.confidence.is_nan() {
                    return None;
                }
                c.confidence = c.confidence.clamp(0.0, 1.0);
                Some(c)
            })
            .collect();

        debug!(
            offered = offered.len(),
            candidates = candidates.len(),
            "intent match complete"
        );
        Ok(candidates)
    }
}

/// System prompt listing every offered processor.
#[must_use]
pub fn build_match_prompt(processors: &[&ProcessorSpec]) -> String {
    let mut prompt = String::from(
        "You are the intent recognizer of a smart-home command gateway. \
         Decide which processor should handle the user's request.\n\nAvailable processors:\n",
    );
    for p in processors {
        let _ = writeln!(
            prompt,
            "- ID: {}, Name: {}, Description: {}, Keywords: {}",
            p.id,
            p.name,
            p.description,
            p.keywords.join(", ")
        );
    }
    prompt.push('\n');
    prompt.push_str(MATCH_INSTRUCTIONS);
    prompt
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use {
        async_trait::async_trait,
        homegw_providers::{Error as LlmError, Result as LlmResult},
    };

    use {super::*, crate::Error};

    /// Replays a fixed reply and records the prompts it was given.
    struct Scripted {
        reply: LlmResult<String>,
        prompts: Mutex<Vec<(String, String)>>,
    }

    impl Scripted {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                prompts: Mutex::default(),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(LlmError::Transport("connection refused".into())),
                prompts: Mutex::default(),
            })
        }
    }

    #[async_trait]
    impl LlmTransport for Scripted {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, system: &str, user: &str) -> LlmResult<String> {
            self.prompts
                .lock()
                .unwrap()
                .push((system.to_string(), user.to_string()));
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(_) => Err(LlmError::Transport("connection refused".into())),
            }
        }
    }

    fn spec(id: &str, enabled: bool) -> ProcessorSpec {
        ProcessorSpec {
            id: id.into(),
            name: format!("{id} name"),
            group: "g".into(),
            description: format!("{id} description"),
            keywords: vec!["kw1".into(), "kw2".into()],
            parameters: Vec::new(),
            enabled,
        }
    }

    #[tokio::test]
    async fn prompt_lists_only_enabled_processors() {
        let llm = Scripted::ok(r#"{"matches": []}"#);
        let matcher = IntentMatcher::new(llm.clone());
        let out = matcher
            .match_processors("turn on the light", &[spec("light.on", true), spec("secret", false)])
            .await
            .unwrap();
        assert!(out.is_empty());

        let prompts = llm.prompts.lock().unwrap();
        let (system, user) = &prompts[0];
        assert!(system.contains("ID: light.on, Name: light.on name"));
        assert!(system.contains("Keywords: kw1, kw2"));
        assert!(!system.contains("secret"));
        assert!(user.contains("turn on the light"));
    }

    #[tokio::test]
    async fn no_enabled_processors_skips_the_model() {
        let llm = Scripted::ok("unused");
        let out = IntentMatcher::new(llm.clone())
            .match_processors("hi", &[spec("off", false)])
            .await
            .unwrap();
        assert!(out.is_empty());
        assert!(llm.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn keeps_model_order_and_drops_unknown_ids() {
        let llm = Scripted::ok(
            r#"Result:
            {"matches": [
                {"processor_id": "b", "confidence": 0.6, "reason": "maybe"},
                {"processor_id": "ghost", "confidence": 0.99},
                {"processor_id": "a", "confidence": 1.4, "reason": "clearly"}
            ]}"#,
        );
        let out = IntentMatcher::new(llm)
            .match_processors("x", &[spec("a", true), spec("b", true)])
            .await
            .unwrap();
        let ids: Vec<_> = out.iter().map(|c| c.processor_id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
        assert_eq!(out[1].confidence, 1.0);
    }

    #[tokio::test]
    async fn transport_failure_is_unavailable() {
        let err = IntentMatcher::new(Scripted::failing())
            .match_processors("x", &[spec("a", true)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }

    #[tokio::test]
    async fn unparsable_reply_is_malformed() {
        let err = IntentMatcher::new(Scripted::ok("I think you mean the lights."))
            .match_processors("x", &[spec("a", true)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));

        let err = IntentMatcher::new(Scripted::ok(r#"{"matches": "lights"}"#))
            .match_processors("x", &[spec("a", true)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }
}
