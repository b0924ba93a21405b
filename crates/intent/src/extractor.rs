//! Parameter Extractor: pulls typed parameter values for one processor out of
//! the message text.

use std::{fmt::Write as _, sync::Arc};

use {
    homegw_protocol::{ExtractionResult, ParameterSpec, ProcessorSpec},
    homegw_providers::{LlmTransport, complete_json},
    tracing::debug,
};

use crate::error::Result;

const EXTRACT_INSTRUCTIONS: &str = r#"Extract the parameter values from the user's request.
- Only include parameters whose value you can infer with confidence; leave out optional parameters the user did not mention.
- Never guess a required parameter: list every required parameter you cannot infer in "missing_required".
- For enum parameters, map the user's wording onto one of the allowed values (for example "switch it on" becomes "on").
- Keep numeric values inside their range.

Reply with JSON only, in exactly this shape:
{
  "success": true,
  "parameters": {"param1": "value1", "param2": 123},
  "missing_required": [],
  "message": ""
}
If a required parameter cannot be extracted, set "success" to false and explain why in "message"."#;

pub struct ParameterExtractor {
    llm: Arc<dyn LlmTransport>,
}

impl ParameterExtractor {
    pub fn new(llm: Arc<dyn LlmTransport>) -> Self {
        Self { llm }
    }

    /// Extract parameters for `processor` from `text`.
    ///
    /// The model's `success` flag is not trusted: required parameters that
    /// are neither extracted nor defaulted are added to `missing_required`,
    /// and any missing name downgrades the result to unsuccessful.
    pub async fn extract(&self, text: &str, processor: &ProcessorSpec) -> Result<ExtractionResult> {
        if processor.parameters.is_empty() {
            return Ok(ExtractionResult {
                success: true,
                ..ExtractionResult::default()
            });
        }

        let system = build_extract_prompt(processor);
        let user = format!("User request: {text}");
        let result: ExtractionResult = complete_json(self.llm.as_ref(), &system, &user).await?;
        let result = enforce_required(result, processor);

        debug!(
            processor_id = %processor.id,
            success = result.success,
            extracted = result.parameters.len(),
            missing = result.missing_required.len(),
            "parameter extraction complete"
        );
        Ok(result)
    }
}

/// Reconcile the model's answer with the processor's required parameters.
#[must_use]
pub fn enforce_required(mut result: ExtractionResult, processor: &ProcessorSpec) -> ExtractionResult {
    for param in processor.required_parameters() {
        let present = result
            .parameters
            .get(&param.name)
            .is_some_and(|v| !v.is_null());
        if !present && param.default.is_none() && !result.missing_required.contains(&param.name) {
            result.missing_required.push(param.name.clone());
        }
    }

    if !result.missing_required.is_empty() {
        result.success = false;
        result.message = format!(
            "missing required parameters: {}",
            result.missing_required.join(", ")
        );
    } else if !result.success && result.message.trim().is_empty() {
        result.message = "parameters could not be extracted".into();
    }
    result
}

/// System prompt describing every parameter of `processor`.
#[must_use]
pub fn build_extract_prompt(processor: &ProcessorSpec) -> String {
    let mut prompt = format!(
        "You extract parameters for the \"{}\" processor of a smart-home command gateway.\n\n\
         Processor description: {}\n\nParameters:\n",
        processor.name, processor.description
    );
    for param in &processor.parameters {
        prompt.push_str(&describe_parameter(param));
        prompt.push('\n');
    }
    prompt.push('\n');
    prompt.push_str(EXTRACT_INSTRUCTIONS);
    prompt
}

fn describe_parameter(param: &ParameterSpec) -> String {
    let mut line = format!(
        "- {} ({}): {}",
        param.name,
        param.kind.as_str(),
        param.description
    );
    if param.required {
        line.push_str(" [required]");
    }
    if !param.values.is_empty() {
        let _ = write!(line, " allowed values: {}", param.values.join(", "));
    }
    if let Some((min, max)) = param.bounds() {
        let _ = write!(line, " range: {min}-{max}");
    }
    if let Some(default) = &param.default {
        let _ = write!(line, " default: {default}");
    }
    line
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use {
        async_trait::async_trait,
        homegw_protocol::ParameterType,
        homegw_providers::Result as LlmResult,
        serde_json::json,
    };

    use {super::*, crate::Error};

    struct Scripted {
        reply: String,
        calls: AtomicUsize,
        last_system: Mutex<String>,
    }

    impl Scripted {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.into(),
                calls: AtomicUsize::new(0),
                last_system: Mutex::default(),
            })
        }
    }

    #[async_trait]
    impl LlmTransport for Scripted {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, system: &str, _user: &str) -> LlmResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_system.lock().unwrap() = system.to_string();
            Ok(self.reply.clone())
        }
    }

    fn thermostat() -> ProcessorSpec {
        ProcessorSpec {
            id: "thermostat.set".into(),
            name: "Thermostat".into(),
            group: "climate".into(),
            description: "Set the target temperature".into(),
            keywords: vec!["temperature".into()],
            parameters: vec![
                ParameterSpec {
                    name: "temperature".into(),
                    kind: ParameterType::Int,
                    required: true,
                    description: "target in Celsius".into(),
                    values: Vec::new(),
                    range: Some(vec![16.0, 30.0]),
                    default: None,
                },
                ParameterSpec {
                    name: "mode".into(),
                    kind: ParameterType::Enum,
                    required: false,
                    description: "operating mode".into(),
                    values: vec!["heat".into(), "cool".into()],
                    range: None,
                    default: Some(json!("heat")),
                },
            ],
            enabled: true,
        }
    }

    #[tokio::test]
    async fn prompt_describes_parameters() {
        let llm = Scripted::new(r#"{"success": true, "parameters": {"temperature": 22}}"#);
        let result = ParameterExtractor::new(llm.clone())
            .extract("set it to 22", &thermostat())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.parameters["temperature"], 22);

        let system = llm.last_system.lock().unwrap();
        assert!(system.contains("\"Thermostat\""));
        assert!(system.contains("- temperature (int): target in Celsius [required] range: 16-30"));
        assert!(system.contains("- mode (enum): operating mode allowed values: heat, cool default: \"heat\""));
    }

    #[tokio::test]
    async fn model_success_is_downgraded_when_required_missing() {
        let llm = Scripted::new(
            r#"{"success": true, "parameters": {}, "missing_required": ["temperature"], "message": ""}"#,
        );
        let result = ParameterExtractor::new(llm)
            .extract("make it warmer", &thermostat())
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.missing_required, ["temperature"]);
        assert!(result.message.contains("temperature"));
    }

    #[tokio::test]
    async fn silently_omitted_required_parameter_is_reported() {
        let llm = Scripted::new(r#"{"success": true, "parameters": {"mode": "cool"}}"#);
        let result = ParameterExtractor::new(llm)
            .extract("cool it down", &thermostat())
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.missing_required, ["temperature"]);
    }

    #[tokio::test]
    async fn extraction_is_idempotent_with_deterministic_model() {
        let llm = Scripted::new(r#"{"success": true, "parameters": {"temperature": 19, "mode": "heat"}}"#);
        let extractor = ParameterExtractor::new(llm.clone());
        let first = extractor.extract("19 degrees, heat", &thermostat()).await.unwrap();
        let second = extractor.extract("19 degrees, heat", &thermostat()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn processor_without_parameters_skips_the_model() {
        let llm = Scripted::new("unused");
        let mut spec = thermostat();
        spec.parameters.clear();
        let result = ParameterExtractor::new(llm.clone())
            .extract("reboot", &spec)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_reply_is_an_error_not_an_outcome() {
        let err = ParameterExtractor::new(Scripted::new("sorry, no idea"))
            .extract("x", &thermostat())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn default_satisfies_required_parameter() {
        let mut spec = thermostat();
        spec.parameters[0].default = Some(json!(21));
        let result = enforce_required(
            ExtractionResult {
                success: true,
                ..ExtractionResult::default()
            },
            &spec,
        );
        assert!(result.success);
        assert!(result.missing_required.is_empty());
    }

    #[test]
    fn failed_result_gets_a_message() {
        let result = enforce_required(ExtractionResult::default(), &ProcessorSpec {
            parameters: Vec::new(),
            ..thermostat()
        });
        assert!(!result.success);
        assert!(!result.message.is_empty());
    }
}
