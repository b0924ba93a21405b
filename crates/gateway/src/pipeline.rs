//! Pipeline orchestrator: match, arbitrate, extract, dispatch.

use std::{sync::Arc, time::Duration};

use {
    chrono::Utc,
    homegw_broker::{CorrelationBroker, Error as BrokerError},
    homegw_common::{NormalizedMessage, new_trace_id},
    homegw_config::ProcessorCatalog,
    homegw_intent::{Arbitration, Error as IntentError, IntentMatcher, ParameterExtractor, arbitrate},
    homegw_protocol::{
        DispatchRequest, MatchCandidate, Parameters, ProcessorCandidate, ProcessorSpec,
    },
    homegw_providers::LlmTransport,
    tokio::time::Instant,
    tracing::{debug, info, warn},
};

use crate::outcome::{CommandOutcome, ServiceErrorKind};

/// Runs one message through resolution and, when a transport is
/// configured, dispatch.
pub struct Orchestrator {
    catalog: Arc<ProcessorCatalog>,
    matcher: IntentMatcher,
    extractor: ParameterExtractor,
    broker: Option<Arc<CorrelationBroker>>,
    response_timeout: Duration,
}

/// A processor with validated parameters, ready for dispatch.
struct Resolved {
    processor: ProcessorSpec,
    parameters: Parameters,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<ProcessorCatalog>,
        llm: Arc<dyn LlmTransport>,
        broker: Option<Arc<CorrelationBroker>>,
        response_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            matcher: IntentMatcher::new(Arc::clone(&llm)),
            extractor: ParameterExtractor::new(llm),
            broker,
            response_timeout,
        }
    }

    /// The "list enabled processors" query.
    #[must_use]
    pub fn list_enabled(&self) -> Vec<ProcessorSpec> {
        self.catalog.enabled()
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<ProcessorCatalog> {
        &self.catalog
    }

    #[must_use]
    pub fn has_transport(&self) -> bool {
        self.broker.is_some()
    }

    /// Submit one message. Never fails: every terminating condition is an
    /// outcome carrying a fresh trace id.
    ///
    /// `deadline` bounds the whole call. Expiry during resolution yields a
    /// `deadline_exceeded` service error and during the worker wait a
    /// dispatch timeout.
    pub async fn submit(&self, message: &NormalizedMessage, deadline: Option<Instant>) -> CommandOutcome {
        let trace_id = new_trace_id();
        let started = Instant::now();
        info!(
            trace_id = %trace_id,
            channel = %message.channel(),
            user_id = message.channel_user_id().unwrap_or("-"),
            "command received"
        );

        let resolution = match deadline {
            Some(at) => tokio::time::timeout_at(at, self.resolve(&trace_id, message.text()))
                .await
                .unwrap_or_else(|_| {
                    Err(CommandOutcome::ServiceError {
                        trace_id: trace_id.clone(),
                        kind: ServiceErrorKind::DeadlineExceeded,
                        cause: "deadline expired during resolution".into(),
                    })
                }),
            None => self.resolve(&trace_id, message.text()).await,
        };

        let outcome = match resolution {
            Ok(resolved) => self.dispatch(&trace_id, message, resolved, deadline).await,
            Err(outcome) => outcome,
        };

        info!(
            trace_id = %trace_id,
            status = ?outcome.status(),
            processor_id = outcome.processor_id().unwrap_or("-"),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "command finished"
        );
        outcome
    }

    async fn resolve(&self, trace_id: &str, text: &str) -> Result<Resolved, CommandOutcome> {
        let enabled = self.catalog.enabled();
        if enabled.is_empty() {
            return Err(service_error(
                trace_id,
                ServiceErrorKind::NoProcessors,
                "catalog has no enabled processors",
            ));
        }

        let candidates = self
            .matcher
            .match_processors(text, &enabled)
            .await
            .map_err(|e| intent_failure(trace_id, "match", &e))?;
        debug!(trace_id, candidates = candidates.len(), "intent candidates");

        let top = match arbitrate(candidates) {
            Arbitration::NoMatch => {
                return Err(CommandOutcome::Unresolved {
                    trace_id: trace_id.to_string(),
                });
            },
            Arbitration::Ambiguous(choices) => {
                return Err(CommandOutcome::Ambiguous {
                    trace_id: trace_id.to_string(),
                    candidates: self.describe_candidates(choices),
                });
            },
            Arbitration::Selected(top) => top,
        };

        let Some(processor) = self.catalog.get(&top.processor_id).filter(|p| p.enabled) else {
            warn!(trace_id, processor_id = %top.processor_id, "selected processor left the catalog");
            return Err(service_error(
                trace_id,
                ServiceErrorKind::CatalogMiss,
                format!("processor {} is no longer in the catalog", top.processor_id),
            ));
        };
        debug!(
            trace_id,
            processor_id = %processor.id,
            confidence = top.confidence,
            "processor selected"
        );

        let extraction = self
            .extractor
            .extract(text, &processor)
            .await
            .map_err(|e| intent_failure(trace_id, "extract", &e))?;
        if !extraction.success {
            return Err(CommandOutcome::IncompleteParameters {
                trace_id: trace_id.to_string(),
                processor_id: processor.id,
                missing: extraction.missing_required,
                message: extraction.message,
            });
        }

        Ok(Resolved {
            processor,
            parameters: extraction.parameters,
        })
    }

    async fn dispatch(
        &self,
        trace_id: &str,
        message: &NormalizedMessage,
        resolved: Resolved,
        deadline: Option<Instant>,
    ) -> CommandOutcome {
        let processor_id = resolved.processor.id;
        let Some(broker) = &self.broker else {
            return CommandOutcome::ResolvedNotDispatched {
                trace_id: trace_id.to_string(),
                processor_id,
                parameters: resolved.parameters,
            };
        };

        let timeout = match deadline {
            Some(at) => self
                .response_timeout
                .min(at.saturating_duration_since(Instant::now())),
            None => self.response_timeout,
        };
        // Nothing is published once the caller's budget is spent.
        if timeout.is_zero() {
            return service_error(
                trace_id,
                ServiceErrorKind::DeadlineExceeded,
                "deadline reached before dispatch",
            );
        }
        let request = DispatchRequest {
            trace_id: trace_id.to_string(),
            timestamp: Utc::now(),
            processor_id: processor_id.clone(),
            parameters: resolved.parameters,
            original_text: message.text().to_string(),
            channel: message.channel(),
            channel_user_id: message.channel_user_id().map(String::from),
        };

        match broker.dispatch(&request, timeout).await {
            Ok(response) => CommandOutcome::Dispatched {
                trace_id: trace_id.to_string(),
                processor_id,
                response,
            },
            Err(BrokerError::Timeout { .. }) => CommandOutcome::DispatchTimeout {
                trace_id: trace_id.to_string(),
                processor_id,
            },
            Err(e) => {
                warn!(trace_id, processor_id = %processor_id, error = %e, "dispatch failed");
                CommandOutcome::DispatchFailed {
                    trace_id: trace_id.to_string(),
                    processor_id,
                    cause: e.to_string(),
                }
            },
        }
    }

    /// Attach display names; candidates whose processor vanished are omitted.
    fn describe_candidates(&self, choices: Vec<MatchCandidate>) -> Vec<ProcessorCandidate> {
        let snapshot = self.catalog.snapshot();
        choices
            .into_iter()
            .filter_map(|c| {
                let spec = snapshot.iter().find(|p| p.id == c.processor_id)?;
                Some(ProcessorCandidate {
                    id: c.processor_id,
                    name: spec.name.clone(),
                    confidence: c.confidence,
                    reason: c.reason,
                })
            })
            .collect()
    }
}

fn service_error(trace_id: &str, kind: ServiceErrorKind, cause: impl Into<String>) -> CommandOutcome {
    CommandOutcome::ServiceError {
        trace_id: trace_id.to_string(),
        kind,
        cause: cause.into(),
    }
}

fn intent_failure(trace_id: &str, stage: &str, err: &IntentError) -> CommandOutcome {
    warn!(trace_id, stage, error = %err, "intent resolution failed");
    let kind = match err {
        IntentError::Unavailable(_) => ServiceErrorKind::IntentUnavailable,
        IntentError::Malformed(_) => ServiceErrorKind::MalformedResponse,
    };
    service_error(trace_id, kind, err.to_string())
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use {
        async_trait::async_trait,
        homegw_broker::{BrokerConfig, MemoryBus, PubSubTransport},
        homegw_common::MessageChannel,
        homegw_protocol::{CommandStatus, DispatchResponse, ParameterSpec, ParameterType},
        homegw_providers::{Error as LlmError, Result as LlmResult},
    };

    use super::*;

    /// Replies in order; an empty queue is a transport failure.
    #[derive(Default)]
    struct ScriptedLlm {
        replies: Mutex<VecDeque<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedLlm {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmTransport for ScriptedLlm {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _system: &str, _user: &str) -> LlmResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LlmError::Transport("script exhausted".into()))
        }
    }

    /// Never answers.
    struct HangingLlm;

    #[async_trait]
    impl LlmTransport for HangingLlm {
        fn model(&self) -> &str {
            "hanging"
        }

        async fn complete(&self, _system: &str, _user: &str) -> LlmResult<String> {
            std::future::pending().await
        }
    }

    fn processor(id: &str, name: &str, parameters: Vec<ParameterSpec>) -> ProcessorSpec {
        ProcessorSpec {
            id: id.into(),
            name: name.into(),
            group: "home".into(),
            description: format!("{name} control"),
            keywords: vec![name.to_lowercase()],
            parameters,
            enabled: true,
        }
    }

    fn catalog() -> Arc<ProcessorCatalog> {
        Arc::new(ProcessorCatalog::new(vec![
            processor("lighting", "Lights", Vec::new()),
            processor("climate", "Climate", Vec::new()),
            processor("thermostat.set", "Thermostat", vec![ParameterSpec {
                name: "temperature".into(),
                kind: ParameterType::Int,
                required: true,
                description: "target temperature".into(),
                values: Vec::new(),
                range: Some(vec![16.0, 30.0]),
                default: None,
            }]),
        ]))
    }

    fn message(text: &str) -> NormalizedMessage {
        NormalizedMessage::new(text, MessageChannel::Http)
            .unwrap()
            .with_user_id("u1")
    }

    fn orchestrator(llm: Arc<dyn LlmTransport>) -> Orchestrator {
        Orchestrator::new(catalog(), llm, None, Duration::from_secs(2))
    }

    #[tokio::test]
    async fn empty_match_list_is_unresolved() {
        let llm = ScriptedLlm::new(&[r#"{"matches": []}"#]);
        let outcome = orchestrator(llm).submit(&message("sing a song"), None).await;
        assert!(matches!(outcome, CommandOutcome::Unresolved { .. }));
        assert!(!outcome.trace_id().is_empty());
    }

    #[tokio::test]
    async fn narrow_margin_is_ambiguous_and_skips_extraction() {
        let llm = ScriptedLlm::new(&[
            r#"{"matches": [
                {"processor_id": "lighting", "confidence": 0.9},
                {"processor_id": "climate", "confidence": 0.78}
            ]}"#,
        ]);
        let outcome = orchestrator(llm.clone()).submit(&message("make it nicer"), None).await;
        let CommandOutcome::Ambiguous { candidates, .. } = outcome else {
            panic!("expected ambiguity, got {outcome:?}");
        };
        let names: Vec<_> = candidates.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Lights", "Climate"]);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_required_parameter_is_incomplete() {
        let llm = ScriptedLlm::new(&[
            r#"{"matches": [{"processor_id": "thermostat.set", "confidence": 0.95}]}"#,
            r#"{"success": true, "parameters": {}, "missing_required": ["temperature"]}"#,
        ]);
        let outcome = orchestrator(llm).submit(&message("set the thermostat"), None).await;
        let resp = outcome.to_response();
        assert!(!resp.success);
        assert_eq!(resp.status, CommandStatus::IncompleteParameters);
        assert_eq!(resp.missing_params, ["temperature"]);
        assert!(resp.message.contains("temperature"));
    }

    #[tokio::test]
    async fn no_transport_short_circuits_after_extraction() {
        let llm = ScriptedLlm::new(&[
            r#"{"matches": [{"processor_id": "thermostat.set", "confidence": 0.95}]}"#,
            r#"{"success": true, "parameters": {"temperature": 21}}"#,
        ]);
        let outcome = orchestrator(llm).submit(&message("21 degrees please"), None).await;
        let CommandOutcome::ResolvedNotDispatched { processor_id, parameters, .. } = outcome else {
            panic!("expected resolved-not-dispatched, got {outcome:?}");
        };
        assert_eq!(processor_id, "thermostat.set");
        assert_eq!(parameters["temperature"], 21);
    }

    #[tokio::test]
    async fn llm_outage_is_service_error() {
        let llm = ScriptedLlm::new(&[]);
        let outcome = orchestrator(llm).submit(&message("lights on"), None).await;
        assert!(matches!(outcome, CommandOutcome::ServiceError {
            kind: ServiceErrorKind::IntentUnavailable,
            ..
        }));
    }

    #[tokio::test]
    async fn garbage_reply_is_malformed_service_error() {
        let llm = ScriptedLlm::new(&["I'd rather not."]);
        let outcome = orchestrator(llm).submit(&message("lights on"), None).await;
        assert!(matches!(outcome, CommandOutcome::ServiceError {
            kind: ServiceErrorKind::MalformedResponse,
            ..
        }));
    }

    /// Removes "lighting" from the catalog while answering, like a reload
    /// landing between matching and lookup.
    struct ReloadingLlm {
        catalog: Arc<ProcessorCatalog>,
    }

    #[async_trait]
    impl LlmTransport for ReloadingLlm {
        fn model(&self) -> &str {
            "reloading"
        }

        async fn complete(&self, _system: &str, _user: &str) -> LlmResult<String> {
            let mut specs = (*self.catalog.snapshot()).clone();
            specs.retain(|p| p.id != "lighting");
            self.catalog.replace(specs);
            Ok(r#"{"matches": [{"processor_id": "lighting", "confidence": 0.99}]}"#.into())
        }
    }

    #[tokio::test]
    async fn processor_removed_by_reload_is_catalog_miss() {
        let catalog = catalog();
        let llm = Arc::new(ReloadingLlm {
            catalog: Arc::clone(&catalog),
        });
        let orch = Orchestrator::new(catalog, llm, None, Duration::from_secs(2));
        let outcome = orch.submit(&message("lights on"), None).await;
        assert!(matches!(outcome, CommandOutcome::ServiceError {
            kind: ServiceErrorKind::CatalogMiss,
            ..
        }));
    }

    #[tokio::test]
    async fn empty_catalog_reports_no_processors() {
        let orch = Orchestrator::new(
            Arc::new(ProcessorCatalog::default()),
            ScriptedLlm::new(&[]),
            None,
            Duration::from_secs(1),
        );
        assert!(matches!(
            orch.submit(&message("anything"), None).await,
            CommandOutcome::ServiceError {
                kind: ServiceErrorKind::NoProcessors,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn caller_deadline_cancels_resolution() {
        let orch = orchestrator(Arc::new(HangingLlm));
        let deadline = Instant::now() + Duration::from_millis(500);
        let outcome = orch.submit(&message("lights on"), Some(deadline)).await;
        assert!(matches!(outcome, CommandOutcome::ServiceError {
            kind: ServiceErrorKind::DeadlineExceeded,
            ..
        }));
    }

    async fn broker_with_worker(bus: Arc<MemoryBus>, answer: bool) -> Arc<CorrelationBroker> {
        let config = BrokerConfig {
            request_topic: "req".into(),
            response_topic: "resp".into(),
            response_timeout: Duration::from_secs(2),
        };
        let broker = CorrelationBroker::start(bus.clone(), config).await.unwrap();
        let mut requests = bus.subscribe("req").await.unwrap();
        tokio::spawn(async move {
            use futures::StreamExt;
            while let Some(payload) = requests.next().await {
                if !answer {
                    continue;
                }
                let req: DispatchRequest = serde_json::from_slice(&payload).unwrap();
                let resp = DispatchResponse {
                    trace_id: req.trace_id.clone(),
                    processor_id: req.processor_id.clone(),
                    success: true,
                    result: Some(serde_json::json!({"echo": req.parameters})),
                    error: None,
                    processed_at: Utc::now(),
                };
                bus.publish("resp", &req.trace_id, serde_json::to_vec(&resp).unwrap().into())
                    .await
                    .unwrap();
            }
        });
        Arc::new(broker)
    }

    /// Answers the lighting match after a fixed delay.
    struct SlowLlm(Duration);

    #[async_trait]
    impl LlmTransport for SlowLlm {
        fn model(&self) -> &str {
            "slow"
        }

        async fn complete(&self, _system: &str, _user: &str) -> LlmResult<String> {
            tokio::time::sleep(self.0).await;
            Ok(r#"{"matches": [{"processor_id": "lighting", "confidence": 0.95}]}"#.into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn spent_deadline_publishes_nothing() {
        use futures::{FutureExt, StreamExt};

        let bus = Arc::new(MemoryBus::new());
        let broker = broker_with_worker(bus.clone(), true).await;
        let mut observer = bus.subscribe("req").await.unwrap();
        let llm = Arc::new(SlowLlm(Duration::from_millis(500)));
        let orch = Orchestrator::new(catalog(), llm, Some(broker.clone()), Duration::from_secs(2));

        let deadline = Instant::now() + Duration::from_millis(500);
        let outcome = orch.submit(&message("lights on"), Some(deadline)).await;

        assert!(
            matches!(outcome, CommandOutcome::ServiceError {
                kind: ServiceErrorKind::DeadlineExceeded,
                ..
            }),
            "got {outcome:?}"
        );
        assert!(observer.next().now_or_never().is_none());
        assert_eq!(broker.pending(), 0);
    }

    #[tokio::test]
    async fn dispatches_to_worker_and_returns_reply() {
        let bus = Arc::new(MemoryBus::new());
        let broker = broker_with_worker(bus, true).await;
        let llm = ScriptedLlm::new(&[
            r#"{"matches": [{"processor_id": "thermostat.set", "confidence": 0.95}]}"#,
            r#"{"success": true, "parameters": {"temperature": 22}}"#,
        ]);
        let orch = Orchestrator::new(catalog(), llm, Some(broker.clone()), Duration::from_secs(2));

        let outcome = orch.submit(&message("22 degrees"), None).await;
        let CommandOutcome::Dispatched { trace_id, response, .. } = &outcome else {
            panic!("expected dispatch, got {outcome:?}");
        };
        assert_eq!(&response.trace_id, trace_id);
        assert_eq!(response.result.as_ref().unwrap()["echo"]["temperature"], 22);
        assert_eq!(broker.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_worker_is_dispatch_timeout() {
        let bus = Arc::new(MemoryBus::new());
        let broker = broker_with_worker(bus, false).await;
        let llm = ScriptedLlm::new(&[
            r#"{"matches": [{"processor_id": "lighting", "confidence": 0.95}]}"#,
        ]);
        let orch = Orchestrator::new(catalog(), llm, Some(broker.clone()), Duration::from_secs(2));

        let outcome = orch.submit(&message("lights on"), None).await;
        assert!(matches!(outcome, CommandOutcome::DispatchTimeout { .. }));
        assert_eq!(broker.pending(), 0);
    }
}
