//! Terminal states of a submitted command and their API rendering.

use std::fmt;

use homegw_protocol::{
    CommandResponse, CommandStatus, DispatchResponse, Parameters, ProcessorCandidate,
};

/// Why resolution failed without reaching a business outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    IntentUnavailable,
    MalformedResponse,
    /// The resolved processor vanished or was disabled by a concurrent reload.
    CatalogMiss,
    NoProcessors,
    DeadlineExceeded,
}

impl ServiceErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IntentUnavailable => "intent_unavailable",
            Self::MalformedResponse => "malformed_response",
            Self::CatalogMiss => "catalog_miss",
            Self::NoProcessors => "no_processors",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::IntentUnavailable => "intent service unavailable",
            Self::MalformedResponse => "resolution response malformed",
            Self::CatalogMiss => "resolved processor is no longer available",
            Self::NoProcessors => "no processors are enabled",
            Self::DeadlineExceeded => "request deadline exceeded",
        }
    }
}

impl fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one pass through the pipeline. Every variant carries the trace id.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Dispatched {
        trace_id: String,
        processor_id: String,
        response: DispatchResponse,
    },
    /// Resolved and extracted, but no transport is configured.
    ResolvedNotDispatched {
        trace_id: String,
        processor_id: String,
        parameters: Parameters,
    },
    Ambiguous {
        trace_id: String,
        candidates: Vec<ProcessorCandidate>,
    },
    Unresolved {
        trace_id: String,
    },
    IncompleteParameters {
        trace_id: String,
        processor_id: String,
        missing: Vec<String>,
        message: String,
    },
    ServiceError {
        trace_id: String,
        kind: ServiceErrorKind,
        cause: String,
    },
    DispatchTimeout {
        trace_id: String,
        processor_id: String,
    },
    DispatchFailed {
        trace_id: String,
        processor_id: String,
        cause: String,
    },
    /// Input validation failed before the pipeline ran.
    Rejected {
        trace_id: String,
        reason: String,
    },
}

impl CommandOutcome {
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            trace_id: homegw_common::new_trace_id(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn trace_id(&self) -> &str {
        match self {
            Self::Dispatched { trace_id, .. }
            | Self::ResolvedNotDispatched { trace_id, .. }
            | Self::Ambiguous { trace_id, .. }
            | Self::Unresolved { trace_id }
            | Self::IncompleteParameters { trace_id, .. }
            | Self::ServiceError { trace_id, .. }
            | Self::DispatchTimeout { trace_id, .. }
            | Self::DispatchFailed { trace_id, .. }
            | Self::Rejected { trace_id, .. } => trace_id,
        }
    }

    #[must_use]
    pub fn status(&self) -> CommandStatus {
        match self {
            Self::Dispatched { .. } => CommandStatus::Dispatched,
            Self::ResolvedNotDispatched { .. } => CommandStatus::ResolvedNotDispatched,
            Self::Ambiguous { .. } => CommandStatus::Ambiguous,
            Self::Unresolved { .. } => CommandStatus::Unresolved,
            Self::IncompleteParameters { .. } => CommandStatus::IncompleteParameters,
            Self::ServiceError { .. } => CommandStatus::ServiceError,
            Self::DispatchTimeout { .. } => CommandStatus::DispatchTimeout,
            Self::DispatchFailed { .. } => CommandStatus::DispatchFailed,
            Self::Rejected { .. } => CommandStatus::Rejected,
        }
    }

    #[must_use]
    pub fn processor_id(&self) -> Option<&str> {
        match self {
            Self::Dispatched { processor_id, .. }
            | Self::ResolvedNotDispatched { processor_id, .. }
            | Self::IncompleteParameters { processor_id, .. }
            | Self::DispatchTimeout { processor_id, .. }
            | Self::DispatchFailed { processor_id, .. } => Some(processor_id),
            _ => None,
        }
    }

    /// `true` when the command reached a worker and the worker succeeded, or
    /// when it was fully resolved without a transport.
    #[must_use]
    pub fn is_success(&self) -> bool {
        match self {
            Self::Dispatched { response, .. } => response.success,
            Self::ResolvedNotDispatched { .. } => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Dispatched { response, .. } if response.success => "command executed".into(),
            Self::Dispatched { response, .. } => response
                .error
                .clone()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| "processor reported a failure".into()),
            Self::ResolvedNotDispatched { processor_id, .. } => {
                format!("resolved to {processor_id}; no transport configured, not dispatched")
            },
            Self::Ambiguous { candidates, .. } if candidates.is_empty() => {
                "request is ambiguous; please rephrase it".into()
            },
            Self::Ambiguous { candidates, .. } => {
                let names: Vec<&str> = candidates.iter().map(|c| c.name.as_str()).collect();
                format!("request is ambiguous; did you mean: {}?", names.join(", "))
            },
            Self::Unresolved { .. } => "could not understand the request".into(),
            Self::IncompleteParameters { message, .. } => message.clone(),
            Self::ServiceError { kind, .. } => kind.describe().into(),
            Self::DispatchTimeout { .. } => "no response from the worker before the timeout".into(),
            Self::DispatchFailed { cause, .. } => format!("dispatch failed: {cause}"),
            Self::Rejected { reason, .. } => reason.clone(),
        }
    }

    /// Plain-text reply for chat channels.
    #[must_use]
    pub fn reply_text(&self) -> String {
        match self {
            Self::Ambiguous { candidates, .. } if !candidates.is_empty() => {
                let mut text = String::from("Did you mean:");
                for (n, c) in candidates.iter().enumerate() {
                    text.push_str(&format!("\n{}. {}", n + 1, c.name));
                }
                text
            },
            Self::Dispatched { response, .. } if response.success => match &response.result {
                Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
                _ => self.message(),
            },
            _ => self.message(),
        }
    }

    #[must_use]
    pub fn to_response(&self) -> CommandResponse {
        let mut resp = CommandResponse {
            success: self.is_success(),
            status: self.status(),
            message: self.message(),
            trace_id: self.trace_id().to_string(),
            processor_id: self.processor_id().map(String::from),
            candidates: Vec::new(),
            missing_params: Vec::new(),
            data: None,
        };
        match self {
            Self::Dispatched { response, .. } => resp.data = response.result.clone(),
            Self::ResolvedNotDispatched { parameters, .. } => {
                resp.data = Some(serde_json::json!({ "parameters": parameters }));
            },
            Self::Ambiguous { candidates, .. } => resp.candidates = candidates.clone(),
            Self::IncompleteParameters { missing, .. } => resp.missing_params = missing.clone(),
            Self::ServiceError { kind, .. } => {
                resp.data = Some(serde_json::json!({ "error_kind": kind.as_str() }));
            },
            _ => {},
        }
        resp
    }
}
