//! Wire types shared by the gateway, the resolution pipeline and workers.
//!
//! - Processor catalog entries (`ProcessorSpec`, `ParameterSpec`)
//! - Model reply shapes (`MatchResponse`, `ExtractionResult`)
//! - Worker messages (`DispatchRequest`, `DispatchResponse`)
//! - HTTP API bodies (`CommandRequest`, `CommandResponse`, ...)

use std::collections::BTreeMap;

use {
    chrono::{DateTime, Utc},
    homegw_common::{MessageChannel, RawData},
    serde::{Deserialize, Serialize},
};

// ── Constants ────────────────────────────────────────────────────────────────

pub const API_PREFIX: &str = "/api/v1";
pub const TRACE_ID_HEADER: &str = "x-trace-id";
pub const TELEGRAM_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 5_000;
pub const MAX_COMMAND_TEXT_BYTES: usize = 8_192;

/// Structured parameter values keyed by parameter name.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

// ── Processor catalog ────────────────────────────────────────────────────────

/// Value domain of a processor parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Int,
    Float,
    Bool,
    Enum,
}

impl ParameterType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Enum => "enum",
        }
    }

    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::Float)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParameterType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
    /// Allowed values for `enum` parameters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    /// Inclusive `[min, max]` for numeric parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl ParameterSpec {
    /// `(min, max)` when the range is well formed.
    #[must_use]
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match self.range.as_deref() {
            Some([min, max]) => Some((*min, *max)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ProcessorSpec {
    pub fn required_parameters(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.parameters.iter().filter(|p| p.required)
    }
}

// ── Model replies ────────────────────────────────────────────────────────────

/// One ranked processor suggested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub processor_id: String,
    pub confidence: f64,
    #[serde(default)]
    pub reason: String,
}

/// Shape the model is asked to return when ranking processors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchResponse {
    #[serde(default)]
    pub matches: Vec<MatchCandidate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionResult {
    pub success: bool,
    pub parameters: Parameters,
    pub missing_required: Vec<String>,
    pub message: String,
}

// ── Worker messages ──────────────────────────────────────────────────────────

/// Structured request published to the worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
    pub processor_id: String,
    pub parameters: Parameters,
    pub original_text: String,
    pub channel: MessageChannel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_user_id: Option<String>,
}

/// Worker reply, correlated to its request by `trace_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub trace_id: String,
    #[serde(default)]
    pub processor_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default = "Utc::now")]
    pub processed_at: DateTime<Utc>,
}

// ── HTTP API ─────────────────────────────────────────────────────────────────

/// Body of `POST /api/v1/command`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandRequest {
    #[serde(alias = "content")]
    pub text: String,
    pub channel: Option<String>,
    pub user_id: Option<String>,
    pub chat_id: Option<String>,
    pub raw_data: RawData,
}

/// Terminal state of one submitted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Dispatched,
    ResolvedNotDispatched,
    Ambiguous,
    Unresolved,
    IncompleteParameters,
    ServiceError,
    DispatchTimeout,
    DispatchFailed,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorCandidate {
    pub id: String,
    pub name: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    pub status: CommandStatus,
    pub message: String,
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<ProcessorCandidate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_params: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorSummary {
    pub id: String,
    pub name: String,
    pub group: String,
    pub description: String,
}

impl From<&ProcessorSpec> for ProcessorSummary {
    fn from(spec: &ProcessorSpec) -> Self {
        Self {
            id: spec.id.clone(),
            name: spec.name.clone(),
            group: spec.group.clone(),
            description: spec.description.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorListResponse {
    pub processors: Vec<ProcessorSummary>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub processor_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub components: BTreeMap<String, String>,
}
