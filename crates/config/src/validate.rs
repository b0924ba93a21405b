//! Configuration validation engine.
//!
//! Validates config files against the known schema, detects unknown or
//! misspelled fields, checks processor definitions and reports security
//! warnings.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use {
    homegw_protocol::{ParameterType, ProcessorSpec},
    ipnet::IpNet,
    secrecy::ExposeSecret,
};

use crate::{
    env_subst::{has_unresolved_placeholder, substitute_env},
    loader::{find_config_file, parse_document},
    processors::load_processors,
    schema::HomegwConfig,
};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "security", "llm",
    /// "transport", "channels", "processors"
    pub category: &'static str,
    /// Dotted path, e.g. "server.bnd" or "processors[light.on].parameters[0]"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "[{}] {}: {}", self.severity, self.category, self.message)
        } else {
            write!(
                f,
                "[{}] {} ({}): {}",
                self.severity, self.category, self.path, self.message
            )
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        has_errors(&self.diagnostics)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

#[must_use]
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(|d| d.severity == Severity::Error)
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

/// Expected shape of the configuration document.
enum KnownKeys {
    Struct(&'static [(&'static str, KnownKeys)]),
    Leaf,
}

use KnownKeys::{Leaf, Struct};

const SCHEMA: KnownKeys = Struct(&[
    (
        "server",
        Struct(&[("bind", Leaf), ("port", Leaf), ("request_timeout_secs", Leaf)]),
    ),
    (
        "security",
        Struct(&[
            ("api_token", Leaf),
            ("ip_allowlist", Leaf),
            ("rate_limit_per_minute", Leaf),
            ("behind_proxy", Leaf),
        ]),
    ),
    (
        "llm",
        Struct(&[
            ("base_url", Leaf),
            ("api_key", Leaf),
            ("model", Leaf),
            ("timeout_secs", Leaf),
            ("max_retries", Leaf),
            ("temperature", Leaf),
            ("retry_backoff_ms", Leaf),
        ]),
    ),
    (
        "transport",
        Struct(&[
            ("enabled", Leaf),
            ("request_topic", Leaf),
            ("response_topic", Leaf),
            ("response_timeout_ms", Leaf),
        ]),
    ),
    (
        "channels",
        Struct(&[
            (
                "telegram",
                Struct(&[
                    ("enabled", Leaf),
                    ("bot_token", Leaf),
                    ("webhook_secret", Leaf),
                    ("api_base_url", Leaf),
                    ("reply_timeout_secs", Leaf),
                ]),
            ),
            (
                "wechat_work",
                Struct(&[
                    ("enabled", Leaf),
                    ("corp_id", Leaf),
                    ("agent_id", Leaf),
                    ("secret", Leaf),
                    ("token", Leaf),
                    ("encoding_aes_key", Leaf),
                ]),
            ),
        ]),
    ),
    ("processors", Struct(&[("path", Leaf), ("watch", Leaf)])),
    ("log", Struct(&[("level", Leaf), ("format", Leaf)])),
]);

// ── Levenshtein distance ────────────────────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_len = b.chars().count();
    if a.is_empty() {
        return b_len;
    }
    if b_len == 0 {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_len]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    let mut best: Option<(&'a str, usize)> = None;
    for &candidate in candidates {
        let d = levenshtein(needle, candidate);
        if d > 0 && d <= max_distance && best.as_ref().is_none_or(|(_, bd)| d < *bd) {
            best = Some((candidate, d));
        }
    }
    best.map(|(s, _)| s)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or discover the default config
/// file location if `path` is `None`.
///
/// Processor definitions referenced by the config are validated too.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => find_config_file(),
    };

    let Some(ref actual_path) = config_path else {
        let mut diagnostics = vec![Diagnostic::new(
            Severity::Info,
            "syntax",
            "",
            "no config file found; using defaults",
        )];
        let config = HomegwConfig::default();
        diagnostics.extend(validate_config(&config));
        diagnostics.extend(validate_processor_path(&config.processors.path));
        return ValidationResult {
            diagnostics,
            config_path: None,
        };
    };

    match std::fs::read_to_string(actual_path) {
        Ok(content) => {
            let mut result = validate_str(&content, actual_path);
            result.config_path = Some(actual_path.clone());
            result
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read config file: {e}"),
            )],
            config_path: Some(actual_path.clone()),
        },
    }
}

/// Validate config text. The format is picked from `path`'s extension; the
/// file itself is not read.
#[must_use]
pub fn validate_str(raw: &str, path: &Path) -> ValidationResult {
    let mut diagnostics = Vec::new();
    let raw = substitute_env(raw);

    // 1. Syntax
    let value: serde_json::Value = match parse_document(&raw, path) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                e.to_string(),
            ));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    // 2. Unknown fields
    check_unknown_fields(&value, &SCHEMA, "", &mut diagnostics);

    // 3. Types, then semantics on the parsed config
    match serde_json::from_value::<HomegwConfig>(value) {
        Ok(config) => {
            diagnostics.extend(validate_config(&config));
            diagnostics.extend(validate_processor_path(&config.processors.path));
        },
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Walk the document against the schema tree and flag unknown keys.
fn check_unknown_fields(
    value: &serde_json::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (serde_json::Value::Object(table), Struct(fields)) = (value, schema) else {
        // Leaf or type mismatch; type errors are caught later.
        return;
    };
    let known_keys: Vec<&str> = fields.iter().map(|(k, _)| *k).collect();
    for (key, child_value) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if let Some((_, child_schema)) = fields.iter().find(|(k, _)| *k == key.as_str()) {
            check_unknown_fields(child_value, child_schema, &path, diagnostics);
            continue;
        }
        let level = if prefix.is_empty() {
            "at top level "
        } else {
            ""
        };
        let msg = match suggest(key, &known_keys, 3) {
            Some(s) => format!("unknown field {level}(did you mean \"{s}\"?)"),
            None => format!("unknown field {level}"),
        };
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "unknown-field",
            path,
            msg.trim(),
        ));
    }
}

/// Semantic checks on a parsed config.
#[must_use]
pub fn validate_config(config: &HomegwConfig) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    // LLM endpoint
    if config.llm.base_url.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "llm",
            "llm.base_url",
            "llm.base_url is required",
        ));
    }
    if config.llm.model.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "llm",
            "llm.model",
            "llm.model is required",
        ));
    }
    match config.llm.api_key.as_ref().map(ExposeSecret::expose_secret) {
        None => diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "llm",
            "llm.api_key",
            "llm.api_key is not set; requests are sent without authorization",
        )),
        Some(key) if key.trim().is_empty() => diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "llm",
            "llm.api_key",
            "llm.api_key is empty; requests are sent without authorization",
        )),
        Some(key) if has_unresolved_placeholder(key) => diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "llm",
            "llm.api_key",
            format!("llm.api_key references an unset environment variable: {key}"),
        )),
        Some(_) => {},
    }

    // Transport
    if config.transport.response_timeout_ms == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "transport",
            "transport.response_timeout_ms",
            "response timeout must be greater than zero",
        ));
    }
    if config.transport.enabled && config.transport.request_topic == config.transport.response_topic
    {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "transport",
            "transport.response_topic",
            "request and response topics must differ",
        ));
    }

    // Channels
    let telegram = &config.channels.telegram;
    if telegram.enabled
        && telegram
            .bot_token
            .as_ref()
            .is_none_or(|t| t.expose_secret().trim().is_empty())
    {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "channels",
            "channels.telegram.bot_token",
            "telegram is enabled without a bot_token; replies cannot be sent",
        ));
    }
    if config.channels.wechat_work.enabled {
        diagnostics.push(Diagnostic::new(
            Severity::Info,
            "channels",
            "channels.wechat_work",
            "the wechat_work webhook answers 501 Not Implemented",
        ));
    }

    // Security
    if config.security.token().is_none() {
        let severity = if config.server.is_loopback() {
            Severity::Info
        } else {
            Severity::Warning
        };
        diagnostics.push(Diagnostic::new(
            severity,
            "security",
            "security.api_token",
            format!(
                "api_token is empty; protected routes are open while binding to {}",
                config.server.bind
            ),
        ));
    }
    for (i, entry) in config.security.ip_allowlist.iter().enumerate() {
        if parse_allowlist_entry(entry).is_none() {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "security",
                format!("security.ip_allowlist[{i}]"),
                format!("not an IP address or CIDR range: {entry:?}"),
            ));
        }
    }

    diagnostics
}

/// Parse an allowlist entry: a bare IP becomes a host-length network.
#[must_use]
pub fn parse_allowlist_entry(entry: &str) -> Option<IpNet> {
    let entry = entry.trim();
    entry
        .parse::<IpNet>()
        .ok()
        .or_else(|| entry.parse::<std::net::IpAddr>().ok().map(IpNet::from))
}

/// Load and check the processor definitions under `path`.
#[must_use]
pub fn validate_processor_path(path: &Path) -> Vec<Diagnostic> {
    match load_processors(path) {
        Ok(specs) => validate_processors(&specs),
        Err(e) => vec![Diagnostic::new(
            Severity::Error,
            "processors",
            "processors.path",
            e.to_string(),
        )],
    }
}

/// Structural checks on processor definitions.
#[must_use]
pub fn validate_processors(specs: &[ProcessorSpec]) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let mut seen = HashSet::new();

    for (idx, spec) in specs.iter().enumerate() {
        if spec.id.trim().is_empty() {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "processors",
                format!("processors[{idx}].id"),
                "processor id must not be empty",
            ));
            continue;
        }
        let base = format!("processors[{}]", spec.id);
        if !seen.insert(spec.id.as_str()) {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "processors",
                format!("{base}.id"),
                format!("duplicate processor id {:?}", spec.id),
            ));
        }
        if spec.enabled && spec.keywords.is_empty() {
            diagnostics.push(Diagnostic::new(
                Severity::Info,
                "processors",
                format!("{base}.keywords"),
                "no keywords; matching relies on the description alone",
            ));
        }

        let mut param_names = HashSet::new();
        for (pidx, param) in spec.parameters.iter().enumerate() {
            let ppath = format!("{base}.parameters[{pidx}]");
            if param.name.trim().is_empty() {
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "processors",
                    &ppath,
                    "parameter name must not be empty",
                ));
            } else if !param_names.insert(param.name.as_str()) {
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "processors",
                    &ppath,
                    format!("duplicate parameter {:?}", param.name),
                ));
            }
            if param.kind == ParameterType::Enum && param.values.is_empty() {
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "processors",
                    format!("{ppath}.values"),
                    "enum parameter needs at least one value",
                ));
            }
            if let Some(range) = &param.range {
                match param.bounds() {
                    Some((min, max)) if min > max => diagnostics.push(Diagnostic::new(
                        Severity::Error,
                        "processors",
                        format!("{ppath}.range"),
                        format!("range minimum {min} exceeds maximum {max}"),
                    )),
                    Some(_) if !param.kind.is_numeric() => diagnostics.push(Diagnostic::new(
                        Severity::Warning,
                        "processors",
                        format!("{ppath}.range"),
                        format!("range is ignored for {} parameters", param.kind.as_str()),
                    )),
                    Some(_) => {},
                    None => diagnostics.push(Diagnostic::new(
                        Severity::Error,
                        "processors",
                        format!("{ppath}.range"),
                        format!("range must be [min, max], got {} values", range.len()),
                    )),
                }
            }
        }
    }

    diagnostics
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        homegw_protocol::ParameterSpec,
        secrecy::Secret,
    };

    fn param(name: &str, kind: ParameterType) -> ParameterSpec {
        ParameterSpec {
            name: name.into(),
            kind,
            required: false,
            description: String::new(),
            values: Vec::new(),
            range: None,
            default: None,
        }
    }

    fn processor(id: &str, parameters: Vec<ParameterSpec>) -> ProcessorSpec {
        ProcessorSpec {
            id: id.into(),
            name: id.into(),
            group: "test".into(),
            description: String::new(),
            keywords: vec!["kw".into()],
            parameters,
            enabled: true,
        }
    }

    fn toml_result(raw: &str) -> ValidationResult {
        validate_str(raw, Path::new("homegw.toml"))
    }

    #[test]
    fn levenshtein_distances() {
        assert_eq!(levenshtein("hello", "hello"), 0);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("server", "sever"), 1);
        assert_eq!(levenshtein("serer", "server"), 1);
        assert_eq!(levenshtein("cat", "car"), 1);
    }

    #[test]
    fn unknown_top_level_key_with_suggestion() {
        let result = toml_result("[transprt]\nenabled = true\n");
        let d = result
            .diagnostics
            .iter()
            .find(|d| d.category == "unknown-field" && d.path == "transprt")
            .unwrap();
        assert_eq!(d.severity, Severity::Error);
        assert!(d.message.contains("did you mean \"transport\""));
    }

    #[test]
    fn unknown_nested_key_in_yaml() {
        let result = validate_str("server:\n  bnd: 0.0.0.0\n", Path::new("homegw.yaml"));
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "server.bnd" && d.message.contains("\"bind\""))
        );
    }

    #[test]
    fn syntax_error_stops_early() {
        let result = toml_result("[server\n");
        assert!(result.has_errors());
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].category, "syntax");
    }

    #[test]
    fn type_error_is_reported() {
        let result = toml_result("[server]\nport = \"eighty\"\n");
        assert!(result.diagnostics.iter().any(|d| d.category == "type-error"));
    }

    #[test]
    fn semantic_checks_on_config() {
        let mut config = HomegwConfig::default();
        config.llm.model = String::new();
        config.llm.api_key = Some(Secret::new("${HOMEGW_UNSET_KEY}".into()));
        config.transport.response_timeout_ms = 0;
        config.channels.telegram.enabled = true;
        config.server.bind = "0.0.0.0".into();
        config.security.ip_allowlist = vec!["10.0.0.0/8".into(), "192.168.1.7".into(), "nope".into()];

        let diags = validate_config(&config);
        let find = |path: &str| diags.iter().find(|d| d.path == path);

        assert_eq!(find("llm.model").unwrap().severity, Severity::Error);
        assert_eq!(find("llm.api_key").unwrap().severity, Severity::Warning);
        assert_eq!(
            find("transport.response_timeout_ms").unwrap().severity,
            Severity::Error
        );
        assert_eq!(
            find("channels.telegram.bot_token").unwrap().severity,
            Severity::Warning
        );
        assert_eq!(
            find("security.api_token").unwrap().severity,
            Severity::Warning
        );
        assert!(find("security.ip_allowlist[0]").is_none());
        assert!(find("security.ip_allowlist[1]").is_none());
        assert_eq!(
            find("security.ip_allowlist[2]").unwrap().severity,
            Severity::Error
        );
    }

    #[test]
    fn missing_token_on_loopback_is_only_info() {
        let diags = validate_config(&HomegwConfig::default());
        let token = diags
            .iter()
            .find(|d| d.path == "security.api_token")
            .unwrap();
        assert_eq!(token.severity, Severity::Info);
    }

    #[test]
    fn duplicate_processor_ids_are_errors() {
        let specs = vec![processor("a", vec![]), processor("a", vec![])];
        let diags = validate_processors(&specs);
        assert!(has_errors(&diags));
        assert!(diags.iter().any(|d| d.message.contains("duplicate processor")));
    }

    #[test]
    fn parameter_shape_checks() {
        let mut bad_range = param("temp", ParameterType::Int);
        bad_range.range = Some(vec![30.0, 16.0]);
        let mut short_range = param("level", ParameterType::Float);
        short_range.range = Some(vec![1.0]);
        let empty_enum = param("mode", ParameterType::Enum);

        let diags = validate_processors(&[processor(
            "climate.set",
            vec![bad_range, short_range, empty_enum],
        )]);
        let errors: Vec<_> = diags
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .map(|d| d.path.as_str())
            .collect();
        assert_eq!(errors, [
            "processors[climate.set].parameters[0].range",
            "processors[climate.set].parameters[1].range",
            "processors[climate.set].parameters[2].values",
        ]);
    }

    #[test]
    fn processor_without_keywords_is_info() {
        let mut spec = processor("light.on", vec![]);
        spec.keywords.clear();
        let diags = validate_processors(&[spec]);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Severity::Info);
    }

    #[test]
    fn validates_processor_files_referenced_by_config() {
        let dir = tempfile::tempdir().unwrap();
        let procs = dir.path().join("procs.yaml");
        std::fs::write(
            &procs,
            "processors:\n  - id: x\n    name: X\n    keywords: [x]\n  - id: x\n    name: X2\n    keywords: [x]\n",
        )
        .unwrap();
        let raw = format!("[processors]\npath = {:?}\n", procs.display().to_string());
        let result = toml_result(&raw);
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.category == "processors" && d.message.contains("duplicate"))
        );
    }
}
