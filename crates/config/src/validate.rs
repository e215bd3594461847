//! Strict validation of `automation.json`.
//!
//! The raw document is walked as a `serde_json::Value` so that every problem
//! is reported (unknown keys, wrong types, out-of-range limits) rather than
//! only the first one a typed deserializer would trip over. A typed
//! [`AutomationConfig`] is produced only when no error was found.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::{
    error::{Error, Result},
    schema::{AutomationConfig, CONFIG_VERSION, FieldBound, LIMIT_FIELDS},
};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "range", "invariant"
    pub category: &'static str,
    /// Key path, e.g. "allowedRoots[2]"
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Result of validating a configuration document.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    config: Option<AutomationConfig>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    /// The validated config, or [`Error::Invalid`] carrying every error
    /// diagnostic.
    pub fn into_config(self) -> Result<AutomationConfig> {
        let has_errors = self.has_errors();
        match self.config {
            Some(config) if !has_errors => Ok(config),
            _ => Err(Error::Invalid {
                diagnostics: self
                    .diagnostics
                    .into_iter()
                    .filter(|d| d.severity == Severity::Error)
                    .collect(),
            }),
        }
    }
}

// ── Known keys ──────────────────────────────────────────────────────────────

const KNOWN_KEYS: &[&str] = &[
    "version",
    "enabled",
    "allowedRoots",
    "maxCommands",
    "maxCommandLength",
    "maxRequestBytes",
    "requestTimeoutMs",
    "rateLimitPerMinute",
];

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

/// Best match for `needle` among `candidates` within `max_distance` edits.
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

/// Validate a raw JSON document.
#[must_use]
pub fn validate_str(raw: &str) -> ValidationResult {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => validate_value(&value),
        Err(e) => ValidationResult {
            diagnostics: vec![error("syntax", "", format!("invalid JSON: {e}"))],
            config: None,
        },
    }
}

/// Validate an already-parsed document.
#[must_use]
pub fn validate_value(value: &Value) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let Some(obj) = value.as_object() else {
        diagnostics.push(error(
            "type-error",
            "",
            format!("config must be a JSON object, got {}", kind_of(value)),
        ));
        return ValidationResult {
            diagnostics,
            config: None,
        };
    };

    check_unknown_keys(obj, &mut diagnostics);
    check_version(obj, &mut diagnostics);
    let enabled = check_enabled(obj, &mut diagnostics);
    let allowed_roots = check_allowed_roots(obj, &mut diagnostics);
    let limits: Vec<Option<u64>> = LIMIT_FIELDS
        .iter()
        .map(|bound| check_limit(obj, *bound, &mut diagnostics))
        .collect();

    if enabled == Some(true) && allowed_roots.as_ref().is_some_and(Vec::is_empty) {
        diagnostics.push(error(
            "invariant",
            "allowedRoots",
            "must not be empty while enabled is true",
        ));
    }

    let config = match (enabled, allowed_roots, limits.as_slice()) {
        (
            Some(enabled),
            Some(allowed_roots),
            [
                Some(max_commands),
                Some(max_command_length),
                Some(max_request_bytes),
                Some(request_timeout_ms),
                Some(rate_limit_per_minute),
            ],
        ) => Some(AutomationConfig {
            version: CONFIG_VERSION,
            enabled,
            allowed_roots,
            max_commands: *max_commands,
            max_command_length: *max_command_length,
            max_request_bytes: *max_request_bytes,
            request_timeout_ms: *request_timeout_ms,
            rate_limit_per_minute: *rate_limit_per_minute,
        }),
        _ => None,
    };

    ValidationResult {
        diagnostics,
        config,
    }
}

/// Re-validate a typed config, e.g. after an in-memory edit and before it
/// is persisted.
pub fn check_config(config: &AutomationConfig) -> Result<AutomationConfig> {
    let value = serde_json::to_value(config)?;
    validate_value(&value).into_config()
}

fn check_unknown_keys(obj: &Map<String, Value>, diagnostics: &mut Vec<Diagnostic>) {
    for key in obj.keys() {
        if KNOWN_KEYS.contains(&key.as_str()) {
            continue;
        }
        let message = match suggest(key, KNOWN_KEYS, 3) {
            Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
            None => "unknown field".to_string(),
        };
        diagnostics.push(error("unknown-field", key, message));
    }
}

fn check_version(obj: &Map<String, Value>, diagnostics: &mut Vec<Diagnostic>) {
    match obj.get("version") {
        None => diagnostics.push(error("type-error", "version", "is required")),
        Some(v) if v.as_u64() == Some(CONFIG_VERSION) => {},
        Some(v) => diagnostics.push(error(
            "type-error",
            "version",
            format!("must be {CONFIG_VERSION}, got {v}"),
        )),
    }
}

fn check_enabled(obj: &Map<String, Value>, diagnostics: &mut Vec<Diagnostic>) -> Option<bool> {
    match obj.get("enabled") {
        None => Some(false),
        Some(Value::Bool(b)) => Some(*b),
        Some(v) => {
            diagnostics.push(error(
                "type-error",
                "enabled",
                format!("must be a boolean, got {}", kind_of(v)),
            ));
            None
        },
    }
}

fn check_allowed_roots(
    obj: &Map<String, Value>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<Vec<PathBuf>> {
    let entries = match obj.get("allowedRoots") {
        None => return Some(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(v) => {
            diagnostics.push(error(
                "type-error",
                "allowedRoots",
                format!("must be an array, got {}", kind_of(v)),
            ));
            return None;
        },
    };

    let mut roots: Vec<PathBuf> = Vec::with_capacity(entries.len());
    let mut ok = true;
    for (i, entry) in entries.iter().enumerate() {
        let path = format!("allowedRoots[{i}]");
        let Some(s) = entry.as_str().filter(|s| !s.is_empty()) else {
            diagnostics.push(error("type-error", &path, "must be a non-empty string"));
            ok = false;
            continue;
        };
        let root = PathBuf::from(s);
        if !root.is_absolute() {
            diagnostics.push(error("type-error", &path, "must be an absolute path"));
            ok = false;
            continue;
        }
        if roots.contains(&root) {
            diagnostics.push(Diagnostic {
                severity: Severity::Warning,
                category: "duplicate",
                path,
                message: format!("duplicate of an earlier entry, ignored: {s}"),
            });
            continue;
        }
        roots.push(root);
    }
    ok.then_some(roots)
}

fn check_limit(
    obj: &Map<String, Value>,
    bound: FieldBound,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<u64> {
    let Some(value) = obj.get(bound.key) else {
        return Some(bound.default);
    };
    match value.as_u64() {
        Some(n) if (1..=bound.max).contains(&n) => Some(n),
        Some(n) => {
            diagnostics.push(error(
                "range",
                bound.key,
                format!("must be between 1 and {}, got {n}", bound.max),
            ));
            None
        },
        None => {
            diagnostics.push(error(
                "type-error",
                bound.key,
                format!(
                    "must be an integer between 1 and {}, got {value}",
                    bound.max
                ),
            ));
            None
        },
    }
}

fn error(category: &'static str, path: &str, message: impl Into<String>) -> Diagnostic {
    Diagnostic {
        severity: Severity::Error,
        category,
        path: path.to_string(),
        message: message.into(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// The absolute-path rule applied to `allowedRoots` entries.
#[must_use]
pub fn is_valid_root(path: &Path) -> bool {
    path.is_absolute() && !path.as_os_str().is_empty()
}
