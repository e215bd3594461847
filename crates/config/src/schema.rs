/// Automation config schema: the persisted `automation.json` document.
use std::{path::PathBuf, time::Duration};

use serde::Serialize;

/// The only schema version this build understands.
pub const CONFIG_VERSION: u64 = 1;

/// Inclusive `[1, max]` bound and default for one numeric limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldBound {
    pub key: &'static str,
    pub max: u64,
    pub default: u64,
}

pub const MAX_COMMANDS: FieldBound = FieldBound {
    key: "maxCommands",
    max: 200,
    default: 25,
};

pub const MAX_COMMAND_LENGTH: FieldBound = FieldBound {
    key: "maxCommandLength",
    max: 16_384,
    default: 4_096,
};

pub const MAX_REQUEST_BYTES: FieldBound = FieldBound {
    key: "maxRequestBytes",
    max: 2 * 1024 * 1024,
    default: 64 * 1024,
};

pub const REQUEST_TIMEOUT_MS: FieldBound = FieldBound {
    key: "requestTimeoutMs",
    max: 120_000,
    default: 15_000,
};

pub const RATE_LIMIT_PER_MINUTE: FieldBound = FieldBound {
    key: "rateLimitPerMinute",
    max: 1_000,
    default: 60,
};

/// All numeric limits, in document order.
pub const LIMIT_FIELDS: [FieldBound; 5] = [
    MAX_COMMANDS,
    MAX_COMMAND_LENGTH,
    MAX_REQUEST_BYTES,
    REQUEST_TIMEOUT_MS,
    RATE_LIMIT_PER_MINUTE,
];

/// Validated automation configuration.
///
/// Only built by the validator or [`AutomationConfig::default`], so holders
/// can rely on every bound being in range and on `allowed_roots` being
/// absolute, de-duplicated, and non-empty whenever `enabled` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationConfig {
    pub version: u64,
    pub enabled: bool,
    pub allowed_roots: Vec<PathBuf>,
    pub max_commands: u64,
    pub max_command_length: u64,
    pub max_request_bytes: u64,
    pub request_timeout_ms: u64,
    pub rate_limit_per_minute: u64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            enabled: false,
            allowed_roots: Vec::new(),
            max_commands: MAX_COMMANDS.default,
            max_command_length: MAX_COMMAND_LENGTH.default,
            max_request_bytes: MAX_REQUEST_BYTES.default,
            request_timeout_ms: REQUEST_TIMEOUT_MS.default,
            rate_limit_per_minute: RATE_LIMIT_PER_MINUTE.default,
        }
    }
}

impl AutomationConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Value of the limit identified by `bound.key`.
    #[must_use]
    pub fn limit(&self, bound: FieldBound) -> Option<u64> {
        match bound.key {
            "maxCommands" => Some(self.max_commands),
            "maxCommandLength" => Some(self.max_command_length),
            "maxRequestBytes" => Some(self.max_request_bytes),
            "requestTimeoutMs" => Some(self.request_timeout_ms),
            "rateLimitPerMinute" => Some(self.rate_limit_per_minute),
            _ => None,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_within_bounds() {
        let cfg = AutomationConfig::default();
        for bound in LIMIT_FIELDS {
            let value = cfg.limit(bound).unwrap();
            assert!((1..=bound.max).contains(&value), "{} out of range", bound.key);
            assert_eq!(value, bound.default);
        }
        assert!(!cfg.enabled);
        assert!(cfg.allowed_roots.is_empty());
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let value = serde_json::to_value(AutomationConfig::default()).unwrap();
        let obj = value.as_object().unwrap();
        for key in [
            "version",
            "enabled",
            "allowedRoots",
            "maxCommands",
            "maxCommandLength",
            "maxRequestBytes",
            "requestTimeoutMs",
            "rateLimitPerMinute",
        ] {
            assert!(obj.contains_key(key), "missing {key}");
        }
        assert_eq!(obj.len(), 8);
    }

    #[test]
    fn request_timeout_is_milliseconds() {
        let cfg = AutomationConfig {
            request_timeout_ms: 50,
            ..AutomationConfig::default()
        };
        assert_eq!(cfg.request_timeout(), Duration::from_millis(50));
    }
}
