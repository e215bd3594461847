//! Automation configuration: schema, strict validation, and guarded
//! persistence.
//!
//! The config lives at `<config dir>/loopgate/automation/automation.json`
//! next to the ephemeral `credentials.json`. Neither the directory nor
//! either file may be a symbolic link.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{
        AutomationPaths, CONFIG_FILENAME, CREDENTIALS_FILENAME, add_allowed_root, inspect,
        load_or_init, save_config, set_enabled,
    },
    schema::{AutomationConfig, CONFIG_VERSION, FieldBound, LIMIT_FIELDS},
    validate::{Diagnostic, Severity, ValidationResult, check_config, validate_str},
};
