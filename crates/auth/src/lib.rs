//! Ephemeral credentials for the automation endpoint.
//!
//! This crate provides:
//! - `AutomationCredentials`: the host/port/token triple handed to local tools
//! - `CredentialFile`: owner-only persistence of those credentials
//! - Bearer header parsing and constant-time token comparison

pub mod bearer;
pub mod credentials;
pub mod error;

pub use {
    bearer::{BearerError, bearer_token, token_matches, verify_bearer},
    credentials::{AutomationCredentials, CredentialFile, LOOPBACK_HOST, generate_token},
    error::{Error, Result},
};
