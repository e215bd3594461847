//! Service trait interfaces the automation endpoint calls out to.
//!
//! The session-management subsystem of the host application implements
//! [`BootstrapService`]; a `Noop` implementation lets the endpoint run
//! standalone before that subsystem is wired in.

use std::{future::Future, path::PathBuf};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tracing::warn,
};

/// Error type returned by service methods.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{message}")]
    Message { message: String },
    #[error("{0}")]
    Serde(#[from] serde_json::Error),
}

impl ServiceError {
    #[must_use]
    pub fn message(message: impl std::fmt::Display) -> Self {
        Self::Message {
            message: message.to_string(),
        }
    }
}

impl From<String> for ServiceError {
    fn from(value: String) -> Self {
        Self::message(value)
    }
}

impl From<&str> for ServiceError {
    fn from(value: &str) -> Self {
        Self::message(value)
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

// ── Bootstrap ───────────────────────────────────────────────────────────────

/// A validated request to open a session rooted at `cwd` and type
/// `commands` into it, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapRequest {
    pub cwd: PathBuf,
    pub commands: Vec<String>,
}

/// What the session subsystem reports back after a successful bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapOutcome {
    pub session_id: String,
}

impl BootstrapOutcome {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }
}

#[async_trait]
pub trait BootstrapService: Send + Sync {
    /// Create a new interactive session and feed it the request's commands.
    async fn bootstrap(&self, request: BootstrapRequest) -> ServiceResult<BootstrapOutcome>;
}

pub struct NoopBootstrapService;

#[async_trait]
impl BootstrapService for NoopBootstrapService {
    async fn bootstrap(&self, request: BootstrapRequest) -> ServiceResult<BootstrapOutcome> {
        warn!(cwd = %request.cwd.display(), "bootstrap requested but no session service is configured");
        Err("bootstrap service not configured".into())
    }
}

/// Adapts an async closure into a [`BootstrapService`].
pub struct FnBootstrapService<F>(pub F);

#[async_trait]
impl<F, Fut> BootstrapService for FnBootstrapService<F>
where
    F: Fn(BootstrapRequest) -> Fut + Send + Sync,
    Fut: Future<Output = ServiceResult<BootstrapOutcome>> + Send,
{
    async fn bootstrap(&self, request: BootstrapRequest) -> ServiceResult<BootstrapOutcome> {
        (self.0)(request).await
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
