use crate::validate::Diagnostic;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid automation config: {}", join(diagnostics))]
    Invalid { diagnostics: Vec<Diagnostic> },
    #[error(transparent)]
    Guard(#[from] loopgate_common::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    /// Returns `true` when a guarded path turned out to be a symbolic link.
    #[must_use]
    pub fn is_symlink_rejection(&self) -> bool {
        matches!(self, Self::Guard(inner) if inner.is_symlink_rejection())
    }
}

impl loopgate_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::message(message)
    }
}

fn join(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, Error>;

loopgate_common::impl_context!();
