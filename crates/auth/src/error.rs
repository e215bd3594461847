#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Guard(#[from] loopgate_common::Error),
    #[error(transparent)]
    Config(#[from] loopgate_config::Error),
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
        match self {
            Self::Guard(inner) => inner.is_symlink_rejection(),
            Self::Config(inner) => inner.is_symlink_rejection(),
            _ => false,
        }
    }
}

impl loopgate_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

loopgate_common::impl_context!();
