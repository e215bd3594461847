use std::time::Duration;

use {
    axum::{
        http::{HeaderValue, StatusCode, header},
        response::{IntoResponse, Json, Response},
    },
    loopgate_auth::BearerError,
};

/// Every way a request to the automation endpoint can be refused.
///
/// Rendered as `{"error": "<message>"}` with the matching status code.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("unauthorized: {0}")]
    Unauthorized(BearerError),
    #[error("browser-originated requests are not allowed")]
    BrowserOrigin,
    #[error("{0}")]
    MissingClient(&'static str),
    #[error("content-type must be application/json")]
    UnsupportedMediaType,
    #[error("too many requests")]
    RateLimited { retry_after: Duration },
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    BootstrapFailed(String),
    #[error("bootstrap timed out after {} ms", after.as_millis())]
    Timeout { after: Duration },
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BrowserOrigin | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::MissingClient(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::BootstrapFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn shutting_down() -> Self {
        Self::Unavailable("automation service is shutting down".into())
    }
}

/// Failures of the lifecycle operations (`start`, `stop`, `set_enabled`).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] loopgate_config::Error),
    #[error(transparent)]
    Auth(#[from] loopgate_auth::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` when startup was refused because a guarded path is a
    /// symbolic link.
    #[must_use]
    pub fn is_symlink_rejection(&self) -> bool {
        match self {
            Self::Config(inner) => inner.is_symlink_rejection(),
            Self::Auth(inner) => inner.is_symlink_rejection(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (
            status,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response();

        match self {
            Self::RateLimited { retry_after } => {
                let secs = retry_after.as_secs().max(1);
                if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
            },
            Self::MethodNotAllowed => {
                response
                    .headers_mut()
                    .insert(header::ALLOW, HeaderValue::from_static("POST"));
            },
            _ => {},
        }
        response
    }
}
