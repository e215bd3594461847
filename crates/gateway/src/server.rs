use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use {
    axum::{
        Json, Router,
        body::Body,
        extract::State,
        http::{HeaderMap, HeaderValue, Method, StatusCode, header},
        routing::any,
    },
    loopgate_config::AutomationConfig,
    loopgate_service_traits::{BootstrapOutcome, BootstrapRequest, BootstrapService},
    secrecy::Secret,
    tower_http::set_header::SetResponseHeaderLayer,
    tracing::debug,
};

use crate::{
    bootstrap::BootstrapExecutor,
    error::ApiError,
    pipeline,
    request_throttle::{RequestThrottle, ThrottleDecision},
};

/// The one route the endpoint serves.
pub const BOOTSTRAP_PATH: &str = "/v1/terminal/bootstrap";

/// Everything one running listener needs to answer requests.
///
/// Built fresh on every start, so the token, config snapshot and rate-limit
/// window never leak from one run into the next.
pub struct Endpoint {
    token: Secret<String>,
    config: AutomationConfig,
    throttle: RequestThrottle,
    executor: BootstrapExecutor,
    closing: AtomicBool,
}

impl Endpoint {
    pub fn new(
        token: Secret<String>,
        config: AutomationConfig,
        bootstrap: Arc<dyn BootstrapService>,
    ) -> Self {
        Self {
            token,
            throttle: RequestThrottle::per_minute(config.rate_limit_per_minute),
            executor: BootstrapExecutor::new(bootstrap, config.request_timeout()),
            config,
            closing: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &AutomationConfig {
        &self.config
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Refuse new requests, clear the rate-limit window and fail whatever is
    /// still waiting on the collaborator. Returns how many were failed.
    pub fn begin_shutdown(&self) -> usize {
        self.closing.store(true, Ordering::Release);
        self.throttle.reset();
        self.executor.close()
    }
}

/// Build the router for one endpoint instance.
pub fn build_app(endpoint: Arc<Endpoint>) -> Router {
    Router::new()
        .route(BOOTSTRAP_PATH, any(bootstrap_handler))
        .fallback(not_found)
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(endpoint)
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

async fn bootstrap_handler(
    State(endpoint): State<Arc<Endpoint>>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Result<(StatusCode, Json<BootstrapOutcome>), ApiError> {
    if method != Method::POST {
        debug!(%method, "automation request rejected: method not allowed");
        return Err(ApiError::MethodNotAllowed);
    }
    if endpoint.is_closing() {
        debug!("automation request rejected: shutting down");
        return Err(ApiError::shutting_down());
    }

    pipeline::check_auth(&headers, &endpoint.token)?;
    pipeline::check_not_browser(&headers)?;
    let client = pipeline::check_client(&headers)?;
    pipeline::check_content_type(&headers)?;

    if let ThrottleDecision::Denied { retry_after } = endpoint.throttle.check() {
        debug!(%client, retry_after_secs = retry_after.as_secs(), "automation request rate limited");
        return Err(ApiError::RateLimited { retry_after });
    }

    let config = endpoint.config();
    let raw = pipeline::read_body(&headers, body, config.max_request_bytes).await?;
    let parsed = pipeline::parse_payload(&raw, config)?;
    let cwd = pipeline::authorize_cwd(&parsed.cwd, &config.allowed_roots).await?;

    debug!(%client, cwd = %cwd.display(), commands = parsed.commands.len(), "automation request accepted");
    let outcome = endpoint
        .executor
        .execute(BootstrapRequest {
            cwd,
            commands: parsed.commands,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}
