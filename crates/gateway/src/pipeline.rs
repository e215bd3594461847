//! Per-request gates for `POST /v1/terminal/bootstrap`.
//!
//! Each gate either passes or yields the [`ApiError`] that short-circuits the
//! request. The handler in `server.rs` runs them in a fixed order: cheap
//! header checks first, then the rate limiter, then body admission and
//! parsing, and finally the filesystem-backed path check.

use std::path::{Path, PathBuf};

use {
    axum::{
        body::Body,
        http::{HeaderMap, header},
    },
    futures::StreamExt,
    loopgate_auth::verify_bearer,
    loopgate_common::{PathCheckError, assert_path_allowed},
    loopgate_config::AutomationConfig,
    secrecy::Secret,
    serde::Deserialize,
    tracing::{debug, warn},
};

use crate::error::ApiError;

/// Header a local tool sets to identify itself.
pub const CLIENT_HEADER: &str = "x-automation-client";

/// Upper bound on the client identifier, in characters.
pub const MAX_CLIENT_ID_CHARS: usize = 128;

/// `Authorization: Bearer <token>`, compared in constant time.
pub fn check_auth(headers: &HeaderMap, token: &Secret<String>) -> Result<(), ApiError> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    verify_bearer(header, token).map_err(|reason| {
        warn!(%reason, "automation request rejected: bad credentials");
        ApiError::Unauthorized(reason)
    })
}

/// Anything a browser attaches on its own (`Origin`, `Sec-Fetch-*`) marks a
/// request as coming from a web page rather than a local tool.
pub fn check_not_browser(headers: &HeaderMap) -> Result<(), ApiError> {
    let from_browser = headers.contains_key(header::ORIGIN)
        || headers
            .keys()
            .any(|name| name.as_str().starts_with("sec-fetch-"));
    if from_browser {
        warn!("automation request rejected: browser-originated");
        return Err(ApiError::BrowserOrigin);
    }
    Ok(())
}

/// Returns the caller's self-reported client identifier.
pub fn check_client(headers: &HeaderMap) -> Result<String, ApiError> {
    let value = headers
        .get(CLIENT_HEADER)
        .ok_or_else(|| client_rejected("missing x-automation-client header"))?
        .to_str()
        .map_err(|_| client_rejected("x-automation-client must be visible ASCII"))?
        .trim();
    if value.is_empty() {
        return Err(client_rejected("x-automation-client must not be empty"));
    }
    if value.chars().count() > MAX_CLIENT_ID_CHARS {
        return Err(client_rejected(
            "x-automation-client must be at most 128 characters",
        ));
    }
    Ok(value.to_string())
}

fn client_rejected(reason: &'static str) -> ApiError {
    debug!(reason, "automation request rejected: client identifier");
    ApiError::MissingClient(reason)
}

/// `application/json`, optionally followed by parameters such as a charset.
pub fn check_content_type(headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(value) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        debug!("automation request rejected: missing or unreadable content-type");
        return Err(ApiError::UnsupportedMediaType);
    };
    let mut parts = value.split(';');
    let essence = parts.next().unwrap_or_default().trim();
    if !essence.eq_ignore_ascii_case("application/json") {
        debug!(content_type = value, "automation request rejected: not JSON");
        return Err(ApiError::UnsupportedMediaType);
    }
    // Parameters must at least look like `name=value`.
    let params_ok = parts.all(|param| {
        let param = param.trim();
        param.is_empty()
            || param
                .split_once('=')
                .is_some_and(|(name, _)| !name.trim().is_empty())
    });
    if !params_ok {
        debug!(content_type = value, "automation request rejected: malformed media type parameter");
        return Err(ApiError::UnsupportedMediaType);
    }
    Ok(())
}

/// Read the body, giving up as soon as it grows past `limit` bytes.
///
/// A declared `Content-Length` above the limit is refused before any byte is
/// read.
pub async fn read_body(headers: &HeaderMap, body: Body, limit: u64) -> Result<Vec<u8>, ApiError> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit) {
        debug!(declared, limit, "request body rejected by content-length");
        return Err(ApiError::PayloadTooLarge { limit });
    }

    let mut stream = body.into_data_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            debug!(error = %e, "request body could not be read");
            ApiError::bad_request(format!("failed to read request body: {e}"))
        })?;
        if (buf.len() + chunk.len()) as u64 > limit {
            debug!(limit, "request body exceeded limit while reading");
            return Err(ApiError::PayloadTooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BootstrapPayload {
    cwd: String,
    commands: Vec<String>,
}

/// A payload that passed shape and bound checks but whose `cwd` has not yet
/// been checked against the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBootstrap {
    pub cwd: PathBuf,
    pub commands: Vec<String>,
}

/// Parse and bound-check `{"cwd": ..., "commands": [...]}`.
///
/// Rejections are logged without any of the payload: serde errors may quote
/// the input, so only their category and position are recorded.
pub fn parse_payload(body: &[u8], config: &AutomationConfig) -> Result<ParsedBootstrap, ApiError> {
    let value: serde_json::Value = serde_json::from_slice(body).map_err(|e| {
        json_rejected(&e);
        ApiError::bad_request(format!("malformed JSON body: {e}"))
    })?;
    if !value.is_object() {
        return Err(payload_rejected("request body must be a JSON object"));
    }
    let payload: BootstrapPayload = serde_json::from_value(value).map_err(|e| {
        json_rejected(&e);
        ApiError::bad_request(format!("invalid request body: {e}"))
    })?;

    if payload.cwd.is_empty() {
        return Err(payload_rejected("cwd must not be empty"));
    }
    let cwd = PathBuf::from(&payload.cwd);
    if !cwd.is_absolute() {
        return Err(payload_rejected("cwd must be an absolute path"));
    }

    if payload.commands.is_empty() {
        return Err(payload_rejected("commands must not be empty"));
    }
    if payload.commands.len() as u64 > config.max_commands {
        return Err(payload_rejected(format!(
            "too many commands: {} (max {})",
            payload.commands.len(),
            config.max_commands
        )));
    }
    for (i, command) in payload.commands.iter().enumerate() {
        if command.is_empty() {
            return Err(payload_rejected(format!("commands[{i}] must not be empty")));
        }
        if command.chars().count() as u64 > config.max_command_length {
            return Err(payload_rejected(format!(
                "commands[{i}] exceeds {} characters",
                config.max_command_length
            )));
        }
    }

    Ok(ParsedBootstrap {
        cwd,
        commands: payload.commands,
    })
}

/// `reason` is built from counts and indices only.
fn payload_rejected(reason: impl Into<String>) -> ApiError {
    let reason = reason.into();
    debug!(%reason, "bootstrap payload rejected");
    ApiError::BadRequest(reason)
}

fn json_rejected(err: &serde_json::Error) {
    debug!(
        category = ?err.classify(),
        line = err.line(),
        column = err.column(),
        "bootstrap payload rejected: not a valid request document"
    );
}

/// Resolve `cwd` against the allowlist off the async runtime. Returns the
/// canonical directory.
pub async fn authorize_cwd(cwd: &Path, allowed_roots: &[PathBuf]) -> Result<PathBuf, ApiError> {
    let cwd_owned = cwd.to_path_buf();
    let roots = allowed_roots.to_vec();
    let checked = tokio::task::spawn_blocking(move || assert_path_allowed(&cwd_owned, &roots))
        .await
        .map_err(|e| ApiError::Unavailable(format!("path check failed: {e}")))?;

    checked.map_err(|err| {
        debug!(cwd = %cwd.display(), error = %err, "cwd refused");
        match err {
            PathCheckError::NoAllowedRoots => ApiError::Unavailable(err.to_string()),
            PathCheckError::OutsideAllowlist => ApiError::Forbidden(err.to_string()),
            PathCheckError::NotAbsolute
            | PathCheckError::NotFound
            | PathCheckError::NotDirectory
            | PathCheckError::Io(_) => ApiError::BadRequest(err.to_string()),
        }
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        axum::http::HeaderValue,
        secrecy::Secret,
        std::{
            io,
            sync::{Arc, Mutex},
        },
    };

    use super::*;

    /// Log sink shared with a scoped `fmt` subscriber.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` with debug logging captured; returns its result and the log text.
    fn with_captured_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let out = tracing::subscriber::with_default(subscriber, f);
        let text = String::from_utf8_lossy(&logs.0.lock().unwrap()).into_owned();
        (out, text)
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    fn config() -> AutomationConfig {
        AutomationConfig {
            max_commands: 2,
            max_command_length: 8,
            ..AutomationConfig::default()
        }
    }

    #[test]
    fn auth_gate() {
        let token = Secret::new("tok".to_string());
        assert!(check_auth(&headers(&[("authorization", "Bearer tok")]), &token).is_ok());
        assert!(matches!(
            check_auth(&headers(&[]), &token),
            Err(ApiError::Unauthorized(_))
        ));
        assert!(matches!(
            check_auth(&headers(&[("authorization", "Bearer wrong")]), &token),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn browser_headers_are_refused() {
        assert!(check_not_browser(&headers(&[])).is_ok());
        assert!(check_not_browser(&headers(&[("origin", "http://evil.example")])).is_err());
        assert!(check_not_browser(&headers(&[("sec-fetch-mode", "cors")])).is_err());
        assert!(check_not_browser(&headers(&[("sec-fetch-site", "cross-site")])).is_err());
    }

    #[test]
    fn client_header_is_required_and_bounded() {
        assert_eq!(
            check_client(&headers(&[(CLIENT_HEADER, "my-tool/1.0")])).unwrap(),
            "my-tool/1.0"
        );
        assert!(check_client(&headers(&[])).is_err());
        assert!(check_client(&headers(&[(CLIENT_HEADER, "   ")])).is_err());

        let mut map = HeaderMap::new();
        map.insert(CLIENT_HEADER, HeaderValue::from_str(&"a".repeat(128)).unwrap());
        assert!(check_client(&map).is_ok());
        map.insert(CLIENT_HEADER, HeaderValue::from_str(&"a".repeat(129)).unwrap());
        assert!(check_client(&map).is_err());
    }

    #[test]
    fn content_type_gate() {
        for ok in [
            "application/json",
            "application/json; charset=utf-8",
            "Application/JSON;charset=UTF-8",
        ] {
            let mut map = HeaderMap::new();
            map.insert(header::CONTENT_TYPE, HeaderValue::from_static(ok));
            assert!(check_content_type(&map).is_ok(), "{ok}");
        }
        for bad in [
            "text/plain",
            "application/jsonp",
            "application/x-www-form-urlencoded",
            "application/json; garbage",
        ] {
            let mut map = HeaderMap::new();
            map.insert(header::CONTENT_TYPE, HeaderValue::from_static(bad));
            assert!(check_content_type(&map).is_err(), "{bad}");
        }
        assert!(check_content_type(&HeaderMap::new()).is_err());
    }

    #[tokio::test]
    async fn body_within_limit_is_read() {
        let body = Body::from(r#"{"a":1}"#);
        let bytes = read_body(&HeaderMap::new(), body, 50).await.unwrap();
        assert_eq!(bytes, br#"{"a":1}"#);
    }

    #[tokio::test]
    async fn oversized_body_is_refused() {
        let body = Body::from("x".repeat(150));
        assert!(matches!(
            read_body(&HeaderMap::new(), body, 50).await,
            Err(ApiError::PayloadTooLarge { limit: 50 })
        ));
    }

    #[tokio::test]
    async fn declared_length_is_checked_first() {
        let map = headers(&[("content-length", "1000")]);
        assert!(matches!(
            read_body(&map, Body::empty(), 50).await,
            Err(ApiError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn valid_payload_parses() {
        let parsed = parse_payload(
            br#"{"cwd":"/tmp/work","commands":["echo hi"]}"#,
            &config(),
        )
        .unwrap();
        assert_eq!(parsed.cwd, PathBuf::from("/tmp/work"));
        assert_eq!(parsed.commands, vec!["echo hi".to_string()]);
    }

    #[test]
    fn payload_shape_errors_are_bad_requests() {
        let cases: &[&[u8]] = &[
            b"{not json",
            b"[]",
            b"\"text\"",
            br#"{"cwd":"/tmp"}"#,
            br#"{"commands":["ls"]}"#,
            br#"{"cwd":"/tmp","commands":["ls"],"extra":1}"#,
            br#"{"cwd":"","commands":["ls"]}"#,
            br#"{"cwd":"tmp","commands":["ls"]}"#,
            br#"{"cwd":7,"commands":["ls"]}"#,
            br#"{"cwd":"/tmp","commands":[]}"#,
            br#"{"cwd":"/tmp","commands":"ls"}"#,
            br#"{"cwd":"/tmp","commands":[""]}"#,
            br#"{"cwd":"/tmp","commands":[1]}"#,
            br#"{"cwd":"/tmp","commands":["a","b","c"]}"#,
            br#"{"cwd":"/tmp","commands":["123456789"]}"#,
        ];
        for body in cases {
            let result = parse_payload(body, &config());
            assert!(
                matches!(result, Err(ApiError::BadRequest(_))),
                "{} should be a bad request",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn header_rejections_are_logged_at_debug() {
        let (result, logs) = with_captured_logs(|| check_client(&HeaderMap::new()));
        assert!(result.is_err());
        assert!(logs.contains("DEBUG"), "{logs}");
        assert!(logs.contains("missing x-automation-client header"), "{logs}");

        let (result, logs) = with_captured_logs(|| {
            check_client(&headers(&[(CLIENT_HEADER, "   ")]))
        });
        assert!(result.is_err());
        assert!(logs.contains("must not be empty"), "{logs}");

        let (result, logs) = with_captured_logs(|| {
            check_content_type(&headers(&[("content-type", "text/plain")]))
        });
        assert!(result.is_err());
        assert!(logs.contains("not JSON"), "{logs}");

        let (result, logs) = with_captured_logs(|| check_content_type(&HeaderMap::new()));
        assert!(result.is_err());
        assert!(logs.contains("content-type"), "{logs}");
    }

    #[test]
    fn payload_rejections_are_logged_without_the_body() {
        let cfg = config();
        let secret = "hunter2-do-not-log";
        let rejected: [String; 4] = [
            format!(r#"{{"cwd": "/tmp", "commands": ["{secret}"]}}"#),
            format!(r#"{{"cwd": "/tmp", "commands": ["ls"], "extra": "{secret}"}}"#),
            format!(r#"{{"cwd": "{secret}", "commands": ["ls"]}}"#),
            format!(r#"{{"cwd": 7, "commands": ["{secret}"#),
        ];
        for body in rejected {
            let (result, logs) = with_captured_logs(|| parse_payload(body.as_bytes(), &cfg));
            assert!(matches!(result, Err(ApiError::BadRequest(_))), "{body}");
            assert!(logs.contains("bootstrap payload rejected"), "{logs}");
            assert!(!logs.contains(secret), "body leaked into logs: {logs}");
        }
    }

    #[test]
    fn command_length_counts_characters() {
        // Eight two-byte characters fit an eight-character limit.
        let body = r#"{"cwd":"/tmp","commands":["éééééééé"]}"#;
        assert!(parse_payload(body.as_bytes(), &config()).is_ok());
    }

    #[tokio::test]
    async fn cwd_outside_allowlist_is_forbidden() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let roots = vec![root.path().to_path_buf()];

        assert!(authorize_cwd(root.path(), &roots).await.is_ok());
        assert!(matches!(
            authorize_cwd(outside.path(), &roots).await,
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            authorize_cwd(&root.path().join("missing"), &roots).await,
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            authorize_cwd(root.path(), &[]).await,
            Err(ApiError::Unavailable(_))
        ));
    }
}
