use std::path::PathBuf;

use {
    anyhow::{Context, Result, bail},
    loopgate_auth::CredentialFile,
    loopgate_config::AutomationPaths,
    loopgate_gateway::{BOOTSTRAP_PATH, CLIENT_HEADER},
    secrecy::ExposeSecret,
    tracing::debug,
};

/// Send one bootstrap request to the running endpoint, the way any local
/// tool would: credentials from the credential file, bearer auth, JSON body.
pub async fn bootstrap(
    paths: &AutomationPaths,
    cwd: Option<PathBuf>,
    commands: Vec<String>,
) -> Result<()> {
    let creds = CredentialFile::new(paths.clone())
        .read()?
        .context("automation endpoint is not running (no credential file)")?;
    let cwd = match cwd {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let cwd = std::path::absolute(&cwd)
        .with_context(|| format!("cannot make {} absolute", cwd.display()))?;
    let cwd = cwd
        .to_str()
        .with_context(|| format!("{} is not valid UTF-8", cwd.display()))?
        .to_string();

    let url = format!("{}{BOOTSTRAP_PATH}", creds.base_url());
    debug!(%url, %cwd, commands = commands.len(), "sending bootstrap request");

    let resp = reqwest::Client::new()
        .post(&url)
        .bearer_auth(creds.token.expose_secret())
        .header(
            CLIENT_HEADER,
            concat!("loopgate-cli/", env!("CARGO_PKG_VERSION")),
        )
        .json(&serde_json::json!({
            "cwd": cwd,
            "commands": commands,
        }))
        .send()
        .await
        .with_context(|| format!("failed to reach {url}"))?;

    let status = resp.status();
    let body: serde_json::Value = resp
        .json()
        .await
        .with_context(|| format!("unreadable response ({status})"))?;

    if status.is_success() {
        let session_id = body["sessionId"].as_str().unwrap_or_default();
        println!("{session_id}");
        return Ok(());
    }
    let message = body["error"].as_str().unwrap_or("unknown error");
    bail!("bootstrap failed ({status}): {message}");
}
