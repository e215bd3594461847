use {
    loopgate_common::fs_guard,
    loopgate_config::AutomationPaths,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize, Serializer},
    tracing::{debug, info},
};

use crate::error::{Context, Result};

/// The only address the automation listener ever binds.
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// Connection details a local tool needs to reach the automation endpoint.
///
/// Generated fresh on every start and invalidated on stop.
#[derive(Clone, Serialize, Deserialize)]
pub struct AutomationCredentials {
    pub host: String,
    pub port: u16,
    #[serde(serialize_with = "serialize_secret")]
    pub token: Secret<String>,
}

impl std::fmt::Debug for AutomationCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl AutomationCredentials {
    /// Loopback credentials for `port` with a freshly generated token.
    #[must_use]
    pub fn generate(port: u16) -> Self {
        Self {
            host: LOOPBACK_HOST.to_string(),
            port,
            token: generate_token(),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

fn serialize_secret<S: Serializer>(
    secret: &Secret<String>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(secret.expose_secret())
}

/// 256 bits from the thread-local CSPRNG, URL-safe base64 without padding.
#[must_use]
pub fn generate_token() -> Secret<String> {
    use {base64::Engine, rand::RngCore};

    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    Secret::new(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Owner-only `credentials.json` inside the automation directory.
#[derive(Debug, Clone)]
pub struct CredentialFile {
    paths: AutomationPaths,
}

impl CredentialFile {
    pub fn new(paths: AutomationPaths) -> Self {
        Self { paths }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.paths.credentials_file
    }

    pub fn write(&self, credentials: &AutomationCredentials) -> Result<()> {
        self.paths.guard()?;
        fs_guard::ensure_private_dir(&self.paths.dir)?;
        let data = serde_json::to_string_pretty(credentials)?;
        fs_guard::write_private_file(self.path(), data.as_bytes())?;
        info!(path = %self.path().display(), port = credentials.port, "wrote automation credentials");
        Ok(())
    }

    pub fn read(&self) -> Result<Option<AutomationCredentials>> {
        self.paths.guard()?;
        let Some(data) = fs_guard::read_private_file(self.path())? else {
            debug!(path = %self.path().display(), "credential file not found");
            return Ok(None);
        };
        let credentials: AutomationCredentials = serde_json::from_str(&data)
            .with_context(|| format!("malformed credential file {}", self.path().display()))?;
        Ok(Some(credentials))
    }

    /// Delete the file; absent is fine.
    pub fn remove(&self) -> Result<()> {
        self.paths.guard()?;
        fs_guard::remove_private_file(self.path())?;
        debug!(path = %self.path().display(), "removed automation credentials");
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file() -> (tempfile::TempDir, CredentialFile) {
        let dir = tempfile::tempdir().unwrap();
        let file = CredentialFile::new(AutomationPaths::new(dir.path().join("automation")));
        (dir, file)
    }

    #[test]
    fn tokens_are_unique_and_long() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a.expose_secret(), b.expose_secret());
        // 32 bytes -> 43 base64 chars without padding.
        assert_eq!(a.expose_secret().len(), 43);
        assert!(
            a.expose_secret()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn write_read_remove() {
        let (_dir, file) = temp_file();
        let creds = AutomationCredentials::generate(41234);
        file.write(&creds).unwrap();

        let loaded = file.read().unwrap().unwrap();
        assert_eq!(loaded.host, LOOPBACK_HOST);
        assert_eq!(loaded.port, 41234);
        assert_eq!(loaded.token.expose_secret(), creds.token.expose_secret());

        file.remove().unwrap();
        assert!(file.read().unwrap().is_none());
        file.remove().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn credential_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, file) = temp_file();
        file.write(&AutomationCredentials::generate(1)).unwrap();
        let perms = std::fs::metadata(file.path()).unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o600);
    }

    #[test]
    fn file_carries_token_but_debug_does_not() {
        let (_dir, file) = temp_file();
        let creds = AutomationCredentials::generate(9);
        file.write(&creds).unwrap();

        let raw = std::fs::read_to_string(file.path()).unwrap();
        assert!(raw.contains(creds.token.expose_secret().as_str()));
        assert!(raw.contains("\"host\""));

        let debug = format!("{creds:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains(creds.token.expose_secret().as_str()));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_credential_file_is_not_written_through() {
        let (dir, file) = temp_file();
        std::fs::create_dir_all(dir.path().join("automation")).unwrap();
        let target = dir.path().join("target.json");
        std::os::unix::fs::symlink(&target, file.path()).unwrap();

        let err = file.write(&AutomationCredentials::generate(1)).unwrap_err();
        assert!(err.is_symlink_rejection());
        assert!(!target.exists());
    }

    #[test]
    fn base_url_is_loopback() {
        let creds = AutomationCredentials::generate(8080);
        assert_eq!(creds.base_url(), "http://127.0.0.1:8080");
    }
}
