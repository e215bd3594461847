use std::path::Path;

use {
    anyhow::{Context, Result, bail},
    loopgate_auth::CredentialFile,
    loopgate_config::{AutomationPaths, Severity},
    loopgate_gateway::AutomationStatus,
    secrecy::ExposeSecret,
};

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// On only when the persisted config is enabled and a credential file
/// exists. Creates nothing.
pub fn status_of(paths: &AutomationPaths) -> Result<AutomationStatus> {
    let Some(result) = loopgate_config::inspect(paths)? else {
        return Ok(AutomationStatus { enabled: false });
    };
    let config = result.into_config()?;
    let live = CredentialFile::new(paths.clone()).read()?.is_some();
    Ok(AutomationStatus {
        enabled: config.enabled && live,
    })
}

pub fn status(paths: &AutomationPaths) -> Result<()> {
    let status = status_of(paths)?;
    println!("{}", serde_json::json!({ "enabled": status.enabled }));
    Ok(())
}

pub fn set_enabled(paths: &AutomationPaths, enabled: bool) -> Result<()> {
    let config = loopgate_config::set_enabled(paths, enabled)
        .with_context(|| format!("failed to update {}", paths.config_file.display()))?;
    if config.enabled {
        eprintln!(
            "Automation enabled for {} root(s). Restart `loopgate serve` to apply.",
            config.allowed_roots.len()
        );
    } else {
        eprintln!("Automation disabled. Restart `loopgate serve` to apply.");
    }
    Ok(())
}

pub fn allow(paths: &AutomationPaths, dir: &Path) -> Result<()> {
    let root = std::fs::canonicalize(dir)
        .with_context(|| format!("cannot resolve {}", dir.display()))?;
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }
    let config = loopgate_config::add_allowed_root(paths, &root)?;
    eprintln!("Allowed roots:");
    for r in &config.allowed_roots {
        eprintln!("  {}", r.display());
    }
    Ok(())
}

pub fn credentials(paths: &AutomationPaths) -> Result<()> {
    match CredentialFile::new(paths.clone()).read()? {
        Some(creds) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "host": creds.host,
                    "port": creds.port,
                    "token": creds.token.expose_secret(),
                }))?
            );
        },
        None => eprintln!("No credentials: the automation endpoint is not running."),
    }
    Ok(())
}

pub fn check(paths: &AutomationPaths) -> Result<()> {
    let Some(result) = loopgate_config::inspect(paths)? else {
        eprintln!(
            "No config file at {}; defaults apply.",
            paths.config_file.display()
        );
        return Ok(());
    };

    eprintln!("Checking {}\n", paths.config_file.display());
    for d in &result.diagnostics {
        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
        };
        eprintln!("  {BOLD}{color}{label}{RESET} {d}");
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if !result.diagnostics.is_empty() {
        eprintln!();
    }
    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        loopgate_auth::AutomationCredentials,
        loopgate_config::{AutomationConfig, save_config},
    };

    use super::*;

    fn paths() -> (tempfile::TempDir, AutomationPaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = AutomationPaths::new(dir.path().join("automation"));
        (dir, paths)
    }

    #[test]
    fn status_without_config_is_disabled_and_creates_nothing() {
        let (_dir, paths) = paths();
        assert!(!status_of(&paths).unwrap().enabled);
        assert!(!paths.dir.exists());
    }

    #[test]
    fn status_needs_both_config_and_credentials() {
        let (dir, paths) = paths();
        save_config(&paths, &AutomationConfig {
            enabled: true,
            allowed_roots: vec![dir.path().to_path_buf()],
            ..AutomationConfig::default()
        })
        .unwrap();
        assert!(!status_of(&paths).unwrap().enabled);

        CredentialFile::new(paths.clone())
            .write(&AutomationCredentials::generate(4242))
            .unwrap();
        assert!(status_of(&paths).unwrap().enabled);
    }

    #[test]
    fn allow_then_enable() {
        let (dir, paths) = paths();
        let work = dir.path().join("work");
        std::fs::create_dir(&work).unwrap();

        assert!(set_enabled(&paths, true).is_err());
        allow(&paths, &work).unwrap();
        set_enabled(&paths, true).unwrap();

        let config = loopgate_config::load_or_init(&paths).unwrap();
        assert!(config.enabled);
        assert_eq!(config.allowed_roots, vec![work.canonicalize().unwrap()]);
    }

    #[test]
    fn allow_rejects_files() {
        let (dir, paths) = paths();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(allow(&paths, &file).is_err());
    }
}
