use std::path::{Path, PathBuf};

use {
    loopgate_common::fs_guard,
    tracing::{debug, info},
};

use crate::{
    error::{Context, Error, Result},
    schema::AutomationConfig,
    validate::{ValidationResult, check_config, is_valid_root, validate_str},
};

/// Config file name inside the automation directory.
pub const CONFIG_FILENAME: &str = "automation.json";

/// Credential file name inside the automation directory.
pub const CREDENTIALS_FILENAME: &str = "credentials.json";

/// Locations of the automation directory and the two files it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationPaths {
    pub dir: PathBuf,
    pub config_file: PathBuf,
    pub credentials_file: PathBuf,
}

impl AutomationPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            config_file: dir.join(CONFIG_FILENAME),
            credentials_file: dir.join(CREDENTIALS_FILENAME),
            dir,
        }
    }

    /// `<user config dir>/loopgate/automation`, e.g.
    /// `~/.config/loopgate/automation` on Linux.
    pub fn discover() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", "loopgate")
            .context("could not determine the user config directory")?;
        Ok(Self::new(dirs.config_dir().join("automation")))
    }

    /// Refuses if the directory or either file is a symbolic link.
    pub fn guard(&self) -> Result<()> {
        for path in [&self.dir, &self.config_file, &self.credentials_file] {
            fs_guard::reject_symlink(path)?;
        }
        Ok(())
    }
}

/// Load and validate the config, writing the default first if absent.
///
/// Any validation failure is returned as [`Error::Invalid`]; there is no
/// fallback to defaults for a file that exists but is wrong.
pub fn load_or_init(paths: &AutomationPaths) -> Result<AutomationConfig> {
    paths.guard()?;
    fs_guard::ensure_private_dir(&paths.dir)?;

    let Some(raw) = fs_guard::read_private_file(&paths.config_file)? else {
        let config = AutomationConfig::default();
        write_config(&paths.config_file, &config)?;
        info!(path = %paths.config_file.display(), "wrote default automation config");
        return Ok(config);
    };

    let config = validate_str(&raw).into_config()?;
    debug!(
        path = %paths.config_file.display(),
        enabled = config.enabled,
        roots = config.allowed_roots.len(),
        "loaded automation config"
    );
    Ok(config)
}

/// Validate the file without creating anything. `Ok(None)` if it is absent.
pub fn inspect(paths: &AutomationPaths) -> Result<Option<ValidationResult>> {
    paths.guard()?;
    Ok(fs_guard::read_private_file(&paths.config_file)?.map(|raw| validate_str(&raw)))
}

/// Validate and persist `config` with owner-only permissions.
pub fn save_config(paths: &AutomationPaths, config: &AutomationConfig) -> Result<()> {
    paths.guard()?;
    let config = check_config(config)?;
    fs_guard::ensure_private_dir(&paths.dir)?;
    write_config(&paths.config_file, &config)?;
    debug!(path = %paths.config_file.display(), "saved automation config");
    Ok(())
}

/// Persist `enabled`, keeping every other field. Fails without writing if
/// the result would not validate (e.g. enabling with no allowed roots).
pub fn set_enabled(paths: &AutomationPaths, enabled: bool) -> Result<AutomationConfig> {
    update(paths, |config| {
        config.enabled = enabled;
        Ok(())
    })
}

/// Append `root` to `allowedRoots` unless it is already present.
pub fn add_allowed_root(paths: &AutomationPaths, root: &Path) -> Result<AutomationConfig> {
    if !is_valid_root(root) {
        return Err(Error::message(format!(
            "allowed root must be an absolute path: {}",
            root.display()
        )));
    }
    update(paths, |config| {
        if !config.allowed_roots.iter().any(|r| r == root) {
            config.allowed_roots.push(root.to_path_buf());
        }
        Ok(())
    })
}

fn update(
    paths: &AutomationPaths,
    edit: impl FnOnce(&mut AutomationConfig) -> Result<()>,
) -> Result<AutomationConfig> {
    let mut config = load_or_init(paths)?;
    edit(&mut config)?;
    save_config(paths, &config)?;
    Ok(config)
}

fn write_config(path: &Path, config: &AutomationConfig) -> Result<()> {
    let mut data = serde_json::to_string_pretty(config)?;
    data.push('\n');
    fs_guard::write_private_file(path, data.as_bytes())?;
    Ok(())
}
