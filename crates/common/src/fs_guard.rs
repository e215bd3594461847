//! Filesystem guards for the automation directory and requested working
//! directories.
//!
//! Every read or write of the automation directory, its config file, or its
//! credential file goes through these helpers, which inspect the link status
//! of the target without following it and refuse to touch symbolic links.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Fails with [`Error::SymlinkRejected`] if `path` is a symbolic link.
///
/// A missing path is accepted; callers decide what absence means.
pub fn reject_symlink(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            warn!(path = %path.display(), "symbolic link rejected");
            Err(Error::symlink(path))
        },
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Creates `dir` (and its parents) if missing, with owner-only permissions on
/// the leaf directory. Refuses if `dir` is a symbolic link.
pub fn ensure_private_dir(dir: &Path) -> Result<()> {
    reject_symlink(dir)?;
    if !dir.exists() {
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut builder = fs::DirBuilder::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        match builder.create(dir) {
            Ok(()) => debug!(path = %dir.display(), "created automation directory"),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {},
            Err(e) => return Err(e.into()),
        }
    }
    // Re-check: the directory may have been swapped for a link meanwhile.
    reject_symlink(dir)?;
    if !dir.is_dir() {
        return Err(Error::message(format!(
            "{} exists but is not a directory",
            dir.display()
        )));
    }
    Ok(())
}

/// Reads a guarded file. Returns `Ok(None)` when it does not exist.
pub fn read_private_file(path: &Path) -> Result<Option<String>> {
    reject_symlink(path)?;
    match fs::read_to_string(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Atomically writes `contents` to `path` with owner-only permissions.
///
/// The data lands in a sibling temp file first and is renamed into place, so
/// readers never observe a partial file and a link planted at `path` is
/// replaced rather than followed.
pub fn write_private_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        reject_symlink(parent)?;
    }
    reject_symlink(path)?;

    let temp_path = temp_sibling(path);
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let written = options.open(&temp_path).and_then(|mut file| {
        file.write_all(contents)?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        warn!(
            temp_path = %temp_path.display(),
            path = %path.display(),
            error = %e,
            "failed to atomically replace file"
        );
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

/// Removes a guarded file. Missing files are not an error.
pub fn remove_private_file(path: &Path) -> Result<()> {
    reject_symlink(path)?;
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!(".{name}.tmp.{}.{nanos}", std::process::id()))
}

// ── Working directory authorization ─────────────────────────────────────────

/// Why a requested working directory was refused.
#[derive(Debug, thiserror::Error)]
pub enum PathCheckError {
    #[error("automation has no allowed roots configured")]
    NoAllowedRoots,
    #[error("cwd must be an absolute path")]
    NotAbsolute,
    #[error("cwd does not exist")]
    NotFound,
    #[error("cwd is not a directory")]
    NotDirectory,
    #[error("cwd is outside the allowed roots")]
    OutsideAllowlist,
    #[error("failed to inspect cwd: {0}")]
    Io(#[from] std::io::Error),
}

/// Checks that `cwd` is an existing directory that canonically resolves to
/// one of `allowed_roots` or a descendant of one.
///
/// Both sides are canonicalized, so a link inside an allowed root that points
/// elsewhere resolves to its real target and is refused. Returns the
/// canonical `cwd` on success.
pub fn assert_path_allowed(
    cwd: &Path,
    allowed_roots: &[PathBuf],
) -> std::result::Result<PathBuf, PathCheckError> {
    if allowed_roots.is_empty() {
        return Err(PathCheckError::NoAllowedRoots);
    }
    if !cwd.is_absolute() {
        return Err(PathCheckError::NotAbsolute);
    }

    let meta = match fs::metadata(cwd) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PathCheckError::NotFound);
        },
        Err(e) => return Err(e.into()),
    };
    if !meta.is_dir() {
        return Err(PathCheckError::NotDirectory);
    }

    let real_cwd = fs::canonicalize(cwd)?;
    for root in allowed_roots {
        let real_root = match fs::canonicalize(root) {
            Ok(real_root) => real_root,
            Err(e) => {
                debug!(root = %root.display(), error = %e, "skipping unresolvable allowed root");
                continue;
            },
        };
        // Component-wise: /work does not admit /workspace.
        if real_cwd.starts_with(&real_root) {
            return Ok(real_cwd);
        }
    }
    Err(PathCheckError::OutsideAllowlist)
}
