//! Utility functions for directory management and file persistence
//!
//! This module provides helper functions following the XDG Base Directory specification
//! for the default locations of lxcm's files.
//!
//! # Directory Structure
//!
//! - Config: `~/.config/lxcm/` - `config.json`
//! - Data: `~/.local/share/lxcm/` - Rule store and settings
//! - State: `~/.local/state/lxcm/` - Audit log
//!
//! When running as a system service the config file normally points these at
//! `/var/lib/lxcm` instead.

use directories::ProjectDirs;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "lxcm", "lxcm")
}

pub fn get_config_dir() -> Option<PathBuf> {
    project_dirs().map(|pd| pd.config_dir().to_path_buf())
}

pub fn get_data_dir() -> Option<PathBuf> {
    project_dirs().map(|pd| pd.data_dir().to_path_buf())
}

pub fn get_state_dir() -> Option<PathBuf> {
    project_dirs().and_then(|pd| pd.state_dir().map(Path::to_path_buf))
}

/// Creates the parent directory of `path` (mode 0o700 on Unix) if missing.
pub async fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    ensure_parent_dir_with_mode(path, 0o700).await
}

async fn ensure_parent_dir_with_mode(path: &Path, dir_mode: u32) -> std::io::Result<()> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };

    if tokio::fs::try_exists(parent).await? {
        return Ok(());
    }

    #[cfg(unix)]
    {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.mode(dir_mode);
        builder.recursive(true);
        builder.create(parent).await
    }

    #[cfg(not(unix))]
    {
        let _ = dir_mode;
        tokio::fs::create_dir_all(parent).await
    }
}

/// Writes `contents` to `path` using an atomic write pattern.
/// 1. Writes to a sibling temporary file.
/// 2. Sets restrictive permissions (0o600) before any data is written.
/// 3. Flushes to disk and atomically renames over the target.
///
/// A crash at any point leaves either the old or the new file, never a mix.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    ensure_parent_dir(path).await?;
    write_replacing(path, contents, 0o600).await
}

/// Atomically replaces a file that other programs read, such as a daemon's
/// config file.
///
/// The new file keeps the permission bits of the file it replaces, or gets
/// `default_mode` if there is none. A missing parent directory is created
/// with mode 0o755.
pub async fn write_atomic_preserving_mode(
    path: &Path,
    contents: &[u8],
    default_mode: u32,
) -> std::io::Result<()> {
    #[cfg(unix)]
    let mode = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata.permissions().mode() & 0o7777,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => default_mode,
        Err(e) => return Err(e),
    };

    #[cfg(not(unix))]
    let mode = default_mode;

    ensure_parent_dir_with_mode(path, 0o755).await?;
    write_replacing(path, contents, mode).await
}

async fn write_replacing(path: &Path, contents: &[u8], mode: u32) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut temp_name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    #[cfg(unix)]
    let mut file = {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o600)
            .open(&temp_path)
            .await?;
        // open() is subject to the umask and does not touch an existing file
        file.set_permissions(std::fs::Permissions::from_mode(mode))
            .await?;
        file
    };

    #[cfg(not(unix))]
    let mut file = {
        let _ = mode;
        tokio::fs::File::create(&temp_path).await?
    };

    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&temp_path, path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::StorageFull {
            std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                format!("Disk full: cannot write {}", path.display()),
            )
        } else {
            e
        }
    })
}
