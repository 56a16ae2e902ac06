// src/utils/fs.rs

//! Crash-safe file helpers.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};

/// Sibling temp path: `projects.json` -> `projects.json.tmp`.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("data"));
    name.push(".tmp");
    path.with_file_name(name)
}

/// Ensure parent directory exists.
pub async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

/// Write bytes to a temp sibling and fsync it. Returns the temp path.
pub async fn write_tmp(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    ensure_parent(path).await?;

    let tmp = tmp_path(path);
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    Ok(tmp)
}

/// Write bytes atomically (write to temp, then rename).
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = write_tmp(path, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Write pretty JSON atomically.
pub async fn write_json_atomic<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes).await
}

/// Read bytes, returning None if file doesn't exist.
pub async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AppError::Io(e)),
    }
}

/// Copy `from` over `to` atomically. Returns false if `from` is missing.
pub async fn copy_atomic(from: &Path, to: &Path) -> Result<bool> {
    match read_optional(from).await? {
        Some(bytes) => {
            write_atomic(to, &bytes).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}
