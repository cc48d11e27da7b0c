//! Atomic filesystem operations for onelane.
//!
//! Shared state files are read by other processes at any moment (status
//! queries, waiters polling the lock), so they must never be observed
//! half-written.
//!
//! # Implementation Strategy
//!
//! All atomic writes follow this pattern:
//! 1. Write content to a temporary file in the same directory
//! 2. Sync the file to disk (fsync)
//! 3. `rename()` over the target, which is atomic on the same filesystem
//!
//! The temporary name carries the writer's PID, so two processes replacing
//! the same file never share a temporary.

use crate::error::{Result, SchedError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Atomically write bytes to a file.
///
/// The target file is never in a partial state: readers see either the old
/// content or the new content.
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent()
        && !parent.exists()
    {
        fs::create_dir_all(parent)
            .map_err(|e| SchedError::io("create parent directory", parent, e))?;
    }

    let temp_path = generate_temp_path(path)?;
    write_and_sync(&temp_path, content)?;
    atomic_replace(&temp_path, path)
}

/// Atomically write a value as pretty JSON.
pub fn write_json<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| {
        SchedError::UserError(format!(
            "failed to serialize '{}': {}",
            path.as_ref().display(),
            e
        ))
    })?;
    atomic_write(path, json.as_bytes())
}

/// Read a JSON file, returning `Ok(None)` when it does not exist.
///
/// A file that exists but does not parse is reported as an error; callers
/// that race with writers rely on [`atomic_write`] so this only happens on
/// genuine corruption.
pub fn read_json<P: AsRef<Path>, T: DeserializeOwned>(path: P) -> Result<Option<T>> {
    let path = path.as_ref();
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SchedError::io("read", path, e)),
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| SchedError::UserError(format!("failed to parse '{}': {}", path.display(), e)))
}

/// Remove a file, treating "already gone" as success.
///
/// Returns whether this call removed it.
pub fn remove_if_exists<P: AsRef<Path>>(path: P) -> Result<bool> {
    let path = path.as_ref();
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SchedError::io("remove", path, e)),
    }
}

/// Generate a temporary file path in the same directory as the target.
fn generate_temp_path(target: &Path) -> Result<PathBuf> {
    let parent = target.parent().unwrap_or(Path::new("."));
    let filename = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SchedError::UserError("invalid file path".to_string()))?;

    let temp_name = format!(".{}.{}.tmp", filename, std::process::id());
    Ok(parent.join(temp_name))
}

/// Write content to a file and sync to disk.
fn write_and_sync(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| SchedError::io("create temporary file", path, e))?;

    file.write_all(content).map_err(|e| {
        let _ = fs::remove_file(path);
        SchedError::io("write temporary file", path, e)
    })?;

    file.sync_all().map_err(|e| {
        let _ = fs::remove_file(path);
        SchedError::io("sync temporary file", path, e)
    })?;

    Ok(())
}

/// Atomically replace the target file with the source file.
fn atomic_replace(source: &Path, target: &Path) -> Result<()> {
    fs::rename(source, target).map_err(|e| {
        let _ = fs::remove_file(source);
        SchedError::io("atomically replace", target, e)
    })?;

    if let Some(parent) = target.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }

    Ok(())
}
