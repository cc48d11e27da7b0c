//! Advisory-locked critical sections.
//!
//! `flock(2)` locks belong to the open file description and are released by
//! the kernel when the holder dies, so a crashed process can never strand a
//! section lock. They serialize the short read-modify-write cycles on shared
//! state (queue rewrites, stale-lock reclamation, pipeline bookkeeping).

use crate::error::{Result, SchedError};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// RAII guard for an advisory lock on a file.
///
/// The lock is released when dropped.
#[derive(Debug)]
pub struct SectionLock {
    file: File,
}

impl SectionLock {
    /// Block until the exclusive lock on `path` is held.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        file.lock_exclusive()
            .map_err(|e| SchedError::Lock(format!("failed to lock '{}': {}", path.display(), e)))?;

        Ok(Self { file })
    }

    /// Take the exclusive lock on `path` if nobody else holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = open_lock_file(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(SchedError::Lock(format!(
                "failed to lock '{}': {}",
                path.display(),
                e
            ))),
        }
    }
}

impl Drop for SectionLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Run `f` while holding the section lock at `path`.
pub fn with_section<T, F>(path: &Path, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let _guard = SectionLock::acquire(path)?;
    f()
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| SchedError::io("create lock directory", parent, e))?;
    }

    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| SchedError::io("open lock file", path, e))
}
