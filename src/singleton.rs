//! Decides whether this process is the primary instance.
//!
//! The named exclusive lock is an advisory OS file lock. The kernel drops it
//! when the holding process exits for any reason, so a crashed primary never
//! blocks the next launch.

use crate::error::{AppError, AppResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Stable across releases so that old and new versions exclude each other.
pub const LOCK_NAME: &str = "MdView_SingleInstance_Mutex";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceRole {
    Primary,
    Secondary,
}

pub struct InstanceArbiter {
    lock_path: PathBuf,
    lock_file: Option<File>,
}

impl InstanceArbiter {
    pub fn new(lock_path: impl Into<PathBuf>) -> Self {
        Self {
            lock_path: lock_path.into(),
            lock_file: None,
        }
    }

    /// Arbiter for the application-wide lock inside `runtime_dir`.
    pub fn in_dir(runtime_dir: &Path) -> Self {
        Self::new(runtime_dir.join(format!("{LOCK_NAME}.lock")))
    }

    pub fn is_primary(&self) -> bool {
        self.lock_file.is_some()
    }

    /// Tries to take the instance lock without blocking.
    ///
    /// `Err(AppError::Arbitration)` means the lock could not be created or
    /// queried at all; the caller decides how to proceed.
    pub fn try_become_primary(&mut self) -> AppResult<InstanceRole> {
        if self.is_primary() {
            return Ok(InstanceRole::Primary);
        }

        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Arbitration(format!(
                    "failed to create lock directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| {
                AppError::Arbitration(format!(
                    "failed to open lock file {}: {}",
                    self.lock_path.display(),
                    e
                ))
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                log::info!("Acquired instance lock {}", self.lock_path.display());
                self.lock_file = Some(file);
                Ok(InstanceRole::Primary)
            }
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                // Dropping `file` closes our handle; nothing leaks.
                log::info!("Instance lock {} is held elsewhere", self.lock_path.display());
                Ok(InstanceRole::Secondary)
            }
            Err(e) => Err(AppError::Arbitration(format!(
                "failed to lock {}: {}",
                self.lock_path.display(),
                e
            ))),
        }
    }

    /// Gives the lock up. Calling this when not holding the lock does nothing.
    pub fn release_primary(&mut self) {
        if let Some(file) = self.lock_file.take() {
            // The file stays on disk: unlinking it would let a racing opener
            // lock an orphaned inode while another process locks a new one.
            if let Err(e) = FileExt::unlock(&file) {
                log::warn!("Failed to unlock {}: {}", self.lock_path.display(), e);
            }
            log::info!("Released instance lock {}", self.lock_path.display());
        }
    }
}

impl Drop for InstanceArbiter {
    fn drop(&mut self) {
        self.release_primary();
    }
}
