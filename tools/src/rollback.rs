//! File-level backup and restore.
//!
//! Out-of-band rollback points for the `file_backup` strategy declared in
//! execution plans. Not wired into the patch editor's apply path (the
//! worktree plus atomic promote already guarantees all-or-nothing there);
//! embeddings take backups around riskier edits and restore on demand.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tracing::debug;

use evolvai_utils::atomic_write;

/// One rollback point for one file.
#[derive(Debug, Clone)]
pub struct BackupHandle {
    original: PathBuf,
    /// `None` when the original did not exist at backup time; restoring
    /// then removes the file again.
    backup: Option<PathBuf>,
    created_at: DateTime<Utc>,
}

impl BackupHandle {
    #[must_use]
    pub fn original_path(&self) -> &Path {
        &self.original
    }

    #[must_use]
    pub fn backup_path(&self) -> Option<&Path> {
        self.backup.as_deref()
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Result of restoring a batch of rollback points.
///
/// Restoration stops at the first failure; `restored` counts the handles
/// applied before it.
#[derive(Debug)]
pub struct RestoreReport {
    pub restored: usize,
    pub failed: Option<(PathBuf, io::Error)>,
}

impl RestoreReport {
    #[must_use]
    pub fn success(&self) -> bool {
        self.failed.is_none()
    }
}

/// Owns a backup directory and the rollback points taken into it.
pub struct RollbackManager {
    backup_dir: PathBuf,
    // Keeps the default temp-backed directory alive for the manager's lifetime.
    _owned_dir: Option<TempDir>,
    sequence: u64,
    backups_created: u64,
    restores_performed: u64,
}

impl RollbackManager {
    /// A manager backed by a fresh temporary directory.
    pub fn new() -> io::Result<Self> {
        let dir = TempDir::new()?;
        Ok(Self {
            backup_dir: dir.path().to_path_buf(),
            _owned_dir: Some(dir),
            sequence: 0,
            backups_created: 0,
            restores_performed: 0,
        })
    }

    /// A manager writing backups into a caller-owned directory.
    #[must_use]
    pub fn with_backup_dir(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            _owned_dir: None,
            sequence: 0,
            backups_created: 0,
            restores_performed: 0,
        }
    }

    #[must_use]
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    #[must_use]
    pub const fn backups_created(&self) -> u64 {
        self.backups_created
    }

    #[must_use]
    pub const fn restores_performed(&self) -> u64 {
        self.restores_performed
    }

    /// Take a rollback point for `original`.
    ///
    /// A missing original is recorded as such, so restoring brings back
    /// the absence rather than an empty file.
    pub fn create_file_backup(&mut self, original: impl Into<PathBuf>) -> io::Result<BackupHandle> {
        let original = original.into();
        self.sequence += 1;

        let backup = if original.exists() {
            let file_name = original
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "unnamed".to_string());
            let backup_path = self
                .backup_dir
                .join(format!("{file_name}.{:06}.backup", self.sequence));
            fs::create_dir_all(&self.backup_dir)?;
            fs::copy(&original, &backup_path)?;
            Some(backup_path)
        } else {
            None
        };

        self.backups_created += 1;
        debug!(
            original = %original.display(),
            present = backup.is_some(),
            "created rollback point"
        );
        Ok(BackupHandle {
            original,
            backup,
            created_at: Utc::now(),
        })
    }

    /// Restore one rollback point, atomically replacing the original.
    pub fn restore(&mut self, handle: &BackupHandle) -> io::Result<()> {
        match &handle.backup {
            Some(backup_path) => {
                let content = fs::read(backup_path)?;
                if let Some(parent) = handle.original.parent() {
                    fs::create_dir_all(parent)?;
                }
                atomic_write(&handle.original, &content)?;
            }
            None => {
                if handle.original.exists() {
                    fs::remove_file(&handle.original)?;
                }
            }
        }
        self.restores_performed += 1;
        Ok(())
    }

    /// Restore a batch of rollback points in order, stopping at the first
    /// failure.
    pub fn restore_many(&mut self, handles: &[BackupHandle]) -> RestoreReport {
        let mut restored = 0;
        for handle in handles {
            if let Err(e) = self.restore(handle) {
                return RestoreReport {
                    restored,
                    failed: Some((handle.original.clone(), e)),
                };
            }
            restored += 1;
        }
        RestoreReport {
            restored,
            failed: None,
        }
    }
}
