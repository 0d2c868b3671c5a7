//! `BackupManager` — snapshots target files under a patch-scoped directory
//! before a surgical edit, and restores them if the edit must be undone.

use crate::model::{BackupEntry, BackupManifest};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("failed to read {path}: {reason}")]
    ReadFailed { path: PathBuf, reason: String },
    #[error("failed to write backup {path}: {reason}")]
    WriteFailed { path: PathBuf, reason: String },
    #[error("no backup entry for {0}")]
    NoEntryFor(PathBuf),
    #[error("checksum mismatch restoring {path}: expected {expected}, backup has {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

/// Owns the backup directory tree. Entries are immutable once written;
/// `cleanup` is an explicit, separate step run only after successful
/// application.
pub struct BackupManager {
    backup_root: PathBuf,
}

impl BackupManager {
    pub fn new(backup_root: PathBuf) -> Self {
        Self { backup_root }
    }

    /// Snapshot `files` under `<backup_root>/<patch_id>/<timestamp>/`, one
    /// `.bak` per file named by a hash of its original path so collisions
    /// across directories can't collide on disk. Idempotent: calling this
    /// twice for the same `patch_id` creates a fresh timestamped directory,
    /// and the manifest returned always reflects the latest snapshot.
    pub fn create_backup(&self, patch_id: &str, files: &[PathBuf]) -> Result<BackupManifest, BackupError> {
        let created_at = Utc::now();
        let timestamp_dir = self
            .backup_root
            .join(patch_id)
            .join(created_at.format("%Y%m%dT%H%M%S%.f").to_string());

        fs::create_dir_all(&timestamp_dir).map_err(|e| BackupError::WriteFailed {
            path: timestamp_dir.clone(),
            reason: e.to_string(),
        })?;

        let mut entries = Vec::with_capacity(files.len());
        for original_path in files {
            let bytes = fs::read(original_path).map_err(|e| BackupError::ReadFailed {
                path: original_path.clone(),
                reason: e.to_string(),
            })?;
            let sha256 = hex_sha256(&bytes);
            let backup_path = timestamp_dir.join(format!("{}.bak", hex_sha256(original_path.to_string_lossy().as_bytes())));

            fs::write(&backup_path, &bytes).map_err(|e| BackupError::WriteFailed {
                path: backup_path.clone(),
                reason: e.to_string(),
            })?;

            entries.push(BackupEntry {
                original_path: original_path.clone(),
                backup_path,
                sha256,
                size: bytes.len() as u64,
            });
        }

        Ok(BackupManifest {
            patch_id: patch_id.to_string(),
            created_at,
            entries,
        })
    }

    /// Restore every entry in `manifest` to its original path, verifying the
    /// backup's own checksum before writing. A mismatch fails the whole
    /// restore with a hard error and leaves the target untouched, since a
    /// corrupted backup is worse than a stale on-disk file.
    pub fn restore(&self, manifest: &BackupManifest) -> Result<(), BackupError> {
        for entry in &manifest.entries {
            let bytes = fs::read(&entry.backup_path).map_err(|e| BackupError::ReadFailed {
                path: entry.backup_path.clone(),
                reason: e.to_string(),
            })?;
            let actual = hex_sha256(&bytes);
            if actual != entry.sha256 {
                return Err(BackupError::ChecksumMismatch {
                    path: entry.original_path.clone(),
                    expected: entry.sha256.clone(),
                    actual,
                });
            }
            fs::write(&entry.original_path, &bytes).map_err(|e| BackupError::WriteFailed {
                path: entry.original_path.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Remove this patch's entire backup tree. Only called after a
    /// successful, non-retained application.
    pub fn cleanup(&self, patch_id: &str) -> Result<(), BackupError> {
        let dir = self.backup_root.join(patch_id);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| BackupError::WriteFailed {
                path: dir,
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

pub fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn hash_file(path: &Path) -> Result<String, BackupError> {
    let bytes = fs::read(path).map_err(|e| BackupError::ReadFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(hex_sha256(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_backup_and_restore_round_trip() {
        let source_dir = tempfile::tempdir().unwrap();
        let backup_dir = tempfile::tempdir().unwrap();
        let file_path = source_dir.path().join("foo.c");
        std::fs::write(&file_path, "int main() {}\n").unwrap();

        let manager = BackupManager::new(backup_dir.path().to_path_buf());
        let manifest = manager.create_backup("patch-1", &[file_path.clone()]).unwrap();
        assert_eq!(manifest.entries.len(), 1);

        std::fs::write(&file_path, "int main() { return 1; }\n").unwrap();
        manager.restore(&manifest).unwrap();

        let restored = std::fs::read_to_string(&file_path).unwrap();
        assert_eq!(restored, "int main() {}\n");
    }

    #[test]
    fn test_restore_detects_corrupted_backup() {
        let source_dir = tempfile::tempdir().unwrap();
        let backup_dir = tempfile::tempdir().unwrap();
        let file_path = source_dir.path().join("foo.c");
        std::fs::write(&file_path, "original\n").unwrap();

        let manager = BackupManager::new(backup_dir.path().to_path_buf());
        let manifest = manager.create_backup("patch-1", &[file_path.clone()]).unwrap();

        std::fs::write(&manifest.entries[0].backup_path, "tampered").unwrap();
        std::fs::write(&file_path, "changed\n").unwrap();

        let result = manager.restore(&manifest);
        assert!(matches!(result, Err(BackupError::ChecksumMismatch { .. })));
        assert_eq!(std::fs::read_to_string(&file_path).unwrap(), "changed\n");
    }

    #[test]
    fn test_cleanup_removes_patch_tree() {
        let source_dir = tempfile::tempdir().unwrap();
        let backup_dir = tempfile::tempdir().unwrap();
        let file_path = source_dir.path().join("foo.c");
        std::fs::write(&file_path, "x\n").unwrap();

        let manager = BackupManager::new(backup_dir.path().to_path_buf());
        manager.create_backup("patch-1", &[file_path.clone()]).unwrap();
        assert!(backup_dir.path().join("patch-1").exists());

        manager.cleanup("patch-1").unwrap();
        assert!(!backup_dir.path().join("patch-1").exists());
    }

    #[test]
    fn test_hash_file_matches_manifest_entry() {
        let source_dir = tempfile::tempdir().unwrap();
        let backup_dir = tempfile::tempdir().unwrap();
        let file_path = source_dir.path().join("foo.c");
        std::fs::write(&file_path, "content\n").unwrap();

        let manager = BackupManager::new(backup_dir.path().to_path_buf());
        let manifest = manager.create_backup("patch-1", &[file_path.clone()]).unwrap();
        assert_eq!(hash_file(&file_path).unwrap(), manifest.entries[0].sha256);
    }
}
