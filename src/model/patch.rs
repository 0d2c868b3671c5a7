//! `PatchApplicationResult`, `BackupManifest`, `PatchValidationResult` — the
//! surgical-application layer's hand-off objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Success,
    DryRunSuccess,
    Failed,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    LineRange,
    Keyword,
    FullFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedChange {
    pub file_path: PathBuf,
    pub mode: ApplyMode,
    pub ranges_applied: Vec<(usize, usize)>,
    pub vcs_operations: Vec<String>,
    pub backup_ref: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatchValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl PatchValidationResult {
    pub fn ok() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.is_valid = false;
        self.errors.push(message.into());
    }

    pub fn push_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEntry {
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
    pub sha256: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    pub patch_id: String,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<BackupEntry>,
}

impl BackupManifest {
    pub fn entry_for(&self, path: &std::path::Path) -> Option<&BackupEntry> {
        self.entries.iter().find(|e| e.original_path == path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchApplicationResult {
    pub patch_id: String,
    pub overall_status: OverallStatus,
    pub applied_changes: Vec<AppliedChange>,
    pub validation: PatchValidationResult,
    pub backup_manifest_ref: Option<String>,
    pub changelist_id: Option<String>,
    pub processing_time_seconds: f64,
    pub error_log: Vec<String>,
}

impl PatchApplicationResult {
    pub fn failed(patch_id: impl Into<String>, validation: PatchValidationResult, elapsed: f64) -> Self {
        Self {
            patch_id: patch_id.into(),
            overall_status: OverallStatus::Failed,
            applied_changes: Vec::new(),
            validation,
            backup_manifest_ref: None,
            changelist_id: None,
            processing_time_seconds: elapsed,
            error_log: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_result_ok_has_no_errors() {
        let result = PatchValidationResult::ok();
        assert!(result.is_valid);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_push_error_flips_validity() {
        let mut result = PatchValidationResult::ok();
        result.push_error("file missing");
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_backup_manifest_lookup() {
        let manifest = BackupManifest {
            patch_id: "p1".to_string(),
            created_at: Utc::now(),
            entries: vec![BackupEntry {
                original_path: PathBuf::from("/src/foo.c"),
                backup_path: PathBuf::from("/backups/p1/foo.c.bak"),
                sha256: "abc".to_string(),
                size: 100,
            }],
        };
        assert!(manifest.entry_for(std::path::Path::new("/src/foo.c")).is_some());
        assert!(manifest.entry_for(std::path::Path::new("/src/bar.c")).is_none());
    }
}
