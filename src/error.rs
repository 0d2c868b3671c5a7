//! Error taxonomy for the defect-to-patch pipeline.
//!
//! Each enum corresponds to one abstract error kind from the spec's error
//! handling design. Orchestration code matches on variants to decide
//! retry/failover/rollback behavior; `anyhow::Error` alone can't be matched
//! on, so these are `thiserror`-derived and carried through `anyhow::Result`
//! at the call boundary via `anyhow::Error::from`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("report not found: {0}")]
    ReportNotFound(PathBuf),
    #[error("invalid report at {path}: {reason}")]
    InvalidReport { path: PathBuf, reason: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("could not resolve function boundary for {file} at line {line}")]
    NoFunctionBounds { file: PathBuf, line: usize },
    #[error("defect line {line} is past end of file {file} ({len} lines)")]
    LineOutOfBounds {
        file: PathBuf,
        line: usize,
        len: usize,
    },
    #[error("file too large: {file} ({size} bytes > {max} byte limit)")]
    FileTooLarge {
        file: PathBuf,
        size: u64,
        max: u64,
    },
    #[error("file access error: {0}")]
    FileAccess(#[from] FileAccessError),
}

#[derive(Debug, Error)]
pub enum FileAccessError {
    #[error("path outside project root: {0}")]
    OutsideRoot(PathBuf),
    #[error("file not found: {0}")]
    NotFound(PathBuf),
    #[error("unreadable file {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
    #[error("file too large: {path} ({size} bytes)")]
    TooLarge { path: PathBuf, size: u64 },
    #[error("symlink escapes project root: {0}")]
    SymlinkEscape(PathBuf),
}

/// Kinds of provider failure, used by `ProviderManager` to decide whether to
/// retry in place, fail over to the next provider, or recompress the prompt.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication failed for provider {provider}")]
    Authentication { provider: String },
    #[error("model {model} permanently unavailable on provider {provider}")]
    PermanentModelUnavailable { provider: String, model: String },
    #[error("rate limited by provider {provider}, retry after {retry_after_secs:?}s")]
    RateLimit {
        provider: String,
        retry_after_secs: Option<u64>,
    },
    #[error("transient network error calling provider {provider}: {reason}")]
    TransientNetwork { provider: String, reason: String },
    #[error("provider {provider} returned server error {status}")]
    ServerError { provider: String, status: u16 },
    #[error("request to provider {provider} timed out after {timeout_secs}s")]
    Timeout { provider: String, timeout_secs: u64 },
    #[error("context length exceeded for provider {provider}")]
    ContextLengthExceeded { provider: String },
    #[error("all providers exhausted: {causes:?}")]
    AllProvidersExhausted { causes: Vec<String> },
}

impl ProviderError {
    /// Whether this failure should fail over to the next provider immediately
    /// rather than retry within the same provider.
    pub fn is_immediate_failover(&self) -> bool {
        matches!(
            self,
            ProviderError::Authentication { .. } | ProviderError::PermanentModelUnavailable { .. }
        )
    }

    /// Whether this failure is retryable within the same provider.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimit { .. }
                | ProviderError::TransientNetwork { .. }
                | ProviderError::ServerError { .. }
                | ProviderError::Timeout { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no JSON object found in model response")]
    NoJsonFound,
    #[error("JSON did not validate against the expected schema: {0}")]
    SchemaMismatch(String),
    #[error("repair budget exhausted after {attempts} attempt(s)")]
    RepairBudgetExhausted { attempts: u32 },
    #[error("model output could not be parsed by any recovery strategy: {0}")]
    Unrecoverable(String),
}

#[derive(Debug, Error)]
#[error("patch validation failed: {errors:?}")]
pub struct ValidationError {
    pub errors: Vec<String>,
}

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("no workspace configuration found for {0}")]
    WorkspaceNotFound(PathBuf),
    #[error("checkout denied for {file}: {reason}")]
    CheckoutDenied { file: PathBuf, reason: String },
    #[error("revert failed for {file}: {reason}")]
    RevertFailed { file: PathBuf, reason: String },
    #[error("workspace has conflicting pending edits for {0}")]
    DirtyWorkspace(PathBuf),
    #[error("VCS command timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
    #[error("VCS command failed: {0}")]
    CommandFailed(String),
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("no application mode precondition was satisfied for {0}")]
    NoModeApplicable(PathBuf),
    #[error("write failed for {path}: {reason}")]
    WriteFailed { path: PathBuf, reason: String },
    #[error("post-apply integrity check failed for {path}: {reason}")]
    IntegrityCheckFailed { path: PathBuf, reason: String },
    #[error("keyword block size {size} exceeds max_block_size_for_keywords {max}")]
    KeywordBlockTooLarge { size: usize, max: usize },
}

/// A failure during rollback itself. Never swallowed; always surfaced at the
/// highest severity and preserved in `PatchApplicationResult::error_log`.
#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("backup restore failed for {path}: {reason}")]
    RestoreFailed { path: PathBuf, reason: String },
    #[error("VCS revert failed during rollback for {path}: {reason}")]
    RevertFailed { path: PathBuf, reason: String },
    #[error("checksum mismatch restoring {path}: expected {expected}, backup has {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}
