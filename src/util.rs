//! Shared helpers: string truncation, path safety, and timeout-bounded subprocesses.

use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Truncate a string to at most `max` Unicode scalar values, appending `...`
/// when truncation actually occurs. Unicode-safe (never splits a codepoint).
pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

/// Result of a subprocess run bounded by a wall-clock timeout.
#[derive(Debug)]
pub struct CommandRunResult {
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Run `command`, killing it if it has not exited within `timeout`.
///
/// Used for VCS CLI invocations (`p4_timeout_seconds`) and safe-apply checks,
/// where a hung child process must never block the pipeline indefinitely.
pub fn run_command_with_timeout(
    command: &mut Command,
    timeout: Duration,
) -> Result<CommandRunResult, String> {
    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("Failed to start command: {}", e))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "Failed to capture stdout".to_string())?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| "Failed to capture stderr".to_string())?;

    let stdout_handle = thread::spawn(move || {
        let mut buf = Vec::new();
        let mut reader = BufReader::new(stdout);
        let _ = reader.read_to_end(&mut buf);
        buf
    });
    let stderr_handle = thread::spawn(move || {
        let mut buf = Vec::new();
        let mut reader = BufReader::new(stderr);
        let _ = reader.read_to_end(&mut buf);
        buf
    });

    let start = Instant::now();
    let mut timed_out = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {
                if start.elapsed() >= timeout {
                    timed_out = true;
                    let _ = child.kill();
                    match child.wait() {
                        Ok(status) => break Some(status),
                        Err(_) => break None,
                    }
                }
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => return Err(format!("Failed to wait for command: {}", e)),
        }
    };

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    Ok(CommandRunResult {
        status,
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        timed_out,
    })
}

/// Resolve `candidate` (relative or absolute) against `root`, rejecting paths
/// that escape the root via `..` traversal or a symlink hop. Returns the
/// canonical absolute path. Does not require the final component to exist.
pub fn resolve_path_in_root(root: &Path, candidate: &Path) -> Result<PathBuf, String> {
    if candidate.as_os_str().is_empty() {
        return Err("Path is empty".to_string());
    }

    let root = root
        .canonicalize()
        .map_err(|e| format!("Failed to resolve project root: {}", e))?;

    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let parent = joined
        .parent()
        .ok_or_else(|| format!("Invalid path: {}", candidate.display()))?;
    let parent_canon = canonicalize_existing_parent(parent)?;

    if !parent_canon.starts_with(&root) {
        return Err(format!("Path escapes project root: {}", candidate.display()));
    }

    if let Ok(metadata) = std::fs::symlink_metadata(&joined) {
        if metadata.file_type().is_symlink() {
            return Err(format!(
                "Symlinks are not allowed for security: {}",
                candidate.display()
            ));
        }
    }

    let mut check_path = joined.clone();
    while check_path.starts_with(&root) && check_path != root {
        if let Ok(metadata) = std::fs::symlink_metadata(&check_path) {
            if metadata.file_type().is_symlink() {
                return Err(format!("Path contains symlink: {}", check_path.display()));
            }
        }
        if !check_path.pop() {
            break;
        }
    }

    // Belt-and-suspenders textual check: a `..` component surviving onto an
    // absolute, non-canonicalized candidate should never reach here, but
    // reject it explicitly rather than trust canonicalization alone.
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
        && !joined.starts_with(&root)
    {
        return Err(format!("Path escapes project root: {}", candidate.display()));
    }

    Ok(joined)
}

fn canonicalize_existing_parent(path: &Path) -> Result<PathBuf, String> {
    let mut current = path.to_path_buf();
    while !current.exists() {
        if !current.pop() {
            return Err("Path has no existing parent".to_string());
        }
    }
    current
        .canonicalize()
        .map_err(|e| format!("Failed to resolve path {}: {}", current.display(), e))
}

/// Rough token-count heuristic for prompt budgeting: whitespace-separated
/// words plus half the punctuation count. Accurate to within ~10-15% of real
/// tokenizers, which is sufficient for deciding when to compress a prompt.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    word_count + punct_count / 2
}

/// Redact values that look like secrets (API keys, bearer tokens) from a
/// string before it reaches a log line or error message (P8 in the spec's
/// testable properties).
pub fn redact_secrets(input: &str) -> String {
    static PATTERNS: once_cell::sync::Lazy<Vec<regex::Regex>> = once_cell::sync::Lazy::new(|| {
        vec![
            regex::Regex::new(r"(?i)(sk-[a-z0-9_-]{10,})").unwrap(),
            regex::Regex::new(r"(?i)(Bearer\s+)[A-Za-z0-9._-]{10,}").unwrap(),
            regex::Regex::new(
                r#"(?i)((?:api[_-]?key|token|secret)["']?\s*[:=]\s*["']?)[A-Za-z0-9._-]{8,}"#,
            )
            .unwrap(),
        ]
    });

    let mut out = input.to_string();
    for pattern in PATTERNS.iter() {
        out = pattern.replace_all(&out, "$1[REDACTED]").to_string();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_unicode_safe() {
        let input = "ééééé";
        assert_eq!(truncate(input, 4), "é...");
    }

    #[test]
    fn test_truncate_small_max() {
        let input = "こんにちは";
        assert_eq!(truncate(input, 3), "こんに");
        assert_eq!(truncate(input, 0), "");
    }

    #[test]
    fn test_resolve_path_in_root_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let result = resolve_path_in_root(dir.path(), Path::new("../../etc/passwd"));
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_path_in_root_allows_nested_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.c"), "int main() {}").unwrap();
        let result = resolve_path_in_root(dir.path(), Path::new("src/main.c")).unwrap();
        assert!(result.starts_with(dir.path().canonicalize().unwrap()));
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert!(estimate_tokens("int main() { return 0; }") > 3);
    }

    #[test]
    fn test_redact_secrets_masks_api_key() {
        let msg = "request failed with api_key=sk-abcdef1234567890ghijk";
        let redacted = redact_secrets(msg);
        assert!(!redacted.contains("sk-abcdef1234567890ghijk"));
        assert!(redacted.contains("[REDACTED]"));
    }
}
