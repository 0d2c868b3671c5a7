//! `ParsedDefect` and its classification hints — the normalized shape every
//! downstream stage consumes, independent of the analyzer's raw JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectCategory {
    NullPointer,
    MemoryManagement,
    BufferOverflow,
    Uninitialized,
    DeadCode,
    ResourceLeak,
    Concurrency,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityHint {
    MultiStep,
    FunctionLevel,
    SingleLine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextFlag {
    LineSpecific,
    FunctionContext,
}

/// Cheap, local, no-I/O classification derived from checker name and
/// subcategory. Must stay fast enough to run over an entire report
/// (sub-millisecond per defect) since it gates nothing expensive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationHints {
    pub likely_categories: Vec<DefectCategory>,
    pub severity_indicators: Severity,
    pub complexity_hints: Vec<ComplexityHint>,
    pub context_flags: Vec<ContextFlag>,
}

impl ClassificationHints {
    /// Derive hints from the checker name, subcategory, and event count.
    /// Grounded on the keyword table in the pipeline's ingestion design:
    /// substring/regex matches against `checker_name || subcategory`, a
    /// severity-keyword table, and an event-count threshold for complexity.
    pub fn derive(
        checker_name: &str,
        subcategory: &str,
        function_display_name: &str,
        event_count: usize,
    ) -> Self {
        let haystack = format!("{} {}", checker_name, subcategory).to_lowercase();

        let mut likely_categories = Vec::new();
        let mut push_once = |cat: DefectCategory, categories: &mut Vec<DefectCategory>| {
            if !categories.contains(&cat) {
                categories.push(cat);
            }
        };

        if matches_any(
            &haystack,
            &["null_returns", "forward_null", "reverse_inull", "null", "nullptr", "dereference"],
        ) {
            push_once(DefectCategory::NullPointer, &mut likely_categories);
        }
        if matches_any(
            &haystack,
            &[
                "resource_leak",
                "memory_leak",
                "alloc_free_mismatch",
                "malloc",
                "free",
                "new",
                "delete",
            ],
        ) {
            push_once(DefectCategory::MemoryManagement, &mut likely_categories);
        }
        if matches_any(
            &haystack,
            &["buffer_size_warning", "overrun", "negative_returns", "buffer", "overflow", "bounds"],
        ) {
            push_once(DefectCategory::BufferOverflow, &mut likely_categories);
        }
        if haystack.contains("uninit")
            || regex_lite_match(&haystack, "use", "before", "init")
        {
            push_once(DefectCategory::Uninitialized, &mut likely_categories);
        }
        if matches_any(&haystack, &["unreachable", "deadcode"])
            || regex_lite_match(&haystack, "dead", "", "code")
        {
            push_once(DefectCategory::DeadCode, &mut likely_categories);
        }

        if likely_categories.is_empty() {
            likely_categories.push(DefectCategory::Other);
        }

        let severity_indicators = if matches_any(&haystack, &["critical", "high", "security"]) {
            Severity::High
        } else if matches_any(&haystack, &["low", "style", "warning"]) {
            Severity::Low
        } else {
            Severity::Medium
        };

        let mut complexity_hints = Vec::new();
        if event_count > 3 {
            complexity_hints.push(ComplexityHint::MultiStep);
        }
        if !function_display_name.is_empty() {
            complexity_hints.push(ComplexityHint::FunctionLevel);
        }
        if complexity_hints.is_empty() {
            complexity_hints.push(ComplexityHint::SingleLine);
        }

        let mut context_flags = vec![ContextFlag::LineSpecific];
        if !function_display_name.is_empty() {
            context_flags.push(ContextFlag::FunctionContext);
        }

        ClassificationHints {
            likely_categories,
            severity_indicators,
            complexity_hints,
            context_flags,
        }
    }
}

fn matches_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Crude three-token "word1 ... word2 ... word3 all present, word1 before
/// word3" check, used in place of pulling in a full regex for the two
/// patterns (`use.*before.*init`, `dead.*code`) that need ordering rather
/// than plain substring containment. `mid` may be empty to skip that token.
fn regex_lite_match(haystack: &str, first: &str, mid: &str, last: &str) -> bool {
    let Some(first_pos) = haystack.find(first) else {
        return false;
    };
    let after_first = &haystack[first_pos + first.len()..];
    if !mid.is_empty() && !after_first.contains(mid) {
        return false;
    }
    after_first.contains(last)
}

/// A normalized defect record produced by the report adapter. Immutable
/// after construction; never mutated downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedDefect {
    pub defect_id: String,
    pub defect_type: String,
    pub file_path: PathBuf,
    pub line_number: usize,
    pub function_name: String,
    pub events: Vec<String>,
    pub subcategory: String,
    pub confidence_score: f64,
    pub parsing_timestamp: DateTime<Utc>,
    pub raw_data: Value,
    pub classification_hints: ClassificationHints,
}

impl ParsedDefect {
    /// Stable hash of `(checker, file, line, function)`, used as `defect_id`
    /// when the analyzer report does not supply one. Hex-encoded SHA-256
    /// truncated to 16 chars is plenty of entropy for this input space while
    /// staying readable in logs and changelist descriptions.
    pub fn stable_id(checker: &str, file: &str, line: usize, function: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(checker.as_bytes());
        hasher.update(b"\0");
        hasher.update(file.as_bytes());
        hasher.update(b"\0");
        hasher.update(line.to_le_bytes());
        hasher.update(b"\0");
        hasher.update(function.as_bytes());
        let digest = hasher.finalize();
        hex_prefix(&digest, 16)
    }
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut s = String::with_capacity(chars);
    for b in bytes {
        if s.len() >= chars {
            break;
        }
        s.push_str(&format!("{:02x}", b));
    }
    s.truncate(chars);
    s
}
