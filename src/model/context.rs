//! `CodeContext` — the source-level window around a single defect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    C,
    Cpp,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEncoding {
    Utf8,
    Ascii,
    Latin1,
    Other,
}

/// A slice of source around one defect, plus whatever function boundary the
/// language parser could determine. Built once by `ContextAnalyzer`, never
/// mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeContext {
    pub defect_id: String,
    pub primary_file: PathBuf,
    pub primary_function: Option<String>,
    pub language: Language,
    /// 1-based, inclusive.
    pub context_lines: (usize, usize),
    /// Exact slice of the file between `context_lines`, newlines preserved.
    pub source_code: String,
    pub affected_lines: Vec<usize>,
    /// 1-based, inclusive; `None` when no enclosing function was found.
    pub function_bounds: Option<(usize, usize)>,
    pub file_encoding: FileEncoding,
    pub extraction_timestamp: DateTime<Utc>,
}

impl CodeContext {
    /// P2: `start_line <= defect_line <= end_line` and `source_code` decodes
    /// to exactly `end_line - start_line + 1` lines.
    pub fn is_well_formed(&self, defect_line: usize) -> bool {
        let (start, end) = self.context_lines;
        if !(start <= defect_line && defect_line <= end) {
            return false;
        }
        let expected_lines = end - start + 1;
        let actual_lines = self.source_code.lines().count();
        if actual_lines != expected_lines {
            return false;
        }
        if let Some((fs, fe)) = self.function_bounds {
            // Window must overlap the detected function bounds.
            if end < fs || start > fe {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_context(start: usize, end: usize, lines: usize) -> CodeContext {
        CodeContext {
            defect_id: "abc123".to_string(),
            primary_file: PathBuf::from("/src/foo.c"),
            primary_function: Some("do_thing".to_string()),
            language: Language::C,
            context_lines: (start, end),
            source_code: "x;\n".repeat(lines),
            affected_lines: vec![start],
            function_bounds: None,
            file_encoding: FileEncoding::Utf8,
            extraction_timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_well_formed_context() {
        let ctx = sample_context(10, 19, 10);
        assert!(ctx.is_well_formed(15));
    }

    #[test]
    fn test_rejects_defect_line_outside_window() {
        let ctx = sample_context(10, 19, 10);
        assert!(!ctx.is_well_formed(30));
    }

    #[test]
    fn test_rejects_mismatched_line_count() {
        let ctx = sample_context(10, 19, 5);
        assert!(!ctx.is_well_formed(15));
    }
}
