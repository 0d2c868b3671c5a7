//! `ContextAnalyzer` — selects a context-window size from classification
//! hints and extracts the surrounding function (or a symmetric window) for a
//! `ParsedDefect`.

use crate::lang::LanguageParser;
use crate::model::{CodeContext, ComplexityHint, DefectCategory, FileEncoding, Language, ParsedDefect};
use crate::source::SourceFileManager;
use chrono::Utc;

pub struct ContextAnalyzer<'a> {
    source_files: &'a SourceFileManager,
    min_window: usize,
    max_window: usize,
}

impl<'a> ContextAnalyzer<'a> {
    pub fn new(source_files: &'a SourceFileManager, min_window: usize, max_window: usize) -> Self {
        Self {
            source_files,
            min_window,
            max_window,
        }
    }

    /// Deterministic table over `classification_hints`, clamped to
    /// `[min_window, max_window]`.
    fn window_size(&self, defect: &ParsedDefect) -> usize {
        let hints = &defect.classification_hints;
        let window = if hints.likely_categories.contains(&DefectCategory::NullPointer) {
            20
        } else if hints.likely_categories.contains(&DefectCategory::MemoryManagement) {
            50
        } else if hints.likely_categories.contains(&DefectCategory::BufferOverflow) {
            40
        } else if hints.complexity_hints.contains(&ComplexityHint::MultiStep) {
            40
        } else if hints.complexity_hints.contains(&ComplexityHint::FunctionLevel) {
            35
        } else {
            30
        };
        window.clamp(self.min_window, self.max_window)
    }

    /// Build a `CodeContext` for `defect`. File-level failures never crash
    /// the pipeline: `None` signals "fall back to empty context, mark the
    /// defect for downstream skip" per the source manager's failure policy.
    pub fn analyze(&self, defect: &ParsedDefect) -> Option<CodeContext> {
        let (full_text, encoding) = self.source_files.read_file(&defect.file_path).ok()?;
        let total_lines = full_text.lines().count();
        if total_lines == 0 || defect.line_number > total_lines {
            return None;
        }

        let language = LanguageParser::detect_language(&defect.file_path, &full_text);
        let function_bounds = match language {
            Language::C | Language::Cpp => LanguageParser::function_bounds(&full_text, defect.line_number),
            Language::Unknown => None,
        };

        let window = self.window_size(defect);
        let (start, end) = match function_bounds {
            Some((func_start, func_end)) => {
                let half_down = window / 2;
                let half_up = window.div_ceil(2);
                let start = func_start.max(defect.line_number.saturating_sub(half_down)).max(1);
                let end = func_end.min(defect.line_number + half_up - 1);
                (start.min(defect.line_number), end.max(defect.line_number))
            }
            None => {
                let half_down = window / 2;
                let half_up = window.div_ceil(2);
                let start = defect.line_number.saturating_sub(half_down).max(1);
                let end = (defect.line_number + half_up - 1).min(total_lines);
                (start, end)
            }
        };

        let (source_code, _clamped) = self
            .source_files
            .get_line_range(&defect.file_path, start, end)
            .ok()?;

        let primary_function = if defect.function_name.is_empty() {
            None
        } else {
            Some(defect.function_name.clone())
        };

        Some(CodeContext {
            defect_id: defect.defect_id.clone(),
            primary_file: defect.file_path.clone(),
            primary_function,
            language,
            context_lines: (start, end),
            source_code,
            affected_lines: vec![defect.line_number],
            function_bounds,
            file_encoding: map_encoding(encoding),
            extraction_timestamp: Utc::now(),
        })
    }
}

fn map_encoding(encoding: FileEncoding) -> FileEncoding {
    encoding
}
