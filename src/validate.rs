//! `PatchValidator` — pre-flight gating of a `DefectAnalysisResult` before
//! any VCS checkout or disk write is attempted.

use crate::backup::hash_file;
use crate::config::{ApplicationConfig, ParsingConfig};
use crate::model::{DefectAnalysisResult, FixCandidate, PatchValidationResult};
use std::path::Path;

pub struct PatchValidator<'a> {
    parsing: &'a ParsingConfig,
    application: &'a ApplicationConfig,
}

impl<'a> PatchValidator<'a> {
    pub fn new(parsing: &'a ParsingConfig, application: &'a ApplicationConfig) -> Self {
        Self {
            parsing,
            application,
        }
    }

    /// Run every check in §4.9; each failure is an error, each soft issue a
    /// warning. `expected_hashes` optionally pins the file-content hash the
    /// context was extracted against, for conflict detection against a
    /// workspace that has since changed underneath the defect.
    pub fn validate(
        &self,
        result: &DefectAnalysisResult,
        expected_hashes: &[(std::path::PathBuf, String)],
    ) -> PatchValidationResult {
        let mut out = PatchValidationResult::ok();
        let recommended = result.recommended_fix();

        self.check_files_exist_and_writable(recommended, &mut out);
        self.check_line_ranges(recommended, &mut out);
        self.check_confidence(recommended, &mut out);
        self.check_size_limits(recommended, &mut out);
        self.check_conflicts(recommended, expected_hashes, &mut out);

        out
    }

    fn check_files_exist_and_writable(&self, fix: &FixCandidate, out: &mut PatchValidationResult) {
        for file in &fix.affected_files {
            match std::fs::symlink_metadata(file) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    out.push_error(format!("target file is a symlink: {}", file.display()));
                }
                Ok(meta) if !meta.is_file() => {
                    out.push_error(format!("target is not a regular file: {}", file.display()));
                }
                Ok(meta) => {
                    if meta.permissions().readonly() {
                        out.push_warning(format!(
                            "target file is read-only and will need VCS checkout: {}",
                            file.display()
                        ));
                    }
                }
                Err(_) => {
                    out.push_error(format!("target file does not exist: {}", file.display()));
                }
            }
        }
    }

    fn check_line_ranges(&self, fix: &FixCandidate, out: &mut PatchValidationResult) {
        if fix.line_ranges.is_empty() {
            return;
        }
        if fix.line_ranges.len() > self.application.max_ranges_per_file {
            out.push_error(format!(
                "{} line ranges exceeds max_ranges_per_file ({})",
                fix.line_ranges.len(),
                self.application.max_ranges_per_file
            ));
        }
        let Ok(current_lines) = std::fs::read_to_string(&fix.file_path).map(|s| s.lines().count()) else {
            return;
        };
        for range in &fix.line_ranges {
            if !range.is_valid() {
                out.push_error(format!("invalid line range {}..{}", range.start, range.end));
                continue;
            }
            if range.end > current_lines {
                out.push_error(format!(
                    "line range {}..{} exceeds current file length {} for {}",
                    range.start,
                    range.end,
                    current_lines,
                    fix.file_path.display()
                ));
            }
        }
        let mut sorted = fix.line_ranges.clone();
        sorted.sort_by_key(|r| r.start);
        for pair in sorted.windows(2) {
            if pair[0].end >= pair[1].start {
                out.push_error("line ranges overlap".to_string());
                break;
            }
        }
    }

    fn check_confidence(&self, fix: &FixCandidate, out: &mut PatchValidationResult) {
        if fix.confidence_score < self.parsing.min_confidence_for_auto_apply {
            out.push_error(format!(
                "recommended fix confidence {:.2} below min_confidence_for_auto_apply {:.2}",
                fix.confidence_score, self.parsing.min_confidence_for_auto_apply
            ));
        }
    }

    fn check_size_limits(&self, fix: &FixCandidate, out: &mut PatchValidationResult) {
        let changed_lines: usize = fix.line_ranges.iter().map(|r| r.len()).sum::<usize>().max(fix.fixed_code.lines().count());
        if changed_lines > self.parsing.max_lines_per_fix {
            out.push_error(format!(
                "changed line count {} exceeds max_lines_per_fix {}",
                changed_lines, self.parsing.max_lines_per_fix
            ));
        }
        if fix.affected_files.len() > self.parsing.max_files_per_fix {
            out.push_error(format!(
                "{} affected files exceeds max_files_per_fix {}",
                fix.affected_files.len(),
                self.parsing.max_files_per_fix
            ));
        }
    }

    /// Conflict detection: the file's current hash must match the hash
    /// recorded against the context the fix was generated from, OR (a
    /// cheaper fallback when no hash was recorded) the fix's
    /// `original_code` substring must still be present verbatim.
    fn check_conflicts(
        &self,
        fix: &FixCandidate,
        expected_hashes: &[(std::path::PathBuf, String)],
        out: &mut PatchValidationResult,
    ) {
        if let Some((_, expected)) = expected_hashes.iter().find(|(p, _)| p == &fix.file_path) {
            if let Ok(actual) = hash_file(&fix.file_path) {
                if &actual != expected {
                    out.push_warning(format!(
                        "file content changed since context extraction: {}",
                        fix.file_path.display()
                    ));
                }
            }
            return;
        }

        if fix.original_code.is_empty() {
            return;
        }
        if let Ok(current) = std::fs::read_to_string(&fix.file_path) {
            if !current.contains(fix.original_code.trim()) {
                out.push_warning(format!(
                    "original_code substring not found verbatim in {}; keyword mode may fail",
                    fix.file_path.display()
                ));
            }
        }
    }
}

pub fn is_writable_regular_file(path: &Path) -> bool {
    match std::fs::symlink_metadata(path) {
        Ok(meta) => meta.is_file() && !meta.file_type().is_symlink(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Complexity, DefectAnalysisResult, DefectCategoryLabel, FixCandidate, LineRange, NimMetadata, Risk,
        Severity,
    };
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn sample_result(file_path: PathBuf, confidence: f64, ranges: Vec<LineRange>) -> DefectAnalysisResult {
        let mut affected_files = BTreeSet::new();
        affected_files.insert(file_path.clone());
        let candidate = FixCandidate {
            fix_id: 0,
            file_path,
            original_code: "old".to_string(),
            fixed_code: "new".to_string(),
            explanation: "explained".to_string(),
            confidence_score: confidence,
            complexity: Complexity::Simple,
            estimated_risk: Risk::Low,
            line_ranges: ranges,
            affected_files,
        };
        DefectAnalysisResult {
            defect_id: "d1".to_string(),
            defect_category: DefectCategoryLabel::MemoryManagement,
            severity: Severity::Medium,
            confidence_level: confidence,
            fix_candidates: vec![candidate],
            recommended_fix_index: 0,
            style_analysis: None,
            nim_metadata: NimMetadata {
                model_used: "m".to_string(),
                provider_used: "nvidia_nim".to_string(),
                input_tokens: 1,
                output_tokens: 1,
                total_tokens: 2,
                generation_time_seconds: 0.1,
                estimated_cost: None,
                request_id: "r".to_string(),
            },
            is_ready_for_application: true,
        }
    }

    #[test]
    fn test_validate_passes_for_healthy_fix() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("foo.c");
        std::fs::write(&file_path, "a\nb\nc\n").unwrap();
        let result = sample_result(file_path, 0.9, vec![LineRange { start: 1, end: 2 }]);

        let parsing = ParsingConfig::default();
        let application = ApplicationConfig::default();
        let validator = PatchValidator::new(&parsing, &application);
        let validation = validator.validate(&result, &[]);
        assert!(validation.is_valid, "errors: {:?}", validation.errors);
    }

    #[test]
    fn test_validate_rejects_missing_file() {
        let result = sample_result(PathBuf::from("/nonexistent/foo.c"), 0.9, vec![]);
        let parsing = ParsingConfig::default();
        let application = ApplicationConfig::default();
        let validator = PatchValidator::new(&parsing, &application);
        let validation = validator.validate(&result, &[]);
        assert!(!validation.is_valid);
    }

    #[test]
    fn test_validate_rejects_low_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("foo.c");
        std::fs::write(&file_path, "a\nb\nc\n").unwrap();
        let result = sample_result(file_path, 0.1, vec![]);

        let parsing = ParsingConfig::default();
        let application = ApplicationConfig::default();
        let validator = PatchValidator::new(&parsing, &application);
        let validation = validator.validate(&result, &[]);
        assert!(!validation.is_valid);
    }

    #[test]
    fn test_validate_rejects_out_of_bounds_range() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("foo.c");
        std::fs::write(&file_path, "a\nb\nc\n").unwrap();
        let result = sample_result(file_path, 0.9, vec![LineRange { start: 1, end: 100 }]);

        let parsing = ParsingConfig::default();
        let application = ApplicationConfig::default();
        let validator = PatchValidator::new(&parsing, &application);
        let validation = validator.validate(&result, &[]);
        assert!(!validation.is_valid);
    }

    #[test]
    fn test_validate_rejects_overlapping_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("foo.c");
        std::fs::write(&file_path, "a\nb\nc\nd\ne\n").unwrap();
        let result = sample_result(
            file_path,
            0.9,
            vec![LineRange { start: 1, end: 3 }, LineRange { start: 2, end: 4 }],
        );

        let parsing = ParsingConfig::default();
        let application = ApplicationConfig::default();
        let validator = PatchValidator::new(&parsing, &application);
        let validation = validator.validate(&result, &[]);
        assert!(!validation.is_valid);
    }
}
