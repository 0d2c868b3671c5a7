//! `PatchApplier` — the orchestrator that turns a `DefectAnalysisResult`
//! into on-disk edits: validate -> workspace check -> backup -> checkout ->
//! surgical apply -> post-apply checks -> changelist prep -> cleanup, with
//! automatic rollback of every completed phase on failure.

use crate::backup::{hash_file, BackupManager};
use crate::config::{ApplicationConfig, ParsingConfig};
use crate::error::{ApplyError, RollbackError};
use crate::model::{
    AppliedChange, ApplyMode, DefectAnalysisResult, FixCandidate, LineRange, OverallStatus,
    ParsedDefect, PatchApplicationResult,
};
use crate::validate::PatchValidator;
use crate::vcs::{format_changelist_description, VcsManager, WorkspaceStatus};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineEnding {
    Lf,
    CrLf,
}

fn split_preserving(text: &str) -> (Vec<String>, LineEnding, bool) {
    let ending = if text.contains("\r\n") { LineEnding::CrLf } else { LineEnding::Lf };
    let trailing_newline = text.ends_with('\n');
    let lines = text.lines().map(|l| l.to_string()).collect();
    (lines, ending, trailing_newline)
}

fn join_preserving(lines: &[String], ending: LineEnding, trailing_newline: bool) -> String {
    let sep = match ending {
        LineEnding::Lf => "\n",
        LineEnding::CrLf => "\r\n",
    };
    let mut out = lines.join(sep);
    if trailing_newline && !lines.is_empty() {
        out.push_str(sep);
    }
    out
}

/// Split `fix_lines` across `ranges` per the distribution rules: 1:1 when
/// counts match, front-loaded `ceil..floor` contiguous chunks when there are
/// more fix lines than ranges, and "first F ranges only" (rest unchanged)
/// when there are fewer.
fn distribute(fix_lines: &[String], ranges: &[LineRange]) -> Vec<Option<Vec<String>>> {
    let r = ranges.len();
    let f = fix_lines.len();
    if r == 0 {
        return Vec::new();
    }
    if f >= r {
        let base = f / r;
        let rem = f % r;
        let mut out = Vec::with_capacity(r);
        let mut idx = 0;
        for i in 0..r {
            let size = if i < rem { base + 1 } else { base };
            out.push(Some(fix_lines[idx..idx + size].to_vec()));
            idx += size;
        }
        out
    } else {
        (0..r)
            .map(|i| if i < f { Some(vec![fix_lines[i].clone()]) } else { None })
            .collect()
    }
}

/// Whether the lines a [`LineRange`] set would replace already read as the
/// chunks the fix would assign them — i.e. this fix was already applied.
/// Ranges with no assigned chunk (the `F < R` case) are ignored, matching
/// `apply_line_range`'s "leave unchanged" behavior for them.
///
/// A range's original `end` only bounds the chunk it replaces when `F == R`;
/// whenever a fix grows or shrinks the file, the chunk's true length is
/// `chunk_lines.len()`, and an earlier (lower-start) range's own growth
/// shifts every later range's resting position in an already-applied file.
/// This walks ranges in ascending start order, anchoring each comparison at
/// `range.start` adjusted by the cumulative shift from ranges already
/// checked, so both the single-range and multi-range (B3) cases are detected
/// whether or not the file has already grown.
fn line_range_already_applied(current: &str, ranges: &[LineRange], fixed_code: &str) -> bool {
    let (lines, _, _) = split_preserving(current);
    let fixed_lines: Vec<String> = fixed_code.lines().map(|s| s.to_string()).collect();
    let assignment = distribute(&fixed_lines, ranges);
    let mut pairs: Vec<(&LineRange, &Option<Vec<String>>)> = ranges.iter().zip(assignment.iter()).collect();
    pairs.sort_by_key(|(r, _)| r.start);

    let mut shift: i64 = 0;
    for (r, chunk) in pairs {
        let chunk_lines = match chunk {
            Some(chunk_lines) => chunk_lines,
            None => continue,
        };
        let effective_start = r.start as i64 + shift;
        if effective_start < 1 {
            return false;
        }
        let effective_start = effective_start as usize;
        let effective_end = effective_start + chunk_lines.len() - 1;
        if effective_end > lines.len() {
            return false;
        }
        if &lines[(effective_start - 1)..effective_end] != chunk_lines.as_slice() {
            return false;
        }
        let original_len = (r.end - r.start + 1) as i64;
        shift += chunk_lines.len() as i64 - original_len;
    }
    true
}

/// Whether a keyword-mode fix's target block already reads as `fixed_code`.
fn keyword_already_applied(current: &str, defect_line: usize, keyword_block_size: usize, fixed_code: &str) -> bool {
    let total_lines = current.lines().count();
    match keyword_block_range(defect_line, keyword_block_size, total_lines) {
        Some((start, end)) => line_range_already_applied(current, &[LineRange { start, end }], fixed_code),
        None => false,
    }
}

struct ApplyOutcome {
    new_content: String,
    ranges_applied: Vec<(usize, usize)>,
    warnings: Vec<String>,
}

/// Mode A: replace `line_ranges` in-place. Single range is a direct splice;
/// multiple ranges are processed highest-start-first so indices stay stable
/// as earlier splices shift later line numbers.
fn apply_line_range(current: &str, ranges: &[LineRange], fixed_code: &str) -> Result<ApplyOutcome, ApplyError> {
    let (mut lines, ending, trailing_nl) = split_preserving(current);
    let fixed_lines: Vec<String> = fixed_code.lines().map(|s| s.to_string()).collect();
    let mut warnings = Vec::new();
    let mut ranges_applied = Vec::new();

    if ranges.len() == 1 {
        let r = ranges[0];
        if r.end > lines.len() {
            return Err(ApplyError::WriteFailed {
                path: PathBuf::new(),
                reason: format!("range {}..{} exceeds file length {}", r.start, r.end, lines.len()),
            });
        }
        lines.splice((r.start - 1)..r.end, fixed_lines);
        ranges_applied.push((r.start, r.end));
    } else {
        let assignment = distribute(&fixed_lines, ranges);
        let mut indexed: Vec<(&LineRange, &Option<Vec<String>>)> = ranges.iter().zip(assignment.iter()).collect();
        indexed.sort_by(|a, b| b.0.start.cmp(&a.0.start));

        for (r, chunk) in indexed {
            match chunk {
                Some(chunk_lines) => {
                    if r.end > lines.len() {
                        return Err(ApplyError::WriteFailed {
                            path: PathBuf::new(),
                            reason: format!("range {}..{} exceeds file length {}", r.start, r.end, lines.len()),
                        });
                    }
                    lines.splice((r.start - 1)..r.end, chunk_lines.clone());
                    ranges_applied.push((r.start, r.end));
                }
                None => {
                    warnings.push(format!(
                        "range {}..{} left unchanged: fewer fix lines than ranges",
                        r.start, r.end
                    ));
                }
            }
        }
        ranges_applied.sort();
    }

    Ok(ApplyOutcome {
        new_content: join_preserving(&lines, ending, trailing_nl),
        ranges_applied,
        warnings,
    })
}

/// Clamp a `keyword_block_size`-line block symmetrically around
/// `defect_line`, shrinking at the file boundary (B4). Returns `None` when
/// the clamped block would be empty.
fn keyword_block_range(defect_line: usize, keyword_block_size: usize, total_lines: usize) -> Option<(usize, usize)> {
    if keyword_block_size == 0 || total_lines == 0 {
        return None;
    }
    let half_down = keyword_block_size / 2;
    let mut start = defect_line.saturating_sub(half_down).max(1);
    let mut end = start + keyword_block_size - 1;
    if end > total_lines {
        let overflow = end - total_lines;
        start = start.saturating_sub(overflow).max(1);
        end = total_lines;
    }
    if end < start {
        return None;
    }
    Some((start, end))
}

/// Mode B: bracket a block centered on the defect line with unique markers,
/// replace the delimited block with `fixed_code`, remove the markers in the
/// same write. Net effect on disk is a single-range replacement; the
/// markers exist only as the conceptual delimiter, never written out.
fn apply_keyword(
    current: &str,
    defect_id: &str,
    defect_line: usize,
    keyword_block_size: usize,
    max_block_size: usize,
    fixed_code: &str,
) -> Result<ApplyOutcome, ApplyError> {
    if keyword_block_size > max_block_size {
        return Err(ApplyError::KeywordBlockTooLarge {
            size: keyword_block_size,
            max: max_block_size,
        });
    }
    let total_lines = current.lines().count();
    let (start, end) = keyword_block_range(defect_line, keyword_block_size, total_lines).ok_or_else(|| {
        ApplyError::NoModeApplicable(PathBuf::new())
    })?;
    let _ = defect_id;
    apply_line_range(current, &[LineRange { start, end }], fixed_code)
}

fn apply_full_file(fixed_code: &str) -> ApplyOutcome {
    ApplyOutcome {
        new_content: fixed_code.to_string(),
        ranges_applied: Vec::new(),
        warnings: Vec::new(),
    }
}

/// Whether `original_code` (a possibly multi-line snippet) appears verbatim
/// in `current`, tolerating differences in leading whitespace per line.
fn original_code_present(current: &str, original_code: &str) -> bool {
    if original_code.trim().is_empty() {
        return false;
    }
    let normalize = |s: &str| -> String {
        s.lines().map(|l| l.trim_start()).collect::<Vec<_>>().join("\n")
    };
    normalize(current).contains(&normalize(original_code))
}

/// Minimal post-apply sanity check: braces balance (ignoring string/char
/// literal contents) and no stray Markdown fence survived into the file.
fn syntax_quick_check(text: &str) -> Result<(), String> {
    let mut depth = 0i64;
    let mut in_string = false;
    let mut in_char = false;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if in_string {
            if c == '\\' {
                chars.next();
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if in_char {
            if c == '\\' {
                chars.next();
            } else if c == '\'' {
                in_char = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '\'' => in_char = true,
            '{' => depth += 1,
            '}' => depth -= 1,
            _ => {}
        }
    }
    if depth != 0 {
        return Err(format!("unbalanced braces (depth {})", depth));
    }
    if text.contains("```") {
        return Err("stray Markdown code fence found in applied file".to_string());
    }
    Ok(())
}

pub struct PatchApplier<'a> {
    vcs: &'a VcsManager,
    backup: &'a BackupManager,
    parsing: &'a ParsingConfig,
    application: &'a ApplicationConfig,
}

impl<'a> PatchApplier<'a> {
    pub fn new(
        vcs: &'a VcsManager,
        backup: &'a BackupManager,
        parsing: &'a ParsingConfig,
        application: &'a ApplicationConfig,
    ) -> Self {
        Self {
            vcs,
            backup,
            parsing,
            application,
        }
    }

    fn choose_mode(&self, fix: &FixCandidate, current_text: &str) -> Option<ApplyMode> {
        if self.application.prefer_line_range_replacement && !fix.line_ranges.is_empty() {
            return Some(ApplyMode::LineRange);
        }
        if self.application.enable_keyword_replacement
            && fix.line_ranges.is_empty()
            && original_code_present(current_text, &fix.original_code)
        {
            return Some(ApplyMode::Keyword);
        }
        if self.application.allow_full_file_replacement {
            return Some(ApplyMode::FullFile);
        }
        None
    }

    fn compute_outcome(
        &self,
        fix: &FixCandidate,
        defect_line: usize,
        current_text: &str,
        mode: ApplyMode,
    ) -> Result<ApplyOutcome, ApplyError> {
        match mode {
            ApplyMode::LineRange => apply_line_range(current_text, &fix.line_ranges, &fix.fixed_code),
            ApplyMode::Keyword => apply_keyword(
                current_text,
                &fix.file_path.to_string_lossy(),
                defect_line,
                self.application.keyword_block_size,
                self.application.max_block_size_for_keywords,
                &fix.fixed_code,
            ),
            ApplyMode::FullFile => Ok(apply_full_file(&fix.fixed_code)),
        }
    }

    /// Run the full phase sequence for `result`'s recommended fix against
    /// `defect`'s target file. `expected_hashes` carries the content hash
    /// the context was extracted against, for the validator's conflict
    /// check.
    pub fn apply(
        &self,
        defect: &ParsedDefect,
        result: &DefectAnalysisResult,
        patch_id: &str,
        expected_hashes: &[(PathBuf, String)],
    ) -> PatchApplicationResult {
        let started = Instant::now();
        let fix = result.recommended_fix();

        // Phase 1: validate.
        let validator = PatchValidator::new(self.parsing, self.application);
        let validation = validator.validate(result, expected_hashes);
        if !validation.is_valid {
            return PatchApplicationResult::failed(patch_id, validation, started.elapsed().as_secs_f64());
        }

        let current_text = match std::fs::read_to_string(&fix.file_path) {
            Ok(text) => text,
            Err(e) => {
                let mut validation = validation;
                validation.push_error(format!("could not read {}: {}", fix.file_path.display(), e));
                return PatchApplicationResult::failed(patch_id, validation, started.elapsed().as_secs_f64());
            }
        };

        let mode = match self.choose_mode(fix, &current_text) {
            Some(m) => m,
            None => {
                let mut validation = validation;
                validation.push_error(format!("no application mode precondition satisfied for {}", fix.file_path.display()));
                return PatchApplicationResult::failed(patch_id, validation, started.elapsed().as_secs_f64());
            }
        };

        // Idempotence check (R2/R5): ask whether the fix's target location
        // already reads as `fixed_code` *before* computing a fresh splice.
        // Re-deriving the splice against `current_text` and comparing to the
        // result (as opposed to checking the pre-splice location) is wrong
        // whenever the fix changes line count: on a second call `current_text`
        // already reflects the first application, so re-splicing the same
        // ranges against it duplicates the inserted lines instead of
        // recognizing them as already present.
        let already_applied = match mode {
            ApplyMode::LineRange => line_range_already_applied(&current_text, &fix.line_ranges, &fix.fixed_code),
            ApplyMode::Keyword => {
                keyword_already_applied(&current_text, defect.line_number, self.application.keyword_block_size, &fix.fixed_code)
            }
            ApplyMode::FullFile => current_text == fix.fixed_code,
        };
        if already_applied {
            return PatchApplicationResult {
                patch_id: patch_id.to_string(),
                overall_status: OverallStatus::Success,
                applied_changes: Vec::new(),
                validation,
                backup_manifest_ref: None,
                changelist_id: None,
                processing_time_seconds: started.elapsed().as_secs_f64(),
                error_log: Vec::new(),
            };
        }

        let outcome = match self.compute_outcome(fix, defect.line_number, &current_text, mode) {
            Ok(outcome) => outcome,
            Err(e) => {
                let mut validation = validation;
                validation.push_error(e.to_string());
                return PatchApplicationResult::failed(patch_id, validation, started.elapsed().as_secs_f64());
            }
        };

        if self.application.dry_run {
            let applied = AppliedChange {
                file_path: fix.file_path.clone(),
                mode,
                ranges_applied: outcome.ranges_applied.clone(),
                vcs_operations: vec!["(dry run) would checkout for edit".to_string()],
                backup_ref: None,
            };
            let mut validation = validation;
            for w in &outcome.warnings {
                validation.push_warning(w.clone());
            }
            return PatchApplicationResult {
                patch_id: patch_id.to_string(),
                overall_status: OverallStatus::DryRunSuccess,
                applied_changes: vec![applied],
                validation,
                backup_manifest_ref: None,
                changelist_id: None,
                processing_time_seconds: started.elapsed().as_secs_f64(),
                error_log: Vec::new(),
            };
        }

        // Phase 2: workspace check.
        match self.vcs.workspace_status(&fix.file_path) {
            Ok(WorkspaceStatus::CheckedOutByOther) if self.application.require_clean_workspace => {
                let mut validation = validation;
                validation.push_error(format!(
                    "workspace has conflicting pending edits for {}",
                    fix.file_path.display()
                ));
                return PatchApplicationResult::failed(patch_id, validation, started.elapsed().as_secs_f64());
            }
            Err(e) => {
                let mut validation = validation;
                validation.push_error(e.to_string());
                return PatchApplicationResult::failed(patch_id, validation, started.elapsed().as_secs_f64());
            }
            _ => {}
        }

        // Phase 3: backup.
        let manifest = match self.backup.create_backup(patch_id, &[fix.file_path.clone()]) {
            Ok(manifest) => manifest,
            Err(e) => {
                let mut validation = validation;
                validation.push_error(e.to_string());
                return PatchApplicationResult::failed(patch_id, validation, started.elapsed().as_secs_f64());
            }
        };

        // Phase 4: checkout.
        if let Err(e) = self.vcs.edit(&fix.file_path) {
            return self.fail_with_rollback(patch_id, &manifest, &[], &validation, e.to_string(), started);
        }
        let checked_out = vec![fix.file_path.clone()];

        // Phase 5: surgical write.
        if let Err(e) = std::fs::write(&fix.file_path, &outcome.new_content) {
            let reason = ApplyError::WriteFailed {
                path: fix.file_path.clone(),
                reason: e.to_string(),
            };
            return self.fail_with_rollback(patch_id, &manifest, &checked_out, &validation, reason.to_string(), started);
        }

        // Phase 6: post-apply checks.
        let written = match std::fs::read_to_string(&fix.file_path) {
            Ok(text) => text,
            Err(e) => {
                return self.fail_with_rollback(
                    patch_id,
                    &manifest,
                    &checked_out,
                    &validation,
                    format!("could not re-read applied file: {}", e),
                    started,
                );
            }
        };
        if written != outcome.new_content {
            return self.fail_with_rollback(
                patch_id,
                &manifest,
                &checked_out,
                &validation,
                "post-apply read-back did not match the intended write".to_string(),
                started,
            );
        }
        if let Err(reason) = syntax_quick_check(&written) {
            return self.fail_with_rollback(patch_id, &manifest, &checked_out, &validation, reason, started);
        }
        if mode != ApplyMode::FullFile && !written.contains(fix.fixed_code.trim()) && !fix.fixed_code.trim().is_empty()
        {
            return self.fail_with_rollback(
                patch_id,
                &manifest,
                &checked_out,
                &validation,
                "applied file does not contain the fixed code".to_string(),
                started,
            );
        }

        // Phase 7: changelist prep (never submitted).
        let description = format_changelist_description(
            &[(
                defect.defect_type.clone(),
                fix.file_path.clone(),
                defect.line_number,
                fix.explanation.clone(),
            )],
            result.fix_candidates.len(),
            fix.confidence_score,
            patch_id,
        );
        let changelist_id = self.vcs.create_changelist(&description, &[fix.file_path.clone()]).ok();

        // Phase 8: cleanup.
        if !self.application.keep_backups_on_success {
            let _ = self.backup.cleanup(patch_id);
        }

        let mut validation = validation;
        for w in &outcome.warnings {
            validation.push_warning(w.clone());
        }

        PatchApplicationResult {
            patch_id: patch_id.to_string(),
            overall_status: OverallStatus::Success,
            applied_changes: vec![AppliedChange {
                file_path: fix.file_path.clone(),
                mode,
                ranges_applied: outcome.ranges_applied,
                vcs_operations: vec!["edit".to_string()],
                backup_ref: manifest.entry_for(&fix.file_path).map(|e| e.sha256.clone()),
            }],
            validation,
            backup_manifest_ref: Some(manifest.patch_id.clone()),
            changelist_id,
            processing_time_seconds: started.elapsed().as_secs_f64(),
            error_log: Vec::new(),
        }
    }

    /// Roll back every completed phase (VCS revert then backup restore, in
    /// reverse order) and build the resulting `failed`/`rolled_back` result.
    /// `RollbackError` is never swallowed: it is recorded at the highest
    /// severity in `error_log` and the result stays `failed` so the backup
    /// reference is preserved for manual recovery.
    fn fail_with_rollback(
        &self,
        patch_id: &str,
        manifest: &crate::model::BackupManifest,
        checked_out: &[PathBuf],
        validation: &crate::model::PatchValidationResult,
        primary_error: String,
        started: Instant,
    ) -> PatchApplicationResult {
        let mut error_log = vec![primary_error];
        let mut rollback_failed = false;

        for file in checked_out.iter().rev() {
            if let Err(e) = self.vcs.revert(file) {
                rollback_failed = true;
                error_log.push(
                    RollbackError::RevertFailed {
                        path: file.clone(),
                        reason: e.to_string(),
                    }
                    .to_string(),
                );
            }
        }

        if let Err(e) = self.backup.restore(manifest) {
            rollback_failed = true;
            error_log.push(
                RollbackError::RestoreFailed {
                    path: manifest.entries.first().map(|e| e.original_path.clone()).unwrap_or_default(),
                    reason: e.to_string(),
                }
                .to_string(),
            );
        }

        let mut validation = validation.clone();
        for e in &error_log {
            validation.push_error(e.clone());
        }

        PatchApplicationResult {
            patch_id: patch_id.to_string(),
            overall_status: if rollback_failed {
                OverallStatus::Failed
            } else {
                OverallStatus::RolledBack
            },
            applied_changes: Vec::new(),
            validation,
            backup_manifest_ref: Some(manifest.patch_id.clone()),
            changelist_id: None,
            processing_time_seconds: started.elapsed().as_secs_f64(),
            error_log,
        }
    }
}

pub fn current_hash(path: &Path) -> Option<String> {
    hash_file(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Complexity, DefectAnalysisResult, DefectCategoryLabel, FixCandidate, NimMetadata, Risk, Severity};
    use chrono::Utc;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn sample_defect(file_path: PathBuf, line: usize) -> ParsedDefect {
        ParsedDefect {
            defect_id: "d1".to_string(),
            defect_type: "RESOURCE_LEAK".to_string(),
            file_path,
            line_number: line,
            function_name: "_createCommand".to_string(),
            events: vec!["alloc".to_string(), "leak".to_string()],
            subcategory: "leak".to_string(),
            confidence_score: 1.0,
            parsing_timestamp: Utc::now(),
            raw_data: serde_json::json!({}),
            classification_hints: crate::model::ClassificationHints {
                likely_categories: vec![crate::model::DefectCategory::MemoryManagement],
                severity_indicators: crate::model::Severity::Medium,
                complexity_hints: vec![],
                context_flags: vec![],
            },
        }
    }

    fn sample_result(file_path: PathBuf, ranges: Vec<LineRange>, fixed_code: &str, original_code: &str) -> DefectAnalysisResult {
        let mut affected_files = BTreeSet::new();
        affected_files.insert(file_path.clone());
        let candidate = FixCandidate {
            fix_id: 0,
            file_path,
            original_code: original_code.to_string(),
            fixed_code: fixed_code.to_string(),
            explanation: "freed the leaked handle".to_string(),
            confidence_score: 0.9,
            complexity: Complexity::Simple,
            estimated_risk: Risk::Low,
            line_ranges: ranges,
            affected_files,
        };
        DefectAnalysisResult {
            defect_id: "d1".to_string(),
            defect_category: DefectCategoryLabel::MemoryManagement,
            severity: Severity::Medium,
            confidence_level: 0.9,
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

    fn harness() -> (tempfile::TempDir, tempfile::TempDir, ParsingConfig, ApplicationConfig, VcsManager, BackupManager) {
        let source_dir = tempfile::tempdir().unwrap();
        let backup_dir = tempfile::tempdir().unwrap();
        let parsing = ParsingConfig::default();
        let application = ApplicationConfig::default();
        let vcs = VcsManager::new(false, true, Duration::from_secs(5));
        let backup = BackupManager::new(backup_dir.path().to_path_buf());
        (source_dir, backup_dir, parsing, application, vcs, backup)
    }

    #[test]
    fn test_line_range_single_range_apply_success() {
        let (source_dir, _backup_dir, parsing, application, vcs, backup) = harness();
        let file_path = source_dir.path().join("a.cc");
        std::fs::write(
            &file_path,
            "void TnStilDataCollection::_createCommand() {\n    Stmt* s = new Stmt();\n    useOnce(s);\n    return;\n}\n",
        )
        .unwrap();

        let defect = sample_defect(file_path.clone(), 412);
        let result = sample_result(
            file_path.clone(),
            vec![LineRange { start: 2, end: 3 }],
            "    Stmt* s = new Stmt();\n    useOnce(s);\n    delete s;",
            "",
        );

        let applier = PatchApplier::new(&vcs, &backup, &parsing, &application);
        let outcome = applier.apply(&defect, &result, "patch-1", &[]);

        assert_eq!(outcome.overall_status, OverallStatus::Success);
        assert_eq!(outcome.applied_changes[0].ranges_applied, vec![(2, 3)]);

        let written = std::fs::read_to_string(&file_path).unwrap();
        assert!(written.contains("delete s;"));
        assert_eq!(written.lines().count(), 6);
    }

    #[test]
    fn test_keyword_mode_wraps_and_replaces_block() {
        let (source_dir, _backup_dir, parsing, application, vcs, backup) = harness();
        let file_path = source_dir.path().join("b.h");
        std::fs::write(&file_path, "Type* p = get();\nuse(p->x);\ncleanup(p);\n").unwrap();

        let defect = sample_defect(file_path.clone(), 2);
        let result = sample_result(
            file_path.clone(),
            vec![],
            "if (p == nullptr) { return; }\nuse(p->x);\ncleanup(p);",
            "use(p->x);",
        );

        let applier = PatchApplier::new(&vcs, &backup, &parsing, &application);
        let outcome = applier.apply(&defect, &result, "patch-2", &[]);

        assert_eq!(outcome.overall_status, OverallStatus::Success);
        let written = std::fs::read_to_string(&file_path).unwrap();
        assert!(written.contains("if (p == nullptr) { return; }"));
        assert!(written.contains("Type* p = get();"));
    }

    #[test]
    fn test_idempotent_reapply_is_noop() {
        let (source_dir, _backup_dir, parsing, application, vcs, backup) = harness();
        let file_path = source_dir.path().join("a.cc");
        std::fs::write(
            &file_path,
            "void f() {\n    Stmt* s = new Stmt();\n    useOnce(s);\n    return;\n}\n",
        )
        .unwrap();

        let defect = sample_defect(file_path.clone(), 412);
        let result = sample_result(
            file_path.clone(),
            vec![LineRange { start: 2, end: 3 }],
            "    Stmt* s = new Stmt();\n    useOnce(s);\n    delete s;",
            "",
        );

        let applier = PatchApplier::new(&vcs, &backup, &parsing, &application);
        let first = applier.apply(&defect, &result, "patch-3", &[]);
        assert_eq!(first.overall_status, OverallStatus::Success);

        let second = applier.apply(&defect, &result, "patch-3", &[]);
        assert_eq!(second.overall_status, OverallStatus::Success);
        assert!(second.applied_changes.is_empty());

        let written = std::fs::read_to_string(&file_path).unwrap();
        assert_eq!(written.matches("delete s;").count(), 1);
        assert_eq!(written.lines().count(), 6);
    }

    #[test]
    fn test_multi_range_reapply_after_growth_is_noop() {
        let (source_dir, _backup_dir, parsing, application, vcs, backup) = harness();
        let file_path = source_dir.path().join("a.c");
        std::fs::write(&file_path, "a\nb\nc\nd\ne\n").unwrap();

        let defect = sample_defect(file_path.clone(), 2);
        let result = sample_result(
            file_path.clone(),
            vec![LineRange { start: 2, end: 2 }, LineRange { start: 4, end: 4 }],
            "x1\nx2\nx3",
            "",
        );

        let applier = PatchApplier::new(&vcs, &backup, &parsing, &application);
        let first = applier.apply(&defect, &result, "patch-7", &[]);
        assert_eq!(first.overall_status, OverallStatus::Success);

        let second = applier.apply(&defect, &result, "patch-7", &[]);
        assert_eq!(second.overall_status, OverallStatus::Success);
        assert!(second.applied_changes.is_empty());

        let written = std::fs::read_to_string(&file_path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines, vec!["a", "x1", "x2", "c", "x3", "e"]);
    }

    #[test]
    fn test_rollback_on_post_apply_integrity_failure() {
        let (source_dir, _backup_dir, parsing, application, vcs, backup) = harness();
        let file_path = source_dir.path().join("a.cc");
        let original = "void f() {\n    int x = 1;\n    return x;\n}\n";
        std::fs::write(&file_path, original).unwrap();

        let defect = sample_defect(file_path.clone(), 2);
        // Deliberately unbalanced fixed code to trip the post-apply check.
        let result = sample_result(file_path.clone(), vec![LineRange { start: 2, end: 2 }], "    int x = 1; {", "");

        let applier = PatchApplier::new(&vcs, &backup, &parsing, &application);
        let outcome = applier.apply(&defect, &result, "patch-4", &[]);

        assert_eq!(outcome.overall_status, OverallStatus::RolledBack);
        let content = std::fs::read_to_string(&file_path).unwrap();
        assert_eq!(content, original);
    }

    #[test]
    fn test_dry_run_makes_no_disk_changes() {
        let (source_dir, _backup_dir, parsing, mut application, vcs, backup) = harness();
        application.dry_run = true;
        let file_path = source_dir.path().join("a.cc");
        let original = "void f() {\n    int x = 1;\n    return x;\n}\n";
        std::fs::write(&file_path, original).unwrap();

        let defect = sample_defect(file_path.clone(), 2);
        let result = sample_result(file_path.clone(), vec![LineRange { start: 2, end: 2 }], "    int x = 2;", "");

        let applier = PatchApplier::new(&vcs, &backup, &parsing, &application);
        let outcome = applier.apply(&defect, &result, "patch-5", &[]);

        assert_eq!(outcome.overall_status, OverallStatus::DryRunSuccess);
        assert_eq!(std::fs::read_to_string(&file_path).unwrap(), original);
    }

    #[test]
    fn test_multi_range_distribution_f_greater_than_r() {
        let (source_dir, _backup_dir, parsing, application, vcs, backup) = harness();
        let file_path = source_dir.path().join("a.c");
        std::fs::write(&file_path, "a\nb\nc\nd\ne\n").unwrap();

        let defect = sample_defect(file_path.clone(), 2);
        let result = sample_result(
            file_path.clone(),
            vec![LineRange { start: 2, end: 2 }, LineRange { start: 4, end: 4 }],
            "x1\nx2\nx3",
            "",
        );

        let applier = PatchApplier::new(&vcs, &backup, &parsing, &application);
        let outcome = applier.apply(&defect, &result, "patch-6", &[]);
        assert_eq!(outcome.overall_status, OverallStatus::Success);

        let written = std::fs::read_to_string(&file_path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines, vec!["a", "x1", "x2", "c", "x3", "e"]);
    }
}
