//! `FixCandidate`, `DefectAnalysisResult`, `StyleAnalysisResult`, `NIMMetadata`
//! — the LLM-orchestration layer's hand-off objects.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
    Experimental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Risk {
    Low,
    Medium,
    High,
}

/// 1-based, inclusive line range within a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn is_valid(&self) -> bool {
        self.start >= 1 && self.start <= self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }
}

/// One candidate fix for a defect, as proposed by the model and parsed by
/// `StructuredOutputParser`. Late-validated: `line_ranges` bounds against the
/// live file are checked at application time, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixCandidate {
    pub fix_id: usize,
    pub file_path: PathBuf,
    pub original_code: String,
    pub fixed_code: String,
    pub explanation: String,
    pub confidence_score: f64,
    pub complexity: Complexity,
    pub estimated_risk: Risk,
    pub line_ranges: Vec<LineRange>,
    pub affected_files: BTreeSet<PathBuf>,
}

impl FixCandidate {
    /// Basic structural invariants independent of any live file: non-empty
    /// fixed code, well-formed ranges, `affected_files` is a superset of
    /// `{file_path}`.
    pub fn is_structurally_valid(&self) -> bool {
        if self.fixed_code.is_empty() {
            return false;
        }
        if !self.line_ranges.iter().all(LineRange::is_valid) {
            return false;
        }
        self.affected_files.contains(&self.file_path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndentationType {
    Tabs,
    Spaces,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BraceStyle {
    KAndR,
    Allman,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingConvention {
    CamelCase,
    SnakeCase,
    PascalCase,
    Mixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedStyle {
    pub indentation_type: IndentationType,
    pub indentation_width: usize,
    pub brace_style: BraceStyle,
    pub naming_convention: NamingConvention,
    pub line_length_pref: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleAnalysisResult {
    pub detected_style: DetectedStyle,
    pub consistency_score: f64,
    pub violations: Vec<String>,
    pub recommendations: Vec<String>,
    pub language_detected: crate::model::context::Language,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NimMetadata {
    pub model_used: String,
    pub provider_used: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub generation_time_seconds: f64,
    pub estimated_cost: Option<f64>,
    pub request_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectCategoryLabel {
    NullPointer,
    MemoryManagement,
    BufferOverflow,
    Uninitialized,
    DeadCode,
    Generic,
}

/// The fully analyzed outcome for one defect: every candidate the model
/// produced, plus which one is recommended and whether it is safe to apply
/// without human review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefectAnalysisResult {
    pub defect_id: String,
    pub defect_category: DefectCategoryLabel,
    pub severity: crate::model::defect::Severity,
    pub confidence_level: f64,
    pub fix_candidates: Vec<FixCandidate>,
    /// Index into `fix_candidates`. Modeled as an index rather than a
    /// back-pointer or `Rc` to avoid an ownership cycle with `FixCandidate`.
    pub recommended_fix_index: usize,
    pub style_analysis: Option<StyleAnalysisResult>,
    pub nim_metadata: NimMetadata,
    pub is_ready_for_application: bool,
}

impl DefectAnalysisResult {
    pub fn recommended_fix(&self) -> &FixCandidate {
        &self.fix_candidates[self.recommended_fix_index]
    }

    /// Recompute `is_ready_for_application` from the current recommended fix,
    /// style score, and safety checks. Callers construct with this derived
    /// rather than setting the field directly, so the invariant can't drift.
    pub fn derive_ready_for_application(
        recommended: &FixCandidate,
        style: Option<&StyleAnalysisResult>,
        min_confidence_for_auto_apply: f64,
        min_style_score_for_auto_apply: f64,
        passes_safety_checks: bool,
    ) -> bool {
        if recommended.confidence_score < min_confidence_for_auto_apply {
            return false;
        }
        if let Some(style) = style {
            if style.consistency_score < min_style_score_for_auto_apply {
                return false;
            }
        }
        passes_safety_checks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::context::Language;
    use crate::model::defect::Severity;

    fn sample_candidate(confidence: f64) -> FixCandidate {
        let path = PathBuf::from("/src/foo.c");
        FixCandidate {
            fix_id: 0,
            file_path: path.clone(),
            original_code: "old".to_string(),
            fixed_code: "new".to_string(),
            explanation: "fixed it".to_string(),
            confidence_score: confidence,
            complexity: Complexity::Simple,
            estimated_risk: Risk::Low,
            line_ranges: vec![LineRange { start: 10, end: 12 }],
            affected_files: [path].into_iter().collect(),
        }
    }

    #[test]
    fn test_fix_candidate_structurally_valid() {
        let candidate = sample_candidate(0.9);
        assert!(candidate.is_structurally_valid());
    }

    #[test]
    fn test_fix_candidate_rejects_empty_fixed_code() {
        let mut candidate = sample_candidate(0.9);
        candidate.fixed_code.clear();
        assert!(!candidate.is_structurally_valid());
    }

    #[test]
    fn test_fix_candidate_rejects_inverted_range() {
        let mut candidate = sample_candidate(0.9);
        candidate.line_ranges = vec![LineRange { start: 20, end: 10 }];
        assert!(!candidate.is_structurally_valid());
    }

    #[test]
    fn test_recommended_fix_accessor() {
        let result = DefectAnalysisResult {
            defect_id: "abc".to_string(),
            defect_category: DefectCategoryLabel::MemoryManagement,
            severity: Severity::High,
            confidence_level: 0.9,
            fix_candidates: vec![sample_candidate(0.5), sample_candidate(0.9)],
            recommended_fix_index: 1,
            style_analysis: None,
            nim_metadata: NimMetadata {
                model_used: "m".to_string(),
                provider_used: "nvidia_nim".to_string(),
                input_tokens: 10,
                output_tokens: 20,
                total_tokens: 30,
                generation_time_seconds: 1.0,
                estimated_cost: None,
                request_id: "r1".to_string(),
            },
            is_ready_for_application: true,
        };
        assert_eq!(result.recommended_fix().confidence_score, 0.9);
    }

    #[test]
    fn test_derive_ready_for_application_respects_confidence_floor() {
        let candidate = sample_candidate(0.5);
        let ready = DefectAnalysisResult::derive_ready_for_application(&candidate, None, 0.8, 0.7, true);
        assert!(!ready);
    }

    #[test]
    fn test_derive_ready_for_application_all_gates_pass() {
        let candidate = sample_candidate(0.9);
        let style = StyleAnalysisResult {
            detected_style: DetectedStyle {
                indentation_type: IndentationType::Spaces,
                indentation_width: 4,
                brace_style: BraceStyle::KAndR,
                naming_convention: NamingConvention::SnakeCase,
                line_length_pref: 100,
            },
            consistency_score: 0.9,
            violations: vec![],
            recommendations: vec![],
            language_detected: Language::C,
        };
        let ready = DefectAnalysisResult::derive_ready_for_application(
            &candidate,
            Some(&style),
            0.8,
            0.7,
            true,
        );
        assert!(ready);
    }
}
