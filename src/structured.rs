//! `StructuredOutputParser` — converts a raw model response into a
//! `DefectAnalysisResult`, trying schema-validated parse, markdown-fence
//! extraction, model-assisted repair, then a regex/text fallback before
//! giving up and returning a manual-review sentinel.

use crate::error::ParseError;
use crate::model::{
    Complexity, DefectAnalysisResult, DefectCategoryLabel, FixCandidate, LineRange, NimMetadata, Risk,
    Severity,
};
use crate::provider::ChatProvider;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
struct RawFixCandidate {
    file_path: String,
    original_code: String,
    fixed_code: String,
    explanation: String,
    confidence_score: f64,
    complexity: String,
    estimated_risk: String,
    #[serde(default)]
    line_ranges: Vec<RawLineRange>,
}

#[derive(Debug, Deserialize)]
struct RawLineRange {
    start: usize,
    end: usize,
}

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    defect_category: String,
    severity: String,
    confidence: f64,
    fix_candidates: Vec<RawFixCandidate>,
    recommended_fix_index: usize,
}

pub struct StructuredOutputParser {
    repair_budget: u32,
}

impl StructuredOutputParser {
    pub fn new(repair_budget: u32) -> Self {
        Self { repair_budget }
    }

    /// Run the full recovery chain against `raw_response`. Never returns
    /// `Err` to the orchestrator for "could not parse" — only a sentinel
    /// result with `is_ready_for_application = false`; `Err` is reserved for
    /// provider failures encountered while attempting model-assisted repair.
    pub async fn parse(
        &self,
        defect_id: &str,
        raw_response: &str,
        confidence_threshold: f64,
        nim_metadata: NimMetadata,
        repair_provider: Option<&dyn ChatProvider>,
    ) -> DefectAnalysisResult {
        if let Some(result) = self.try_schema_validated(raw_response, defect_id, &nim_metadata, confidence_threshold) {
            return result;
        }

        if let Some(fenced) = extract_markdown_fence(raw_response) {
            if let Some(result) = self.try_schema_validated(&fenced, defect_id, &nim_metadata, confidence_threshold) {
                return result;
            }
        }

        if self.repair_budget > 0 {
            if let Some(provider) = repair_provider {
                let instruction = format!(
                    "The following is not valid JSON matching the required schema. \
                     Re-emit it as a single valid JSON object with no surrounding text:\n\n{}",
                    raw_response
                );
                if let Ok(repaired) = provider.generate("Repair malformed JSON.", &instruction, false).await {
                    if let Some(result) =
                        self.try_schema_validated(&repaired.text, defect_id, &nim_metadata, confidence_threshold)
                    {
                        return result;
                    }
                }
            }
        }

        if let Some(braces) = extract_balanced_braces(raw_response) {
            if let Some(result) = self.try_schema_validated(&braces, defect_id, &nim_metadata, confidence_threshold) {
                return result;
            }
        }

        if let Some(code_block) = extract_largest_code_block(raw_response) {
            return sentinel_from_code_block(defect_id, &code_block, nim_metadata);
        }

        sentinel_manual_review(defect_id, raw_response, nim_metadata)
    }

    fn try_schema_validated(
        &self,
        text: &str,
        defect_id: &str,
        nim_metadata: &NimMetadata,
        confidence_threshold: f64,
    ) -> Option<DefectAnalysisResult> {
        let trimmed = text.trim();
        let raw: RawAnalysis = serde_json::from_str(trimmed).ok()?;

        validate_schema(&raw).ok()?;

        let fix_candidates: Vec<FixCandidate> = raw
            .fix_candidates
            .into_iter()
            .enumerate()
            .map(|(i, c)| to_fix_candidate(i, c))
            .collect();

        let recommended_fix_index = raw.recommended_fix_index.min(fix_candidates.len().saturating_sub(1));
        let recommended = &fix_candidates[recommended_fix_index];

        let is_ready_for_application = recommended.confidence_score >= confidence_threshold
            && crate::style::StyleAnalyzer::passes_safety_checks(&recommended.original_code, &recommended.fixed_code);

        Some(DefectAnalysisResult {
            defect_id: defect_id.to_string(),
            defect_category: parse_category(&raw.defect_category),
            severity: parse_severity(&raw.severity),
            confidence_level: raw.confidence,
            fix_candidates,
            recommended_fix_index,
            style_analysis: None,
            nim_metadata: nim_metadata.clone(),
            is_ready_for_application,
        })
    }
}

fn validate_schema(raw: &RawAnalysis) -> Result<(), ParseError> {
    if raw.fix_candidates.is_empty() {
        return Err(ParseError::SchemaMismatch("fix_candidates is empty".to_string()));
    }
    for candidate in &raw.fix_candidates {
        if candidate.fixed_code.is_empty() {
            return Err(ParseError::SchemaMismatch("fixed_code is empty".to_string()));
        }
        let mut last_end: Option<usize> = None;
        for range in &candidate.line_ranges {
            if range.start > range.end {
                return Err(ParseError::SchemaMismatch("line range start > end".to_string()));
            }
            if let Some(last) = last_end {
                if range.start <= last {
                    return Err(ParseError::SchemaMismatch(
                        "line ranges not sorted/non-overlapping".to_string(),
                    ));
                }
            }
            last_end = Some(range.end);
        }
    }
    if raw.recommended_fix_index >= raw.fix_candidates.len() {
        return Err(ParseError::SchemaMismatch("recommended_fix_index out of bounds".to_string()));
    }
    Ok(())
}

fn to_fix_candidate(index: usize, raw: RawFixCandidate) -> FixCandidate {
    let file_path = PathBuf::from(raw.file_path);
    let mut affected_files = BTreeSet::new();
    affected_files.insert(file_path.clone());

    FixCandidate {
        fix_id: index,
        file_path,
        original_code: raw.original_code,
        fixed_code: raw.fixed_code,
        explanation: raw.explanation,
        confidence_score: raw.confidence_score.clamp(0.0, 1.0),
        complexity: parse_complexity(&raw.complexity),
        estimated_risk: parse_risk(&raw.estimated_risk),
        line_ranges: raw
            .line_ranges
            .into_iter()
            .map(|r| LineRange { start: r.start, end: r.end })
            .collect(),
        affected_files,
    }
}

fn parse_category(s: &str) -> DefectCategoryLabel {
    match s.to_lowercase().as_str() {
        "null_pointer" => DefectCategoryLabel::NullPointer,
        "memory_management" => DefectCategoryLabel::MemoryManagement,
        "buffer_overflow" => DefectCategoryLabel::BufferOverflow,
        "uninitialized" => DefectCategoryLabel::Uninitialized,
        "dead_code" => DefectCategoryLabel::DeadCode,
        _ => DefectCategoryLabel::Generic,
    }
}

fn parse_severity(s: &str) -> Severity {
    match s.to_lowercase().as_str() {
        "high" => Severity::High,
        "low" => Severity::Low,
        _ => Severity::Medium,
    }
}

fn parse_complexity(s: &str) -> Complexity {
    match s.to_lowercase().as_str() {
        "moderate" => Complexity::Moderate,
        "complex" => Complexity::Complex,
        "experimental" => Complexity::Experimental,
        _ => Complexity::Simple,
    }
}

fn parse_risk(s: &str) -> Risk {
    match s.to_lowercase().as_str() {
        "high" => Risk::High,
        "medium" => Risk::Medium,
        _ => Risk::Low,
    }
}

fn extract_markdown_fence(text: &str) -> Option<String> {
    static FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap());
    FENCE.captures(text).map(|c| c[1].to_string())
}

/// Find the first balanced `{ ... }` substring, tracking string literals so
/// braces inside JSON string values don't throw off the count.
fn extract_balanced_braces(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0i64;
    let mut in_string = false;
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let start_idx = chars.iter().position(|(i, _)| *i == start)?;

    for &(idx, ch) in &chars[start_idx..] {
        if in_string {
            if ch == '\\' {
                continue;
            }
            if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..idx + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn extract_largest_code_block(text: &str) -> Option<String> {
    static FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```[a-zA-Z]*\s*(.*?)\s*```").unwrap());
    FENCE
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .max_by_key(|s| s.len())
}

fn sentinel_from_code_block(defect_id: &str, code_block: &str, nim_metadata: NimMetadata) -> DefectAnalysisResult {
    let file_path = PathBuf::from("unknown");
    let mut affected_files = BTreeSet::new();
    affected_files.insert(file_path.clone());

    let candidate = FixCandidate {
        fix_id: 0,
        file_path,
        original_code: String::new(),
        fixed_code: code_block.to_string(),
        explanation: "Recovered from an unstructured code block in the model response.".to_string(),
        confidence_score: 0.3,
        complexity: Complexity::Experimental,
        estimated_risk: Risk::High,
        line_ranges: Vec::new(),
        affected_files,
    };

    DefectAnalysisResult {
        defect_id: defect_id.to_string(),
        defect_category: DefectCategoryLabel::Generic,
        severity: Severity::Medium,
        confidence_level: 0.3,
        fix_candidates: vec![candidate],
        recommended_fix_index: 0,
        style_analysis: None,
        nim_metadata,
        is_ready_for_application: false,
    }
}

fn sentinel_manual_review(defect_id: &str, raw_response: &str, nim_metadata: NimMetadata) -> DefectAnalysisResult {
    let file_path = PathBuf::from("unknown");
    let mut affected_files = BTreeSet::new();
    affected_files.insert(file_path.clone());

    let candidate = FixCandidate {
        fix_id: 0,
        file_path,
        original_code: String::new(),
        fixed_code: crate::util::truncate(raw_response, 2000),
        explanation: "Model output could not be parsed by any recovery strategy; flagged for manual review."
            .to_string(),
        confidence_score: 0.0,
        complexity: Complexity::Experimental,
        estimated_risk: Risk::High,
        line_ranges: Vec::new(),
        affected_files,
    };

    DefectAnalysisResult {
        defect_id: defect_id.to_string(),
        defect_category: DefectCategoryLabel::Generic,
        severity: Severity::Medium,
        confidence_level: 0.0,
        fix_candidates: vec![candidate],
        recommended_fix_index: 0,
        style_analysis: None,
        nim_metadata,
        is_ready_for_application: false,
    }
}
