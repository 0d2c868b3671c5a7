//! `ReportAdapter` — loads a Coverity-style JSON report and emits normalized,
//! classified `ParsedDefect` records.

use crate::error::InputError;
use crate::model::{ClassificationHints, ParsedDefect};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct RawReport {
    issues: Vec<RawIssue>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "eventDescription", default)]
    event_description: String,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    #[serde(rename = "checkerName", default)]
    checker_name: String,
    #[serde(rename = "mainEventFilePathname")]
    main_event_file_pathname: String,
    #[serde(rename = "mainEventLineNumber")]
    main_event_line_number: i64,
    #[serde(rename = "functionDisplayName", default)]
    function_display_name: String,
    #[serde(default)]
    subcategory: String,
    #[serde(default)]
    events: Vec<RawEvent>,
    #[serde(default)]
    fixed: Option<bool>,
    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

/// Loads, filters, and normalizes a Coverity defect report.
pub struct ReportAdapter {
    report: RawReport,
    raw_issues: Vec<Value>,
}

impl ReportAdapter {
    /// Load and structurally validate `path`. Fails with `InputError` if the
    /// file is missing or is not a JSON object carrying an `issues` array.
    pub fn load_and_validate(path: &Path) -> Result<Self, InputError> {
        if !path.exists() {
            return Err(InputError::ReportNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|e| InputError::InvalidReport {
            path: path.to_path_buf(),
            reason: format!("could not read file: {}", e),
        })?;

        let value: Value = serde_json::from_str(&content).map_err(|e| InputError::InvalidReport {
            path: path.to_path_buf(),
            reason: format!("not valid JSON: {}", e),
        })?;

        if !value.is_object() || value.get("issues").map(|v| !v.is_array()).unwrap_or(true) {
            return Err(InputError::InvalidReport {
                path: path.to_path_buf(),
                reason: "expected a JSON object with an `issues` array".to_string(),
            });
        }

        let raw_issues = value
            .get("issues")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let report: RawReport = serde_json::from_value(value).map_err(|e| InputError::InvalidReport {
            path: path.to_path_buf(),
            reason: format!("schema mismatch: {}", e),
        })?;

        Ok(ReportAdapter { report, raw_issues })
    }

    /// Yield normalized defects, in input order, skipping issues already
    /// marked `fixed` or whose file matches any `exclude_globs` pattern
    /// (case-insensitive, matched anywhere along the path).
    pub fn iter_defects(&self, exclude_globs: &[String]) -> Vec<ParsedDefect> {
        let patterns: Vec<glob::Pattern> = exclude_globs
            .iter()
            .filter_map(|g| glob::Pattern::new(&g.to_lowercase()).ok())
            .collect();

        self.report
            .issues
            .iter()
            .zip(self.raw_issues.iter())
            .filter(|(issue, _)| !issue.fixed.unwrap_or(false))
            .filter(|(issue, _)| !path_excluded(&issue.main_event_file_pathname, &patterns))
            .filter(|(issue, _)| issue.main_event_line_number >= 1)
            .map(|(issue, raw)| self.to_parsed_defect(issue, raw.clone()))
            .collect()
    }

    fn to_parsed_defect(&self, issue: &RawIssue, raw_data: Value) -> ParsedDefect {
        let line_number = issue.main_event_line_number.max(1) as usize;
        let defect_id = ParsedDefect::stable_id(
            &issue.checker_name,
            &issue.main_event_file_pathname,
            line_number,
            &issue.function_display_name,
        );

        let events: Vec<String> = issue
            .events
            .iter()
            .map(|e| e.event_description.clone())
            .collect();

        let classification_hints = ClassificationHints::derive(
            &issue.checker_name,
            &issue.subcategory,
            &issue.function_display_name,
            events.len(),
        );

        ParsedDefect {
            defect_id,
            defect_type: issue.checker_name.clone(),
            file_path: PathBuf::from(&issue.main_event_file_pathname),
            line_number,
            function_name: issue.function_display_name.clone(),
            events,
            subcategory: issue.subcategory.clone(),
            confidence_score: 1.0,
            parsing_timestamp: Utc::now(),
            raw_data,
            classification_hints,
        }
    }

    /// Case-insensitive histogram of `checkerName` across all issues
    /// (ignoring the `fixed`/exclusion filters, unlike `iter_defects`).
    pub fn get_categories(&self) -> HashMap<String, usize> {
        let mut histogram = HashMap::new();
        for issue in &self.report.issues {
            let key = issue.checker_name.to_lowercase();
            *histogram.entry(key).or_insert(0) += 1;
        }
        histogram
    }
}

fn path_excluded(path: &str, patterns: &[glob::Pattern]) -> bool {
    let lower = path.to_lowercase();
    patterns.iter().any(|p| p.matches(&lower))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_report(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("report.json");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    const SAMPLE: &str = r#"{
        "issues": [
            {
                "checkerName": "RESOURCE_LEAK",
                "mainEventFilePathname": "/src/foo.c",
                "mainEventLineNumber": 42,
                "functionDisplayName": "do_thing",
                "subcategory": "leak",
                "events": [{"eventDescription": "alloc here"}, {"eventDescription": "leak here"}]
            },
            {
                "checkerName": "FORWARD_NULL",
                "mainEventFilePathname": "/vendor/skip_me.c",
                "mainEventLineNumber": 10,
                "functionDisplayName": "vendored",
                "subcategory": "null",
                "events": [],
                "fixed": true
            }
        ]
    }"#;

    #[test]
    fn test_load_and_validate_rejects_missing_file() {
        let result = ReportAdapter::load_and_validate(Path::new("/nonexistent/report.json"));
        assert!(matches!(result, Err(InputError::ReportNotFound(_))));
    }

    #[test]
    fn test_load_and_validate_rejects_non_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_report(&dir, "[1, 2, 3]");
        let result = ReportAdapter::load_and_validate(&path);
        assert!(matches!(result, Err(InputError::InvalidReport { .. })));
    }

    #[test]
    fn test_iter_defects_skips_fixed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_report(&dir, SAMPLE);
        let adapter = ReportAdapter::load_and_validate(&path).unwrap();
        let defects = adapter.iter_defects(&[]);
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].defect_type, "RESOURCE_LEAK");
    }

    #[test]
    fn test_iter_defects_respects_exclude_globs() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_report(&dir, SAMPLE);
        let adapter = ReportAdapter::load_and_validate(&path).unwrap();
        let defects = adapter.iter_defects(&["*/foo.c".to_string()]);
        assert!(defects.is_empty());
    }

    #[test]
    fn test_get_categories_is_case_insensitive_histogram() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_report(&dir, SAMPLE);
        let adapter = ReportAdapter::load_and_validate(&path).unwrap();
        let categories = adapter.get_categories();
        assert_eq!(categories.get("resource_leak"), Some(&1));
        assert_eq!(categories.get("forward_null"), Some(&1));
    }

    #[test]
    fn test_defect_id_stable_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_report(&dir, SAMPLE);
        let adapter1 = ReportAdapter::load_and_validate(&path).unwrap();
        let adapter2 = ReportAdapter::load_and_validate(&path).unwrap();
        let id1 = adapter1.iter_defects(&[])[0].defect_id.clone();
        let id2 = adapter2.iter_defects(&[])[0].defect_id.clone();
        assert_eq!(id1, id2);
    }
}
