//! `StyleAnalyzer` — local (non-LLM) pattern sniffing for indentation, brace
//! placement, naming convention, and preferred line length, plus scoring and
//! mechanical rewriting of generated fixes against the detected style.

use crate::model::{BraceStyle, CodeContext, DetectedStyle, IndentationType, NamingConvention};

pub struct StyleAnalyzer;

impl StyleAnalyzer {
    /// Non-LLM, synchronous: a short human-readable summary embedded in
    /// prompts as a style hint, independent of the structured `detect`
    /// result used for scoring.
    pub fn quick_detect(context: &CodeContext) -> String {
        let style = Self::detect(context);
        format!(
            "indentation: {:?} (width {}), braces: {:?}, naming: {:?}, preferred line length: {}",
            style.indentation_type,
            style.indentation_width,
            style.brace_style,
            style.naming_convention,
            style.line_length_pref
        )
    }

    /// Infer a `DetectedStyle` from the surrounding code context.
    pub fn detect(context: &CodeContext) -> DetectedStyle {
        let lines: Vec<&str> = context.source_code.lines().collect();

        let (indentation_type, indentation_width) = detect_indentation(&lines);
        let brace_style = detect_brace_style(&lines);
        let naming_convention = detect_naming_convention(&lines);
        let line_length_pref = detect_line_length_pref(&lines);

        DetectedStyle {
            indentation_type,
            indentation_width,
            brace_style,
            naming_convention,
            line_length_pref,
        }
    }

    /// Score `fixed_code` against `detected_style`: start at 1.0, subtract
    /// 0.1 per distinct violation class, floor at 0.0.
    pub fn score(fixed_code: &str, detected_style: &DetectedStyle) -> f64 {
        let lines: Vec<&str> = fixed_code.lines().collect();
        let mut penalty = 0.0_f64;

        let (actual_indent, actual_width) = detect_indentation(&lines);
        if actual_indent != detected_style.indentation_type {
            penalty += 0.1;
        }
        if actual_width != 0 && detected_style.indentation_width != 0 && actual_width != detected_style.indentation_width {
            penalty += 0.1;
        }

        if detect_brace_style(&lines) != detected_style.brace_style {
            penalty += 0.1;
        }

        if detect_naming_convention(&lines) != detected_style.naming_convention
            && detect_naming_convention(&lines) != NamingConvention::Mixed
        {
            penalty += 0.1;
        }

        (1.0 - penalty.min(1.0)).max(0.0)
    }

    /// Mechanically rewrite `fixed_code` to match `detected_style`: tab/space
    /// conversion and opening-brace placement. Never touches identifier
    /// names.
    pub fn apply(fixed_code: &str, detected_style: &DetectedStyle) -> String {
        let lines: Vec<&str> = fixed_code.lines().collect();
        let (current_indent, _) = detect_indentation(&lines);

        let reindented: Vec<String> = lines
            .iter()
            .map(|line| convert_indentation(line, current_indent, detected_style))
            .collect();

        let joined = reindented.join("\n");
        match detected_style.brace_style {
            BraceStyle::KAndR => to_k_and_r(&joined),
            BraceStyle::Allman => to_allman(&joined),
        }
    }

    /// Reject fixes that are obviously unsafe or a no-op (identical to the
    /// original code).
    pub fn passes_safety_checks(original_code: &str, fixed_code: &str) -> bool {
        if fixed_code.trim() == original_code.trim() {
            return false;
        }
        const FORBIDDEN: &[&str] = &["system(", "exec(", "rm -rf"];
        !FORBIDDEN.iter().any(|needle| fixed_code.contains(needle))
    }
}

fn detect_indentation(lines: &[&str]) -> (IndentationType, usize) {
    let mut tab_count = 0usize;
    let mut space_widths: Vec<usize> = Vec::new();

    for line in lines {
        let leading: String = line.chars().take_while(|c| *c == ' ' || *c == '\t').collect();
        if leading.is_empty() {
            continue;
        }
        if leading.starts_with('\t') {
            tab_count += 1;
        } else {
            space_widths.push(leading.len());
        }
    }

    if tab_count > space_widths.len() {
        return (IndentationType::Tabs, 1);
    }

    if space_widths.is_empty() {
        return (IndentationType::Spaces, 4);
    }

    let mut counts = std::collections::HashMap::new();
    for w in &space_widths {
        *counts.entry(*w).or_insert(0) += 1;
    }
    let mode = counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(width, _)| width)
        .unwrap_or(4);

    let common_unit = if mode % 4 == 0 { 4 } else if mode % 2 == 0 { 2 } else { mode.max(1) };
    (IndentationType::Spaces, common_unit)
}

fn detect_brace_style(lines: &[&str]) -> BraceStyle {
    let mut same_line = 0usize;
    let mut own_line = 0usize;

    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if trimmed == "{" {
            own_line += 1;
        } else if trimmed.ends_with('{') && trimmed.len() > 1 {
            same_line += 1;
        }
        let _ = idx;
    }

    let total = same_line + own_line;
    if total == 0 {
        return BraceStyle::KAndR;
    }

    if (same_line as f64 / total as f64) >= 0.6 {
        BraceStyle::KAndR
    } else {
        BraceStyle::Allman
    }
}

fn detect_naming_convention(lines: &[&str]) -> NamingConvention {
    let mut snake = 0usize;
    let mut camel = 0usize;
    let mut pascal = 0usize;

    for line in lines {
        for token in line.split(|c: char| !c.is_alphanumeric() && c != '_') {
            if token.len() < 3 || token.chars().all(|c| c.is_ascii_uppercase() || c == '_') {
                continue;
            }
            if token.contains('_') && token.chars().next().map(|c| c.is_lowercase()).unwrap_or(false) {
                snake += 1;
            } else if token
                .chars()
                .next()
                .map(|c| c.is_uppercase())
                .unwrap_or(false)
                && token.chars().any(|c| c.is_lowercase())
            {
                pascal += 1;
            } else if token.chars().any(|c| c.is_uppercase())
                && token.chars().next().map(|c| c.is_lowercase()).unwrap_or(false)
            {
                camel += 1;
            }
        }
    }

    let max = snake.max(camel).max(pascal);
    if max == 0 {
        return NamingConvention::Mixed;
    }
    if snake == max {
        NamingConvention::SnakeCase
    } else if camel == max {
        NamingConvention::CamelCase
    } else {
        NamingConvention::PascalCase
    }
}

fn detect_line_length_pref(lines: &[&str]) -> usize {
    let mut lengths: Vec<usize> = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.chars().count())
        .collect();
    if lengths.is_empty() {
        return 100;
    }
    lengths.sort_unstable();
    let median = lengths[lengths.len() / 2];
    ((median + 5) / 10) * 10
}

fn convert_indentation(line: &str, from: IndentationType, to: &DetectedStyle) -> String {
    if from == to.indentation_type {
        return line.to_string();
    }
    let leading_len = line.chars().take_while(|c| *c == ' ' || *c == '\t').count();
    let (leading, rest) = line.split_at(leading_len);
    let levels = match from {
        IndentationType::Tabs => leading.chars().filter(|c| *c == '\t').count(),
        IndentationType::Spaces => leading.len() / 4.max(1),
    };
    let new_leading = match to.indentation_type {
        IndentationType::Tabs => "\t".repeat(levels),
        IndentationType::Spaces => " ".repeat(levels * to.indentation_width.max(1)),
    };
    format!("{}{}", new_leading, rest)
}

fn to_k_and_r(code: &str) -> String {
    // Join a line containing only "{" onto the end of the previous line.
    let mut out: Vec<String> = Vec::new();
    for line in code.lines() {
        if line.trim() == "{" {
            if let Some(prev) = out.last_mut() {
                prev.push_str(" {");
                continue;
            }
        }
        out.push(line.to_string());
    }
    out.join("\n")
}

fn to_allman(code: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in code.lines() {
        let trimmed = line.trim_end();
        if trimmed.ends_with('{') && trimmed.len() > 1 {
            let indent: String = line.chars().take_while(|c| c.is_whitespace()).collect();
            out.push(trimmed[..trimmed.len() - 1].trim_end().to_string());
            out.push(format!("{}{{", indent));
        } else {
            out.push(line.to_string());
        }
    }
    out.join("\n")
}
