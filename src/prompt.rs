//! `PromptTemplateRegistry` — defect-category-indexed prompt builders that
//! render a `(system, user)` message pair with a strict JSON output contract.

use crate::model::{CodeContext, DefectCategory, ParsedDefect};
use crate::style::StyleAnalyzer;
use crate::util::estimate_tokens;

pub const RESPONSE_SCHEMA_NOTE: &str = r#"Respond ONLY with a single JSON object. Do not wrap in Markdown. Escape all newlines in string fields.

Schema:
{
  "defect_category": string,
  "severity": string,
  "confidence": number,
  "fix_candidates": [
    {
      "file_path": string,
      "original_code": string,
      "fixed_code": string,
      "explanation": string,
      "confidence_score": number,
      "complexity": string,
      "estimated_risk": string,
      "line_ranges": [{"start": number, "end": number}]
    }
  ],
  "recommended_fix_index": number
}"#;

/// Priority order used to pick one template when a defect matches multiple
/// categories: null_pointer beats memory_management beats buffer_overflow
/// beats uninitialized beats generic.
const CATEGORY_PRIORITY: &[DefectCategory] = &[
    DefectCategory::NullPointer,
    DefectCategory::MemoryManagement,
    DefectCategory::BufferOverflow,
    DefectCategory::Uninitialized,
];

pub struct RenderedPrompt {
    pub system_message: String,
    pub user_message: String,
}

pub struct PromptTemplateRegistry {
    token_limit_per_defect: usize,
}

impl PromptTemplateRegistry {
    pub fn new(token_limit_per_defect: usize) -> Self {
        Self {
            token_limit_per_defect,
        }
    }

    fn select_category(&self, defect: &ParsedDefect) -> DefectCategory {
        for candidate in CATEGORY_PRIORITY {
            if defect.classification_hints.likely_categories.contains(candidate) {
                return *candidate;
            }
        }
        DefectCategory::Other
    }

    fn system_message_for(&self, category: DefectCategory) -> String {
        let focus = match category {
            DefectCategory::NullPointer => {
                "Focus on null-pointer dereference paths: verify every pointer is checked or initialized before use along the reported path."
            }
            DefectCategory::MemoryManagement => {
                "Focus on allocation/deallocation balance: every resource acquired on every path must be released exactly once."
            }
            DefectCategory::BufferOverflow => {
                "Focus on buffer bounds: verify every index and length used to read or write a buffer is within its allocated size."
            }
            DefectCategory::Uninitialized => {
                "Focus on uninitialized use: verify every variable is assigned before being read on the reported path."
            }
            _ => "Analyze the reported static-analysis defect and propose a minimal, correct fix.",
        };

        format!(
            "You are a C/C++ static-analysis defect remediation assistant. {}\n\n{}",
            focus, RESPONSE_SCHEMA_NOTE
        )
    }

    /// Build the `(system, user)` pair for `defect`/`context`, compressing
    /// the rendered prompt under `token_limit_per_defect` if needed.
    pub fn render(&self, defect: &ParsedDefect, context: &CodeContext) -> RenderedPrompt {
        let category = self.select_category(defect);
        let system_message = self.system_message_for(category);

        let style_hints = StyleAnalyzer::quick_detect(context);
        let mut events = defect.events.clone();
        let mut source_code = context.source_code.clone();

        let mut user_message = self.render_user_message(defect, context, &events, &source_code, &style_hints);

        if estimate_tokens(&user_message) + estimate_tokens(&system_message) > self.token_limit_per_defect {
            events = compress_events(events);
            user_message = self.render_user_message(defect, context, &events, &source_code, &style_hints);
        }

        let mut shrink_factor = 1.0_f64;
        while estimate_tokens(&user_message) + estimate_tokens(&system_message) > self.token_limit_per_defect
            && shrink_factor > 0.05
        {
            shrink_factor -= 0.2;
            source_code = shrink_window(&context.source_code, defect.line_number, shrink_factor);
            user_message = self.render_user_message(defect, context, &events, &source_code, &style_hints);
        }

        RenderedPrompt {
            system_message,
            user_message,
        }
    }

    fn render_user_message(
        &self,
        defect: &ParsedDefect,
        context: &CodeContext,
        events: &[String],
        source_code: &str,
        style_hints: &str,
    ) -> String {
        format!(
            "Defect: {defect_type}\nFile: {file}\nLine: {line}\nFunction: {function}\nSubcategory: {subcategory}\n\
             Events:\n{events}\n\nStyle hints:\n{style_hints}\n\nSource context ({start}-{end}):\n{code}\n",
            defect_type = defect.defect_type,
            file = context.primary_file.display(),
            line = defect.line_number,
            function = defect.function_name,
            subcategory = defect.subcategory,
            events = events.iter().map(|e| format!("- {}", e)).collect::<Vec<_>>().join("\n"),
            style_hints = style_hints,
            start = context.context_lines.0,
            end = context.context_lines.1,
            code = source_code,
        )
    }
}

/// Drop events beyond the first 5 while keeping the first and last.
fn compress_events(events: Vec<String>) -> Vec<String> {
    if events.len() <= 5 {
        return events;
    }
    let mut compressed = Vec::new();
    compressed.push(events[0].clone());
    compressed.push(format!("... ({} events omitted) ...", events.len() - 2));
    compressed.push(events[events.len() - 1].clone());
    compressed
}

/// Shrink the context window by 20% steps around `defect_line`, down to a
/// floor of `defect_line +/- 5`.
fn shrink_window(source_code: &str, defect_line_in_window: usize, shrink_factor: f64) -> String {
    let lines: Vec<&str> = source_code.lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let target = defect_line_in_window.min(lines.len()).max(1) - 1;
    let keep = ((lines.len() as f64) * shrink_factor).max(11.0) as usize;
    let half = (keep / 2).max(5);
    let start = target.saturating_sub(half);
    let end = (target + half).min(lines.len().saturating_sub(1));
    lines[start..=end].join("\n")
}
