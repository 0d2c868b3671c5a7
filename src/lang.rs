//! `LanguageParser` — extension-based language detection and C/C++
//! function-boundary detection by balanced-brace scanning.

use crate::model::Language;
use std::path::Path;

pub struct LanguageParser;

impl LanguageParser {
    /// Detect language from a file's extension. `.h` is ambiguous between C
    /// and C++; resolved by sniffing the first 200 lines for `::`,
    /// `template`, or `class`.
    pub fn detect_language(path: &Path, source: &str) -> Language {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "c" => Language::C,
            "cc" | "cpp" | "cxx" | "hpp" => Language::Cpp,
            "h" => {
                let window: String = source.lines().take(200).collect::<Vec<_>>().join("\n");
                if window.contains("::") || window.contains("template") || window.contains("class") {
                    Language::Cpp
                } else {
                    Language::C
                }
            }
            _ => Language::Unknown,
        }
    }

    /// Find the innermost function body strictly containing 1-based line
    /// `target_line`. Returns `None` rather than a misleading guess whenever
    /// the boundary is ambiguous (accuracy target: prefer false negatives).
    pub fn function_bounds(source: &str, target_line: usize) -> Option<(usize, usize)> {
        let lines: Vec<&str> = source.lines().collect();
        if target_line == 0 || target_line > lines.len() {
            return None;
        }

        let header_line = find_header_upward(&lines, target_line)?;
        let open_brace_line = find_open_brace_from(&lines, header_line)?;
        let close_line = find_matching_close(&lines, open_brace_line)?;

        if !(open_brace_line <= target_line && target_line <= close_line) {
            return None;
        }

        Some((header_line, close_line))
    }
}

/// Scan upward from `target_line` for the nearest line matching the
/// function-header heuristic: a non-comment, non-preprocessor line whose
/// trimmed content ends with `)` (possibly followed by `const`/`noexcept`),
/// or whose same line ends with `{`, and whose next non-blank, non-comment
/// line starts with `{`.
fn find_header_upward(lines: &[&str], target_line: usize) -> Option<usize> {
    let mut i = target_line;
    while i >= 1 {
        let trimmed = lines[i - 1].trim();
        if !trimmed.starts_with("//") && !trimmed.starts_with('#') && !trimmed.is_empty() {
            if is_function_like_macro(trimmed) || is_extern_c_block(trimmed) {
                i -= 1;
                if i == 0 {
                    break;
                }
                continue;
            }

            if trimmed.ends_with('{') {
                let before_brace = trimmed.trim_end_matches('{').trim_end();
                if looks_like_signature_tail(before_brace) {
                    return Some(i);
                }
            } else if looks_like_signature_tail(trimmed) {
                if let Some(next) = next_non_blank_non_comment(lines, i) {
                    if lines[next - 1].trim_start().starts_with('{') {
                        return Some(i);
                    }
                }
            }
        }
        if i == 1 {
            break;
        }
        i -= 1;
    }
    None
}

const CONTROL_FLOW_KEYWORDS: &[&str] = &["if", "for", "while", "switch", "do", "else", "catch"];

/// Whether `trimmed`'s leading token is a control-flow keyword (`if (...) {`,
/// `for (...) {`, etc.) rather than a function signature. These end in `)`
/// just like a header but must never be mistaken for one.
fn starts_with_control_flow_keyword(trimmed: &str) -> bool {
    let head = trimmed
        .split(|c: char| c == '(' || c.is_whitespace())
        .next()
        .unwrap_or("");
    CONTROL_FLOW_KEYWORDS.contains(&head)
}

fn looks_like_signature_tail(trimmed: &str) -> bool {
    if starts_with_control_flow_keyword(trimmed) {
        return false;
    }
    let stripped = trimmed
        .trim_end_matches("noexcept")
        .trim_end()
        .trim_end_matches("const")
        .trim_end();
    stripped.ends_with(')')
}

fn is_function_like_macro(trimmed: &str) -> bool {
    // Heuristic: all-caps identifier immediately followed by `(` with no
    // space, and the line does not look like a call inside a body (no
    // leading `return`/assignment). Conservative: only filters the most
    // common macro-as-statement shape.
    trimmed
        .split('(')
        .next()
        .map(|head| {
            let head = head.trim();
            !head.is_empty() && head.chars().all(|c| c.is_ascii_uppercase() || c == '_')
        })
        .unwrap_or(false)
}

fn is_extern_c_block(trimmed: &str) -> bool {
    trimmed.starts_with("extern \"C\"") || trimmed.starts_with("extern\"C\"")
}

fn next_non_blank_non_comment(lines: &[&str], from_line: usize) -> Option<usize> {
    let mut i = from_line + 1;
    while i <= lines.len() {
        let trimmed = lines[i - 1].trim();
        if !trimmed.is_empty() && !trimmed.starts_with("//") {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn find_open_brace_from(lines: &[&str], header_line: usize) -> Option<usize> {
    let mut i = header_line;
    while i <= lines.len() {
        if lines[i - 1].contains('{') {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Balanced-brace scan counting `{`/`}` outside string/char literals and
/// comments, correctly skipping raw string literals (`R"(...)"`, which must
/// not have their contents scanned for braces).
fn find_matching_close(lines: &[&str], open_brace_line: usize) -> Option<usize> {
    let mut depth: i64 = 0;
    let mut in_block_comment = false;
    let mut started = false;

    for (idx, line) in lines.iter().enumerate().skip(open_brace_line - 1) {
        let mut chars = line.char_indices().peekable();
        let mut in_string = false;
        let mut in_char = false;
        let mut raw_string_delim: Option<String> = None;

        while let Some((pos, ch)) = chars.next() {
            if let Some(delim) = &raw_string_delim {
                let closer = format!("){}\"", delim);
                if line[pos..].starts_with(&closer) {
                    for _ in 0..closer.len() - 1 {
                        chars.next();
                    }
                    raw_string_delim = None;
                }
                continue;
            }

            if in_block_comment {
                if ch == '*' && line[pos..].starts_with("*/") {
                    chars.next();
                    in_block_comment = false;
                }
                continue;
            }

            if in_string {
                if ch == '\\' {
                    chars.next();
                } else if ch == '"' {
                    in_string = false;
                }
                continue;
            }

            if in_char {
                if ch == '\\' {
                    chars.next();
                } else if ch == '\'' {
                    in_char = false;
                }
                continue;
            }

            if ch == '/' && line[pos..].starts_with("//") {
                break;
            }
            if ch == '/' && line[pos..].starts_with("/*") {
                chars.next();
                in_block_comment = true;
                continue;
            }
            if ch == 'R' && line[pos..].starts_with("R\"") {
                if let Some(paren) = line[pos + 2..].find('(') {
                    let delim = &line[pos + 2..pos + 2 + paren];
                    raw_string_delim = Some(delim.to_string());
                    for _ in 0..(paren + 2) {
                        chars.next();
                    }
                    continue;
                }
            }
            if ch == '"' {
                in_string = true;
                continue;
            }
            if ch == '\'' {
                in_char = true;
                continue;
            }
            if ch == '{' {
                depth += 1;
                started = true;
            } else if ch == '}' {
                depth -= 1;
                if started && depth == 0 {
                    return Some(idx + 1);
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_language_by_extension() {
        assert_eq!(
            LanguageParser::detect_language(Path::new("foo.c"), ""),
            Language::C
        );
        assert_eq!(
            LanguageParser::detect_language(Path::new("foo.cpp"), ""),
            Language::Cpp
        );
        assert_eq!(
            LanguageParser::detect_language(Path::new("foo.rs"), ""),
            Language::Unknown
        );
    }

    #[test]
    fn test_detect_language_header_disambiguation() {
        let cpp_header = "class Widget {\npublic:\n  void draw();\n};\n";
        assert_eq!(
            LanguageParser::detect_language(Path::new("foo.h"), cpp_header),
            Language::Cpp
        );
        let c_header = "void do_thing(int x);\n";
        assert_eq!(
            LanguageParser::detect_language(Path::new("foo.h"), c_header),
            Language::C
        );
    }

    #[test]
    fn test_function_bounds_simple() {
        let source = "int helper() {\n    return 1;\n}\n\nint main() {\n    int x = helper();\n    return x;\n}\n";
        let bounds = LanguageParser::function_bounds(source, 6);
        assert_eq!(bounds, Some((5, 8)));
    }

    #[test]
    fn test_function_bounds_with_nested_braces() {
        let source = "int main() {\n    if (1) {\n        do_thing();\n    }\n    return 0;\n}\n";
        let bounds = LanguageParser::function_bounds(source, 3);
        assert_eq!(bounds, Some((1, 6)));
    }

    #[test]
    fn test_function_bounds_skips_control_flow_headers() {
        let source = "void run() {\n    for (int i = 0; i < 10; i++) {\n        while (true) {\n            switch (i) {\n                case 0:\n                    do_thing();\n            }\n            break;\n        }\n    }\n}\n";
        let bounds = LanguageParser::function_bounds(source, 6);
        assert_eq!(bounds, Some((1, 11)));
    }

    #[test]
    fn test_function_bounds_ignores_braces_in_strings() {
        let source = "int main() {\n    const char *s = \"{ not a brace }\";\n    return 0;\n}\n";
        let bounds = LanguageParser::function_bounds(source, 2);
        assert_eq!(bounds, Some((1, 4)));
    }

    #[test]
    fn test_function_bounds_ignores_raw_string_braces() {
        let source = "int main() {\n    const char *s = R\"({ not a brace })\";\n    return 0;\n}\n";
        let bounds = LanguageParser::function_bounds(source, 2);
        assert_eq!(bounds, Some((1, 4)));
    }

    #[test]
    fn test_function_bounds_none_out_of_range() {
        let source = "int main() {\n    return 0;\n}\n";
        assert_eq!(LanguageParser::function_bounds(source, 999), None);
    }

    #[test]
    fn test_function_bounds_never_excludes_target_line() {
        let source =
            "void helper() {\n    int a = 1;\n}\n\nvoid target() {\n    int b = 2;\n    int c = 3;\n}\n";
        if let Some((start, end)) = LanguageParser::function_bounds(source, 7) {
            assert!(start <= 7 && 7 <= end);
        }
    }
}
