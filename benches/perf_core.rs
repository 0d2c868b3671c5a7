//! Benchmarks for the per-defect hot paths: language detection plus function
//! bounds scanning, the keyword-table classifier, and the context window
//! analyzer that chains both together. These run once per defect in a batch,
//! so regressions here multiply across a whole report.

use coverity_agent::context_analyzer::ContextAnalyzer;
use coverity_agent::lang::LanguageParser;
use coverity_agent::model::{ClassificationHints, ParsedDefect};
use coverity_agent::source::SourceFileManager;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::path::PathBuf;

const CHECKER_NAMES: &[&str] = &[
    "RESOURCE_LEAK",
    "FORWARD_NULL",
    "BUFFER_SIZE_WARNING",
    "UNINIT",
    "DEADCODE",
    "USE_AFTER_FREE",
];

fn synthetic_function(body_lines: usize) -> String {
    let mut source = String::from("#include <vector>\n\nstatic int helper(int x) {\n    return x + 1;\n}\n\n");
    source.push_str("int process_record(const std::vector<int>& data) {\n");
    for i in 0..body_lines {
        source.push_str(&format!("    int v{i} = helper({i});\n", i = i));
        if i % 7 == 0 {
            source.push_str("    if (v0 > 0) {\n        v0 -= 1;\n    }\n");
        }
    }
    source.push_str("    return 0;\n}\n");
    source
}

fn bench_detect_language(c: &mut Criterion) {
    let source = synthetic_function(50);
    let path = PathBuf::from("process_record.cc");
    c.bench_function("detect_language", |b| {
        b.iter(|| LanguageParser::detect_language(black_box(&path), black_box(&source)));
    });
}

fn bench_function_bounds(c: &mut Criterion) {
    let mut group = c.benchmark_group("function_bounds");
    for size in [10usize, 50, 200] {
        let source = synthetic_function(size);
        let target_line = source.lines().count() - 2;
        group.bench_with_input(BenchmarkId::from_parameter(size), &source, |b, source| {
            b.iter(|| LanguageParser::function_bounds(black_box(source), black_box(target_line)));
        });
    }
    group.finish();
}

fn bench_classification_derive(c: &mut Criterion) {
    c.bench_function("classification_hints_derive", |b| {
        b.iter(|| {
            for checker in CHECKER_NAMES {
                black_box(ClassificationHints::derive(
                    black_box(checker),
                    black_box("leak of memory allocated"),
                    black_box("process_record"),
                    black_box(4),
                ));
            }
        });
    });
}

fn bench_context_analyze(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("process_record.cc");
    std::fs::write(&file_path, synthetic_function(120)).unwrap();

    let manager = SourceFileManager::new(dir.path().to_path_buf(), 1024 * 1024, 8);
    let analyzer = ContextAnalyzer::new(&manager, 10, 400);

    let defect = ParsedDefect {
        defect_id: "bench-1".to_string(),
        defect_type: "RESOURCE_LEAK".to_string(),
        file_path,
        line_number: 60,
        function_name: "process_record".to_string(),
        events: vec![],
        subcategory: "leak".to_string(),
        confidence_score: 0.8,
        parsing_timestamp: chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc),
        raw_data: serde_json::json!({}),
        classification_hints: ClassificationHints::derive("RESOURCE_LEAK", "leak", "process_record", 4),
    };

    c.bench_function("context_analyzer_analyze", |b| {
        b.iter(|| black_box(analyzer.analyze(black_box(&defect))));
    });
}

criterion_group!(
    benches,
    bench_detect_language,
    bench_function_bounds,
    bench_classification_derive,
    bench_context_analyze,
);
criterion_main!(benches);
