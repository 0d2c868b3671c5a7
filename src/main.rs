//! Coverity Agent CLI
//!
//! A thin wrapper over `coverity_agent::pipeline` — argument parsing, config
//! loading, and result printing only. The real work happens in the library
//! crate; this binary exists so the pipeline can be driven manually against a
//! defect report without a caller writing its own harness.

use clap::{Parser, Subcommand};
use coverity_agent::config::Config;
use coverity_agent::model::{OverallStatus, ParsedDefect};
use coverity_agent::pipeline::{BatchSummary, PipelineOrchestrator, PipelineOutcome};
use coverity_agent::report::ReportAdapter;
use coverity_agent::util::redact_secrets;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "coverity-agent",
    about = "Turns Coverity defect reports into reviewed, applied patches",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Print full JSON results instead of a plain table.
    #[arg(long, global = true)]
    json: bool,

    /// Print per-defect progress lines to stderr as they complete.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every un-fixed, non-excluded defect in a report through the pipeline.
    Run {
        /// Path to the Coverity JSON report.
        report: PathBuf,

        /// Root of the source tree the report's paths are relative to.
        #[arg(long)]
        project_root: Option<PathBuf>,
    },
    /// Run a single defect, selected by its stable defect id, from a report.
    Batch {
        /// Path to the Coverity JSON report.
        report: PathBuf,

        #[arg(long)]
        project_root: Option<PathBuf>,

        /// Only process defects whose defect_id is in this comma-separated list.
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {}", redact_secrets(&e.to_string()));
            return ExitCode::from(2);
        }
    };

    runtime.block_on(run(args))
}

async fn run(args: Args) -> ExitCode {
    let (report, project_root, only) = match args.command {
        Command::Run { report, project_root } => (report, project_root, Vec::new()),
        Command::Batch { report, project_root, only } => (report, project_root, only),
    };

    let mut config = Config::load();
    if let Some(root) = project_root {
        config.project_root = root;
    }

    let adapter = match ReportAdapter::load_and_validate(&report) {
        Ok(adapter) => adapter,
        Err(e) => {
            eprintln!("configuration error: {}", redact_secrets(&e.to_string()));
            return ExitCode::from(2);
        }
    };

    let mut defects = adapter.iter_defects(&config.ingestion.exclude_paths);
    if !only.is_empty() {
        defects.retain(|d| only.contains(&d.defect_id));
    }

    if defects.is_empty() {
        eprintln!("no defects to process after filtering");
        return ExitCode::SUCCESS;
    }

    if args.verbose {
        eprintln!("processing {} defect(s) from {}", defects.len(), report.display());
    }

    let orchestrator = PipelineOrchestrator::new(config);
    let summary = orchestrator.process_batch(&defects).await;

    if args.verbose {
        for outcome in &summary.outcomes {
            eprintln!("- {}", describe_outcome(outcome));
        }
    }

    if args.json {
        print_json(&summary, &defects);
    } else {
        print_table(&summary);
    }

    ExitCode::from(exit_code_for(&summary))
}

fn describe_outcome(outcome: &PipelineOutcome) -> String {
    if let Some(reason) = &outcome.skipped_reason {
        return format!("{}: skipped ({})", outcome.defect_id, redact_secrets(reason));
    }
    match outcome.apply_result.as_ref().map(|r| r.overall_status) {
        Some(OverallStatus::Success) => format!("{}: applied", outcome.defect_id),
        Some(OverallStatus::DryRunSuccess) => format!("{}: would apply (dry run)", outcome.defect_id),
        Some(OverallStatus::RolledBack) => format!("{}: rolled back", outcome.defect_id),
        Some(OverallStatus::Failed) => format!("{}: failed", outcome.defect_id),
        None => format!("{}: held for manual review", outcome.defect_id),
    }
}

fn print_table(summary: &BatchSummary) {
    println!(
        "{:<28} {:<10} {}",
        "defect", "status", "detail"
    );
    for outcome in &summary.outcomes {
        let (status, detail) = match (&outcome.skipped_reason, &outcome.apply_result) {
            (Some(reason), _) => ("skipped", redact_secrets(reason)),
            (None, Some(result)) => (status_label(result.overall_status), format!("{} file(s) changed", result.applied_changes.len())),
            (None, None) => ("held", "below auto-apply threshold".to_string()),
        };
        println!("{:<28} {:<10} {}", outcome.defect_id, status, detail);
    }
    println!();
    let m = &summary.metrics;
    println!(
        "processed={} applied={} rolled_back={} failed={} skipped={} tokens_in={} tokens_out={}",
        m.processed, m.applied, m.rolled_back, m.failed, m.skipped, m.total_input_tokens, m.total_output_tokens
    );
}

fn status_label(status: OverallStatus) -> &'static str {
    match status {
        OverallStatus::Success => "applied",
        OverallStatus::DryRunSuccess => "dry-run",
        OverallStatus::RolledBack => "reverted",
        OverallStatus::Failed => "failed",
    }
}

fn print_json(summary: &BatchSummary, defects: &[ParsedDefect]) {
    let entries: Vec<serde_json::Value> = summary
        .outcomes
        .iter()
        .map(|outcome| {
            let defect_type = defects
                .iter()
                .find(|d| d.defect_id == outcome.defect_id)
                .map(|d| d.defect_type.clone());
            serde_json::json!({
                "defect_id": outcome.defect_id,
                "defect_type": defect_type,
                "skipped_reason": outcome.skipped_reason,
                "analysis": outcome.analysis.as_ref().map(|a| serde_json::to_value(a).unwrap_or_default()),
                "apply_result": outcome.apply_result.as_ref().map(|r| serde_json::to_value(r).unwrap_or_default()),
            })
        })
        .collect();

    let output = serde_json::json!({
        "results": entries,
        "metrics": {
            "processed": summary.metrics.processed,
            "applied": summary.metrics.applied,
            "rolled_back": summary.metrics.rolled_back,
            "failed": summary.metrics.failed,
            "skipped": summary.metrics.skipped,
            "total_input_tokens": summary.metrics.total_input_tokens,
            "total_output_tokens": summary.metrics.total_output_tokens,
        },
    });

    match serde_json::to_string_pretty(&output) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("failed to serialize results: {}", e),
    }
}

/// Exit codes per the spec's CLI contract: 0 success, 3 all-providers
/// exhausted, 4 patch-validation failure, 5 rollback performed, 6 rollback
/// failed. Rollback failure takes priority over a plain rollback, which takes
/// priority over a validation failure, since it is the most severe outcome a
/// batch can contain.
fn exit_code_for(summary: &BatchSummary) -> u8 {
    let rollback_failed = summary.outcomes.iter().any(|o| {
        o.apply_result
            .as_ref()
            .map(|r| r.overall_status == OverallStatus::Failed && !r.error_log.is_empty())
            .unwrap_or(false)
    });
    if rollback_failed {
        return 6;
    }
    if summary.metrics.rolled_back > 0 {
        return 5;
    }
    if summary.metrics.failed > 0 {
        return 4;
    }
    let all_providers_exhausted = summary
        .outcomes
        .iter()
        .all(|o| o.skipped_reason.as_deref().map(|r| r.contains("model generation failed")).unwrap_or(false));
    if all_providers_exhausted && !summary.outcomes.is_empty() {
        return 3;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use coverity_agent::model::{AppliedChange, ApplyMode, PatchApplicationResult, PatchValidationResult};

    fn outcome_with_status(status: OverallStatus, error_log: Vec<String>) -> PipelineOutcome {
        PipelineOutcome {
            defect_id: "d1".to_string(),
            analysis: None,
            apply_result: Some(PatchApplicationResult {
                patch_id: "p1".to_string(),
                overall_status: status,
                applied_changes: vec![AppliedChange {
                    file_path: PathBuf::from("/src/foo.c"),
                    mode: ApplyMode::LineRange,
                    ranges_applied: vec![(1, 2)],
                    vcs_operations: vec![],
                    backup_ref: None,
                }],
                validation: PatchValidationResult::ok(),
                backup_manifest_ref: None,
                changelist_id: None,
                processing_time_seconds: 0.1,
                error_log,
            }),
            skipped_reason: None,
        }
    }

    #[test]
    fn test_exit_code_success_when_all_applied() {
        let summary = BatchSummary {
            outcomes: vec![outcome_with_status(OverallStatus::Success, vec![])],
            metrics: coverity_agent::pipeline::PipelineMetrics {
                processed: 1,
                applied: 1,
                ..Default::default()
            },
        };
        assert_eq!(exit_code_for(&summary), 0);
    }

    #[test]
    fn test_exit_code_rollback_failed_takes_priority() {
        let summary = BatchSummary {
            outcomes: vec![outcome_with_status(
                OverallStatus::Failed,
                vec!["rollback restore failed".to_string()],
            )],
            metrics: coverity_agent::pipeline::PipelineMetrics {
                processed: 1,
                failed: 1,
                ..Default::default()
            },
        };
        assert_eq!(exit_code_for(&summary), 6);
    }

    #[test]
    fn test_exit_code_plain_rollback() {
        let summary = BatchSummary {
            outcomes: vec![outcome_with_status(OverallStatus::RolledBack, vec![])],
            metrics: coverity_agent::pipeline::PipelineMetrics {
                processed: 1,
                rolled_back: 1,
                ..Default::default()
            },
        };
        assert_eq!(exit_code_for(&summary), 5);
    }
}
