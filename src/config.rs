//! Configuration for the defect-to-patch pipeline.
//!
//! Split into narrow per-subsystem records (§9 redesign flag: "config object
//! with many knobs" becomes several small ones) rather than one flat struct,
//! so each component's contract stays easy to reason about in isolation.
//! Loaded from `~/.config/coverity-agent/config.toml`, following the
//! teacher's `load()`/`save()` pattern, with environment variables taking
//! precedence for secrets (API keys are never stored in the struct that gets
//! serialized to disk unless explicitly set by the user).

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    #[serde(default)]
    pub exclude_paths: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    1000
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            exclude_paths: Vec::new(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    pub default_window: usize,
    pub max_window: usize,
    pub min_window: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_window: 30,
            max_window: 100,
            min_window: 10,
        }
    }
}

/// Which chat-completion backend a `ProviderConfig` talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    NvidiaNim,
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    pub fn env_key_var(&self) -> &'static str {
        match self {
            ProviderKind::NvidiaNim => "NIM_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    pub fn env_base_url_var(&self) -> &'static str {
        match self {
            ProviderKind::NvidiaNim => "NIM_BASE_URL",
            ProviderKind::OpenAi => "OPENAI_BASE_URL",
            ProviderKind::Anthropic => "ANTHROPIC_BASE_URL",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::NvidiaNim => "https://integrate.api.nvidia.com/v1",
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com/v1",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    #[serde(default)]
    pub base_url: Option<String>,
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_seconds: u64,
    #[serde(default = "default_rpm")]
    pub max_requests_per_minute: u32,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: f64,
    #[serde(default = "default_true")]
    pub use_streaming: bool,
}

fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.6
}
fn default_top_p() -> f32 {
    0.95
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_rpm() -> u32 {
    60
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay() -> f64 {
    1.0
}
fn default_true() -> bool {
    true
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            kind,
            base_url: None,
            model: model.into(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            timeout_seconds: default_timeout_secs(),
            max_requests_per_minute: default_rpm(),
            retry_attempts: default_retry_attempts(),
            retry_delay_seconds: default_retry_delay(),
            use_streaming: true,
        }
    }

    /// Resolve the API key from the environment. Never persisted to disk.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(self.kind.env_key_var()).ok()
    }

    pub fn resolved_base_url(&self) -> String {
        std::env::var(self.kind.env_base_url_var())
            .ok()
            .or_else(|| self.base_url.clone())
            .unwrap_or_else(|| self.kind.default_base_url().to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub primary: ProviderConfig,
    #[serde(default)]
    pub fallbacks: Vec<ProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            primary: ProviderConfig::new(ProviderKind::NvidiaNim, "meta/llama-3.3-70b-instruct"),
            fallbacks: vec![
                ProviderConfig::new(ProviderKind::OpenAi, "gpt-4o"),
                ProviderConfig::new(ProviderKind::Anthropic, "claude-3-5-sonnet-20241022"),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsingConfig {
    pub num_candidates: usize,
    pub confidence_threshold: f64,
    pub min_confidence_for_auto_apply: f64,
    pub min_style_score_for_auto_apply: f64,
    pub max_files_per_fix: usize,
    pub max_lines_per_fix: usize,
    pub repair_budget: u32,
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            num_candidates: 3,
            confidence_threshold: 0.7,
            min_confidence_for_auto_apply: 0.8,
            min_style_score_for_auto_apply: 0.7,
            max_files_per_fix: 3,
            max_lines_per_fix: 100,
            repair_budget: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub prefer_line_range_replacement: bool,
    pub enable_keyword_replacement: bool,
    pub allow_full_file_replacement: bool,
    pub keyword_block_size: usize,
    pub max_block_size_for_keywords: usize,
    pub max_ranges_per_file: usize,
    pub dry_run: bool,
    pub automatic_rollback_on_failure: bool,
    pub keep_backups_on_success: bool,
    pub p4_timeout_seconds: u64,
    pub require_clean_workspace: bool,
    pub require_vcs: bool,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            prefer_line_range_replacement: true,
            enable_keyword_replacement: true,
            allow_full_file_replacement: true,
            keyword_block_size: 3,
            max_block_size_for_keywords: 100,
            max_ranges_per_file: 10,
            dry_run: false,
            automatic_rollback_on_failure: true,
            keep_backups_on_success: false,
            p4_timeout_seconds: 30,
            require_clean_workspace: true,
            require_vcs: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub token_limit_per_defect: usize,
    pub cache_similar_defects: bool,
    pub daily_cost_limit: Option<f64>,
    pub max_cost_per_defect: Option<f64>,
    pub max_file_bytes: u64,
    pub file_cache_capacity: usize,
    pub per_defect_timeout_seconds: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            token_limit_per_defect: 2000,
            cache_similar_defects: true,
            daily_cost_limit: None,
            max_cost_per_defect: None,
            max_file_bytes: 10 * 1024 * 1024,
            file_cache_capacity: 256,
            per_defect_timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub parsing: ParsingConfig,
    #[serde(default)]
    pub application: ApplicationConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    /// Root of the source tree this pipeline is allowed to read/write under.
    pub project_root: PathBuf,
}

impl Config {
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("coverity-agent"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.toml"))
    }

    /// Load config from disk, or return defaults rooted at the current
    /// working directory.
    pub fn load() -> Self {
        Self::config_path()
            .and_then(|path| fs::read_to_string(path).ok())
            .and_then(|content| toml::from_str(&content).ok())
            .unwrap_or_else(|| Config {
                project_root: std::env::current_dir().unwrap_or_default(),
                ..Default::default()
            })
    }

    pub fn save(&self) -> Result<(), String> {
        let dir =
            Self::config_dir().ok_or_else(|| "Could not determine config directory".to_string())?;

        fs::create_dir_all(&dir)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;

        let path = dir.join("config.toml");
        let content =
            toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize config: {}", e))?;

        fs::write(&path, content).map_err(|e| format!("Failed to write config: {}", e))?;

        Ok(())
    }

    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/coverity-agent/config.toml".to_string())
    }
}
