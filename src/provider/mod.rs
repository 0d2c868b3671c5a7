//! `ProviderManager` — a uniform chat-completion interface over a primary
//! and ordered fallback LLM providers, with retry/backoff, failover, and a
//! per-provider rate limiter.

pub mod ratelimit;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::ProviderError;
use ratelimit::TokenBucket;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub text: String,
    pub usage: Usage,
    pub request_id: String,
    pub latency_seconds: f64,
    pub provider: String,
    pub model: String,
}

/// Uniform capability every provider variant implements. `provider_name` is
/// used in error messages and `NimMetadata::provider_used`.
#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    fn provider_name(&self) -> &str;
    fn config(&self) -> &ProviderConfig;

    async fn generate(
        &self,
        system: &str,
        user: &str,
        stream: bool,
    ) -> Result<GenerateResult, ProviderError>;
}

/// One configured backend behind an OpenAI-compatible (or Anthropic-native)
/// chat-completions endpoint. All three kinds share the same HTTP plumbing;
/// only the request/response envelope and auth header differ.
pub struct HttpProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .expect("failed to build HTTP client");
        Self { config, client }
    }

    fn auth_header(&self) -> (&'static str, String) {
        let key = self.config.api_key().unwrap_or_default();
        match self.config.kind {
            ProviderKind::Anthropic => ("x-api-key", key),
            _ => ("Authorization", format!("Bearer {}", key)),
        }
    }

    fn endpoint(&self) -> String {
        match self.config.kind {
            ProviderKind::Anthropic => format!("{}/messages", self.config.resolved_base_url()),
            _ => format!("{}/chat/completions", self.config.resolved_base_url()),
        }
    }

    fn build_request_body(&self, system: &str, user: &str) -> serde_json::Value {
        match self.config.kind {
            ProviderKind::Anthropic => serde_json::json!({
                "model": self.config.model,
                "max_tokens": self.config.max_tokens,
                "temperature": self.config.temperature,
                "system": system,
                "messages": [{"role": "user", "content": user}],
            }),
            _ => serde_json::json!({
                "model": self.config.model,
                "max_tokens": self.config.max_tokens,
                "temperature": self.config.temperature,
                "top_p": self.config.top_p,
                "frequency_penalty": self.config.frequency_penalty,
                "presence_penalty": self.config.presence_penalty,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user},
                ],
            }),
        }
    }

    fn extract_text(&self, body: &serde_json::Value) -> Option<String> {
        match self.config.kind {
            ProviderKind::Anthropic => body
                .get("content")?
                .as_array()?
                .first()?
                .get("text")?
                .as_str()
                .map(|s| s.to_string()),
            _ => body
                .get("choices")?
                .as_array()?
                .first()?
                .get("message")?
                .get("content")?
                .as_str()
                .map(|s| s.to_string()),
        }
    }

    fn extract_usage(&self, body: &serde_json::Value) -> Usage {
        let usage = body.get("usage");
        let input_tokens = usage
            .and_then(|u| u.get("input_tokens").or_else(|| u.get("prompt_tokens")))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let output_tokens = usage
            .and_then(|u| u.get("output_tokens").or_else(|| u.get("completion_tokens")))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        Usage {
            input_tokens,
            output_tokens,
        }
    }
}

#[async_trait::async_trait]
impl ChatProvider for HttpProvider {
    fn provider_name(&self) -> &str {
        match self.config.kind {
            ProviderKind::NvidiaNim => "nvidia_nim",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
        }
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn generate(
        &self,
        system: &str,
        user: &str,
        _stream: bool,
    ) -> Result<GenerateResult, ProviderError> {
        let provider = self.provider_name().to_string();
        let start = Instant::now();

        let (header_name, header_value) = self.auth_header();
        let mut request = self
            .client
            .post(self.endpoint())
            .header(header_name, header_value)
            .json(&self.build_request_body(system, user));

        if matches!(self.config.kind, ProviderKind::Anthropic) {
            request = request.header("anthropic-version", "2023-06-01");
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout {
                    provider: provider.clone(),
                    timeout_secs: self.config.timeout_seconds,
                }
            } else {
                ProviderError::TransientNetwork {
                    provider: provider.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderError::Authentication { provider });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(ProviderError::RateLimit {
                provider,
                retry_after_secs,
            });
        }
        if status.is_server_error() {
            return Err(ProviderError::ServerError {
                provider,
                status: status.as_u16(),
            });
        }
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::BAD_REQUEST {
            return Err(ProviderError::PermanentModelUnavailable {
                provider,
                model: self.config.model.clone(),
            });
        }

        let body: serde_json::Value = response.json().await.map_err(|e| ProviderError::TransientNetwork {
            provider: provider.clone(),
            reason: format!("could not decode response body: {}", e),
        })?;

        if let Some(error_type) = body.get("error").and_then(|e| e.get("type")).and_then(|t| t.as_str()) {
            if error_type.contains("context_length") {
                return Err(ProviderError::ContextLengthExceeded { provider });
            }
        }

        let text = self.extract_text(&body).ok_or_else(|| ProviderError::TransientNetwork {
            provider: provider.clone(),
            reason: "response body did not contain a completion".to_string(),
        })?;
        let usage = self.extract_usage(&body);
        let request_id = body
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(GenerateResult {
            text,
            usage,
            request_id,
            latency_seconds: start.elapsed().as_secs_f64(),
            provider,
            model: self.config.model.clone(),
        })
    }
}

/// Drives a primary provider plus ordered fallbacks through the failover
/// policy in the provider design: immediate failover on auth/permanent
/// errors, in-place retry with backoff on transient errors, failover once
/// those are exhausted.
pub struct ProviderManager {
    providers: Vec<Box<dyn ChatProvider>>,
    buckets: HashMap<String, TokenBucket>,
}

impl ProviderManager {
    pub fn new(providers: Vec<Box<dyn ChatProvider>>) -> Self {
        let buckets = providers
            .iter()
            .map(|p| {
                (
                    p.provider_name().to_string(),
                    TokenBucket::new(p.config().max_requests_per_minute),
                )
            })
            .collect();
        Self { providers, buckets }
    }

    /// The first configured provider, used as the repair-call target for
    /// `StructuredOutputParser`'s model-assisted JSON repair step.
    pub fn primary(&self) -> &dyn ChatProvider {
        self.providers[0].as_ref()
    }

    pub async fn generate(&self, system: &str, user: &str, stream: bool) -> Result<GenerateResult, ProviderError> {
        let mut causes = Vec::new();

        for provider in &self.providers {
            let name = provider.provider_name().to_string();
            let bucket = self.buckets.get(&name);

            if let Some(bucket) = bucket {
                let acquired = bucket
                    .acquire(Duration::from_secs(provider.config().timeout_seconds))
                    .await;
                if !acquired {
                    causes.push(format!("{}: rate limiter timed out", name));
                    continue;
                }
            }

            match self.call_with_retry(provider.as_ref(), system, user, stream).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    causes.push(format!("{}: {}", name, e));
                    continue;
                }
            }
        }

        Err(ProviderError::AllProvidersExhausted { causes })
    }

    async fn call_with_retry(
        &self,
        provider: &dyn ChatProvider,
        system: &str,
        user: &str,
        stream: bool,
    ) -> Result<GenerateResult, ProviderError> {
        let config = provider.config();
        let mut attempt = 0;
        let mut delay = Duration::from_secs_f64(config.retry_delay_seconds);

        loop {
            match provider.generate(system, user, stream).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_immediate_failover() => return Err(e),
                Err(e) if e.is_retryable() && attempt < config.retry_attempts => {
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

pub fn build_provider(config: ProviderConfig) -> Box<dyn ChatProvider> {
    Box::new(HttpProvider::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    struct FlakyProvider {
        config: ProviderConfig,
        fail_times: std::sync::atomic::AtomicU32,
        error: fn(String) -> ProviderError,
    }

    #[async_trait::async_trait]
    impl ChatProvider for FlakyProvider {
        fn provider_name(&self) -> &str {
            "flaky"
        }
        fn config(&self) -> &ProviderConfig {
            &self.config
        }
        async fn generate(&self, _s: &str, _u: &str, _stream: bool) -> Result<GenerateResult, ProviderError> {
            let remaining = self.fail_times.load(std::sync::atomic::Ordering::SeqCst);
            if remaining > 0 {
                self.fail_times.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                return Err((self.error)("flaky".to_string()));
            }
            Ok(GenerateResult {
                text: "ok".to_string(),
                usage: Usage {
                    input_tokens: 1,
                    output_tokens: 1,
                },
                request_id: "r1".to_string(),
                latency_seconds: 0.0,
                provider: "flaky".to_string(),
                model: "test-model".to_string(),
            })
        }
    }

    fn fast_config() -> ProviderConfig {
        let mut c = ProviderConfig::new(ProviderKind::OpenAi, "test-model");
        c.retry_delay_seconds = 0.001;
        c.retry_attempts = 3;
        c.max_requests_per_minute = 1000;
        c
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let provider = FlakyProvider {
            config: fast_config(),
            fail_times: std::sync::atomic::AtomicU32::new(2),
            error: |p| ProviderError::TransientNetwork { provider: p, reason: "boom".to_string() },
        };
        let manager = ProviderManager::new(vec![Box::new(provider)]);
        let result = manager.generate("sys", "user", false).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_auth_error_fails_over_immediately_without_retry() {
        let provider = FlakyProvider {
            config: fast_config(),
            fail_times: std::sync::atomic::AtomicU32::new(1),
            error: |p| ProviderError::Authentication { provider: p },
        };
        let manager = ProviderManager::new(vec![Box::new(provider)]);
        let result = manager.generate("sys", "user", false).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_all_providers_exhausted_carries_causes() {
        let provider = FlakyProvider {
            config: fast_config(),
            fail_times: std::sync::atomic::AtomicU32::new(100),
            error: |p| ProviderError::TransientNetwork { provider: p, reason: "boom".to_string() },
        };
        let manager = ProviderManager::new(vec![Box::new(provider)]);
        match manager.generate("sys", "user", false).await {
            Err(ProviderError::AllProvidersExhausted { causes }) => assert_eq!(causes.len(), 1),
            other => panic!("expected AllProvidersExhausted, got {:?}", other),
        }
    }
}
