// SPDX-License-Identifier: MIT

//! LLM node core - caching, throttling, retries and response parsing
//!
//! Each LLM-backed node owns one `LlmNodeCore`. The cache and the rate
//! limiter belong to that instance only, so concurrent evaluations sharing a
//! node serialize on its bucket and cache lock but never on other nodes.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::flow::cache::CacheManager;
use crate::flow::error::{NodeExecutionError, ProviderError};
use crate::flow::model::{parse_structured, LlmClient, LlmRequest, STRICT_FORMAT_INSTRUCTION};
use crate::flow::rate_limiter::RateLimiter;

/// Per-node model settings
#[derive(Debug, Clone, PartialEq)]
pub struct LlmSettings {
    pub model: String,
    pub temperature: f32,
    /// Attempts per request for transient provider failures
    pub max_retries: u32,
    /// Backoff before the second attempt, doubled after each failure
    pub retry_wait: Duration,
    /// Limit for a single provider call
    pub timeout: Duration,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "anthropic/claude-sonnet-4-20250514".to_string(),
            temperature: 0.0,
            max_retries: 3,
            retry_wait: Duration::from_secs(2),
            timeout: Duration::from_secs(60),
        }
    }
}

pub struct LlmNodeCore {
    node_id: String,
    client: Arc<dyn LlmClient>,
    settings: LlmSettings,
    cache: CacheManager,
    limiter: RateLimiter,
    response_schema: Option<Value>,
}

impl LlmNodeCore {
    /// Core with caching disabled and no rate limit
    pub fn new(node_id: impl Into<String>, client: Arc<dyn LlmClient>, settings: LlmSettings) -> Self {
        Self {
            node_id: node_id.into(),
            client,
            settings,
            cache: CacheManager::disabled(),
            limiter: RateLimiter::unlimited(),
            response_schema: None,
        }
    }

    pub fn with_cache(mut self, cache: CacheManager) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// JSON schema sent with every request for providers that enforce output shape
    pub fn with_response_schema(mut self, schema: Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn response_schema(&self) -> Option<&Value> {
        self.response_schema.as_ref()
    }

    /// Ask the model for a structured mapping
    ///
    /// Cache hits skip both the limiter and the provider. A response that does
    /// not parse is retried once with [`STRICT_FORMAT_INSTRUCTION`] appended to
    /// the system prompt before giving up.
    pub async fn call(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        span_name: &str,
    ) -> Result<Value, NodeExecutionError> {
        let key = CacheManager::generate_key(
            system_prompt,
            prompt,
            &self.settings.model,
            self.settings.temperature,
        );

        if let Some(cached) = self.cache.get(&key).await {
            log::debug!("[{}] cache hit", span_name);
            return Ok(cached);
        }

        let mut request = LlmRequest {
            model: self.settings.model.clone(),
            prompt: prompt.to_string(),
            system_prompt: system_prompt.map(str::to_string),
            temperature: self.settings.temperature,
            span_name: span_name.to_string(),
            response_schema: self.response_schema.clone(),
        };

        let value = match self.request_structured(&request).await {
            Ok(value) => value,
            Err(ProviderError::Parse(first)) => {
                log::warn!(
                    "[{}] unparseable response ({}), retrying with stricter instructions",
                    span_name,
                    first
                );
                request.system_prompt = Some(match system_prompt {
                    Some(s) => format!("{}\n\n{}", s, STRICT_FORMAT_INSTRUCTION),
                    None => STRICT_FORMAT_INSTRUCTION.to_string(),
                });
                match self.request_structured(&request).await {
                    Ok(value) => value,
                    Err(ProviderError::Parse(second)) => {
                        return Err(NodeExecutionError::MalformedResponse {
                            node: self.node_id.clone(),
                            message: format!("{}; after stricter retry: {}", first, second),
                        });
                    }
                    Err(e) => return Err(self.provider_failure(e)),
                }
            }
            Err(e) => return Err(self.provider_failure(e)),
        };

        self.cache.set(&key, &value).await;
        Ok(value)
    }

    async fn request_structured(&self, request: &LlmRequest) -> Result<Value, ProviderError> {
        let text = self.call_with_retries(request).await?;
        parse_structured(&text)
    }

    /// Call the provider, retrying transient failures with doubling backoff
    async fn call_with_retries(&self, request: &LlmRequest) -> Result<String, ProviderError> {
        let attempts = self.settings.max_retries.max(1);
        let mut backoff = self.settings.retry_wait;

        for attempt in 1..=attempts {
            let result = match self.limiter.acquire().await {
                Ok(()) => {
                    log::info!(
                        "[{}] calling {} (attempt {}/{})",
                        request.span_name,
                        request.model,
                        attempt,
                        attempts
                    );
                    match tokio::time::timeout(self.settings.timeout, self.client.call(request))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(ProviderError::Timeout(self.settings.timeout)),
                    }
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(text) => return Ok(text),
                Err(e) if !e.is_retryable() || attempt == attempts => return Err(e),
                Err(e) => {
                    let wait = match &e {
                        ProviderError::RateLimited {
                            retry_after_secs: Some(secs),
                        } => backoff.max(Duration::from_secs(*secs)),
                        _ => backoff,
                    };
                    log::warn!(
                        "[{}] attempt {}/{} failed: {}; retrying in {:?}",
                        request.span_name,
                        attempt,
                        attempts,
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    backoff = backoff.saturating_mul(2);
                }
            }
        }

        Err(ProviderError::Transport("no attempts made".to_string()))
    }

    fn provider_failure(&self, source: ProviderError) -> NodeExecutionError {
        NodeExecutionError::Provider {
            node: self.node_id.clone(),
            attempts: self.settings.max_retries.max(1),
            source,
        }
    }
}
