// SPDX-License-Identifier: MIT

//! LLM boundary - the one capability policyflow needs from its environment
//!
//! Callers implement [`LlmClient`] on top of whatever provider SDK they use.
//! Everything above it (caching, throttling, retries, parsing) lives in
//! [`crate::flow::node::LlmNodeCore`].

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::flow::error::ProviderError;

/// Appended to the system prompt when a response could not be parsed
pub const STRICT_FORMAT_INSTRUCTION: &str = "Your previous answer could not be parsed. \
Respond with ONLY a YAML mapping (or a JSON object) matching the requested fields. \
Do not add explanations or text outside the mapping.";

/// A single prompt sent to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmRequest {
    pub model: String,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub temperature: f32,
    /// Trace span name, e.g. `criterion_1`
    pub span_name: String,
    /// Expected shape of the structured response
    pub response_schema: Option<Value>,
}

/// Core trait for LLM access
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one request and return the raw response text
    async fn call(&self, request: &LlmRequest) -> Result<String, ProviderError>;
}

static CODE_FENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"```(?:yaml|yml|json|YAML|JSON)?[ \t]*\n?([\s\S]*?)\n?```")
        .expect("code fence regex is valid")
});

/// Parse a model response into a structured mapping
///
/// Accepts bare YAML/JSON or a fenced code block. Anything that does not
/// decode to a mapping is a [`ProviderError::Parse`].
pub fn parse_structured(text: &str) -> Result<Value, ProviderError> {
    let body = CODE_FENCE_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text)
        .trim();

    if body.is_empty() {
        return Err(ProviderError::Parse("empty response".to_string()));
    }

    let value: Value =
        serde_yaml::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;

    match value {
        Value::Object(_) => Ok(value),
        other => Err(ProviderError::Parse(format!(
            "expected a mapping, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "mapping",
    }
}
