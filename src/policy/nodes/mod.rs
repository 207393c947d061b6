// SPDX-License-Identifier: MIT

//! Built-in node types
//!
//! Deterministic nodes (pattern, keyword, length, transform) never call out
//! and fail only at construction. LLM nodes wrap an [`LlmNodeCore`] built
//! from the [`NodeContext`]. Clause nodes are internal: the policy compiler
//! creates them, workflow authors do not.

mod aggregator;
mod classifier;
mod confidence_gate;
mod criterion;
mod data_extractor;
mod keyword_scorer;
mod length_gate;
mod pattern_match;
mod sentiment;
mod subcriterion;
mod transform;

pub use aggregator::ResultAggregatorNode;
pub use classifier::ClassifierNode;
pub use confidence_gate::ConfidenceGateNode;
pub use criterion::CriterionEvaluationNode;
pub use data_extractor::DataExtractorNode;
pub use keyword_scorer::KeywordScorerNode;
pub use length_gate::{LengthGateNode, LengthUnit};
pub use pattern_match::{MatchMode, PatternMatchNode};
pub use sentiment::SentimentNode;
pub use subcriterion::SubCriterionNode;
pub use transform::{TransformNode, TransformOp};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::flow::cache::{CacheManager, CacheStore};
use crate::flow::error::ConfigurationError;
use crate::flow::model::LlmClient;
use crate::flow::node::{LlmNodeCore, Node, NodeSchema};
use crate::policy::config::{ModelRole, WorkflowConfig};

/// Action names returned by the built-in nodes
pub mod actions {
    pub use crate::flow::node::DEFAULT_ACTION as DEFAULT;

    pub const MATCHED: &str = "matched";
    pub const NOT_MATCHED: &str = "not_matched";
    pub const ABOVE_THRESHOLD: &str = "above_threshold";
    pub const BELOW_THRESHOLD: &str = "below_threshold";
    pub const TOO_SHORT: &str = "too_short";
    pub const WITHIN_RANGE: &str = "within_range";
    pub const TOO_LONG: &str = "too_long";
    pub const HIGH_CONFIDENCE: &str = "high_confidence";
    pub const NEEDS_REVIEW: &str = "needs_review";
    pub const LOW_CONFIDENCE: &str = "low_confidence";
    pub const SATISFIED: &str = "satisfied";
    pub const NOT_SATISFIED: &str = "not_satisfied";
    pub const FAILED: &str = "failed";
    pub const UNCLASSIFIED: &str = "unclassified";
    pub const POSITIVE: &str = "positive";
    pub const NEGATIVE: &str = "negative";
    pub const NEUTRAL: &str = "neutral";
    pub const MIXED: &str = "mixed";
}

/// A node type the registry can construct from a workflow definition
pub trait NodeType: Node + Sized + 'static {
    /// Type name used in workflow YAML
    const NAME: &'static str;

    /// Schema of the type (instances may narrow the action set)
    fn type_schema() -> NodeSchema;

    fn build(id: &str, params: &Value, ctx: &NodeContext) -> Result<Self, ConfigurationError>;
}

/// Everything a node needs at construction time
#[derive(Clone)]
pub struct NodeContext {
    config: Arc<WorkflowConfig>,
    client: Option<Arc<dyn LlmClient>>,
    cache_store: Option<Arc<dyn CacheStore>>,
}

impl NodeContext {
    pub fn new(config: WorkflowConfig) -> Self {
        Self {
            config: Arc::new(config),
            client: None,
            cache_store: None,
        }
    }

    pub fn with_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Use this store instead of the configured cache directory
    pub fn with_cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Same client and cache store under a different configuration
    pub fn with_config(&self, config: WorkflowConfig) -> Self {
        Self {
            config: Arc::new(config),
            ..self.clone()
        }
    }

    /// Build the LLM core for one node instance
    ///
    /// Each call yields its own cache manager and token bucket.
    pub fn llm_core(
        &self,
        node_id: &str,
        role: ModelRole,
        model_override: Option<&str>,
    ) -> Result<LlmNodeCore, ConfigurationError> {
        let client = self
            .client
            .clone()
            .ok_or_else(|| ConfigurationError::MissingLlmClient(node_id.to_string()))?;

        let cache = match &self.cache_store {
            Some(store) if self.config.cache.enabled && self.config.cache.ttl_secs > 0 => {
                CacheManager::new(
                    store.clone(),
                    Duration::from_secs(self.config.cache.ttl_secs),
                )
            }
            Some(_) => CacheManager::disabled(),
            None => self.config.cache_manager()?,
        };

        Ok(LlmNodeCore::new(
            node_id,
            client,
            self.config.llm_settings(role, model_override),
        )
        .with_cache(cache)
        .with_rate_limiter(self.config.rate_limiter()))
    }
}

/// Decode a node's params; absent params decode as an empty mapping
pub(crate) fn parse_params<P: DeserializeOwned>(
    node: &str,
    params: &Value,
) -> Result<P, ConfigurationError> {
    let params = match params {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(params)
        .map_err(|e| ConfigurationError::invalid_params(node, e.to_string()))
}

/// Text at `key`, empty when missing or not a string
pub(crate) fn text_at(shared: &crate::flow::state::SharedState, key: &str) -> String {
    shared.get_str(key).unwrap_or_default().to_string()
}

/// Lenient boolean read of an LLM field
pub(crate) fn bool_field(output: &Value, field: &str) -> bool {
    match output.get(field) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "met" | "1"
        ),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

/// Lenient confidence read of an LLM field, clamped to `[0, 1]`
pub(crate) fn confidence_field(output: &Value, field: &str) -> f64 {
    let raw = match output.get(field) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(v) if v.is_finite() => v.clamp(0.0, 1.0),
        _ => 0.0,
    }
}

/// Object schema for a structured model answer
pub(crate) fn answer_schema(properties: Value, required: &[&str]) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

pub(crate) fn string_field(output: &Value, field: &str) -> String {
    match output.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
