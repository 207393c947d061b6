// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{actions, parse_params, NodeContext, NodeType};
use crate::flow::error::{ConfigurationError, NodeExecutionError};
use crate::flow::node::{Action, Node, NodeCategory, NodeSchema};
use crate::flow::state::SharedState;
use crate::policy::config::ConfidenceGateConfig;
use crate::policy::models::ConfidenceLevel;

const DEFAULT_INPUT_KEY: &str = "confidence";
const DEFAULT_OUTPUT_KEY: &str = "confidence_level";

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct ConfidenceGateParams {
    /// Scores at or above route high_confidence (default from config)
    high: Option<f64>,
    /// Scores below route low_confidence (default from config)
    low: Option<f64>,
    /// Dot path to the score in state, e.g. criterion_results.criterion_1.confidence
    input_key: Option<String>,
    output_key: Option<String>,
}

/// Routes on a confidence score: high, review band, or low
pub struct ConfidenceGateNode {
    id: String,
    schema: NodeSchema,
    thresholds: ConfidenceGateConfig,
    input_key: String,
    output_key: String,
}

impl ConfidenceGateNode {
    pub fn new(id: &str, high: f64, low: f64) -> Result<Self, ConfigurationError> {
        let thresholds = ConfidenceGateConfig { high, low };
        thresholds.validate()?;
        Ok(Self {
            id: id.to_string(),
            schema: Self::type_schema(),
            thresholds,
            input_key: DEFAULT_INPUT_KEY.to_string(),
            output_key: DEFAULT_OUTPUT_KEY.to_string(),
        })
    }

    pub fn with_input_key(mut self, key: &str) -> Self {
        self.input_key = key.to_string();
        self
    }

    pub fn action_for(&self, score: f64) -> &'static str {
        match ConfidenceLevel::from_score(score, &self.thresholds) {
            ConfidenceLevel::High => actions::HIGH_CONFIDENCE,
            ConfidenceLevel::Medium => actions::NEEDS_REVIEW,
            ConfidenceLevel::Low => actions::LOW_CONFIDENCE,
        }
    }
}

impl NodeType for ConfidenceGateNode {
    const NAME: &'static str = "ConfidenceGateNode";

    fn type_schema() -> NodeSchema {
        NodeSchema::from_params::<ConfidenceGateParams>(
            Self::NAME,
            "Route on a confidence score: high, needs review, or low",
            NodeCategory::Routing,
            &[
                actions::HIGH_CONFIDENCE,
                actions::NEEDS_REVIEW,
                actions::LOW_CONFIDENCE,
            ],
        )
    }

    fn build(id: &str, params: &Value, ctx: &NodeContext) -> Result<Self, ConfigurationError> {
        let params: ConfidenceGateParams = parse_params(id, params)?;
        let defaults = ctx.config().confidence_gate;
        let mut node = Self::new(
            id,
            params.high.unwrap_or(defaults.high),
            params.low.unwrap_or(defaults.low),
        )?;
        if let Some(key) = params.input_key {
            node.input_key = key;
        }
        if let Some(key) = params.output_key {
            node.output_key = key;
        }
        Ok(node)
    }
}

#[async_trait]
impl Node for ConfidenceGateNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn schema(&self) -> &NodeSchema {
        &self.schema
    }

    fn output_key(&self) -> Option<&str> {
        Some(&self.output_key)
    }

    /// A missing score reads as 0.0 and lands in the low band
    fn prepare(&self, shared: &SharedState) -> Value {
        json!(shared.get_f64(&self.input_key).unwrap_or(0.0))
    }

    async fn execute(&self, input: Value) -> Result<Value, NodeExecutionError> {
        let score = input.as_f64().unwrap_or(0.0);
        Ok(json!({
            "score": score,
            "level": ConfidenceLevel::from_score(score, &self.thresholds),
        }))
    }

    fn route(&self, shared: &mut SharedState, input: &Value, output: Value) -> Action {
        let score = input.as_f64().unwrap_or(0.0);
        shared.update(&self.output_key, output["level"].clone());
        Action::from(self.action_for(score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn route_score(node: &ConfidenceGateNode, score: f64) -> (Action, SharedState) {
        let mut shared = SharedState::empty();
        shared.set("confidence", json!(score));
        let input = node.prepare(&shared);
        let output = node.execute(input.clone()).await.unwrap();
        let action = node.route(&mut shared, &input, output);
        (action, shared)
    }

    #[tokio::test]
    async fn test_threshold_boundaries() {
        let node = ConfidenceGateNode::new("gate", 0.8, 0.5).unwrap();

        assert_eq!(route_score(&node, 0.8).await.0, "high_confidence");
        assert_eq!(route_score(&node, 0.95).await.0, "high_confidence");
        assert_eq!(route_score(&node, 0.79).await.0, "needs_review");
        assert_eq!(route_score(&node, 0.5).await.0, "needs_review");
        assert_eq!(route_score(&node, 0.49).await.0, "low_confidence");
    }

    #[tokio::test]
    async fn test_writes_confidence_level() {
        let node = ConfidenceGateNode::new("gate", 0.8, 0.5).unwrap();
        let (_, shared) = route_score(&node, 0.6).await;
        assert_eq!(shared.get_str("confidence_level"), Some("medium"));
    }

    #[tokio::test]
    async fn test_reads_nested_score() {
        let node = ConfidenceGateNode::new("gate", 0.8, 0.5)
            .unwrap()
            .with_input_key("criterion_results.c1.confidence");
        let mut shared = SharedState::empty();
        shared.set("criterion_results", json!({"c1": {"confidence": 0.9}}));
        assert_eq!(node.prepare(&shared), json!(0.9));
    }

    #[tokio::test]
    async fn test_missing_score_is_low() {
        let node = ConfidenceGateNode::new("gate", 0.8, 0.5).unwrap();
        let mut shared = SharedState::empty();
        let input = node.prepare(&shared);
        let output = node.execute(input.clone()).await.unwrap();
        assert_eq!(node.route(&mut shared, &input, output), "low_confidence");
    }

    #[test]
    fn test_thresholds_validated_at_construction() {
        assert!(matches!(
            ConfidenceGateNode::new("gate", 0.5, 0.5),
            Err(ConfigurationError::InvalidThresholds { .. })
        ));
        assert!(ConfidenceGateNode::new("gate", 0.4, 0.6).is_err());
        assert!(ConfidenceGateNode::new("gate", 1.2, 0.6).is_err());
    }

    #[test]
    fn test_build_uses_config_defaults() {
        let ctx = NodeContext::new(Default::default());
        let node = ConfidenceGateNode::build("gate", &json!({"high": 0.9}), &ctx).unwrap();
        assert_eq!(node.thresholds.high, 0.9);
        assert_eq!(node.thresholds.low, 0.5);
    }
}
