// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{actions, answer_schema, confidence_field, parse_params, string_field, text_at};
use super::{NodeContext, NodeType};
use crate::flow::error::{ConfigurationError, NodeExecutionError};
use crate::flow::node::{Action, LlmNodeCore, Node, NodeCategory, NodeSchema};
use crate::flow::state::{SharedState, INPUT_TEXT};
use crate::policy::config::ModelRole;

const DEFAULT_OUTPUT_KEY: &str = "sentiment";

const LABELS: [&str; 4] = [
    actions::POSITIVE,
    actions::NEGATIVE,
    actions::NEUTRAL,
    actions::MIXED,
];

const SYSTEM_PROMPT: &str = "Assess the overall sentiment of the text.\n\n\
Respond with a YAML mapping containing:\n\
sentiment: positive, negative, neutral or mixed\n\
confidence: a number between 0.0 and 1.0\n\
reasoning: one sentence";

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct SentimentParams {
    input_key: Option<String>,
    output_key: Option<String>,
    model: Option<String>,
}

/// Labels text positive, negative, neutral or mixed
///
/// Answers outside the four labels route `neutral`.
pub struct SentimentNode {
    id: String,
    schema: NodeSchema,
    input_key: String,
    output_key: String,
    core: LlmNodeCore,
}

fn label_for(answer: &str) -> &'static str {
    let answer = answer.trim().to_ascii_lowercase();
    LABELS
        .iter()
        .find(|label| **label == answer)
        .copied()
        .unwrap_or(actions::NEUTRAL)
}

impl NodeType for SentimentNode {
    const NAME: &'static str = "SentimentNode";

    fn type_schema() -> NodeSchema {
        NodeSchema::from_params::<SentimentParams>(
            Self::NAME,
            "Classify the sentiment of the text",
            NodeCategory::Llm,
            &LABELS,
        )
    }

    fn build(id: &str, params: &Value, ctx: &NodeContext) -> Result<Self, ConfigurationError> {
        let params: SentimentParams = parse_params(id, params)?;
        Ok(Self {
            id: id.to_string(),
            schema: Self::type_schema(),
            core: ctx
                .llm_core(id, ModelRole::Sentiment, params.model.as_deref())?
                .with_response_schema(answer_schema(
                    json!({
                        "sentiment": {"type": "string", "enum": LABELS},
                        "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                        "reasoning": {"type": "string"},
                    }),
                    &["sentiment", "confidence"],
                )),
            input_key: params.input_key.unwrap_or_else(|| INPUT_TEXT.to_string()),
            output_key: params
                .output_key
                .unwrap_or_else(|| DEFAULT_OUTPUT_KEY.to_string()),
        })
    }
}

#[async_trait]
impl Node for SentimentNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn schema(&self) -> &NodeSchema {
        &self.schema
    }

    fn output_key(&self) -> Option<&str> {
        Some(&self.output_key)
    }

    fn prepare(&self, shared: &SharedState) -> Value {
        Value::String(text_at(shared, &self.input_key))
    }

    async fn execute(&self, input: Value) -> Result<Value, NodeExecutionError> {
        let prompt = format!(
            "Analyze the sentiment of this text:\n\n{}",
            input.as_str().unwrap_or_default()
        );
        self.core
            .call(&prompt, Some(SYSTEM_PROMPT), &format!("sentiment_{}", self.id))
            .await
    }

    fn route(&self, shared: &mut SharedState, _input: &Value, output: Value) -> Action {
        let label = label_for(&string_field(&output, "sentiment"));
        shared.update(
            &self.output_key,
            json!({
                "sentiment": label,
                "confidence": confidence_field(&output, "confidence"),
                "reasoning": string_field(&output, "reasoning"),
            }),
        );
        Action::from(label)
    }

    fn recover(&self, shared: &mut SharedState, error: &NodeExecutionError) -> Option<Action> {
        log::warn!("Sentiment {} failed, treating text as neutral: {}", self.id, error);
        shared.update(
            &self.output_key,
            json!({
                "sentiment": actions::NEUTRAL,
                "confidence": 0.0,
                "reasoning": error.to_string(),
            }),
        );
        Some(Action::from(actions::NEUTRAL))
    }
}
