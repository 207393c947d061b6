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

const DEFAULT_OUTPUT_KEY: &str = "classification";

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct ClassifierParams {
    /// Category names; each becomes an action
    categories: Vec<String>,
    /// Short description per category, passed to the model
    #[serde(default)]
    descriptions: std::collections::BTreeMap<String, String>,
    input_key: Option<String>,
    output_key: Option<String>,
    model: Option<String>,
}

/// Classifies text into one of a fixed set of categories
///
/// Returns the category as its action, or `unclassified` when the model
/// answers with something outside the set or the call fails.
pub struct ClassifierNode {
    id: String,
    schema: NodeSchema,
    categories: Vec<String>,
    system_prompt: String,
    input_key: String,
    output_key: String,
    core: LlmNodeCore,
}

impl ClassifierNode {
    fn resolve(&self, answer: &str) -> &str {
        let answer = answer.trim();
        self.categories
            .iter()
            .find(|c| c.eq_ignore_ascii_case(answer))
            .map(String::as_str)
            .unwrap_or(actions::UNCLASSIFIED)
    }
}

impl NodeType for ClassifierNode {
    const NAME: &'static str = "ClassifierNode";

    fn type_schema() -> NodeSchema {
        NodeSchema::from_params::<ClassifierParams>(
            Self::NAME,
            "Classify text into one of the given categories; the category is the action",
            NodeCategory::Llm,
            &["<category>", actions::UNCLASSIFIED],
        )
    }

    fn build(id: &str, params: &Value, ctx: &NodeContext) -> Result<Self, ConfigurationError> {
        let params: ClassifierParams = parse_params(id, params)?;
        if params.categories.is_empty() {
            return Err(ConfigurationError::invalid_params(
                id,
                "at least one category is required",
            ));
        }
        if params
            .categories
            .iter()
            .any(|c| c.trim().is_empty() || c == actions::UNCLASSIFIED)
        {
            return Err(ConfigurationError::invalid_params(
                id,
                "categories must be non-empty and may not be 'unclassified'",
            ));
        }

        let listing = params
            .categories
            .iter()
            .map(|c| match params.descriptions.get(c) {
                Some(d) => format!("- {}: {}", c, d),
                None => format!("- {}", c),
            })
            .collect::<Vec<_>>()
            .join("\n");
        let system_prompt = format!(
            "Classify the text into exactly one of these categories:\n{}\n\n\
             Respond with a YAML mapping containing:\n\
             category: one of the category names above\n\
             confidence: a number between 0.0 and 1.0\n\
             reasoning: one sentence",
            listing
        );

        let mut schema_actions = params.categories.clone();
        schema_actions.push(actions::UNCLASSIFIED.to_string());

        Ok(Self {
            id: id.to_string(),
            schema: Self::type_schema().with_actions(schema_actions),
            core: ctx
                .llm_core(id, ModelRole::Classifier, params.model.as_deref())?
                .with_response_schema(answer_schema(
                    json!({
                        "category": {"type": "string", "enum": params.categories},
                        "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                        "reasoning": {"type": "string"},
                    }),
                    &["category", "confidence"],
                )),
            categories: params.categories,
            system_prompt,
            input_key: params.input_key.unwrap_or_else(|| INPUT_TEXT.to_string()),
            output_key: params
                .output_key
                .unwrap_or_else(|| DEFAULT_OUTPUT_KEY.to_string()),
        })
    }
}

#[async_trait]
impl Node for ClassifierNode {
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
            "Classify this text:\n\n{}",
            input.as_str().unwrap_or_default()
        );
        self.core
            .call(
                &prompt,
                Some(&self.system_prompt),
                &format!("classifier_{}", self.id),
            )
            .await
    }

    fn route(&self, shared: &mut SharedState, _input: &Value, output: Value) -> Action {
        let category = self.resolve(&string_field(&output, "category")).to_string();
        shared.update(
            &self.output_key,
            json!({
                "category": category,
                "confidence": confidence_field(&output, "confidence"),
                "reasoning": string_field(&output, "reasoning"),
            }),
        );
        Action::new(category)
    }

    fn recover(&self, shared: &mut SharedState, error: &NodeExecutionError) -> Option<Action> {
        log::warn!("Classifier {} failed, routing unclassified: {}", self.id, error);
        shared.update(
            &self.output_key,
            json!({
                "category": actions::UNCLASSIFIED,
                "confidence": 0.0,
                "reasoning": error.to_string(),
            }),
        );
        Some(Action::from(actions::UNCLASSIFIED))
    }
}
