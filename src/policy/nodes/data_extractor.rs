// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use super::{actions, answer_schema, parse_params, text_at, NodeContext, NodeType};
use crate::flow::error::{ConfigurationError, NodeExecutionError};
use crate::flow::node::{Action, LlmNodeCore, Node, NodeCategory, NodeSchema};
use crate::flow::state::{SharedState, INPUT_TEXT};
use crate::policy::config::ModelRole;

const DEFAULT_OUTPUT_KEY: &str = "extracted_data";

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct DataExtractorParams {
    /// Field name to a description of what to extract
    fields: BTreeMap<String, String>,
    input_key: Option<String>,
    output_key: Option<String>,
    model: Option<String>,
}

/// Pulls named fields out of the text
///
/// Every configured field appears in the output; fields the model did not
/// return are null.
pub struct DataExtractorNode {
    id: String,
    schema: NodeSchema,
    fields: Vec<String>,
    system_prompt: String,
    input_key: String,
    output_key: String,
    core: LlmNodeCore,
}

impl NodeType for DataExtractorNode {
    const NAME: &'static str = "DataExtractorNode";

    fn type_schema() -> NodeSchema {
        NodeSchema::from_params::<DataExtractorParams>(
            Self::NAME,
            "Extract named fields from the text",
            NodeCategory::Llm,
            &[actions::DEFAULT],
        )
    }

    fn build(id: &str, params: &Value, ctx: &NodeContext) -> Result<Self, ConfigurationError> {
        let params: DataExtractorParams = parse_params(id, params)?;
        if params.fields.is_empty() {
            return Err(ConfigurationError::invalid_params(
                id,
                "at least one field is required",
            ));
        }

        let listing = params
            .fields
            .iter()
            .map(|(name, description)| format!("{}: {}", name, description))
            .collect::<Vec<_>>()
            .join("\n");
        let system_prompt = format!(
            "Extract the following fields from the text. Use null for anything \
             the text does not state.\n\n{}\n\n\
             Respond with a YAML mapping with exactly these keys.",
            listing
        );

        let properties: Map<String, Value> = params
            .fields
            .iter()
            .map(|(name, description)| (name.clone(), json!({"description": description})))
            .collect();
        let required: Vec<&str> = params.fields.keys().map(String::as_str).collect();
        let response_schema = answer_schema(Value::Object(properties), &required);

        Ok(Self {
            id: id.to_string(),
            schema: Self::type_schema(),
            core: ctx
                .llm_core(id, ModelRole::DataExtractor, params.model.as_deref())?
                .with_response_schema(response_schema),
            fields: params.fields.into_keys().collect(),
            system_prompt,
            input_key: params.input_key.unwrap_or_else(|| INPUT_TEXT.to_string()),
            output_key: params
                .output_key
                .unwrap_or_else(|| DEFAULT_OUTPUT_KEY.to_string()),
        })
    }
}

#[async_trait]
impl Node for DataExtractorNode {
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
            "Extract data from this text:\n\n{}",
            input.as_str().unwrap_or_default()
        );
        self.core
            .call(&prompt, Some(&self.system_prompt), &format!("extractor_{}", self.id))
            .await
    }

    fn route(&self, shared: &mut SharedState, _input: &Value, output: Value) -> Action {
        let extracted: Map<String, Value> = self
            .fields
            .iter()
            .map(|field| (field.clone(), output.get(field).cloned().unwrap_or(Value::Null)))
            .collect();
        shared.update(&self.output_key, Value::Object(extracted));
        Action::default_action()
    }

    fn recover(&self, shared: &mut SharedState, error: &NodeExecutionError) -> Option<Action> {
        log::warn!("Extractor {} failed, leaving fields empty: {}", self.id, error);
        Some(self.route(shared, &Value::Null, Value::Null))
    }
}
