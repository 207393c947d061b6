// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{actions, parse_params, text_at, NodeContext, NodeType};
use crate::flow::error::{ConfigurationError, NodeExecutionError};
use crate::flow::node::{Action, Node, NodeCategory, NodeSchema};
use crate::flow::state::{SharedState, INPUT_TEXT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum LengthUnit {
    #[default]
    Chars,
    Words,
}

impl LengthUnit {
    fn measure(self, text: &str) -> usize {
        match self {
            Self::Chars => text.chars().count(),
            Self::Words => text.split_whitespace().count(),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct LengthGateParams {
    /// Shorter than this is too_short
    #[serde(default)]
    min_length: usize,
    /// Longer than this is too_long
    max_length: Option<usize>,
    /// chars or words
    #[serde(default)]
    unit: LengthUnit,
    input_key: Option<String>,
    output_key: Option<String>,
}

/// Buckets text length against inclusive bounds
pub struct LengthGateNode {
    id: String,
    schema: NodeSchema,
    min_length: usize,
    max_length: Option<usize>,
    unit: LengthUnit,
    input_key: String,
    output_key: String,
}

impl LengthGateNode {
    pub fn new(
        id: &str,
        min_length: usize,
        max_length: Option<usize>,
        unit: LengthUnit,
    ) -> Result<Self, ConfigurationError> {
        if let Some(max) = max_length {
            if min_length > max {
                return Err(ConfigurationError::invalid_params(
                    id,
                    format!("min_length {} exceeds max_length {}", min_length, max),
                ));
            }
        }
        Ok(Self {
            id: id.to_string(),
            schema: Self::type_schema(),
            min_length,
            max_length,
            unit,
            input_key: INPUT_TEXT.to_string(),
            output_key: id.to_string(),
        })
    }

    fn bucket(&self, length: usize) -> &'static str {
        if length < self.min_length {
            actions::TOO_SHORT
        } else if self.max_length.is_some_and(|max| length > max) {
            actions::TOO_LONG
        } else {
            actions::WITHIN_RANGE
        }
    }
}

impl NodeType for LengthGateNode {
    const NAME: &'static str = "LengthGateNode";

    fn type_schema() -> NodeSchema {
        NodeSchema::from_params::<LengthGateParams>(
            Self::NAME,
            "Route on text length in characters or words",
            NodeCategory::Deterministic,
            &[actions::TOO_SHORT, actions::WITHIN_RANGE, actions::TOO_LONG],
        )
    }

    fn build(id: &str, params: &Value, _ctx: &NodeContext) -> Result<Self, ConfigurationError> {
        let params: LengthGateParams = parse_params(id, params)?;
        let mut node = Self::new(id, params.min_length, params.max_length, params.unit)?;
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
impl Node for LengthGateNode {
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
        let length = self.unit.measure(input.as_str().unwrap_or_default());
        Ok(json!({
            "length": length,
            "unit": self.unit,
            "bucket": self.bucket(length),
        }))
    }

    fn route(&self, shared: &mut SharedState, _input: &Value, output: Value) -> Action {
        let length = output["length"].as_u64().unwrap_or(0) as usize;
        shared.update(&self.output_key, output);
        Action::from(self.bucket(length))
    }
}
