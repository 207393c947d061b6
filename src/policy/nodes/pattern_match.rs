// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{actions, parse_params, text_at, NodeContext, NodeType};
use crate::flow::error::{ConfigurationError, NodeExecutionError};
use crate::flow::node::{Action, Node, NodeCategory, NodeSchema};
use crate::flow::state::{SharedState, INPUT_TEXT};

/// How pattern hits turn into a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// At least one pattern matches
    #[default]
    Any,
    /// Every pattern matches
    All,
    /// No pattern matches
    None,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct PatternMatchParams {
    /// Regular expressions to look for
    patterns: Vec<String>,
    /// any, all or none
    #[serde(default)]
    mode: MatchMode,
    #[serde(default)]
    case_sensitive: bool,
    /// State key holding the text (default input_text)
    input_key: Option<String>,
    /// State key for the result (default: the node id)
    output_key: Option<String>,
}

/// Regex set match with any/all/none semantics
pub struct PatternMatchNode {
    id: String,
    schema: NodeSchema,
    patterns: Vec<Regex>,
    mode: MatchMode,
    input_key: String,
    output_key: String,
}

impl PatternMatchNode {
    pub fn new(
        id: &str,
        patterns: &[&str],
        mode: MatchMode,
        case_sensitive: bool,
    ) -> Result<Self, ConfigurationError> {
        if patterns.is_empty() {
            return Err(ConfigurationError::invalid_params(
                id,
                "at least one pattern is required",
            ));
        }

        let patterns = patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(!case_sensitive)
                    .build()
                    .map_err(|e| ConfigurationError::InvalidPattern {
                        node: id.to_string(),
                        pattern: p.to_string(),
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: id.to_string(),
            schema: Self::type_schema(),
            patterns,
            mode,
            input_key: INPUT_TEXT.to_string(),
            output_key: id.to_string(),
        })
    }

    fn evaluate(&self, text: &str) -> (bool, Vec<String>) {
        let hits: Vec<String> = self
            .patterns
            .iter()
            .filter(|re| re.is_match(text))
            .map(|re| re.as_str().to_string())
            .collect();

        let matched = match self.mode {
            MatchMode::Any => !hits.is_empty(),
            MatchMode::All => hits.len() == self.patterns.len(),
            MatchMode::None => hits.is_empty(),
        };
        (matched, hits)
    }
}

impl NodeType for PatternMatchNode {
    const NAME: &'static str = "PatternMatchNode";

    fn type_schema() -> NodeSchema {
        NodeSchema::from_params::<PatternMatchParams>(
            Self::NAME,
            "Match text against regular expressions (any, all or none must match)",
            NodeCategory::Deterministic,
            &[actions::MATCHED, actions::NOT_MATCHED],
        )
    }

    fn build(id: &str, params: &Value, _ctx: &NodeContext) -> Result<Self, ConfigurationError> {
        let params: PatternMatchParams = parse_params(id, params)?;
        let patterns: Vec<&str> = params.patterns.iter().map(String::as_str).collect();
        let mut node = Self::new(id, &patterns, params.mode, params.case_sensitive)?;
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
impl Node for PatternMatchNode {
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
        let (matched, hits) = self.evaluate(input.as_str().unwrap_or_default());
        Ok(json!({
            "matched": matched,
            "matched_patterns": hits,
        }))
    }

    fn route(&self, shared: &mut SharedState, _input: &Value, output: Value) -> Action {
        let matched = output["matched"].as_bool().unwrap_or(false);
        shared.update(&self.output_key, output);
        if matched {
            Action::from(actions::MATCHED)
        } else {
            Action::from(actions::NOT_MATCHED)
        }
    }
}
