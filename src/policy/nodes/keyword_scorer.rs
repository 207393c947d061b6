// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use super::{actions, parse_params, text_at, NodeContext, NodeType};
use crate::flow::error::{ConfigurationError, NodeExecutionError};
use crate::flow::node::{Action, Node, NodeCategory, NodeSchema};
use crate::flow::state::{SharedState, INPUT_TEXT};

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct KeywordScorerParams {
    /// Keyword to weight; each whole-word occurrence adds its weight
    keywords: BTreeMap<String, f64>,
    /// Score at or above which the text counts as a hit
    threshold: f64,
    #[serde(default)]
    case_sensitive: bool,
    input_key: Option<String>,
    output_key: Option<String>,
}

/// Weighted keyword sum compared against a threshold
pub struct KeywordScorerNode {
    id: String,
    schema: NodeSchema,
    keywords: Vec<(String, Regex, f64)>,
    threshold: f64,
    input_key: String,
    output_key: String,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Whole-word pattern for a keyword
///
/// `\b` only holds next to a word character, so a keyword such as `C++` or
/// `buy!` gets a boundary on its word side only.
fn keyword_pattern(word: &str) -> String {
    let boundary = |c: Option<char>| if c.is_some_and(is_word_char) { r"\b" } else { "" };
    format!(
        "{}{}{}",
        boundary(word.chars().next()),
        regex::escape(word),
        boundary(word.chars().last())
    )
}

impl KeywordScorerNode {
    pub fn new(
        id: &str,
        keywords: &BTreeMap<String, f64>,
        threshold: f64,
        case_sensitive: bool,
    ) -> Result<Self, ConfigurationError> {
        if keywords.is_empty() {
            return Err(ConfigurationError::invalid_params(
                id,
                "at least one keyword is required",
            ));
        }
        if !threshold.is_finite() {
            return Err(ConfigurationError::invalid_params(id, "threshold must be finite"));
        }

        let keywords = keywords
            .iter()
            .map(|(word, weight)| {
                if word.trim().is_empty() {
                    return Err(ConfigurationError::invalid_params(id, "keywords may not be blank"));
                }
                let re = RegexBuilder::new(&keyword_pattern(word))
                    .case_insensitive(!case_sensitive)
                    .build()
                    .map_err(|e| ConfigurationError::InvalidPattern {
                        node: id.to_string(),
                        pattern: word.clone(),
                        message: e.to_string(),
                    })?;
                Ok((word.clone(), re, *weight))
            })
            .collect::<Result<Vec<_>, ConfigurationError>>()?;

        Ok(Self {
            id: id.to_string(),
            schema: Self::type_schema(),
            keywords,
            threshold,
            input_key: INPUT_TEXT.to_string(),
            output_key: id.to_string(),
        })
    }

    fn score(&self, text: &str) -> (f64, Map<String, Value>) {
        let mut score = 0.0;
        let mut hits = Map::new();
        for (word, re, weight) in &self.keywords {
            let count = re.find_iter(text).count();
            if count > 0 {
                score += count as f64 * weight;
                hits.insert(word.clone(), json!(count));
            }
        }
        (score, hits)
    }
}

impl NodeType for KeywordScorerNode {
    const NAME: &'static str = "KeywordScorerNode";

    fn type_schema() -> NodeSchema {
        NodeSchema::from_params::<KeywordScorerParams>(
            Self::NAME,
            "Score text by weighted keyword occurrences and compare with a threshold",
            NodeCategory::Deterministic,
            &[actions::ABOVE_THRESHOLD, actions::BELOW_THRESHOLD],
        )
    }

    fn build(id: &str, params: &Value, _ctx: &NodeContext) -> Result<Self, ConfigurationError> {
        let params: KeywordScorerParams = parse_params(id, params)?;
        let mut node = Self::new(id, &params.keywords, params.threshold, params.case_sensitive)?;
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
impl Node for KeywordScorerNode {
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
        let (score, hits) = self.score(input.as_str().unwrap_or_default());
        Ok(json!({
            "score": score,
            "hits": hits,
            "threshold": self.threshold,
        }))
    }

    fn route(&self, shared: &mut SharedState, _input: &Value, output: Value) -> Action {
        let score = output["score"].as_f64().unwrap_or(0.0);
        shared.update(&self.output_key, output);
        if score >= self.threshold {
            Action::from(actions::ABOVE_THRESHOLD)
        } else {
            Action::from(actions::BELOW_THRESHOLD)
        }
    }
}
