// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::{actions, parse_params, text_at, NodeContext, NodeType};
use crate::flow::error::{ConfigurationError, NodeExecutionError};
use crate::flow::node::{Action, Node, NodeCategory, NodeSchema};
use crate::flow::state::{SharedState, INPUT_TEXT};

static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));
static HTML_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]*>").expect("html tag regex is valid"));

/// One text normalization step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformOp {
    Lowercase,
    Uppercase,
    Trim,
    NormalizeWhitespace,
    StripPunctuation,
    StripHtml,
    /// Keep at most this many characters
    Truncate(usize),
}

impl TransformOp {
    pub fn apply(self, text: &str) -> String {
        match self {
            Self::Lowercase => text.to_lowercase(),
            Self::Uppercase => text.to_uppercase(),
            Self::Trim => text.trim().to_string(),
            Self::NormalizeWhitespace => WHITESPACE_RE.replace_all(text.trim(), " ").into_owned(),
            Self::StripPunctuation => text.chars().filter(|c| !c.is_ascii_punctuation()).collect(),
            Self::StripHtml => HTML_TAG_RE.replace_all(text, "").into_owned(),
            Self::Truncate(n) => text.chars().take(n).collect(),
        }
    }
}

impl FromStr for TransformOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "lowercase" => Ok(Self::Lowercase),
            "uppercase" => Ok(Self::Uppercase),
            "trim" => Ok(Self::Trim),
            "normalize_whitespace" => Ok(Self::NormalizeWhitespace),
            "strip_punctuation" => Ok(Self::StripPunctuation),
            "strip_html" => Ok(Self::StripHtml),
            other => match other.strip_prefix("truncate:") {
                Some(n) => n
                    .trim()
                    .parse()
                    .map(Self::Truncate)
                    .map_err(|_| format!("invalid truncate length in '{}'", other)),
                None => Err(format!("unknown transform operation '{}'", other)),
            },
        }
    }
}

impl fmt::Display for TransformOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lowercase => f.write_str("lowercase"),
            Self::Uppercase => f.write_str("uppercase"),
            Self::Trim => f.write_str("trim"),
            Self::NormalizeWhitespace => f.write_str("normalize_whitespace"),
            Self::StripPunctuation => f.write_str("strip_punctuation"),
            Self::StripHtml => f.write_str("strip_html"),
            Self::Truncate(n) => write!(f, "truncate:{}", n),
        }
    }
}

impl Serialize for TransformOp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TransformOp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct TransformParams {
    /// Applied in order: lowercase, uppercase, trim, normalize_whitespace,
    /// strip_punctuation, strip_html, truncate:<n>
    operations: Vec<String>,
    input_key: Option<String>,
    /// Where the result goes (default input_text)
    output_key: Option<String>,
}

/// Applies normalization operations in the configured order
pub struct TransformNode {
    id: String,
    schema: NodeSchema,
    operations: Vec<TransformOp>,
    input_key: String,
    output_key: String,
}

impl TransformNode {
    pub fn new(id: &str, operations: Vec<TransformOp>) -> Self {
        Self {
            id: id.to_string(),
            schema: Self::type_schema(),
            operations,
            input_key: INPUT_TEXT.to_string(),
            output_key: INPUT_TEXT.to_string(),
        }
    }

    pub fn apply(&self, text: &str) -> String {
        self.operations
            .iter()
            .fold(text.to_string(), |acc, op| op.apply(&acc))
    }
}

impl NodeType for TransformNode {
    const NAME: &'static str = "TransformNode";

    fn type_schema() -> NodeSchema {
        NodeSchema::from_params::<TransformParams>(
            Self::NAME,
            "Normalize text with an ordered list of operations",
            NodeCategory::Deterministic,
            &[actions::DEFAULT],
        )
    }

    fn build(id: &str, params: &Value, _ctx: &NodeContext) -> Result<Self, ConfigurationError> {
        let params: TransformParams = parse_params(id, params)?;
        let operations = params
            .operations
            .iter()
            .map(|op| op.parse())
            .collect::<Result<Vec<TransformOp>, String>>()
            .map_err(|e| ConfigurationError::invalid_params(id, e))?;

        let mut node = Self::new(id, operations);
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
impl Node for TransformNode {
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
        Ok(Value::String(self.apply(input.as_str().unwrap_or_default())))
    }

    fn route(&self, shared: &mut SharedState, _input: &Value, output: Value) -> Action {
        shared.update(&self.output_key, output);
        Action::default_action()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operations_apply_in_order() {
        let node = TransformNode::new(
            "t",
            vec![
                TransformOp::StripHtml,
                TransformOp::NormalizeWhitespace,
                TransformOp::Lowercase,
                TransformOp::StripPunctuation,
            ],
        );
        assert_eq!(
            node.apply("  <p>Buy   XYZ,\n NOW!</p> "),
            "buy xyz now"
        );
    }

    #[test]
    fn test_order_matters() {
        let truncate_first = TransformNode::new("t", vec![TransformOp::Truncate(3), TransformOp::Trim]);
        let trim_first = TransformNode::new("t", vec![TransformOp::Trim, TransformOp::Truncate(3)]);
        assert_eq!(truncate_first.apply("  abcdef"), "");
        assert_eq!(trim_first.apply("  abcdef"), "abc");
    }

    #[test]
    fn test_parse_operations() {
        assert_eq!("truncate:10".parse::<TransformOp>(), Ok(TransformOp::Truncate(10)));
        assert_eq!("uppercase".parse::<TransformOp>(), Ok(TransformOp::Uppercase));
        assert!("truncate:x".parse::<TransformOp>().is_err());
        assert!("reverse".parse::<TransformOp>().is_err());
        assert_eq!(TransformOp::Truncate(4).to_string(), "truncate:4");
    }

    #[tokio::test]
    async fn test_writes_input_text_by_default() {
        let ctx = NodeContext::new(Default::default());
        let node =
            TransformNode::build("t", &json!({"operations": ["uppercase"]}), &ctx).unwrap();

        let mut shared = SharedState::empty();
        shared.set(INPUT_TEXT, json!("hello"));
        let input = node.prepare(&shared);
        let output = node.execute(input.clone()).await.unwrap();
        assert!(node.route(&mut shared, &input, output).is_default());
        assert_eq!(shared.get_str(INPUT_TEXT), Some("HELLO"));
    }

    #[test]
    fn test_unknown_operation_is_configuration_error() {
        let ctx = NodeContext::new(Default::default());
        let err = TransformNode::build("t", &json!({"operations": ["shout"]}), &ctx)
            .err()
            .unwrap();
        assert!(matches!(err, ConfigurationError::InvalidParams { .. }));
    }
}
