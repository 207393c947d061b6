// SPDX-License-Identifier: MIT

//! Node module - the unit of work in a workflow graph
//!
//! Every node runs in three phases against the run's [`SharedState`]:
//! - `prepare` projects what the node needs out of state (never fails)
//! - `execute` does the work (the only phase that may fail)
//! - `route` writes results back and returns the action selecting the next node

mod llm;

pub use llm::{LlmNodeCore, LlmSettings};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::flow::error::NodeExecutionError;
use crate::flow::state::SharedState;

/// Action every node may fall back to
pub const DEFAULT_ACTION: &str = "default";

/// Label a node returns to pick its outgoing edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(String);

impl Action {
    pub fn new(action: impl Into<String>) -> Self {
        Self(action.into())
    }

    pub fn default_action() -> Self {
        Self::new(DEFAULT_ACTION)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_ACTION
    }
}

impl From<&str> for Action {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for Action {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<&str> for Action {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Broad kind of a node, used when documenting node types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeCategory {
    Llm,
    Deterministic,
    Routing,
    /// Created by the policy compiler, not offered to workflow authors
    Internal,
}

/// One constructor parameter of a node type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Describes a node type or instance: what it takes and which actions it can return
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSchema {
    pub name: String,
    pub description: String,
    pub category: NodeCategory,
    pub parameters: Vec<NodeParameter>,
    pub actions: Vec<String>,
    /// Whether workflow authors (and the policy parser prompt) may use this type
    pub parser_exposed: bool,
}

impl NodeSchema {
    /// Build a schema whose parameter list is derived from a params struct
    pub fn from_params<P: JsonSchema>(
        name: &str,
        description: &str,
        category: NodeCategory,
        actions: &[&str],
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            category,
            parameters: parameters_of::<P>(),
            actions: actions.iter().map(|a| a.to_string()).collect(),
            parser_exposed: category != NodeCategory::Internal,
        }
    }

    pub fn declares(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == action)
    }

    /// Same schema with a different action set (for instances whose actions depend on params)
    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions = actions.into_iter().map(Into::into).collect();
        self
    }
}

/// Extract the parameter list from a params struct's JSON schema
fn parameters_of<P: JsonSchema>() -> Vec<NodeParameter> {
    let root = schemars::schema_for!(P);
    let Ok(schema) = serde_json::to_value(&root) else {
        return Vec::new();
    };

    let required: Vec<&str> = schema["required"]
        .as_array()
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut parameters: Vec<NodeParameter> = schema["properties"]
        .as_object()
        .map(|props| {
            props
                .iter()
                .map(|(name, prop)| NodeParameter {
                    name: name.clone(),
                    param_type: describe_type(prop),
                    description: prop["description"]
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| default_description(name)),
                    required: required.contains(&name.as_str()),
                    default: prop.get("default").cloned(),
                })
                .collect()
        })
        .unwrap_or_default();

    parameters.sort_by(|a, b| b.required.cmp(&a.required).then(a.name.cmp(&b.name)));
    parameters
}

fn describe_type(prop: &Value) -> String {
    match &prop["type"] {
        Value::String(t) if t == "array" => {
            format!("list[{}]", describe_type(&prop["items"]))
        }
        Value::String(t) => t.clone(),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .filter(|t| *t != "null")
            .collect::<Vec<_>>()
            .join(" | "),
        _ => prop["$ref"]
            .as_str()
            .and_then(|r| r.rsplit('/').next())
            .or_else(|| prop["allOf"][0]["$ref"].as_str().and_then(|r| r.rsplit('/').next()))
            .unwrap_or("any")
            .to_string(),
    }
}

fn default_description(name: &str) -> String {
    let words = name.replace('_', " ");
    let mut chars = words.chars();
    match chars.next() {
        Some(first) => format!("{}{} parameter", first.to_uppercase(), chars.as_str()),
        None => String::new(),
    }
}

/// Core trait for all workflow nodes
#[async_trait]
pub trait Node: Send + Sync {
    /// Node id within its graph (for clause nodes, the clause id)
    fn id(&self) -> &str;

    /// Instance schema; `route` only ever returns actions listed here
    fn schema(&self) -> &NodeSchema;

    /// State key this node writes with overwrite semantics, if any
    fn output_key(&self) -> Option<&str> {
        None
    }

    /// Read what `execute` needs; missing keys fall back to defaults
    fn prepare(&self, shared: &SharedState) -> Value;

    async fn execute(&self, input: Value) -> Result<Value, NodeExecutionError>;

    /// Write results into state and choose the next action
    fn route(&self, shared: &mut SharedState, input: &Value, output: Value) -> Action;

    /// Turn an execute failure into a degraded result, or `None` to fail the run
    fn recover(&self, _shared: &mut SharedState, _error: &NodeExecutionError) -> Option<Action> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Params used to check schema derivation
    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct SampleParams {
        /// Regex patterns to look for
        patterns: Vec<String>,
        #[serde(default)]
        case_sensitive: bool,
        threshold: Option<f64>,
    }

    #[test]
    fn test_schema_parameters_from_params_struct() {
        let schema = NodeSchema::from_params::<SampleParams>(
            "SampleNode",
            "A sample",
            NodeCategory::Deterministic,
            &["matched", "not_matched"],
        );

        assert!(schema.parser_exposed);
        assert_eq!(schema.parameters.len(), 3);

        let patterns = &schema.parameters[0];
        assert_eq!(patterns.name, "patterns");
        assert!(patterns.required);
        assert_eq!(patterns.param_type, "list[string]");
        assert_eq!(patterns.description, "Regex patterns to look for");

        let case = schema
            .parameters
            .iter()
            .find(|p| p.name == "case_sensitive")
            .unwrap();
        assert!(!case.required);
        assert_eq!(case.description, "Case sensitive parameter");

        let threshold = schema
            .parameters
            .iter()
            .find(|p| p.name == "threshold")
            .unwrap();
        assert_eq!(threshold.param_type, "number");
    }

    #[test]
    fn test_internal_nodes_are_not_exposed() {
        let schema = NodeSchema::from_params::<SampleParams>(
            "InternalNode",
            "",
            NodeCategory::Internal,
            &[DEFAULT_ACTION],
        );
        assert!(!schema.parser_exposed);
        assert!(schema.declares("default"));
        assert!(!schema.declares("matched"));
    }

    #[test]
    fn test_with_actions_replaces_action_set() {
        let schema = NodeSchema::from_params::<SampleParams>(
            "Classifier",
            "",
            NodeCategory::Llm,
            &["<category>"],
        )
        .with_actions(["advice", "marketing"]);
        assert_eq!(schema.actions, vec!["advice", "marketing"]);
    }

    #[test]
    fn test_action_helpers() {
        let action = Action::from("matched");
        assert_eq!(action, "matched");
        assert_eq!(action.to_string(), "matched");
        assert!(Action::default_action().is_default());
        assert_eq!(
            serde_json::to_value(&action).unwrap(),
            serde_json::json!("matched")
        );
    }
}
