// SPDX-License-Identifier: MIT

//! YAML schema types for workflow definitions
//!
//! A workflow is a flat list of nodes. Each node names its type, its
//! constructor params and a route table from action to next node id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::flow::state::StateSchema;
use crate::policy::models::YamlDocument;

/// Top-level workflow definition
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Entry node id
    pub start_node: String,
    /// Router cycle guard; falls back to the configured limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<usize>,
    /// Extra state keys and their reducers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateSchema>,
    pub nodes: Vec<NodeConfig>,
}

impl YamlDocument for WorkflowDefinition {}

impl WorkflowDefinition {
    pub fn node(&self, id: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut NodeConfig> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    /// Nodes of one type, in definition order
    pub fn nodes_of_type<'a>(&'a self, node_type: &'a str) -> impl Iterator<Item = &'a NodeConfig> {
        self.nodes.iter().filter(move |n| n.node_type == node_type)
    }
}

/// A node in a workflow
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeConfig {
    /// Unique node identifier (the clause id for clause nodes)
    pub id: String,
    /// Registered node type name, e.g. `PatternMatchNode`
    #[serde(rename = "type")]
    pub node_type: String,
    /// Constructor parameters
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    /// Action -> next node id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub routes: BTreeMap<String, String>,
}

impl NodeConfig {
    pub fn new(id: &str, node_type: &str, params: Value) -> Self {
        Self {
            id: id.to_string(),
            node_type: node_type.to_string(),
            params,
            routes: BTreeMap::new(),
        }
    }

    pub fn route(mut self, action: &str, target: &str) -> Self {
        self.routes.insert(action.to_string(), target.to_string());
        self
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }
}
