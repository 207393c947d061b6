// SPDX-License-Identifier: MIT

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::types::NodeConfig;
use crate::flow::error::ConfigurationError;
use crate::flow::node::{Node, NodeSchema};
use crate::policy::nodes::{
    ClassifierNode, ConfidenceGateNode, CriterionEvaluationNode, DataExtractorNode,
    KeywordScorerNode, LengthGateNode, NodeContext, NodeType, PatternMatchNode,
    ResultAggregatorNode, SentimentNode, SubCriterionNode, TransformNode,
};

type Constructor = fn(&str, &Value, &NodeContext) -> Result<Arc<dyn Node>, ConfigurationError>;

#[derive(Clone)]
struct RegisteredType {
    schema: NodeSchema,
    construct: Constructor,
}

fn construct<T: NodeType>(
    id: &str,
    params: &Value,
    ctx: &NodeContext,
) -> Result<Arc<dyn Node>, ConfigurationError> {
    Ok(Arc::new(T::build(id, params, ctx)?))
}

/// Node types available to workflow definitions, by type name
///
/// Built once and handed to the builder; tests can assemble their own.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    types: HashMap<String, RegisteredType>,
}

impl NodeRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in node type
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register::<PatternMatchNode>()
            .register::<KeywordScorerNode>()
            .register::<LengthGateNode>()
            .register::<TransformNode>()
            .register::<ConfidenceGateNode>()
            .register::<ResultAggregatorNode>()
            .register::<ClassifierNode>()
            .register::<SentimentNode>()
            .register::<DataExtractorNode>()
            .register::<CriterionEvaluationNode>()
            .register::<SubCriterionNode>();
        registry
    }

    /// Register a node type; a later registration under the same name wins
    pub fn register<T: NodeType>(&mut self) -> &mut Self {
        self.types.insert(
            T::NAME.to_string(),
            RegisteredType {
                schema: T::type_schema(),
                construct: construct::<T>,
            },
        );
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn schema(&self, name: &str) -> Option<&NodeSchema> {
        self.types.get(name).map(|t| &t.schema)
    }

    /// Registered type names, sorted
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Schemas workflow authors may use, sorted by name
    pub fn parser_schemas(&self) -> Vec<&NodeSchema> {
        let mut schemas: Vec<&NodeSchema> = self
            .types
            .values()
            .map(|t| &t.schema)
            .filter(|s| s.parser_exposed)
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Construct the node a config describes
    pub fn create(
        &self,
        config: &NodeConfig,
        ctx: &NodeContext,
    ) -> Result<Arc<dyn Node>, ConfigurationError> {
        let registered =
            self.types
                .get(&config.node_type)
                .ok_or_else(|| ConfigurationError::UnknownNodeType {
                    node: config.id.clone(),
                    node_type: config.node_type.clone(),
                })?;
        (registered.construct)(&config.id, &config.params, ctx)
    }
}
