// SPDX-License-Identifier: MIT

//! Workflow builder - turns definitions into executable graphs
//!
//! Every wiring problem is reported here, before any node runs: duplicate
//! ids, unknown types, bad params, undeclared route actions, dangling
//! targets, unreachable nodes and clashing output keys.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use super::graph::WorkflowGraph;
use super::loader::WorkflowLoader;
use super::registry::NodeRegistry;
use super::types::WorkflowDefinition;
use crate::flow::error::{ConfigurationError, Result};
use crate::flow::node::{Node, DEFAULT_ACTION};
use crate::flow::state::{ReducerType, StateSchema};
use crate::policy::nodes::NodeContext;

/// Builds [`WorkflowGraph`]s against a registry and a node context
#[derive(Clone)]
pub struct WorkflowBuilder {
    loader: Arc<WorkflowLoader>,
    registry: NodeRegistry,
    context: NodeContext,
}

impl WorkflowBuilder {
    pub fn new(registry: NodeRegistry, context: NodeContext) -> Self {
        Self {
            loader: Arc::new(WorkflowLoader::new()),
            registry,
            context,
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn context(&self) -> &NodeContext {
        &self.context
    }

    /// Load and build a workflow from a YAML file
    pub fn build_file<P: AsRef<Path>>(&self, path: P) -> Result<WorkflowGraph> {
        let def = self.loader.load_workflow(path)?;
        Ok(self.build(&def)?)
    }

    /// Validate a definition and construct its nodes
    pub fn build(&self, def: &WorkflowDefinition) -> std::result::Result<WorkflowGraph, ConfigurationError> {
        let mut seen = HashSet::new();
        for node in &def.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(ConfigurationError::DuplicateNode(node.id.clone()));
            }
        }

        if !seen.contains(def.start_node.as_str()) {
            return Err(ConfigurationError::MissingStartNode(def.start_node.clone()));
        }

        for node in &def.nodes {
            if !self.registry.contains(&node.node_type) {
                return Err(ConfigurationError::UnknownNodeType {
                    node: node.id.clone(),
                    node_type: node.node_type.clone(),
                });
            }
        }

        let mut built: Vec<(Arc<dyn Node>, BTreeMap<String, String>)> =
            Vec::with_capacity(def.nodes.len());
        for config in &def.nodes {
            let node = self.registry.create(config, &self.context)?;
            validate_routes(node.as_ref(), &config.routes, &seen)?;
            built.push((node, config.routes.clone()));
        }

        check_reachability(&def.start_node, &built)?;

        let state_schema = match &def.state {
            Some(extra) => StateSchema::policy_defaults().merged(extra),
            None => StateSchema::policy_defaults(),
        };
        state_schema.validate()?;
        check_output_keys(&built, &state_schema)?;

        let max_steps = def.max_steps.unwrap_or(self.context.config().max_steps);

        log::info!(
            "Built workflow '{}' with {} nodes (start: {}, max steps: {})",
            def.name,
            built.len(),
            def.start_node,
            max_steps
        );

        Ok(WorkflowGraph::new(
            def.name.clone(),
            def.description.clone(),
            def.start_node.clone(),
            built,
            state_schema,
            max_steps,
        ))
    }
}

fn validate_routes(
    node: &dyn Node,
    routes: &BTreeMap<String, String>,
    node_ids: &HashSet<&str>,
) -> std::result::Result<(), ConfigurationError> {
    let schema = node.schema();
    for (action, target) in routes {
        if action != DEFAULT_ACTION && !schema.declares(action) {
            return Err(ConfigurationError::UndeclaredRouteAction {
                node: node.id().to_string(),
                action: action.clone(),
                declared: schema.actions.clone(),
            });
        }
        if !node_ids.contains(target.as_str()) {
            return Err(ConfigurationError::UnknownRouteTarget {
                node: node.id().to_string(),
                action: action.clone(),
                target: target.clone(),
            });
        }
    }
    Ok(())
}

fn check_reachability(
    start: &str,
    nodes: &[(Arc<dyn Node>, BTreeMap<String, String>)],
) -> std::result::Result<(), ConfigurationError> {
    let edges: HashMap<&str, &BTreeMap<String, String>> =
        nodes.iter().map(|(n, r)| (n.id(), r)).collect();

    let mut reached: HashSet<&str> = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(id) = queue.pop_front() {
        if let Some(routes) = edges.get(id) {
            for target in routes.values() {
                if reached.insert(target.as_str()) {
                    queue.push_back(target.as_str());
                }
            }
        }
    }

    match nodes.iter().find(|(n, _)| !reached.contains(n.id())) {
        Some((node, _)) => Err(ConfigurationError::UnreachableNode(node.id().to_string())),
        None => Ok(()),
    }
}

/// Two nodes may share an output key only when the key has a combining reducer
fn check_output_keys(
    nodes: &[(Arc<dyn Node>, BTreeMap<String, String>)],
    schema: &StateSchema,
) -> std::result::Result<(), ConfigurationError> {
    let mut owners: HashMap<&str, &str> = HashMap::new();
    for (node, _) in nodes {
        let Some(key) = node.output_key() else {
            continue;
        };
        if let Some(first) = owners.insert(key, node.id()) {
            if schema.reducer_for(key) == ReducerType::Overwrite {
                return Err(ConfigurationError::OutputKeyCollision {
                    key: key.to_string(),
                    first: first.to_string(),
                    second: node.id().to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::error::PolicyFlowError;
    use crate::policy::config::WorkflowConfig;
    use crate::policy::workflow::types::NodeConfig;
    use serde_json::json;

    fn builder() -> WorkflowBuilder {
        WorkflowBuilder::new(
            NodeRegistry::with_builtin(),
            NodeContext::new(WorkflowConfig::default()),
        )
    }

    fn definition(nodes: Vec<NodeConfig>) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "test".to_string(),
            description: String::new(),
            start_node: nodes[0].id.clone(),
            max_steps: None,
            state: None,
            nodes,
        }
    }

    fn pattern(id: &str) -> NodeConfig {
        NodeConfig::new(id, "PatternMatchNode", json!({"patterns": ["buy"]}))
    }

    fn length(id: &str) -> NodeConfig {
        NodeConfig::new(id, "LengthGateNode", json!({"min_length": 1}))
    }

    #[tokio::test]
    async fn test_build_and_run_deterministic_workflow() {
        let def = definition(vec![
            pattern("advice")
                .route("matched", "flagged")
                .route("not_matched", "clean"),
            length("flagged"),
            length("clean"),
        ]);
        let graph = builder().build(&def).unwrap();
        assert_eq!(graph.max_steps(), WorkflowConfig::default().max_steps);

        let run = graph.run("You should BUY now").await.unwrap();
        assert_eq!(run.path(), vec!["advice", "flagged"]);
        assert_eq!(run.state.get_path("advice.matched"), Some(&json!(true)));

        let run = graph.run("Nothing to see").await.unwrap();
        assert_eq!(run.final_node, "clean");
    }

    #[test]
    fn test_duplicate_node_ids() {
        let def = definition(vec![pattern("a"), pattern("a")]);
        assert_eq!(
            builder().build(&def).err(),
            Some(ConfigurationError::DuplicateNode("a".to_string()))
        );
    }

    #[test]
    fn test_missing_start_node() {
        let mut def = definition(vec![pattern("a")]);
        def.start_node = "nope".to_string();
        assert_eq!(
            builder().build(&def).err(),
            Some(ConfigurationError::MissingStartNode("nope".to_string()))
        );
    }

    #[test]
    fn test_unknown_type() {
        let def = definition(vec![NodeConfig::new("a", "TeleportNode", json!({}))]);
        assert!(matches!(
            builder().build(&def),
            Err(ConfigurationError::UnknownNodeType { node_type, .. }) if node_type == "TeleportNode"
        ));
    }

    #[test]
    fn test_invalid_params_surface_at_build() {
        let def = definition(vec![NodeConfig::new(
            "a",
            "PatternMatchNode",
            json!({"patterns": ["(unclosed"]}),
        )]);
        assert!(matches!(
            builder().build(&def),
            Err(ConfigurationError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_undeclared_route_action() {
        let def = definition(vec![pattern("a").route("maybe", "b"), length("b")]);
        match builder().build(&def) {
            Err(ConfigurationError::UndeclaredRouteAction { action, declared, .. }) => {
                assert_eq!(action, "maybe");
                assert!(declared.contains(&"matched".to_string()));
            }
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    #[test]
    fn test_default_route_is_always_allowed() {
        let def = definition(vec![
            pattern("a").route("matched", "b").route("default", "c"),
            length("b"),
            length("c"),
        ]);
        assert!(builder().build(&def).is_ok());
    }

    #[test]
    fn test_unknown_route_target() {
        let def = definition(vec![pattern("a").route("matched", "ghost")]);
        assert_eq!(
            builder().build(&def).err(),
            Some(ConfigurationError::UnknownRouteTarget {
                node: "a".to_string(),
                action: "matched".to_string(),
                target: "ghost".to_string(),
            })
        );
    }

    #[test]
    fn test_unreachable_node() {
        let def = definition(vec![pattern("a").route("matched", "b"), length("b"), length("island")]);
        assert_eq!(
            builder().build(&def).err(),
            Some(ConfigurationError::UnreachableNode("island".to_string()))
        );
    }

    #[test]
    fn test_output_key_collision_with_overwrite_reducer() {
        let def = definition(vec![
            NodeConfig::new("a", "PatternMatchNode", json!({"patterns": ["x"], "output_key": "hits"}))
                .route("default", "b"),
            NodeConfig::new("b", "PatternMatchNode", json!({"patterns": ["y"], "output_key": "hits"})),
        ]);
        assert_eq!(
            builder().build(&def).err(),
            Some(ConfigurationError::OutputKeyCollision {
                key: "hits".to_string(),
                first: "a".to_string(),
                second: "b".to_string(),
            })
        );
    }

    #[test]
    fn test_shared_output_key_with_append_reducer() {
        let mut def = definition(vec![
            NodeConfig::new("a", "PatternMatchNode", json!({"patterns": ["x"], "output_key": "hits"}))
                .route("default", "b"),
            NodeConfig::new("b", "PatternMatchNode", json!({"patterns": ["y"], "output_key": "hits"})),
        ]);
        def.state = Some(serde_yaml::from_str("hits: { type: array, reducer: append }").unwrap());
        let graph = builder().build(&def).unwrap();
        assert_eq!(
            graph.state_schema().reducer_for("hits"),
            ReducerType::Append
        );
    }

    #[test]
    fn test_state_default_of_wrong_type_is_rejected() {
        let mut def = definition(vec![pattern("a")]);
        def.state = Some(serde_yaml::from_str("threshold: { type: number, default: high }").unwrap());
        assert!(matches!(
            builder().build(&def).err(),
            Some(ConfigurationError::Invalid(message)) if message.contains("threshold")
        ));
    }

    #[test]
    fn test_definition_step_limit_wins() {
        let mut def = definition(vec![pattern("a")]);
        def.max_steps = Some(3);
        assert_eq!(builder().build(&def).unwrap().max_steps(), 3);
    }

    #[test]
    fn test_build_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.yaml");
        std::fs::write(
            &path,
            "name: w\nstart_node: a\nnodes:\n  - id: a\n    type: TransformNode\n    params: { operations: [trim] }\n",
        )
        .unwrap();
        let graph = builder().build_file(&path).unwrap();
        assert_eq!(graph.name(), "w");

        std::fs::write(&path, "name: w\nstart_node: b\nnodes:\n  - id: a\n    type: TransformNode\n").unwrap();
        assert!(matches!(
            builder().build_file(&path),
            Err(PolicyFlowError::Configuration(ConfigurationError::MissingStartNode(_)))
        ));
    }
}
