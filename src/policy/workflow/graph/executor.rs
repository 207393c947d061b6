// SPDX-License-Identifier: MIT

//! Graph workflow executor
//!
//! The router walks the graph one node at a time: prepare, execute, route,
//! then follow the edge for the returned action. Nodes run strictly in
//! sequence within a run; separate runs may share the graph concurrently.

use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use super::types::{TraceStep, WorkflowRun};
use crate::flow::error::WorkflowExecutionError;
use crate::flow::node::{Action, Node, DEFAULT_ACTION};
use crate::flow::state::{SharedState, StateSchema, ERRORS, INPUT_TEXT};

/// Compiled, validated workflow ready for execution
pub struct WorkflowGraph {
    name: String,
    description: String,
    start_node: String,
    nodes: HashMap<String, Arc<dyn Node>>,
    /// Definition order, for listing
    node_order: Vec<String>,
    routes: HashMap<String, BTreeMap<String, String>>,
    state_schema: StateSchema,
    max_steps: usize,
}

impl WorkflowGraph {
    /// Assemble a graph; callers are expected to have validated the wiring
    pub(crate) fn new(
        name: String,
        description: String,
        start_node: String,
        nodes: Vec<(Arc<dyn Node>, BTreeMap<String, String>)>,
        state_schema: StateSchema,
        max_steps: usize,
    ) -> Self {
        let node_order = nodes.iter().map(|(n, _)| n.id().to_string()).collect();
        let mut node_map = HashMap::new();
        let mut routes = HashMap::new();
        for (node, node_routes) in nodes {
            routes.insert(node.id().to_string(), node_routes);
            node_map.insert(node.id().to_string(), node);
        }

        Self {
            name,
            description,
            start_node,
            nodes: node_map,
            node_order,
            routes,
            state_schema,
            max_steps,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn start_node(&self) -> &str {
        &self.start_node
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn state_schema(&self) -> &StateSchema {
        &self.state_schema
    }

    pub fn node(&self, id: &str) -> Option<&Arc<dyn Node>> {
        self.nodes.get(id)
    }

    pub fn node_ids(&self) -> Vec<&str> {
        self.node_order.iter().map(String::as_str).collect()
    }

    pub fn routes(&self, id: &str) -> Option<&BTreeMap<String, String>> {
        self.routes.get(id)
    }

    /// Fresh state for one run
    pub fn new_state(&self) -> SharedState {
        SharedState::new(&self.state_schema)
    }

    /// Run the graph over a piece of text
    pub async fn run(&self, input_text: &str) -> Result<WorkflowRun, WorkflowExecutionError> {
        let mut state = self.new_state();
        state.set(INPUT_TEXT, json!(input_text));
        self.run_with_state(state).await
    }

    /// Run the graph from a pre-seeded state
    pub async fn run_with_state(
        &self,
        mut state: SharedState,
    ) -> Result<WorkflowRun, WorkflowExecutionError> {
        let mut current = self.start_node.clone();
        let mut trace: Vec<TraceStep> = Vec::new();

        loop {
            if trace.len() >= self.max_steps {
                log::error!(
                    "Workflow '{}' exceeded {} steps at node {}",
                    self.name,
                    self.max_steps,
                    current
                );
                return Err(WorkflowExecutionError::StepLimitExceeded {
                    limit: self.max_steps,
                    last_node: current,
                });
            }

            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| WorkflowExecutionError::UnknownNode(current.clone()))?;

            log::info!("Executing node: {}", current);
            let started = Instant::now();
            let input = node.prepare(&state);

            let (action, error) = match node.execute(input.clone()).await {
                Ok(output) => (node.route(&mut state, &input, output), None),
                Err(e) => match node.recover(&mut state, &e) {
                    Some(action) => {
                        log::warn!("Node {} recovered from failure: {}", current, e);
                        state.update(ERRORS, json!({"node": current, "error": e.to_string()}));
                        (action, Some(e.to_string()))
                    }
                    None => {
                        log::error!("Node {} failed: {}", current, e);
                        return Err(WorkflowExecutionError::NodeFailed {
                            node: current,
                            source: e,
                        });
                    }
                },
            };

            if !node.schema().declares(action.as_str()) {
                return Err(WorkflowExecutionError::UndeclaredAction {
                    node: current,
                    action: action.to_string(),
                });
            }

            trace.push(TraceStep {
                step: trace.len() + 1,
                node: current.clone(),
                action: action.clone(),
                error,
                duration_ms: started.elapsed().as_millis() as u64,
            });

            match self.next_node(&current, &action)? {
                Some(next) => {
                    log::debug!("{} --{}--> {}", current, action, next);
                    current = next;
                }
                None => {
                    log::info!(
                        "Workflow '{}' finished at {} ({}) after {} step(s)",
                        self.name,
                        current,
                        action,
                        trace.len()
                    );
                    return Ok(WorkflowRun {
                        state,
                        steps: trace.len(),
                        trace,
                        final_node: current,
                        final_action: action,
                    });
                }
            }
        }
    }

    /// Edge for an action: exact route, then the `default` route
    ///
    /// A node without any routes is terminal. A node with routes but no
    /// match for the action is a wiring error.
    fn next_node(
        &self,
        node: &str,
        action: &Action,
    ) -> Result<Option<String>, WorkflowExecutionError> {
        let routes = match self.routes.get(node) {
            Some(routes) if !routes.is_empty() => routes,
            _ => return Ok(None),
        };

        routes
            .get(action.as_str())
            .or_else(|| routes.get(DEFAULT_ACTION))
            .cloned()
            .map(Some)
            .ok_or_else(|| WorkflowExecutionError::MissingTransition {
                node: node.to_string(),
                action: action.to_string(),
            })
    }
}
