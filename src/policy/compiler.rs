// SPDX-License-Identifier: MIT

//! Policy compiler - clause tree to workflow definition
//!
//! Top-level clauses run in policy order and all feed the root aggregator.
//! A clause with sub-clauses becomes a chain of sub-clause nodes that can
//! jump straight to the parent aggregator once its outcome is decided.

use serde_json::json;
use std::collections::HashSet;

use crate::flow::error::ConfigurationError;
use crate::flow::node::DEFAULT_ACTION;
use crate::policy::models::{Criterion, LogicOperator, ParsedPolicy};
use crate::policy::nodes::{
    actions, CriterionEvaluationNode, NodeType, ResultAggregatorNode, SubCriterionNode,
};
use crate::policy::workflow::types::{NodeConfig, WorkflowDefinition};

/// Id of the aggregator that produces the overall verdict
pub const ROOT_AGGREGATOR: &str = "policy_verdict";

#[derive(Debug, Default, Clone, Copy)]
pub struct PolicyCompiler;

impl PolicyCompiler {
    pub fn new() -> Self {
        Self
    }

    pub fn compile(&self, policy: &ParsedPolicy) -> Result<WorkflowDefinition, ConfigurationError> {
        if policy.criteria.is_empty() {
            return Err(ConfigurationError::Invalid(format!(
                "policy '{}' has no criteria",
                policy.title
            )));
        }
        check_ids(policy)?;

        let mut nodes = Vec::new();
        for (i, criterion) in policy.criteria.iter().enumerate() {
            let next = policy
                .criteria
                .get(i + 1)
                .map(entry_of)
                .unwrap_or(ROOT_AGGREGATOR);

            if criterion.is_leaf() {
                nodes.push(
                    NodeConfig::new(
                        &criterion.id,
                        CriterionEvaluationNode::NAME,
                        json!({
                            "name": criterion.name,
                            "description": criterion.description,
                        }),
                    )
                    .route(DEFAULT_ACTION, next),
                );
            } else {
                emit_group(criterion, next, next, &mut nodes);
            }
        }

        nodes.push(NodeConfig::new(
            ROOT_AGGREGATOR,
            ResultAggregatorNode::NAME,
            json!({
                "children": policy.criteria.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
                "logic": policy.logic,
                "name": policy.title,
                "description": policy.description,
            }),
        ));

        log::debug!(
            "Compiled policy '{}' into {} nodes",
            policy.title,
            nodes.len()
        );

        Ok(WorkflowDefinition {
            name: policy.title.clone(),
            description: policy.description.clone(),
            start_node: entry_of(&policy.criteria[0]).to_string(),
            max_steps: None,
            state: None,
            nodes,
        })
    }
}

/// First node a clause runs
fn entry_of(criterion: &Criterion) -> &str {
    match criterion.sub_criteria.first() {
        Some(first) => entry_of(first),
        None => &criterion.id,
    }
}

/// Sub-clause chain plus the parent's aggregator
fn emit_group(parent: &Criterion, on_satisfied: &str, on_not_satisfied: &str, nodes: &mut Vec<NodeConfig>) {
    let logic = parent.sub_logic();
    let subs = &parent.sub_criteria;

    for (j, sub) in subs.iter().enumerate() {
        let next = subs.get(j + 1).map(entry_of).unwrap_or(parent.id.as_str());

        if sub.is_leaf() {
            let short_circuit = short_circuit_action(logic);
            nodes.push(
                NodeConfig::new(
                    &sub.id,
                    SubCriterionNode::NAME,
                    json!({
                        "name": sub.name,
                        "description": sub.description,
                        "parent_id": parent.id,
                        "parent_name": parent.name,
                        "parent_description": parent.description,
                        "sub_logic": logic,
                    }),
                )
                .route(DEFAULT_ACTION, next)
                .route(short_circuit, &parent.id),
            );
        } else {
            // nested group: its verdict decides like a sub-clause would
            let (satisfied, not_satisfied) = match logic {
                LogicOperator::Any => (parent.id.as_str(), next),
                LogicOperator::All => (next, parent.id.as_str()),
            };
            emit_group(sub, satisfied, not_satisfied, nodes);
        }
    }

    nodes.push(
        NodeConfig::new(
            &parent.id,
            ResultAggregatorNode::NAME,
            json!({
                "children": subs.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
                "logic": logic,
                "name": parent.name,
                "description": parent.description,
            }),
        )
        .route(actions::SATISFIED, on_satisfied)
        .route(actions::NOT_SATISFIED, on_not_satisfied),
    );
}

/// Sub-clause action that decides its group early
pub(crate) fn short_circuit_action(logic: LogicOperator) -> &'static str {
    match logic {
        LogicOperator::Any => actions::SATISFIED,
        LogicOperator::All => actions::FAILED,
    }
}

fn check_ids(policy: &ParsedPolicy) -> Result<(), ConfigurationError> {
    let mut seen = HashSet::new();
    for criterion in policy.all_criteria() {
        if criterion.id == ROOT_AGGREGATOR {
            return Err(ConfigurationError::Invalid(format!(
                "criterion id '{}' is reserved",
                ROOT_AGGREGATOR
            )));
        }
        if !seen.insert(criterion.id.as_str()) {
            return Err(ConfigurationError::DuplicateNode(criterion.id.clone()));
        }
    }
    Ok(())
}
