// SPDX-License-Identifier: MIT

//! Hypotheses: typed, reversible-by-copy changes to a workflow definition

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use thiserror::Error;

use super::analyzer::{FailurePattern, PatternType};
use crate::flow::error::ConfigurationError;
use crate::flow::node::DEFAULT_ACTION;
use crate::policy::compiler::{short_circuit_action, ROOT_AGGREGATOR};
use crate::policy::config::ConfidenceGateConfig;
use crate::policy::models::LogicOperator;
use crate::policy::nodes::{
    actions, ConfidenceGateNode, CriterionEvaluationNode, KeywordScorerNode, NodeType, PatternMatchNode,
    ResultAggregatorNode, SubCriterionNode, TransformNode,
};
use crate::policy::workflow::types::{NodeConfig, WorkflowDefinition};

/// Id of the normalizing node a structure hypothesis may insert
pub const NORMALIZER_ID: &str = "normalize_input";

const STRICT_GUIDANCE: &str =
    "Only mark this criterion as met when the text clearly and explicitly satisfies it.";
const LENIENT_GUIDANCE: &str =
    "Mark this criterion as met when the text satisfies it in substance, even if phrased indirectly.";
const EVIDENCE_GUIDANCE: &str =
    "Base the verdict on what the text states and quote the words that decide it.";
const CALIBRATION_GUIDANCE: &str =
    "Report a confidence above 0.8 only when the text leaves no reasonable doubt.";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HypothesisError {
    #[error("Hypothesis target '{0}' is not in the workflow")]
    UnknownTarget(String),

    #[error("Node '{0}' params are not a mapping")]
    InvalidParams(String),

    #[error("Hypothesis leaves '{target}.{key}' unchanged")]
    NoChange { target: String, key: String },

    #[error("Workflow already has a node '{0}'")]
    DuplicateNode(String),

    #[error("Node '{0}' is not a clause group aggregator")]
    NotAGroup(String),

    #[error("Modified workflow does not build: {0}")]
    Rebuild(#[from] ConfigurationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Parameter,
    Structure,
    Threshold,
    Prompt,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Parameter => "parameter",
            Self::Structure => "structure",
            Self::Threshold => "threshold",
            Self::Prompt => "prompt",
        };
        write!(f, "{}", name)
    }
}

/// Edit applied to the target node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkflowChange {
    SetParam { key: String, value: Value },
    /// Append a paragraph to a text param (e.g. a clause description)
    AppendText { key: String, text: String },
    /// Put a node in front of the target; edges into the target go through it
    InsertBefore { node: NodeConfig },
    /// Change how a group aggregator combines its children, rewiring the
    /// children's short-circuit exits to match
    SetGroupLogic { logic: LogicOperator },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    /// Deterministic, so the optimizer can tell what it already tried
    pub id: String,
    pub change_type: ChangeType,
    /// Node id the change applies to
    pub target: String,
    pub change: WorkflowChange,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<PatternType>,
}

impl Hypothesis {
    pub fn new(
        change_type: ChangeType,
        target: &str,
        tag: &str,
        change: WorkflowChange,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("{}:{}:{}", change_type, target, tag),
            change_type,
            target: target.to_string(),
            change,
            rationale: rationale.into(),
            pattern: None,
        }
    }

    fn with_pattern(mut self, pattern: PatternType) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Copy of `def` with the change applied
    pub fn apply(&self, def: &WorkflowDefinition) -> Result<WorkflowDefinition, HypothesisError> {
        let mut out = def.clone();

        match &self.change {
            WorkflowChange::SetParam { key, value }
                if key == "logic"
                    && out
                        .node(&self.target)
                        .is_some_and(|n| n.node_type == ResultAggregatorNode::NAME) =>
            {
                let logic = serde_json::from_value(value.clone())
                    .map_err(|_| HypothesisError::InvalidParams(self.target.clone()))?;
                set_group_logic(&mut out, &self.target, logic)?;
            }
            WorkflowChange::SetParam { key, value } => {
                let params = target_params(&mut out, &self.target)?;
                if params.get(key) == Some(value) {
                    return Err(HypothesisError::NoChange {
                        target: self.target.clone(),
                        key: key.clone(),
                    });
                }
                params.insert(key.clone(), value.clone());
            }
            WorkflowChange::AppendText { key, text } => {
                let params = target_params(&mut out, &self.target)?;
                let current = params
                    .get(key)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if current.contains(text.as_str()) {
                    return Err(HypothesisError::NoChange {
                        target: self.target.clone(),
                        key: key.clone(),
                    });
                }
                let updated = if current.is_empty() {
                    text.clone()
                } else {
                    format!("{}\n\n{}", current, text)
                };
                params.insert(key.clone(), json!(updated));
            }
            WorkflowChange::InsertBefore { node } => {
                let position = out
                    .nodes
                    .iter()
                    .position(|n| n.id == self.target)
                    .ok_or_else(|| HypothesisError::UnknownTarget(self.target.clone()))?;
                if out.node(&node.id).is_some() {
                    return Err(HypothesisError::DuplicateNode(node.id.clone()));
                }

                for existing in &mut out.nodes {
                    for next in existing.routes.values_mut() {
                        if *next == self.target {
                            *next = node.id.clone();
                        }
                    }
                }
                if out.start_node == self.target {
                    out.start_node = node.id.clone();
                }

                let mut inserted = node.clone();
                inserted.routes =
                    BTreeMap::from([(DEFAULT_ACTION.to_string(), self.target.clone())]);
                out.nodes.insert(position, inserted);
            }
            WorkflowChange::SetGroupLogic { logic } => {
                set_group_logic(&mut out, &self.target, *logic)?;
            }
        }

        Ok(out)
    }
}

fn logic_of(node: &NodeConfig) -> LogicOperator {
    node.param("logic")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

/// Switch a group to `logic` and rewire its children
///
/// Under ANY a child exits to the group as soon as it is met; under ALL as
/// soon as it is not. Leaving the old exits in place would let the new
/// logic decide on a partial set of children.
fn set_group_logic(
    def: &mut WorkflowDefinition,
    group: &str,
    logic: LogicOperator,
) -> Result<(), HypothesisError> {
    let node = def
        .node(group)
        .ok_or_else(|| HypothesisError::UnknownTarget(group.to_string()))?;
    if node.node_type != ResultAggregatorNode::NAME {
        return Err(HypothesisError::NotAGroup(group.to_string()));
    }
    let current = logic_of(node);
    if current == logic {
        return Err(HypothesisError::NoChange {
            target: group.to_string(),
            key: "logic".to_string(),
        });
    }
    let children: Vec<String> = node
        .param("children")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    target_params(def, group)?.insert("logic".to_string(), json!(logic));

    let (old_exit, new_exit) = (short_circuit_action(current), short_circuit_action(logic));
    for child in &children {
        let Some(node) = def.node_mut(child) else {
            continue;
        };
        if node.node_type == SubCriterionNode::NAME {
            if let Some(params) = node.params.as_object_mut() {
                params.insert("sub_logic".to_string(), json!(logic));
            }
            if node.routes.get(old_exit).map(String::as_str) == Some(group) {
                node.routes.remove(old_exit);
                node.routes.insert(new_exit.to_string(), group.to_string());
            }
        } else if node.node_type == ResultAggregatorNode::NAME {
            // a nested group exits on the opposite outcome now
            let satisfied = node.routes.remove(actions::SATISFIED);
            let not_satisfied = node.routes.remove(actions::NOT_SATISFIED);
            if let Some(target) = not_satisfied {
                node.routes.insert(actions::SATISFIED.to_string(), target);
            }
            if let Some(target) = satisfied {
                node.routes.insert(actions::NOT_SATISFIED.to_string(), target);
            }
        }
    }
    Ok(())
}

fn target_params<'a>(
    def: &'a mut WorkflowDefinition,
    target: &str,
) -> Result<&'a mut Map<String, Value>, HypothesisError> {
    let node = def
        .node_mut(target)
        .ok_or_else(|| HypothesisError::UnknownTarget(target.to_string()))?;
    if node.params.is_null() {
        node.params = Value::Object(Map::new());
    }
    node.params
        .as_object_mut()
        .ok_or_else(|| HypothesisError::InvalidParams(node.id.clone()))
}

/// Proposes changes for the failure patterns of the current best workflow
#[async_trait]
pub trait HypothesisGenerator: Send + Sync {
    async fn generate(
        &self,
        workflow: &WorkflowDefinition,
        patterns: &[FailurePattern],
    ) -> Vec<Hypothesis>;
}

#[derive(Debug, Clone)]
pub struct RuleBasedHypothesisGenerator {
    /// How far one threshold hypothesis moves a confidence gate
    pub gate_step: f64,
    /// Relative change applied to keyword thresholds
    pub keyword_step: f64,
}

impl Default for RuleBasedHypothesisGenerator {
    fn default() -> Self {
        Self {
            gate_step: 0.05,
            keyword_step: 0.25,
        }
    }
}

fn is_clause(node: &NodeConfig) -> bool {
    node.node_type == CriterionEvaluationNode::NAME || node.node_type == SubCriterionNode::NAME
}

fn param_f64(node: &NodeConfig, key: &str, fallback: f64) -> f64 {
    node.param(key).and_then(Value::as_f64).unwrap_or(fallback)
}

impl RuleBasedHypothesisGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn prompt_all(&self, workflow: &WorkflowDefinition, tag: &str, guidance: &str, why: &str) -> Vec<Hypothesis> {
        workflow
            .nodes
            .iter()
            .filter(|n| is_clause(n))
            .map(|n| {
                Hypothesis::new(
                    ChangeType::Prompt,
                    &n.id,
                    tag,
                    WorkflowChange::AppendText {
                        key: "description".to_string(),
                        text: guidance.to_string(),
                    },
                    why,
                )
            })
            .collect()
    }

    /// Move every confidence gate's high threshold by `delta`
    fn shift_gates(&self, workflow: &WorkflowDefinition, delta: f64, why: &str) -> Vec<Hypothesis> {
        let defaults = ConfidenceGateConfig::default();
        workflow
            .nodes_of_type(ConfidenceGateNode::NAME)
            .filter_map(|n| {
                let high = param_f64(n, "high", defaults.high);
                let low = param_f64(n, "low", defaults.low);
                let next = ((high + delta).clamp(low + 0.01, 0.99) * 100.0).round() / 100.0;
                if (next - high).abs() < f64::EPSILON {
                    return None;
                }
                Some(Hypothesis::new(
                    ChangeType::Threshold,
                    &n.id,
                    &format!("high_{:.2}", next),
                    WorkflowChange::SetParam {
                        key: "high".to_string(),
                        value: json!(next),
                    },
                    why,
                ))
            })
            .collect()
    }

    fn scale_keywords(&self, workflow: &WorkflowDefinition, factor: f64, why: &str) -> Vec<Hypothesis> {
        workflow
            .nodes_of_type(KeywordScorerNode::NAME)
            .map(|n| {
                let next = param_f64(n, "threshold", 1.0) * factor;
                Hypothesis::new(
                    ChangeType::Threshold,
                    &n.id,
                    &format!("threshold_{:.2}", next),
                    WorkflowChange::SetParam {
                        key: "threshold".to_string(),
                        value: json!(next),
                    },
                    why,
                )
            })
            .collect()
    }

    fn set_root_logic(&self, workflow: &WorkflowDefinition, logic: LogicOperator, why: &str) -> Option<Hypothesis> {
        let root = workflow.node(ROOT_AGGREGATOR)?;
        (logic_of(root) != logic).then(|| group_logic(ROOT_AGGREGATOR, logic, why))
    }

    fn for_pattern(&self, workflow: &WorkflowDefinition, pattern: &FailurePattern) -> Vec<Hypothesis> {
        let mut out = Vec::new();
        match pattern.pattern_type {
            PatternType::CategoryCluster => {
                if workflow.nodes_of_type(TransformNode::NAME).next().is_none() {
                    out.push(Hypothesis::new(
                        ChangeType::Structure,
                        &workflow.start_node,
                        "normalize",
                        WorkflowChange::InsertBefore {
                            node: NodeConfig::new(
                                NORMALIZER_ID,
                                TransformNode::NAME,
                                json!({"operations": ["strip_html", "normalize_whitespace", "trim"]}),
                            ),
                        },
                        format!(
                            "Normalize input before evaluation: {}",
                            pattern.description
                        ),
                    ));
                }
            }
            PatternType::CriterionFailure => {
                let Some(node) = pattern
                    .criterion_id
                    .as_deref()
                    .and_then(|id| workflow.node(id))
                else {
                    return out;
                };
                if is_clause(node) {
                    out.push(Hypothesis::new(
                        ChangeType::Prompt,
                        &node.id,
                        "evidence",
                        WorkflowChange::AppendText {
                            key: "description".to_string(),
                            text: EVIDENCE_GUIDANCE.to_string(),
                        },
                        pattern.description.clone(),
                    ));
                } else if node.node_type == ResultAggregatorNode::NAME {
                    let flipped = match logic_of(node) {
                        LogicOperator::All => LogicOperator::Any,
                        LogicOperator::Any => LogicOperator::All,
                    };
                    out.push(group_logic(&node.id, flipped, &pattern.description));
                }
            }
            PatternType::FalsePositiveSkew => {
                let why = format!("Too many false positives: {}", pattern.description);
                out.extend(self.shift_gates(workflow, self.gate_step, &why));
                out.extend(self.scale_keywords(workflow, 1.0 + self.keyword_step, &why));
                out.extend(self.prompt_all(workflow, "strict", STRICT_GUIDANCE, &why));
                out.extend(self.set_root_logic(workflow, LogicOperator::All, &why));
            }
            PatternType::FalseNegativeSkew => {
                let why = format!("Too many false negatives: {}", pattern.description);
                out.extend(self.shift_gates(workflow, -self.gate_step, &why));
                out.extend(self.scale_keywords(workflow, 1.0 - self.keyword_step, &why));
                for node in workflow
                    .nodes_of_type(PatternMatchNode::NAME)
                    .chain(workflow.nodes_of_type(KeywordScorerNode::NAME))
                    .filter(|n| n.param("case_sensitive") == Some(&json!(true)))
                {
                    out.push(Hypothesis::new(
                        ChangeType::Parameter,
                        &node.id,
                        "case_insensitive",
                        WorkflowChange::SetParam {
                            key: "case_sensitive".to_string(),
                            value: json!(false),
                        },
                        why.clone(),
                    ));
                }
                out.extend(self.prompt_all(workflow, "lenient", LENIENT_GUIDANCE, &why));
                out.extend(self.set_root_logic(workflow, LogicOperator::Any, &why));
            }
            PatternType::ConfidenceMiscalibration => {
                let why = format!("Overconfident: {}", pattern.description);
                out.extend(self.shift_gates(workflow, self.gate_step, &why));
                out.extend(self.prompt_all(workflow, "calibrate", CALIBRATION_GUIDANCE, &why));
            }
            // provider failures are not something a workflow edit fixes
            PatternType::EvaluationErrors => {}
        }
        out.into_iter()
            .map(|h| h.with_pattern(pattern.pattern_type))
            .collect()
    }
}

fn group_logic(group: &str, logic: LogicOperator, why: &str) -> Hypothesis {
    Hypothesis::new(
        ChangeType::Structure,
        group,
        &format!("logic_{}", json!(logic).as_str().unwrap_or_default()),
        WorkflowChange::SetGroupLogic { logic },
        why,
    )
}

#[async_trait]
impl HypothesisGenerator for RuleBasedHypothesisGenerator {
    async fn generate(
        &self,
        workflow: &WorkflowDefinition,
        patterns: &[FailurePattern],
    ) -> Vec<Hypothesis> {
        let mut seen = HashSet::new();
        let hypotheses: Vec<Hypothesis> = patterns
            .iter()
            .flat_map(|p| self.for_pattern(workflow, p))
            .filter(|h| seen.insert(h.id.clone()))
            .collect();
        log::debug!(
            "Generated {} hypotheses from {} pattern(s)",
            hypotheses.len(),
            patterns.len()
        );
        hypotheses
    }
}
