// SPDX-License-Identifier: MIT

//! Policy evaluator - runs a compiled policy graph and assembles the verdict

use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::flow::error::{ConfigurationError, WorkflowExecutionError};
use crate::flow::state::{CRITERION_RESULTS, ERRORS, INPUT_TEXT, POLICY_CONTEXT};
use crate::policy::compiler::{PolicyCompiler, ROOT_AGGREGATOR};
use crate::policy::config::ConfidenceGateConfig;
use crate::policy::models::{
    ConfidenceLevel, Criterion, CriterionResult, EvaluationResult, ParsedPolicy,
};
use crate::policy::workflow::builder::WorkflowBuilder;
use crate::policy::workflow::graph::{WorkflowGraph, WorkflowRun};
use crate::policy::workflow::types::WorkflowDefinition;

/// Evaluates text against one policy
///
/// Cheap to clone; clones share the graph and its node instances.
#[derive(Clone)]
pub struct PolicyEvaluator {
    graph: Arc<WorkflowGraph>,
    policy: Arc<ParsedPolicy>,
    thresholds: ConfidenceGateConfig,
}

impl PolicyEvaluator {
    pub fn new(graph: WorkflowGraph, policy: ParsedPolicy, thresholds: ConfidenceGateConfig) -> Self {
        Self {
            graph: Arc::new(graph),
            policy: Arc::new(policy),
            thresholds,
        }
    }

    /// Compile the policy and build its graph
    pub fn from_policy(
        policy: ParsedPolicy,
        builder: &WorkflowBuilder,
    ) -> Result<Self, ConfigurationError> {
        let def = PolicyCompiler::new().compile(&policy)?;
        Self::from_workflow(&def, policy, builder)
    }

    /// Build a (possibly modified) workflow for the policy
    pub fn from_workflow(
        def: &WorkflowDefinition,
        policy: ParsedPolicy,
        builder: &WorkflowBuilder,
    ) -> Result<Self, ConfigurationError> {
        let graph = builder.build(def)?;
        let thresholds = builder.context().config().confidence_gate;
        thresholds.validate()?;
        Ok(Self::new(graph, policy, thresholds))
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub fn policy(&self) -> &ParsedPolicy {
        &self.policy
    }

    pub fn thresholds(&self) -> ConfidenceGateConfig {
        self.thresholds
    }

    /// Run the graph over `text` and return the verdict with its clause tree
    pub async fn evaluate(&self, text: &str) -> Result<EvaluationResult, WorkflowExecutionError> {
        let run = self.run(text).await?;
        Ok(self.assemble(text, &run))
    }

    /// Run the graph and return the raw run (state and trace)
    pub async fn run(&self, text: &str) -> Result<WorkflowRun, WorkflowExecutionError> {
        let mut state = self.graph.new_state();
        state.set(INPUT_TEXT, json!(text));
        state.set(POLICY_CONTEXT, json!(self.policy_context()));
        self.graph.run_with_state(state).await
    }

    fn policy_context(&self) -> String {
        if self.policy.raw_text.trim().is_empty() {
            format!("{}\n\n{}", self.policy.title, self.policy.description)
        } else {
            self.policy.raw_text.clone()
        }
    }

    fn assemble(&self, text: &str, run: &WorkflowRun) -> EvaluationResult {
        let empty = Map::new();
        let recorded = run
            .state
            .get(CRITERION_RESULTS)
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        let criterion_results: Vec<CriterionResult> = self
            .policy
            .criteria
            .iter()
            .filter_map(|c| collect_result(c, recorded))
            .collect();

        let root = recorded
            .get(ROOT_AGGREGATOR)
            .and_then(|v| serde_json::from_value::<CriterionResult>(v.clone()).ok());

        let (policy_satisfied, overall_confidence) = match &root {
            Some(root) => (root.met, root.confidence),
            None if criterion_results.is_empty() => (false, 0.0),
            None => (
                criterion_results.iter().all(|r| r.met),
                criterion_results.iter().map(|r| r.confidence).sum::<f64>()
                    / criterion_results.len() as f64,
            ),
        };

        let confidence_level = ConfidenceLevel::from_score(overall_confidence, &self.thresholds);

        let mut flat = Vec::new();
        flatten(&criterion_results, &mut flat);
        let needs_review = confidence_level != ConfidenceLevel::High
            || root.as_ref().is_some_and(|r| r.needs_review)
            || flat.iter().any(|r| r.needs_review);
        let low_confidence_criteria = flat
            .iter()
            .filter(|r| r.confidence < self.thresholds.high)
            .map(|r| r.criterion_id.clone())
            .collect();

        let overall_reasoning = self.reasoning(
            policy_satisfied,
            &flat,
            criterion_results.len(),
            run.state.get(ERRORS),
        );

        log::info!(
            "Policy '{}' satisfied={} confidence={:.2} ({:?})",
            self.policy.title,
            policy_satisfied,
            overall_confidence,
            confidence_level
        );

        EvaluationResult {
            policy_satisfied,
            input_text: text.to_string(),
            policy_title: self.policy.title.clone(),
            criterion_results,
            overall_reasoning,
            overall_confidence,
            confidence_level,
            needs_review,
            low_confidence_criteria,
        }
    }

    fn reasoning(
        &self,
        satisfied: bool,
        flat: &[&CriterionResult],
        top_level: usize,
        errors: Option<&Value>,
    ) -> String {
        let met = flat.iter().filter(|r| r.met).count();
        let mut reasoning = format!(
            "Policy '{}' is {}: {} of {} evaluated criteria met across {} top-level criteria.",
            self.policy.title,
            if satisfied { "satisfied" } else { "not satisfied" },
            met,
            flat.len(),
            top_level
        );

        let failures: Vec<String> = errors
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|e| {
                        format!(
                            "{}: {}",
                            e["node"].as_str().unwrap_or("?"),
                            e["error"].as_str().unwrap_or_default()
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        if !failures.is_empty() {
            reasoning.push_str(" Evaluation errors: ");
            reasoning.push_str(&failures.join("; "));
        }
        reasoning
    }
}

/// Recorded result for a clause, with sub-results re-ordered to match the policy
fn collect_result(criterion: &Criterion, recorded: &Map<String, Value>) -> Option<CriterionResult> {
    let mut result: CriterionResult =
        serde_json::from_value(recorded.get(&criterion.id)?.clone()).ok()?;
    if !criterion.is_leaf() {
        result.sub_results = criterion
            .sub_criteria
            .iter()
            .filter_map(|sub| collect_result(sub, recorded))
            .collect();
    }
    Some(result)
}

fn flatten<'a>(results: &'a [CriterionResult], out: &mut Vec<&'a CriterionResult>) {
    for result in results {
        out.push(result);
        flatten(&result.sub_results, out);
    }
}
