// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::criterion::record_result;
use super::{actions, parse_params, NodeContext, NodeType};
use crate::flow::error::{ConfigurationError, NodeExecutionError};
use crate::flow::node::{Action, Node, NodeCategory, NodeSchema};
use crate::flow::state::{SharedState, CRITERION_RESULTS};
use crate::policy::models::{Criterion, CriterionResult, LogicOperator};

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct AggregatorParams {
    /// Clause ids whose results are combined, in order
    children: Vec<String>,
    /// all (AND, mean confidence) or any (OR, max confidence)
    #[serde(default)]
    logic: LogicOperator,
    /// Name recorded on the combined result
    name: Option<String>,
    #[serde(default)]
    description: String,
}

/// Combines child clause results into one parent result
///
/// Children without a recorded result (skipped by a short-circuit) do not
/// take part. With no child results at all the parent is unmet, has zero
/// confidence and needs review.
pub struct ResultAggregatorNode {
    criterion: Criterion,
    children: Vec<String>,
    logic: LogicOperator,
    schema: NodeSchema,
}

impl ResultAggregatorNode {
    pub fn new(criterion: Criterion, children: Vec<String>, logic: LogicOperator) -> Self {
        Self {
            criterion,
            children,
            logic,
            schema: Self::type_schema(),
        }
    }

    pub fn logic(&self) -> LogicOperator {
        self.logic
    }

    /// Combine results (already in child order)
    pub fn combine(&self, results: Vec<CriterionResult>) -> CriterionResult {
        if results.is_empty() {
            return CriterionResult {
                needs_review: true,
                ..CriterionResult::new(&self.criterion, false, 0.0, "No child results recorded")
            };
        }

        let confidences = results.iter().map(|r| r.confidence);
        let (met, confidence) = match self.logic {
            LogicOperator::All => (
                results.iter().all(|r| r.met),
                confidences.sum::<f64>() / results.len() as f64,
            ),
            LogicOperator::Any => (
                results.iter().any(|r| r.met),
                confidences.fold(0.0, f64::max),
            ),
        };

        let met_count = results.iter().filter(|r| r.met).count();
        let reasoning = format!(
            "{} of {} evaluated sub-criteria met ({} logic)",
            met_count,
            results.len(),
            match self.logic {
                LogicOperator::All => "ALL",
                LogicOperator::Any => "ANY",
            }
        );

        let needs_review = results.iter().any(|r| r.needs_review);
        CriterionResult {
            needs_review,
            sub_results: results,
            ..CriterionResult::new(&self.criterion, met, confidence, &reasoning)
        }
    }
}

impl NodeType for ResultAggregatorNode {
    const NAME: &'static str = "ResultAggregatorNode";

    fn type_schema() -> NodeSchema {
        NodeSchema::from_params::<AggregatorParams>(
            Self::NAME,
            "Combine clause results with ALL (AND) or ANY (OR) logic",
            NodeCategory::Routing,
            &[actions::SATISFIED, actions::NOT_SATISFIED],
        )
    }

    fn build(id: &str, params: &Value, _ctx: &NodeContext) -> Result<Self, ConfigurationError> {
        let params: AggregatorParams = parse_params(id, params)?;
        if params.children.is_empty() {
            return Err(ConfigurationError::invalid_params(
                id,
                "at least one child clause is required",
            ));
        }
        let name = params.name.unwrap_or_else(|| id.to_string());
        Ok(Self::new(
            Criterion::new(id, &name, &params.description),
            params.children,
            params.logic,
        ))
    }
}

#[async_trait]
impl Node for ResultAggregatorNode {
    fn id(&self) -> &str {
        &self.criterion.id
    }

    fn schema(&self) -> &NodeSchema {
        &self.schema
    }

    fn output_key(&self) -> Option<&str> {
        Some(CRITERION_RESULTS)
    }

    /// Child results in child order; unreadable or missing entries are skipped
    fn prepare(&self, shared: &SharedState) -> Value {
        let recorded = shared.get(CRITERION_RESULTS);
        let children: Vec<Value> = self
            .children
            .iter()
            .filter_map(|id| recorded.and_then(|r| r.get(id)).cloned())
            .collect();
        json!(children)
    }

    async fn execute(&self, input: Value) -> Result<Value, NodeExecutionError> {
        let results: Vec<CriterionResult> = input
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();

        serde_json::to_value(self.combine(results))
            .map_err(|e| NodeExecutionError::invalid_input(self.id(), e.to_string()))
    }

    fn route(&self, shared: &mut SharedState, _input: &Value, output: Value) -> Action {
        let result: CriterionResult = serde_json::from_value(output).unwrap_or_else(|_| {
            self.combine(Vec::new())
        });
        let met = result.met;
        record_result(shared, &result);
        if met {
            Action::from(actions::SATISFIED)
        } else {
            Action::from(actions::NOT_SATISFIED)
        }
    }
}
