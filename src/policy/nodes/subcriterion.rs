// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use super::criterion::{
    clause_input, clause_prompt, clause_response_schema, clause_result, record_result,
};
use super::{actions, parse_params, NodeContext, NodeType};
use crate::flow::error::{ConfigurationError, NodeExecutionError};
use crate::flow::node::{Action, LlmNodeCore, Node, NodeCategory, NodeSchema};
use crate::flow::state::{SharedState, CRITERION_RESULTS, POLICY_CONTEXT};
use crate::policy::config::ModelRole;
use crate::policy::models::{Criterion, CriterionResult, LogicOperator};

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct SubCriterionParams {
    name: String,
    #[serde(default)]
    description: String,
    parent_id: String,
    #[serde(default)]
    parent_name: String,
    #[serde(default)]
    parent_description: String,
    /// How the parent combines its sub-clauses
    #[serde(default)]
    sub_logic: LogicOperator,
    model: Option<String>,
}

/// Evaluates one sub-clause and short-circuits its siblings
///
/// Under ANY logic a met sub-clause returns `satisfied`; under ALL an unmet
/// one returns `failed`. Everything else continues with `default`.
pub struct SubCriterionNode {
    parent: Criterion,
    criterion: Criterion,
    logic: LogicOperator,
    schema: NodeSchema,
    core: LlmNodeCore,
}

impl SubCriterionNode {
    pub fn new(
        parent: Criterion,
        criterion: Criterion,
        logic: LogicOperator,
        core: LlmNodeCore,
    ) -> Self {
        Self {
            parent,
            criterion,
            logic,
            schema: Self::type_schema(),
            core: core.with_response_schema(clause_response_schema()),
        }
    }

    fn system_prompt(&self, policy_context: &str) -> String {
        format!(
            "You evaluate whether a text satisfies one part of a policy criterion.\n\n\
             Policy: {}\n\n\
             Criterion {} ({}): {}\n\n\
             Part {} ({}): {}\n\n\
             Judge only this part. Respond with a YAML mapping containing:\n\
             met: true or false\n\
             confidence: a number between 0.0 and 1.0\n\
             reasoning: one or two sentences citing the text",
            policy_context,
            self.parent.id,
            self.parent.name,
            self.parent.description,
            self.criterion.id,
            self.criterion.name,
            self.criterion.description,
        )
    }

    fn action_for(&self, met: bool) -> &'static str {
        match (self.logic, met) {
            (LogicOperator::Any, true) => actions::SATISFIED,
            (LogicOperator::All, false) => actions::FAILED,
            _ => actions::DEFAULT,
        }
    }
}

impl NodeType for SubCriterionNode {
    const NAME: &'static str = "SubCriterionNode";

    fn type_schema() -> NodeSchema {
        NodeSchema::from_params::<SubCriterionParams>(
            Self::NAME,
            "Evaluate one sub-clause, stopping early when the parent outcome is decided",
            NodeCategory::Internal,
            &[actions::SATISFIED, actions::FAILED, actions::DEFAULT],
        )
    }

    fn build(id: &str, params: &Value, ctx: &NodeContext) -> Result<Self, ConfigurationError> {
        let params: SubCriterionParams = parse_params(id, params)?;
        let core = ctx.llm_core(id, ModelRole::Criterion, params.model.as_deref())?;
        Ok(Self::new(
            Criterion::new(
                &params.parent_id,
                &params.parent_name,
                &params.parent_description,
            ),
            Criterion::new(id, &params.name, &params.description),
            params.sub_logic,
            core,
        ))
    }
}

#[async_trait]
impl Node for SubCriterionNode {
    fn id(&self) -> &str {
        &self.criterion.id
    }

    fn schema(&self) -> &NodeSchema {
        &self.schema
    }

    fn output_key(&self) -> Option<&str> {
        Some(CRITERION_RESULTS)
    }

    fn prepare(&self, shared: &SharedState) -> Value {
        clause_input(shared)
    }

    async fn execute(&self, input: Value) -> Result<Value, NodeExecutionError> {
        let system = self.system_prompt(input[POLICY_CONTEXT].as_str().unwrap_or_default());
        self.core
            .call(
                &clause_prompt(&input),
                Some(&system),
                &format!("subcriterion_{}_{}", self.parent.id, self.criterion.id),
            )
            .await
    }

    fn route(&self, shared: &mut SharedState, _input: &Value, output: Value) -> Action {
        let result = clause_result(&self.criterion, &output);
        record_result(shared, &result);
        Action::from(self.action_for(result.met))
    }

    fn recover(&self, shared: &mut SharedState, error: &NodeExecutionError) -> Option<Action> {
        log::warn!(
            "Sub-clause {} of {} degraded: {}",
            self.criterion.id,
            self.parent.id,
            error
        );
        let result = CriterionResult::degraded(&self.criterion, &error.to_string());
        record_result(shared, &result);
        Some(Action::from(self.action_for(false)))
    }
}
