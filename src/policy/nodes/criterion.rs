// SPDX-License-Identifier: MIT

//! Leaf clause evaluation
//!
//! Clause nodes answer one yes/no question about the text with a confidence
//! and a rationale. A failed call degrades into `met=false, confidence=0,
//! needs_review=true` instead of failing the run.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{actions, answer_schema, bool_field, confidence_field, parse_params, string_field, text_at};
use super::{NodeContext, NodeType};
use crate::flow::error::{ConfigurationError, NodeExecutionError};
use crate::flow::node::{Action, LlmNodeCore, Node, NodeCategory, NodeSchema};
use crate::flow::state::{SharedState, CRITERION_RESULTS, INPUT_TEXT, POLICY_CONTEXT};
use crate::policy::config::ModelRole;
use crate::policy::models::{Criterion, CriterionResult};

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub(super) struct ClauseParams {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Pin a model for this clause
    pub model: Option<String>,
}

/// Answer format appended to every clause prompt
const CLAUSE_RESPONSE_FORMAT: &str = "Respond with a YAML mapping containing:\n\
met: true or false\n\
confidence: a number between 0.0 and 1.0\n\
reasoning: one or two sentences citing the text";

pub(super) fn clause_prompt(input: &Value) -> String {
    format!(
        "Evaluate this text:\n\n{}",
        input[INPUT_TEXT].as_str().unwrap_or_default()
    )
}

/// Shape of a clause verdict
pub(super) fn clause_response_schema() -> Value {
    answer_schema(
        json!({
            "met": {"type": "boolean"},
            "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0},
            "reasoning": {"type": "string"},
        }),
        &["met", "confidence"],
    )
}

pub(super) fn clause_input(shared: &SharedState) -> Value {
    json!({
        INPUT_TEXT: text_at(shared, INPUT_TEXT),
        POLICY_CONTEXT: text_at(shared, POLICY_CONTEXT),
    })
}

pub(super) fn clause_result(criterion: &Criterion, output: &Value) -> CriterionResult {
    CriterionResult::new(
        criterion,
        bool_field(output, "met"),
        confidence_field(output, "confidence"),
        &string_field(output, "reasoning"),
    )
}

/// Store a clause result under its id in `criterion_results`
pub(super) fn record_result(shared: &mut SharedState, result: &CriterionResult) {
    let value = serde_json::to_value(result).unwrap_or_default();
    shared.update(CRITERION_RESULTS, json!({ result.criterion_id.clone(): value }));
}

/// Evaluates one leaf clause; the node id is the clause id
pub struct CriterionEvaluationNode {
    criterion: Criterion,
    schema: NodeSchema,
    core: LlmNodeCore,
}

impl CriterionEvaluationNode {
    pub fn new(criterion: Criterion, core: LlmNodeCore) -> Self {
        Self {
            criterion,
            schema: Self::type_schema(),
            core: core.with_response_schema(clause_response_schema()),
        }
    }

    pub fn criterion(&self) -> &Criterion {
        &self.criterion
    }

    fn system_prompt(&self, policy_context: &str) -> String {
        format!(
            "You evaluate whether a text satisfies one criterion of a policy.\n\n\
             Policy: {}\n\n\
             Criterion {} ({}): {}\n\n{}",
            policy_context,
            self.criterion.id,
            self.criterion.name,
            self.criterion.description,
            CLAUSE_RESPONSE_FORMAT
        )
    }
}

impl NodeType for CriterionEvaluationNode {
    const NAME: &'static str = "CriterionEvaluationNode";

    fn type_schema() -> NodeSchema {
        NodeSchema::from_params::<ClauseParams>(
            Self::NAME,
            "Evaluate a single policy clause with an LLM",
            NodeCategory::Internal,
            &[actions::DEFAULT],
        )
    }

    fn build(id: &str, params: &Value, ctx: &NodeContext) -> Result<Self, ConfigurationError> {
        let params: ClauseParams = parse_params(id, params)?;
        let core = ctx.llm_core(id, ModelRole::Criterion, params.model.as_deref())?;
        Ok(Self::new(
            Criterion::new(id, &params.name, &params.description),
            core,
        ))
    }
}

#[async_trait]
impl Node for CriterionEvaluationNode {
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
                &format!("criterion_{}", self.criterion.id),
            )
            .await
    }

    fn route(&self, shared: &mut SharedState, _input: &Value, output: Value) -> Action {
        let result = clause_result(&self.criterion, &output);
        log::info!(
            "Clause {} met={} confidence={:.2}",
            self.criterion.id,
            result.met,
            result.confidence
        );
        record_result(shared, &result);
        Action::default_action()
    }

    fn recover(&self, shared: &mut SharedState, error: &NodeExecutionError) -> Option<Action> {
        log::warn!("Clause {} degraded: {}", self.criterion.id, error);
        record_result(shared, &CriterionResult::degraded(&self.criterion, &error.to_string()));
        Some(Action::default_action())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::error::ProviderError;
    use crate::flow::state::StateSchema;
    use crate::policy::config::WorkflowConfig;
    use crate::policy::nodes::test_support::FixedClient;
    use std::sync::Arc;

    fn context(client: Arc<FixedClient>) -> NodeContext {
        let mut config = WorkflowConfig::default();
        config.cache.enabled = false;
        config.max_retries = 1;
        NodeContext::new(config).with_client(client)
    }

    fn state(text: &str) -> SharedState {
        let mut shared = SharedState::new(&StateSchema::policy_defaults());
        shared.set(INPUT_TEXT, json!(text));
        shared.set(POLICY_CONTEXT, json!("Personal recommendation policy"));
        shared
    }

    #[tokio::test]
    async fn test_records_result_under_clause_id() {
        let client = Arc::new(FixedClient::new(
            "met: true\nconfidence: 0.92\nreasoning: Uses 'I recommend'",
        ));
        let node = CriterionEvaluationNode::build(
            "criterion_1",
            &json!({"name": "Recommendation", "description": "Text recommends an action"}),
            &context(client.clone()),
        )
        .unwrap();

        let mut shared = state("I recommend XYZ");
        let input = node.prepare(&shared);
        let output = node.execute(input.clone()).await.unwrap();
        assert!(node.route(&mut shared, &input, output).is_default());

        let stored = shared.get_path("criterion_results.criterion_1").unwrap();
        assert_eq!(stored["met"], true);
        assert_eq!(stored["confidence"], 0.92);
        assert_eq!(stored["criterion_name"], "Recommendation");

        let request = client.last_request().unwrap();
        assert_eq!(request.span_name, "criterion_criterion_1");
        assert!(request.prompt.ends_with("I recommend XYZ"));
        let system = request.system_prompt.unwrap();
        assert!(system.contains("Text recommends an action"));
        assert!(system.contains("Personal recommendation policy"));
        let expected = request.response_schema.unwrap();
        assert_eq!(expected["required"], json!(["met", "confidence"]));
        assert_eq!(expected["properties"]["met"]["type"], "boolean");
    }

    #[tokio::test]
    async fn test_results_from_several_clauses_merge() {
        let client = Arc::new(FixedClient::new("met: false\nconfidence: 0.7"));
        let ctx = context(client);
        let a = CriterionEvaluationNode::build("a", &json!({"name": "A"}), &ctx).unwrap();
        let b = CriterionEvaluationNode::build("b", &json!({"name": "B"}), &ctx).unwrap();

        let mut shared = state("text");
        for node in [&a, &b] {
            let input = node.prepare(&shared);
            let output = node.execute(input.clone()).await.unwrap();
            node.route(&mut shared, &input, output);
        }
        let results = shared.get(CRITERION_RESULTS).unwrap().as_object().unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_degrades_clause() {
        let client = Arc::new(FixedClient::failing(ProviderError::Transport(
            "connection refused".to_string(),
        )));
        let node =
            CriterionEvaluationNode::build("c1", &json!({"name": "Clause"}), &context(client))
                .unwrap();

        let mut shared = state("text");
        let err = node.execute(node.prepare(&shared)).await.unwrap_err();
        let action = node.recover(&mut shared, &err).unwrap();
        assert!(action.is_default());

        let stored = shared.get_path("criterion_results.c1").unwrap();
        assert_eq!(stored["met"], false);
        assert_eq!(stored["confidence"], 0.0);
        assert_eq!(stored["needs_review"], true);
        assert!(stored["reasoning"]
            .as_str()
            .unwrap()
            .contains("connection refused"));
    }

    #[test]
    fn test_schema_is_internal() {
        let schema = CriterionEvaluationNode::type_schema();
        assert!(!schema.parser_exposed);
        assert_eq!(schema.actions, vec!["default"]);
    }
}
