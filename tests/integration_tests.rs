//! Integration tests for policy evaluation, workflow execution and optimization
//!
//! These tests drive the public API end to end with scripted model clients.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use policyflow::flow::cache::MemoryCacheStore;
use policyflow::flow::error::{ProviderError, WorkflowExecutionError};
use policyflow::flow::model::{LlmClient, LlmRequest};
use policyflow::flow::node::{Action, Node};
use policyflow::flow::rate_limiter::{RateLimiter, ThrottleMode};
use policyflow::flow::state::{SharedState, StateSchema, INPUT_TEXT};
use policyflow::policy::benchmark::{
    BenchmarkRunner, ChangeType, ConvergenceReason, ExperimentTracker, GoldenDataset, Hypothesis,
    OptimizationBudget, OptimizationMetric, Optimizer, WorkflowChange,
};
use policyflow::policy::compiler::{PolicyCompiler, ROOT_AGGREGATOR};
use policyflow::policy::config::WorkflowConfig;
use policyflow::policy::models::{
    ConfidenceLevel, Criterion, CriterionResult, LogicOperator, ParsedPolicy, YamlDocument,
};
use policyflow::policy::nodes::{actions, ConfidenceGateNode, NodeContext, ResultAggregatorNode};
use policyflow::policy::workflow::{NodeConfig, NodeRegistry, WorkflowBuilder, WorkflowLoader};
use policyflow::PolicyEvaluator;
use proptest::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const PERSONAL_ADVICE: &str = "Based on your risk profile and investment goals, \
I recommend you purchase shares in XYZ Corp.";

const GENERAL_RESEARCH: &str = "Our analysts believe XYZ Corp is a strong buy for 2024. \
This report is published for all subscribers.";

const ADVICE_POLICY_YAML: &str = r#"
title: Personal Recommendation
description: Communications that amount to a personal investment recommendation
logic: all
criteria:
  - id: criterion_1
    name: Recommendation
    description: The text advises the reader to take an action
  - id: criterion_2
    name: Personalisation
    description: The advice is tailored to the reader's circumstances
  - id: criterion_3
    name: Financial instrument
    description: The advice concerns a specific security
  - id: criterion_4
    name: Individual distribution
    description: The text is addressed to one person rather than the public
"#;

static ADVICE_POLICY: Lazy<ParsedPolicy> =
    Lazy::new(|| ParsedPolicy::from_yaml(ADVICE_POLICY_YAML).expect("advice policy parses"));

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Mock Components
// ============================================================================

/// Clause id at the end of a span name such as `subcriterion_criterion_2_criterion_2a`
fn clause_of(request: &LlmRequest) -> &str {
    let span = request.span_name.as_str();
    span.rfind("criterion_").map(|i| &span[i..]).unwrap_or(span)
}

/// Judges the four advice clauses from phrases in the evaluated text
fn advice_judgement(clause: &str, text: &str) -> Option<bool> {
    match clause {
        "criterion_1" => Some(text.contains("recommend") || text.contains("strong buy")),
        "criterion_2" => Some(text.contains("your risk profile")),
        "criterion_2a" => Some(text.contains("risk profile")),
        "criterion_2b" => Some(text.contains("suitable")),
        "criterion_3" => Some(text.contains("XYZ Corp")),
        "criterion_4" => Some(text.contains(" you ") && !text.contains("all subscribers")),
        _ => None,
    }
}

/// Scripted model that answers clause prompts and counts calls
struct ScriptedClient {
    calls: AtomicUsize,
}

impl ScriptedClient {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn call(&self, request: &LlmRequest) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let clause = clause_of(request);
        match advice_judgement(clause, &request.prompt) {
            Some(met) => Ok(format!(
                "met: {}\nconfidence: 0.9\nreasoning: scripted answer for {}",
                met, clause
            )),
            None => Err(ProviderError::Transport(format!("no script for {}", clause))),
        }
    }
}

/// Flags any mention of a security as a recommendation unless told to be strict
struct EagerClient;

#[async_trait]
impl LlmClient for EagerClient {
    async fn call(&self, request: &LlmRequest) -> Result<String, ProviderError> {
        let clause = clause_of(request);
        let text = request.prompt.as_str();
        let strict = request
            .system_prompt
            .as_deref()
            .is_some_and(|s| s.contains("clearly and explicitly"));
        let met = match clause {
            "criterion_1" if strict => text.contains("recommend"),
            "criterion_1" => text.contains("XYZ Corp"),
            _ => true,
        };
        Ok(format!("met: {}\nconfidence: 0.9", met))
    }
}

/// Returns the same raw text for every request
struct EchoClient(String);

#[async_trait]
impl LlmClient for EchoClient {
    async fn call(&self, _request: &LlmRequest) -> Result<String, ProviderError> {
        Ok(self.0.clone())
    }
}

fn offline_config() -> WorkflowConfig {
    let mut config = WorkflowConfig::default();
    config.cache.enabled = false;
    config.max_retries = 1;
    config
}

fn builder_with(client: Arc<dyn LlmClient>) -> WorkflowBuilder {
    WorkflowBuilder::new(
        NodeRegistry::with_builtin(),
        NodeContext::new(offline_config()).with_client(client),
    )
}

fn advice_evaluator(client: Arc<dyn LlmClient>) -> PolicyEvaluator {
    PolicyEvaluator::from_policy(ADVICE_POLICY.clone(), &builder_with(client))
        .expect("advice policy builds")
}

// ============================================================================
// Policy Evaluation
// ============================================================================

#[tokio::test]
async fn test_personal_recommendation_is_satisfied() {
    init_logging();
    let evaluator = advice_evaluator(Arc::new(ScriptedClient::new()));
    let result = evaluator.evaluate(PERSONAL_ADVICE).await.unwrap();

    assert!(result.policy_satisfied);
    assert_eq!(result.criterion_results.len(), 4);
    assert!(result.criterion_results.iter().all(|r| r.met));
    assert!(result.overall_confidence >= 0.8);
    assert_eq!(result.confidence_level, ConfidenceLevel::High);
    assert!(!result.needs_review);
    assert_eq!(result.policy_title, "Personal Recommendation");
}

#[tokio::test]
async fn test_general_research_is_not_satisfied() {
    init_logging();
    let evaluator = advice_evaluator(Arc::new(ScriptedClient::new()));
    let result = evaluator.evaluate(GENERAL_RESEARCH).await.unwrap();

    assert!(!result.policy_satisfied);
    assert!(result.result_for("criterion_1").unwrap().met);
    assert!(!result.result_for("criterion_2").unwrap().met);
    assert!(result.result_for("criterion_3").unwrap().met);
    assert!(!result.result_for("criterion_4").unwrap().met);
    assert!(result.overall_reasoning.contains("not satisfied"));
}

#[tokio::test]
async fn test_every_clause_runs_in_policy_order() {
    let evaluator = advice_evaluator(Arc::new(ScriptedClient::new()));
    let run = evaluator.run(GENERAL_RESEARCH).await.unwrap();
    assert_eq!(
        run.path(),
        vec![
            "criterion_1",
            "criterion_2",
            "criterion_3",
            "criterion_4",
            ROOT_AGGREGATOR
        ]
    );
    assert!(!run.has_errors());
}

/// Advice policy whose personalisation clause is split into two sub-clauses
fn nested_advice_policy(logic: LogicOperator) -> ParsedPolicy {
    let mut policy = ADVICE_POLICY.clone();
    policy.criteria[1] = Criterion::new(
        "criterion_2",
        "Personalisation",
        "The advice is tailored to the reader",
    )
    .with_sub_criteria(
        logic,
        vec![
            Criterion::new("criterion_2a", "Circumstances", "Refers to the reader's situation"),
            Criterion::new("criterion_2b", "Suitability", "Presented as right for the reader"),
        ],
    );
    policy
}

#[tokio::test]
async fn test_nested_any_clause_short_circuits() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.yaml");
    let policy = nested_advice_policy(LogicOperator::Any);
    policy.save_yaml(&path).unwrap();

    let loaded = ParsedPolicy::load_yaml(&path).unwrap();
    assert_eq!(loaded, policy);

    let client = Arc::new(ScriptedClient::new());
    let evaluator = PolicyEvaluator::from_policy(loaded, &builder_with(client.clone())).unwrap();

    let run = evaluator.run(PERSONAL_ADVICE).await.unwrap();
    let path = run.path();
    assert!(path.contains(&"criterion_2a"));
    assert!(!path.contains(&"criterion_2b"));
    assert_eq!(run.final_node, ROOT_AGGREGATOR);

    let result = evaluator.evaluate(PERSONAL_ADVICE).await.unwrap();
    assert!(result.policy_satisfied);
    let personalisation = result.result_for("criterion_2").unwrap();
    assert!(personalisation.met);
    assert_eq!(personalisation.sub_results.len(), 1);

    // first sub-clause fails, so the second one decides
    let text = "This fund is suitable for you and I recommend you buy XYZ Corp today.";
    let result = evaluator.evaluate(text).await.unwrap();
    let personalisation = result.result_for("criterion_2").unwrap();
    assert!(personalisation.met);
    assert_eq!(personalisation.sub_results.len(), 2);
    assert!(!result.result_for("criterion_2a").unwrap().met);
}

#[tokio::test]
async fn test_flipped_group_logic_evaluates_every_sub_clause() {
    init_logging();
    let policy = nested_advice_policy(LogicOperator::Any);
    let def = PolicyCompiler::new().compile(&policy).unwrap();
    let flip = Hypothesis::new(
        ChangeType::Structure,
        "criterion_2",
        "logic_all",
        WorkflowChange::SetGroupLogic {
            logic: LogicOperator::All,
        },
        "personalisation needs both signals",
    );
    let changed = flip.apply(&def).unwrap();

    let client = Arc::new(ScriptedClient::new());
    let evaluator =
        PolicyEvaluator::from_workflow(&changed, policy, &builder_with(client.clone())).unwrap();

    // circumstances are met but suitability is not, so ALL must keep going and fail
    let run = evaluator.run(PERSONAL_ADVICE).await.unwrap();
    let path = run.path();
    assert!(path.contains(&"criterion_2a"));
    assert!(path.contains(&"criterion_2b"));
    assert_eq!(run.final_node, ROOT_AGGREGATOR);

    let result = evaluator.evaluate(PERSONAL_ADVICE).await.unwrap();
    let personalisation = result.result_for("criterion_2").unwrap();
    assert!(!personalisation.met);
    assert_eq!(personalisation.sub_results.len(), 2);
    assert!(result.result_for("criterion_2a").unwrap().met);
    assert!(!result.result_for("criterion_2b").unwrap().met);
    assert!(!result.policy_satisfied);

    // once both sub-clauses hold, the flipped group is met
    let text = "Based on your risk profile this fund is suitable, so I recommend you buy XYZ Corp.";
    let result = evaluator.evaluate(text).await.unwrap();
    assert!(result.result_for("criterion_2").unwrap().met);
    assert!(result.policy_satisfied);
}

#[tokio::test]
async fn test_shared_evaluator_across_tasks() {
    let evaluator = advice_evaluator(Arc::new(ScriptedClient::new()));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let evaluator = evaluator.clone();
            tokio::spawn(async move {
                let text = if i % 2 == 0 {
                    PERSONAL_ADVICE
                } else {
                    GENERAL_RESEARCH
                };
                (i, evaluator.evaluate(text).await)
            })
        })
        .collect();

    for handle in handles {
        let (i, result) = handle.await.unwrap();
        assert_eq!(result.unwrap().policy_satisfied, i % 2 == 0);
    }
}

// ============================================================================
// Caching and Throttling
// ============================================================================

#[tokio::test]
async fn test_cached_answers_survive_rebuild() {
    init_logging();
    let client = Arc::new(ScriptedClient::new());
    let store = Arc::new(MemoryCacheStore::new());
    let mut config = offline_config();
    config.cache.enabled = true;
    config.cache.ttl_secs = 3600;
    let builder = WorkflowBuilder::new(
        NodeRegistry::with_builtin(),
        NodeContext::new(config)
            .with_client(client.clone())
            .with_cache_store(store.clone()),
    );

    let first = PolicyEvaluator::from_policy(ADVICE_POLICY.clone(), &builder).unwrap();
    let verdict = first.evaluate(PERSONAL_ADVICE).await.unwrap();
    assert_eq!(client.calls(), 4);
    assert!(!store.is_empty());

    first.evaluate(PERSONAL_ADVICE).await.unwrap();
    assert_eq!(client.calls(), 4);

    let rebuilt = PolicyEvaluator::from_policy(ADVICE_POLICY.clone(), &builder).unwrap();
    let cached = rebuilt.evaluate(PERSONAL_ADVICE).await.unwrap();
    assert_eq!(client.calls(), 4);
    assert_eq!(cached.policy_satisfied, verdict.policy_satisfied);

    rebuilt.evaluate(GENERAL_RESEARCH).await.unwrap();
    assert_eq!(client.calls(), 8);
}

#[tokio::test]
async fn test_disabled_cache_always_calls_model() {
    let client = Arc::new(ScriptedClient::new());
    let evaluator = advice_evaluator(client.clone());
    evaluator.evaluate(PERSONAL_ADVICE).await.unwrap();
    evaluator.evaluate(PERSONAL_ADVICE).await.unwrap();
    assert_eq!(client.calls(), 8);
}

#[tokio::test]
async fn test_fail_fast_limiter_rejects_burst() {
    let limiter = RateLimiter::per_minute(2).with_mode(ThrottleMode::FailFast);
    assert!(limiter.acquire().await.is_ok());
    assert!(limiter.acquire().await.is_ok());
    assert!(matches!(
        limiter.acquire().await,
        Err(ProviderError::RateLimited { .. })
    ));
}

// ============================================================================
// Workflow Execution
// ============================================================================

const SCREENING_WORKFLOW: &str = r#"
name: screening
description: Cheap deterministic screen before any model call
start_node: clean
nodes:
  - id: clean
    type: TransformNode
    params: { operations: [trim, lowercase, normalize_whitespace] }
    routes: { default: length }
  - id: length
    type: LengthGateNode
    params: { min_length: 3, max_length: 200, unit: words }
    routes: { too_short: rejected, within_range: advice, too_long: rejected }
  - id: advice
    type: PatternMatchNode
    params: { patterns: ["\\brecommend", "\\bbuy\\b"] }
    routes: { matched: score, not_matched: cleared }
  - id: score
    type: KeywordScorerNode
    params:
      keywords: { recommend: 1.0, buy: 1.0, you: 0.5 }
      threshold: 1.5
    routes: { above_threshold: flagged, below_threshold: cleared }
  - id: flagged
    type: LengthGateNode
    params: { min_length: 0 }
  - id: cleared
    type: LengthGateNode
    params: { min_length: 0 }
  - id: rejected
    type: LengthGateNode
    params: { min_length: 0 }
"#;

#[tokio::test]
async fn test_screening_workflow_from_file() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("screening.yaml");
    std::fs::write(&path, SCREENING_WORKFLOW).unwrap();

    let builder = WorkflowBuilder::new(
        NodeRegistry::with_builtin(),
        NodeContext::new(offline_config()),
    );
    let graph = builder.build_file(&path).unwrap();
    assert_eq!(graph.name(), "screening");

    let run = graph.run("  I RECOMMEND you buy   XYZ  ").await.unwrap();
    assert_eq!(
        run.path(),
        vec!["clean", "length", "advice", "score", "flagged"]
    );
    assert_eq!(run.state.get_str(INPUT_TEXT), Some("i recommend you buy xyz"));
    assert_eq!(run.state.get_f64("score.score"), Some(2.5));
    assert_eq!(run.steps, run.trace.len());

    let run = graph.run("hi there").await.unwrap();
    assert_eq!(run.path(), vec!["clean", "length", "rejected"]);
    assert_eq!(run.final_action.as_str(), actions::WITHIN_RANGE);

    let run = graph
        .run("The quarterly report is attached for review")
        .await
        .unwrap();
    assert_eq!(run.final_node, "cleared");
}

#[tokio::test]
async fn test_cycle_hits_step_limit() {
    let def = WorkflowLoader::parse_yaml(
        r#"
name: loop
start_node: a
max_steps: 5
nodes:
  - id: a
    type: PatternMatchNode
    params: { patterns: ["x"] }
    routes: { default: b }
  - id: b
    type: PatternMatchNode
    params: { patterns: ["y"] }
    routes: { default: a }
"#,
    )
    .unwrap();
    let graph = WorkflowBuilder::new(
        NodeRegistry::with_builtin(),
        NodeContext::new(offline_config()),
    )
    .build(&def)
    .unwrap();

    match graph.run("anything").await {
        Err(WorkflowExecutionError::StepLimitExceeded { limit, .. }) => assert_eq!(limit, 5),
        other => panic!("expected step limit, got {:?}", other.map(|r| r.path().len())),
    }
}

#[test]
fn test_compiled_workflow_round_trips_through_yaml() {
    let def = PolicyCompiler::new().compile(&ADVICE_POLICY).unwrap();
    let reloaded = WorkflowLoader::parse_yaml(&def.to_yaml().unwrap()).unwrap();
    assert_eq!(reloaded.node_ids(), def.node_ids());
    assert_eq!(reloaded.start_node, "criterion_1");
}

// ============================================================================
// Routing Properties
// ============================================================================

fn deterministic_nodes() -> Vec<Arc<dyn Node>> {
    let registry = NodeRegistry::with_builtin();
    let ctx = NodeContext::new(offline_config());
    let configs = vec![
        NodeConfig::new("any", "PatternMatchNode", json!({"patterns": ["buy", "\\d+%"]})),
        NodeConfig::new(
            "all",
            "PatternMatchNode",
            json!({"patterns": ["buy", "sell"], "mode": "all"}),
        ),
        NodeConfig::new(
            "none",
            "PatternMatchNode",
            json!({"patterns": ["guarantee"], "mode": "none", "case_sensitive": true}),
        ),
        NodeConfig::new(
            "score",
            "KeywordScorerNode",
            json!({"keywords": {"buy": 1.0, "recommend": 0.75}, "threshold": 1.0}),
        ),
        NodeConfig::new(
            "words",
            "LengthGateNode",
            json!({"min_length": 3, "max_length": 20, "unit": "words"}),
        ),
        NodeConfig::new(
            "chars",
            "LengthGateNode",
            json!({"min_length": 10, "max_length": 80}),
        ),
        NodeConfig::new(
            "clean",
            "TransformNode",
            json!({"operations": ["strip_html", "normalize_whitespace", "truncate:50"]}),
        ),
        NodeConfig::new("gate", "ConfidenceGateNode", json!({"high": 0.8, "low": 0.5})),
    ];
    configs
        .iter()
        .map(|c| registry.create(c, &ctx).expect("node builds"))
        .collect()
}

fn llm_nodes(response: &str) -> Vec<Arc<dyn Node>> {
    let registry = NodeRegistry::with_builtin();
    let ctx = NodeContext::new(offline_config()).with_client(Arc::new(EchoClient(response.to_string())));
    let configs = vec![
        NodeConfig::new(
            "kind",
            "ClassifierNode",
            json!({"categories": ["advice", "marketing", "news"]}),
        ),
        NodeConfig::new("tone", "SentimentNode", json!({})),
    ];
    configs
        .iter()
        .map(|c| registry.create(c, &ctx).expect("node builds"))
        .collect()
}

/// One prepare/execute/route step; `None` when the node fails without recovering
async fn step(node: &dyn Node, text: &str, confidence: f64) -> Option<Action> {
    let mut state = SharedState::new(&StateSchema::policy_defaults());
    state.set(INPUT_TEXT, json!(text));
    state.set("confidence", json!(confidence));
    let input = node.prepare(&state);
    match node.execute(input.clone()).await {
        Ok(output) => Some(node.route(&mut state, &input, output)),
        Err(error) => node.recover(&mut state, &error),
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_deterministic_nodes_route_declared_actions(
        text in "(?s).{0,200}",
        confidence in 0.0f64..=1.0,
    ) {
        let rt = runtime();
        for node in deterministic_nodes() {
            let action = rt.block_on(step(node.as_ref(), &text, confidence));
            prop_assert!(action.is_some(), "{} failed on {:?}", node.id(), text);
            let action = action.unwrap();
            prop_assert!(
                node.schema().declares(action.as_str()),
                "{} returned undeclared {}",
                node.id(),
                action
            );
        }
    }

    #[test]
    fn prop_model_nodes_route_declared_actions(
        label in prop_oneof![
            Just("advice".to_string()),
            Just("positive".to_string()),
            Just("sarcastic".to_string()),
            "[a-z]{1,12}",
        ],
        confidence in -1.0f64..2.0,
        garbage in proptest::bool::ANY,
    ) {
        let response = if garbage {
            format!("{} {}", label, confidence)
        } else {
            format!(
                "category: {}\nsentiment: {}\nconfidence: {}\nreasoning: fuzzed",
                label, label, confidence
            )
        };
        let rt = runtime();
        for node in llm_nodes(&response) {
            if let Some(action) = rt.block_on(step(node.as_ref(), "some text", 0.5)) {
                prop_assert!(
                    node.schema().declares(action.as_str()),
                    "{} returned undeclared {}",
                    node.id(),
                    action
                );
            }
        }
    }
}

#[test]
fn test_confidence_gate_boundaries() {
    let gate = ConfidenceGateNode::new("gate", 0.8, 0.5).unwrap();
    assert_eq!(gate.action_for(1.0), actions::HIGH_CONFIDENCE);
    assert_eq!(gate.action_for(0.8), actions::HIGH_CONFIDENCE);
    assert_eq!(gate.action_for(0.7999), actions::NEEDS_REVIEW);
    assert_eq!(gate.action_for(0.5), actions::NEEDS_REVIEW);
    assert_eq!(gate.action_for(0.4999), actions::LOW_CONFIDENCE);
    assert_eq!(gate.action_for(0.0), actions::LOW_CONFIDENCE);

    assert!(ConfidenceGateNode::new("gate", 0.5, 0.5).is_err());
    assert!(ConfidenceGateNode::new("gate", 1.1, 0.5).is_err());
    assert!(ConfidenceGateNode::new("gate", 0.8, -0.1).is_err());
}

#[test]
fn test_aggregator_truth_tables() {
    let parent = Criterion::new("p", "Parent", "");
    let child = |id: &str, met: bool, confidence: f64| {
        CriterionResult::new(&Criterion::new(id, id, ""), met, confidence, "")
    };
    let children = vec!["a".to_string(), "b".to_string()];

    let cases = [
        (true, true, true, true),
        (true, false, false, true),
        (false, true, false, true),
        (false, false, false, false),
    ];
    for (a, b, all_met, any_met) in cases {
        let all = ResultAggregatorNode::new(parent.clone(), children.clone(), LogicOperator::All)
            .combine(vec![child("a", a, 0.9), child("b", b, 0.6)]);
        assert_eq!(all.met, all_met, "ALL over ({}, {})", a, b);
        assert!((all.confidence - 0.75).abs() < 1e-9);

        let any = ResultAggregatorNode::new(parent.clone(), children.clone(), LogicOperator::Any)
            .combine(vec![child("a", a, 0.9), child("b", b, 0.6)]);
        assert_eq!(any.met, any_met, "ANY over ({}, {})", a, b);
        assert!((any.confidence - 0.9).abs() < 1e-9);
    }

    let empty = ResultAggregatorNode::new(parent, children, LogicOperator::Any).combine(vec![]);
    assert!(!empty.met);
    assert!(empty.needs_review);
    assert_eq!(empty.confidence, 0.0);
}

// ============================================================================
// Benchmark and Optimization
// ============================================================================

const ADVICE_DATASET: &str = r#"
name: personal-advice
version: "2"
description: Labelled advice and research samples
cases:
  - id: personal
    input_text: "Based on your risk profile and investment goals, I recommend you purchase shares in XYZ Corp."
    expected_satisfied: true
    category: advice
  - id: research
    input_text: "Our analysts believe XYZ Corp is a strong buy for 2024. This report is published for all subscribers."
    expected_satisfied: false
    category: research
    expected_criteria: { criterion_2: false, criterion_4: false }
  - id: news
    input_text: "XYZ Corp shares fell 3% today."
    expected_satisfied: false
    category: news
"#;

#[tokio::test]
async fn test_benchmark_dataset_file() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dataset.yaml");
    std::fs::write(&path, ADVICE_DATASET).unwrap();
    let dataset = GoldenDataset::load(&path).unwrap();
    assert_eq!(dataset.version, "2");
    assert_eq!(dataset.len(), 3);

    let evaluator = advice_evaluator(Arc::new(ScriptedClient::new()));
    let report = BenchmarkRunner::new()
        .with_concurrency(2)
        .run(&evaluator, &dataset)
        .await;

    let ids: Vec<&str> = report.outcomes.iter().map(|o| o.case_id.as_str()).collect();
    assert_eq!(ids, vec!["personal", "research", "news"]);
    assert_eq!(report.metrics.total, 3);
    assert_eq!(report.metrics.accuracy, 1.0);
    assert_eq!(report.metrics.true_positives, 1);
    assert_eq!(report.metrics.true_negatives, 2);
    assert_eq!(report.metrics.criterion_accuracy.get("criterion_2"), Some(&1.0));
    assert!(report.outcome("research").unwrap().failed_criteria().is_empty());
    assert_eq!(report.failures().count(), 0);
}

#[tokio::test]
async fn test_optimizer_converges_within_budget() {
    init_logging();
    let dataset = GoldenDataset::from_yaml(
        r#"
name: eager
cases:
  - { id: t1, input_text: "Based on your risk profile, I recommend you buy XYZ Corp.", expected_satisfied: true }
  - { id: t2, input_text: "XYZ Corp reported record earnings this quarter.", expected_satisfied: false }
  - { id: t3, input_text: "XYZ Corp shares fell 3% today.", expected_satisfied: false }
  - { id: t4, input_text: "I recommend you add XYZ Corp to your portfolio.", expected_satisfied: true }
"#,
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let tracker = Arc::new(ExperimentTracker::open(dir.path()).await.unwrap());
    let budget = OptimizationBudget {
        max_iterations: 5,
        target: 0.95,
        ..OptimizationBudget::default()
    };
    let optimizer = Optimizer::new(builder_with(Arc::new(EagerClient)), budget)
        .with_tracker(tracker.clone());

    let workflow = PolicyCompiler::new().compile(&ADVICE_POLICY).unwrap();
    let result = optimizer
        .optimize(&ADVICE_POLICY, workflow, &dataset)
        .await
        .unwrap();

    assert_eq!(result.baseline_score, 0.5);
    assert!(matches!(
        result.reason,
        ConvergenceReason::TargetReached | ConvergenceReason::MaxIterations | ConvergenceReason::Patience
    ));
    assert!(result.iterations <= 5);
    assert!(result.best_score >= result.baseline_score);
    if result.reason == ConvergenceReason::TargetReached {
        assert!(result.best_score >= 0.95);
    }

    // every experiment was persisted and reloads from disk
    let recorded = tracker.len().await;
    let evaluated = result.history.iter().filter(|r| r.score.is_some()).count();
    assert_eq!(recorded, evaluated + 1);
    let reopened = ExperimentTracker::open(dir.path()).await.unwrap();
    assert_eq!(reopened.len().await, recorded);
    let best = reopened.best(OptimizationMetric::Accuracy).await.unwrap();
    assert_eq!(best.metrics().accuracy, result.best_score);
}
