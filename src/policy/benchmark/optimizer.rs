// SPDX-License-Identifier: MIT

//! Hill-climbing optimizer over workflow definitions
//!
//! Each iteration analyzes the best report so far, applies one untried
//! hypothesis to the best workflow, re-benchmarks and keeps the candidate
//! only if the tracked metric improves by at least `min_improvement`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::analyzer::{FailureAnalyzer, RuleBasedAnalyzer};
use super::dataset::GoldenDataset;
use super::experiment::{Experiment, ExperimentTracker};
use super::hypothesis::{Hypothesis, HypothesisError, HypothesisGenerator, RuleBasedHypothesisGenerator};
use super::metrics::OptimizationMetric;
use super::runner::{BenchmarkReport, BenchmarkRunner};
use crate::flow::error::Result;
use crate::policy::evaluator::PolicyEvaluator;
use crate::policy::models::ParsedPolicy;
use crate::policy::workflow::builder::WorkflowBuilder;
use crate::policy::workflow::types::WorkflowDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationBudget {
    pub max_iterations: usize,
    /// Stop once the metric reaches this value
    pub target: f64,
    /// Stop after this many iterations without an accepted change
    pub patience: usize,
    pub min_improvement: f64,
    pub metric: OptimizationMetric,
}

impl Default for OptimizationBudget {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            target: 0.95,
            patience: 3,
            min_improvement: 0.01,
            metric: OptimizationMetric::default(),
        }
    }
}

/// Why the optimizer stopped; exactly one per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceReason {
    TargetReached,
    MaxIterations,
    Patience,
    NoHypotheses,
    Cancelled,
}

impl fmt::Display for ConvergenceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::TargetReached => "target reached",
            Self::MaxIterations => "iteration budget exhausted",
            Self::Patience => "no improvement within patience",
            Self::NoHypotheses => "no untried hypotheses",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", text)
    }
}

/// What happened to one hypothesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub hypothesis_id: String,
    /// Candidate score, when it could be benchmarked
    pub score: Option<f64>,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub best_workflow: WorkflowDefinition,
    pub best_report: BenchmarkReport,
    pub baseline_score: f64,
    pub best_score: f64,
    pub iterations: usize,
    pub reason: ConvergenceReason,
    pub history: Vec<IterationRecord>,
    /// Hypotheses folded into the best workflow, in order
    pub applied: Vec<Hypothesis>,
}

impl OptimizationResult {
    pub fn improvement(&self) -> f64 {
        self.best_score - self.baseline_score
    }
}

pub struct Optimizer {
    builder: WorkflowBuilder,
    runner: BenchmarkRunner,
    analyzer: Arc<dyn FailureAnalyzer>,
    generator: Arc<dyn HypothesisGenerator>,
    budget: OptimizationBudget,
    tracker: Arc<ExperimentTracker>,
    cancel: CancellationToken,
}

impl Optimizer {
    /// Rule-based analyzer and generator, in-memory tracking
    pub fn new(builder: WorkflowBuilder, budget: OptimizationBudget) -> Self {
        Self {
            builder,
            runner: BenchmarkRunner::new(),
            analyzer: Arc::new(RuleBasedAnalyzer::new()),
            generator: Arc::new(RuleBasedHypothesisGenerator::new()),
            budget,
            tracker: Arc::new(ExperimentTracker::in_memory()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_runner(mut self, runner: BenchmarkRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn FailureAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn HypothesisGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<ExperimentTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    /// Token that stops the loop before its next iteration
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn budget(&self) -> &OptimizationBudget {
        &self.budget
    }

    pub fn tracker(&self) -> &Arc<ExperimentTracker> {
        &self.tracker
    }

    /// Optimize `workflow` for `policy` against `dataset`
    ///
    /// Only a baseline that fails to build or record is an error; candidate
    /// failures are logged in the history and the loop moves on.
    pub async fn optimize(
        &self,
        policy: &ParsedPolicy,
        workflow: WorkflowDefinition,
        dataset: &GoldenDataset,
    ) -> Result<OptimizationResult> {
        let metric = self.budget.metric;
        let evaluator = PolicyEvaluator::from_workflow(&workflow, policy.clone(), &self.builder)?;
        let baseline = self.runner.run(&evaluator, dataset).await;
        let baseline_score = baseline.metrics.get(metric);
        let mut best_id = self
            .tracker
            .record(Experiment::new(workflow.clone(), &baseline, None, None, true))
            .await?
            .id();

        log::info!("Baseline {}: {:.3}", metric, baseline_score);

        let mut best_workflow = workflow;
        let mut best_report = baseline;
        let mut best_score = baseline_score;
        let mut tried: HashSet<String> = HashSet::new();
        let mut history = Vec::new();
        let mut applied = Vec::new();
        let mut stale = 0usize;
        let mut iterations = 0usize;

        let reason = if best_score >= self.budget.target {
            ConvergenceReason::TargetReached
        } else {
            loop {
                if iterations >= self.budget.max_iterations {
                    break ConvergenceReason::MaxIterations;
                }
                if self.cancel.is_cancelled() {
                    break ConvergenceReason::Cancelled;
                }

                let patterns = self.analyzer.analyze(&best_report).await;
                let candidates = self.generator.generate(&best_workflow, &patterns).await;
                let Some(hypothesis) = candidates.into_iter().find(|h| !tried.contains(&h.id))
                else {
                    break ConvergenceReason::NoHypotheses;
                };
                tried.insert(hypothesis.id.clone());
                iterations += 1;

                log::info!(
                    "Iteration {}: trying {} ({})",
                    iterations,
                    hypothesis.id,
                    hypothesis.rationale
                );

                let mut record = IterationRecord {
                    iteration: iterations,
                    hypothesis_id: hypothesis.id.clone(),
                    score: None,
                    accepted: false,
                    error: None,
                };

                match self.try_hypothesis(policy, &best_workflow, &hypothesis, dataset).await {
                    Ok((candidate, report)) => {
                        let score = report.metrics.get(metric);
                        let accepted = score >= best_score + self.budget.min_improvement;
                        record.score = Some(score);
                        record.accepted = accepted;

                        let experiment = Experiment::new(
                            candidate.clone(),
                            &report,
                            Some(hypothesis.clone()),
                            Some(best_id),
                            accepted,
                        );
                        let experiment_id = self.record(experiment).await;

                        if accepted {
                            log::info!("Accepted {}: {:.3} -> {:.3}", hypothesis.id, best_score, score);
                            best_workflow = candidate;
                            best_report = report;
                            best_score = score;
                            if let Some(id) = experiment_id {
                                best_id = id;
                            }
                            applied.push(hypothesis);
                            stale = 0;
                        } else {
                            log::info!("Rejected {}: {:.3} (best {:.3})", hypothesis.id, score, best_score);
                            stale += 1;
                        }
                    }
                    Err(e) => {
                        log::warn!("Hypothesis {} could not be evaluated: {}", hypothesis.id, e);
                        record.error = Some(e.to_string());
                        stale += 1;
                    }
                }
                history.push(record);

                if best_score >= self.budget.target {
                    break ConvergenceReason::TargetReached;
                }
                if stale >= self.budget.patience {
                    break ConvergenceReason::Patience;
                }
            }
        };

        log::info!(
            "Optimization stopped ({}) after {} iteration(s): {} {:.3} -> {:.3}",
            reason,
            iterations,
            metric,
            baseline_score,
            best_score
        );

        Ok(OptimizationResult {
            best_workflow,
            best_report,
            baseline_score,
            best_score,
            iterations,
            reason,
            history,
            applied,
        })
    }

    async fn try_hypothesis(
        &self,
        policy: &ParsedPolicy,
        workflow: &WorkflowDefinition,
        hypothesis: &Hypothesis,
        dataset: &GoldenDataset,
    ) -> std::result::Result<(WorkflowDefinition, BenchmarkReport), HypothesisError> {
        let candidate = hypothesis.apply(workflow)?;
        let evaluator = PolicyEvaluator::from_workflow(&candidate, policy.clone(), &self.builder)?;
        let report = self.runner.run(&evaluator, dataset).await;
        Ok((candidate, report))
    }

    /// A failed write loses the record, not the run
    async fn record(&self, experiment: Experiment) -> Option<Uuid> {
        match self.tracker.record(experiment).await {
            Ok(recorded) => Some(recorded.id()),
            Err(e) => {
                log::error!("Failed to record experiment: {}", e);
                None
            }
        }
    }
}
