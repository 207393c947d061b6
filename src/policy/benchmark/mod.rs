// SPDX-License-Identifier: MIT

//! Benchmark and optimization loop
//!
//! benchmark -> analyze -> hypothesize -> apply and re-benchmark, with
//! every benchmarked workflow kept as an [`Experiment`].

pub mod analyzer;
pub mod dataset;
pub mod experiment;
pub mod hypothesis;
pub mod metrics;
pub mod optimizer;
pub mod runner;

pub use analyzer::{FailureAnalyzer, FailurePattern, PatternType, RuleBasedAnalyzer, Severity};
pub use dataset::{GoldenDataset, TestCase};
pub use experiment::{Experiment, ExperimentTracker};
pub use hypothesis::{
    ChangeType, Hypothesis, HypothesisError, HypothesisGenerator, RuleBasedHypothesisGenerator,
    WorkflowChange,
};
pub use metrics::{BenchmarkMetrics, OptimizationMetric};
pub use optimizer::{
    ConvergenceReason, IterationRecord, OptimizationBudget, OptimizationResult, Optimizer,
};
pub use runner::{BenchmarkReport, BenchmarkRunner, CaseOutcome};
