// SPDX-License-Identifier: MIT

//! Benchmark runner - evaluates every dataset case and scores the outcomes

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use super::dataset::{GoldenDataset, TestCase};
use super::metrics::BenchmarkMetrics;
use crate::policy::evaluator::PolicyEvaluator;
use crate::policy::models::{ConfidenceLevel, CriterionResult, YamlDocument};

/// Result of one case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseOutcome {
    pub case_id: String,
    pub category: String,
    pub expected_satisfied: bool,
    /// None when the evaluation failed
    pub predicted_satisfied: Option<bool>,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_level: Option<ConfidenceLevel>,
    /// Predicted verdict per clause id (sub-clauses included)
    #[serde(default)]
    pub criteria: BTreeMap<String, bool>,
    #[serde(default)]
    pub expected_criteria: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl CaseOutcome {
    pub fn is_correct(&self) -> bool {
        self.predicted_satisfied == Some(self.expected_satisfied)
    }

    /// Predicted satisfied but expected not
    pub fn is_false_positive(&self) -> bool {
        !self.expected_satisfied && self.predicted_satisfied == Some(true)
    }

    pub fn is_false_negative(&self) -> bool {
        self.expected_satisfied && self.predicted_satisfied == Some(false)
    }

    /// Labelled clauses the evaluation got wrong or did not reach
    pub fn failed_criteria(&self) -> Vec<&str> {
        self.expected_criteria
            .iter()
            .filter(|(id, expected)| self.criteria.get(id.as_str()) != Some(*expected))
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// Scored run of a dataset against one workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub dataset: String,
    pub version: String,
    pub workflow: String,
    pub created_at: DateTime<Utc>,
    pub outcomes: Vec<CaseOutcome>,
    pub metrics: BenchmarkMetrics,
}

impl YamlDocument for BenchmarkReport {}

impl BenchmarkReport {
    pub fn failures(&self) -> impl Iterator<Item = &CaseOutcome> {
        self.outcomes.iter().filter(|o| !o.is_correct())
    }

    pub fn outcome(&self, case_id: &str) -> Option<&CaseOutcome> {
        self.outcomes.iter().find(|o| o.case_id == case_id)
    }
}

#[derive(Debug, Clone)]
pub struct BenchmarkRunner {
    concurrency: usize,
}

impl Default for BenchmarkRunner {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

impl BenchmarkRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cases evaluated at once; outcomes stay in dataset order
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn run(&self, evaluator: &PolicyEvaluator, dataset: &GoldenDataset) -> BenchmarkReport {
        log::info!(
            "Benchmarking '{}' on dataset '{}' ({} cases, concurrency {})",
            evaluator.graph().name(),
            dataset.name,
            dataset.cases.len(),
            self.concurrency
        );

        let outcomes: Vec<CaseOutcome> = stream::iter(dataset.cases.iter())
            .map(|case| run_case(evaluator, case))
            .buffered(self.concurrency)
            .collect()
            .await;

        let metrics = BenchmarkMetrics::from_outcomes(&outcomes);
        log::info!(
            "Benchmark finished: accuracy {:.3}, f1 {:.3}, {} error(s)",
            metrics.accuracy,
            metrics.f1,
            metrics.errors
        );

        BenchmarkReport {
            dataset: dataset.name.clone(),
            version: dataset.version.clone(),
            workflow: evaluator.graph().name().to_string(),
            created_at: Utc::now(),
            outcomes,
            metrics,
        }
    }
}

async fn run_case(evaluator: &PolicyEvaluator, case: &TestCase) -> CaseOutcome {
    let started = Instant::now();
    let mut outcome = CaseOutcome {
        case_id: case.id.clone(),
        category: case.category.clone(),
        expected_satisfied: case.expected_satisfied,
        predicted_satisfied: None,
        confidence: 0.0,
        confidence_level: None,
        criteria: BTreeMap::new(),
        expected_criteria: case.expected_criteria.clone(),
        error: None,
        duration_ms: 0,
    };

    match evaluator.evaluate(&case.input_text).await {
        Ok(result) => {
            outcome.predicted_satisfied = Some(result.policy_satisfied);
            outcome.confidence = result.overall_confidence;
            outcome.confidence_level = Some(result.confidence_level);
            collect_verdicts(&result.criterion_results, &mut outcome.criteria);
        }
        Err(e) => {
            log::warn!("Case {} failed: {}", case.id, e);
            outcome.error = Some(e.to_string());
        }
    }
    outcome.duration_ms = started.elapsed().as_millis() as u64;
    outcome
}

fn collect_verdicts(results: &[CriterionResult], out: &mut BTreeMap<String, bool>) {
    for result in results {
        out.insert(result.criterion_id.clone(), result.met);
        collect_verdicts(&result.sub_results, out);
    }
}
