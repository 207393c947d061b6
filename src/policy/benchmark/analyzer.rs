// SPDX-License-Identifier: MIT

//! Failure analysis over a benchmark report

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::runner::BenchmarkReport;
use crate::policy::models::ConfidenceLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Failures concentrated in one dataset category
    CategoryCluster,
    /// One clause disagrees with its labels
    CriterionFailure,
    FalsePositiveSkew,
    FalseNegativeSkew,
    /// High-confidence predictions wrong more often than expected
    ConfidenceMiscalibration,
    /// Evaluations that errored instead of producing a verdict
    EvaluationErrors,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    fn from_share(share: f64) -> Self {
        if share >= 0.3 {
            Self::High
        } else if share >= 0.1 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailurePattern {
    pub pattern_type: PatternType,
    pub description: String,
    pub severity: Severity,
    pub affected_cases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criterion_id: Option<String>,
    /// The measurement that triggered the pattern
    pub metric_value: f64,
}

/// Turns a report into failure patterns, most severe first
#[async_trait]
pub trait FailureAnalyzer: Send + Sync {
    async fn analyze(&self, report: &BenchmarkReport) -> Vec<FailurePattern>;
}

#[derive(Debug, Clone)]
pub struct RuleBasedAnalyzer {
    /// Fewest failing cases that make a cluster or a skew
    pub min_cluster_size: usize,
    /// Categories below this accuracy are reported
    pub category_accuracy_floor: f64,
    /// Clauses below this label agreement are reported
    pub criterion_accuracy_floor: f64,
    /// One error side must outnumber the other by this factor
    pub skew_ratio: f64,
    /// Tolerated share of wrong high-confidence predictions
    pub expected_high_confidence_error_rate: f64,
}

impl Default for RuleBasedAnalyzer {
    fn default() -> Self {
        Self {
            min_cluster_size: 2,
            category_accuracy_floor: 0.8,
            criterion_accuracy_floor: 0.8,
            skew_ratio: 2.0,
            expected_high_confidence_error_rate: 0.1,
        }
    }
}

impl RuleBasedAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    fn category_clusters(&self, report: &BenchmarkReport, out: &mut Vec<FailurePattern>) {
        let mut failing: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for outcome in report.failures() {
            failing
                .entry(outcome.category.as_str())
                .or_default()
                .push(outcome.case_id.clone());
        }

        for (category, cases) in failing {
            let accuracy = report
                .metrics
                .category_accuracy
                .get(category)
                .copied()
                .unwrap_or(0.0);
            if cases.len() >= self.min_cluster_size && accuracy < self.category_accuracy_floor {
                out.push(FailurePattern {
                    pattern_type: PatternType::CategoryCluster,
                    description: format!(
                        "{} failures in category '{}' (accuracy {:.2})",
                        cases.len(),
                        category,
                        accuracy
                    ),
                    severity: Severity::from_share(cases.len() as f64 / report.outcomes.len() as f64),
                    affected_cases: cases,
                    category: Some(category.to_string()),
                    criterion_id: None,
                    metric_value: accuracy,
                });
            }
        }
    }

    fn failing_criteria(&self, report: &BenchmarkReport, out: &mut Vec<FailurePattern>) {
        for (criterion, accuracy) in &report.metrics.criterion_accuracy {
            if *accuracy >= self.criterion_accuracy_floor {
                continue;
            }
            let cases: Vec<String> = report
                .outcomes
                .iter()
                .filter(|o| o.failed_criteria().contains(&criterion.as_str()))
                .map(|o| o.case_id.clone())
                .collect();
            out.push(FailurePattern {
                pattern_type: PatternType::CriterionFailure,
                description: format!(
                    "Criterion '{}' agrees with labels in {:.0}% of cases",
                    criterion,
                    accuracy * 100.0
                ),
                severity: Severity::from_share(1.0 - accuracy),
                affected_cases: cases,
                category: None,
                criterion_id: Some(criterion.clone()),
                metric_value: *accuracy,
            });
        }
    }

    fn skew(&self, report: &BenchmarkReport, out: &mut Vec<FailurePattern>) {
        let fp: Vec<String> = report
            .outcomes
            .iter()
            .filter(|o| o.is_false_positive())
            .map(|o| o.case_id.clone())
            .collect();
        let fn_: Vec<String> = report
            .outcomes
            .iter()
            .filter(|o| o.is_false_negative())
            .map(|o| o.case_id.clone())
            .collect();
        let total = report.outcomes.len().max(1) as f64;

        let dominant = if fp.len() >= self.min_cluster_size
            && fp.len() as f64 >= self.skew_ratio * fn_.len() as f64
        {
            Some((PatternType::FalsePositiveSkew, "false positives", fp, fn_.len()))
        } else if fn_.len() >= self.min_cluster_size
            && fn_.len() as f64 >= self.skew_ratio * fp.len() as f64
        {
            Some((PatternType::FalseNegativeSkew, "false negatives", fn_, fp.len()))
        } else {
            None
        };

        if let Some((pattern_type, label, cases, other)) = dominant {
            out.push(FailurePattern {
                pattern_type,
                description: format!("{} {} against {} on the other side", cases.len(), label, other),
                severity: Severity::from_share(cases.len() as f64 / total),
                metric_value: cases.len() as f64 / total,
                affected_cases: cases,
                category: None,
                criterion_id: None,
            });
        }
    }

    fn miscalibration(&self, report: &BenchmarkReport, out: &mut Vec<FailurePattern>) {
        let rate = report.metrics.high_confidence_error_rate;
        if rate <= self.expected_high_confidence_error_rate {
            return;
        }
        let cases: Vec<String> = report
            .failures()
            .filter(|o| o.confidence_level == Some(ConfidenceLevel::High))
            .map(|o| o.case_id.clone())
            .collect();
        out.push(FailurePattern {
            pattern_type: PatternType::ConfidenceMiscalibration,
            description: format!(
                "{:.0}% of high-confidence predictions are wrong (expected at most {:.0}%)",
                rate * 100.0,
                self.expected_high_confidence_error_rate * 100.0
            ),
            severity: Severity::from_share(rate),
            affected_cases: cases,
            category: None,
            criterion_id: None,
            metric_value: rate,
        });
    }

    fn errors(&self, report: &BenchmarkReport, out: &mut Vec<FailurePattern>) {
        let cases: Vec<String> = report
            .outcomes
            .iter()
            .filter(|o| o.error.is_some())
            .map(|o| o.case_id.clone())
            .collect();
        if cases.is_empty() {
            return;
        }
        let share = cases.len() as f64 / report.outcomes.len() as f64;
        out.push(FailurePattern {
            pattern_type: PatternType::EvaluationErrors,
            description: format!("{} case(s) failed to evaluate", cases.len()),
            severity: Severity::from_share(share),
            affected_cases: cases,
            category: None,
            criterion_id: None,
            metric_value: share,
        });
    }
}

#[async_trait]
impl FailureAnalyzer for RuleBasedAnalyzer {
    async fn analyze(&self, report: &BenchmarkReport) -> Vec<FailurePattern> {
        let mut patterns = Vec::new();
        self.category_clusters(report, &mut patterns);
        self.failing_criteria(report, &mut patterns);
        self.skew(report, &mut patterns);
        self.miscalibration(report, &mut patterns);
        self.errors(report, &mut patterns);

        // stable: ties keep rule order
        patterns.sort_by(|a, b| b.severity.cmp(&a.severity));
        log::debug!("Found {} failure pattern(s)", patterns.len());
        patterns
    }
}
