// SPDX-License-Identifier: MIT

//! Benchmark metrics
//!
//! "Positive" means the policy is satisfied. An evaluation that errored
//! counts as a wrong prediction on whichever side it was expected.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::runner::CaseOutcome;
use crate::policy::models::ConfidenceLevel;

/// Metric the optimizer climbs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationMetric {
    #[default]
    Accuracy,
    Precision,
    Recall,
    F1,
}

impl fmt::Display for OptimizationMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accuracy => "accuracy",
            Self::Precision => "precision",
            Self::Recall => "recall",
            Self::F1 => "f1",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BenchmarkMetrics {
    pub total: usize,
    pub correct: usize,
    pub errors: usize,
    pub true_positives: usize,
    pub true_negatives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Accuracy per dataset category
    pub category_accuracy: BTreeMap<String, f64>,
    /// Agreement with labelled clause verdicts, per clause id
    pub criterion_accuracy: BTreeMap<String, f64>,
    /// Share of high-confidence predictions that were wrong
    pub high_confidence_error_rate: f64,
    pub mean_confidence: f64,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl BenchmarkMetrics {
    pub fn from_outcomes(outcomes: &[CaseOutcome]) -> Self {
        let mut m = Self {
            total: outcomes.len(),
            ..Self::default()
        };

        let mut by_category: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        let mut by_criterion: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        let (mut high, mut high_wrong) = (0usize, 0usize);
        let mut confidence_sum = 0.0;

        for outcome in outcomes {
            let correct = outcome.is_correct();
            if outcome.error.is_some() {
                m.errors += 1;
            }
            match (outcome.expected_satisfied, correct) {
                (true, true) => m.true_positives += 1,
                (false, true) => m.true_negatives += 1,
                (false, false) => m.false_positives += 1,
                (true, false) => m.false_negatives += 1,
            }
            if correct {
                m.correct += 1;
            }

            let entry = by_category.entry(outcome.category.as_str()).or_default();
            entry.1 += 1;
            if correct {
                entry.0 += 1;
            }

            for (id, expected) in &outcome.expected_criteria {
                let entry = by_criterion.entry(id.as_str()).or_default();
                entry.1 += 1;
                if outcome.criteria.get(id) == Some(expected) {
                    entry.0 += 1;
                }
            }

            if outcome.confidence_level == Some(ConfidenceLevel::High) {
                high += 1;
                if !correct {
                    high_wrong += 1;
                }
            }
            confidence_sum += outcome.confidence;
        }

        m.accuracy = ratio(m.correct, m.total);
        m.precision = ratio(m.true_positives, m.true_positives + m.false_positives);
        m.recall = ratio(m.true_positives, m.true_positives + m.false_negatives);
        m.f1 = if m.precision + m.recall > 0.0 {
            2.0 * m.precision * m.recall / (m.precision + m.recall)
        } else {
            0.0
        };
        m.category_accuracy = by_category
            .into_iter()
            .map(|(k, (ok, n))| (k.to_string(), ratio(ok, n)))
            .collect();
        m.criterion_accuracy = by_criterion
            .into_iter()
            .map(|(k, (ok, n))| (k.to_string(), ratio(ok, n)))
            .collect();
        m.high_confidence_error_rate = ratio(high_wrong, high);
        m.mean_confidence = if m.total == 0 {
            0.0
        } else {
            confidence_sum / m.total as f64
        };
        m
    }

    pub fn get(&self, metric: OptimizationMetric) -> f64 {
        match metric {
            OptimizationMetric::Accuracy => self.accuracy,
            OptimizationMetric::Precision => self.precision,
            OptimizationMetric::Recall => self.recall,
            OptimizationMetric::F1 => self.f1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::benchmark::runner::tests::outcome;

    #[test]
    fn test_confusion_counts_and_scores() {
        let outcomes = vec![
            outcome("a", true, Some(true), 0.9),
            outcome("b", true, Some(false), 0.9),
            outcome("c", false, Some(false), 0.6),
            outcome("d", false, Some(true), 0.6),
            outcome("e", true, Some(true), 0.6),
        ];
        let m = BenchmarkMetrics::from_outcomes(&outcomes);
        assert_eq!(m.true_positives, 2);
        assert_eq!(m.false_negatives, 1);
        assert_eq!(m.true_negatives, 1);
        assert_eq!(m.false_positives, 1);
        assert!((m.accuracy - 0.6).abs() < 1e-9);
        assert!((m.precision - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.recall - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.f1 - 2.0 / 3.0).abs() < 1e-9);
        // two high-confidence predictions, one wrong
        assert!((m.high_confidence_error_rate - 0.5).abs() < 1e-9);
        assert_eq!(m.get(OptimizationMetric::Accuracy), m.accuracy);
    }

    #[test]
    fn test_errors_count_as_wrong() {
        let outcomes = vec![outcome("a", true, None, 0.0), outcome("b", false, None, 0.0)];
        let m = BenchmarkMetrics::from_outcomes(&outcomes);
        assert_eq!(m.errors, 2);
        assert_eq!(m.false_negatives, 1);
        assert_eq!(m.false_positives, 1);
        assert_eq!(m.accuracy, 0.0);
        assert_eq!(m.f1, 0.0);
    }

    #[test]
    fn test_category_and_criterion_accuracy() {
        let mut a = outcome("a", true, Some(true), 0.9);
        a.category = "clear".to_string();
        a.expected_criteria.insert("c1".to_string(), true);
        a.criteria.insert("c1".to_string(), true);
        let mut b = outcome("b", true, Some(false), 0.9);
        b.category = "clear".to_string();
        b.expected_criteria.insert("c1".to_string(), true);
        b.criteria.insert("c1".to_string(), false);
        let c = outcome("c", false, Some(false), 0.9);

        let m = BenchmarkMetrics::from_outcomes(&[a, b, c]);
        assert_eq!(m.category_accuracy["clear"], 0.5);
        assert_eq!(m.category_accuracy["general"], 1.0);
        assert_eq!(m.criterion_accuracy["c1"], 0.5);
    }

    #[test]
    fn test_empty_outcomes() {
        let m = BenchmarkMetrics::from_outcomes(&[]);
        assert_eq!(m.total, 0);
        assert_eq!(m.accuracy, 0.0);
        assert_eq!(m.mean_confidence, 0.0);
    }
}
