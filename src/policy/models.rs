// SPDX-License-Identifier: MIT

//! Policy, clause and result types

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::flow::error::Result;
use crate::policy::config::ConfidenceGateConfig;

/// YAML round-tripping for documents that are saved and reloaded
pub trait YamlDocument: Serialize + DeserializeOwned {
    fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    fn save_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    fn load_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}

/// How clause results combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogicOperator {
    /// Every clause must hold
    #[default]
    All,
    /// At least one clause must hold
    Any,
}

/// One evaluatable clause of a policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    /// Stable identifier, reused as the node id
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_criteria: Vec<Criterion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_logic: Option<LogicOperator>,
}

impl Criterion {
    pub fn new(id: &str, name: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            sub_criteria: Vec::new(),
            sub_logic: None,
        }
    }

    pub fn with_sub_criteria(mut self, logic: LogicOperator, subs: Vec<Criterion>) -> Self {
        self.sub_logic = Some(logic);
        self.sub_criteria = subs;
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.sub_criteria.is_empty()
    }

    /// Logic for combining sub-clauses; ALL unless stated
    pub fn sub_logic(&self) -> LogicOperator {
        self.sub_logic.unwrap_or_default()
    }
}

/// A policy whose clause tree has already been extracted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedPolicy {
    pub title: String,
    pub description: String,
    pub criteria: Vec<Criterion>,
    #[serde(default)]
    pub logic: LogicOperator,
    #[serde(default)]
    pub raw_text: String,
}

impl YamlDocument for ParsedPolicy {}

impl ParsedPolicy {
    /// Depth-first walk over every clause
    pub fn all_criteria(&self) -> Vec<&Criterion> {
        fn walk<'a>(criteria: &'a [Criterion], out: &mut Vec<&'a Criterion>) {
            for criterion in criteria {
                out.push(criterion);
                walk(&criterion.sub_criteria, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.criteria, &mut out);
        out
    }
}

/// Bucket of a confidence score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    #[default]
    Medium,
    Low,
}

impl ConfidenceLevel {
    /// `>= high` is High, `< low` is Low, anything between is Medium
    pub fn from_score(score: f64, thresholds: &ConfidenceGateConfig) -> Self {
        if score >= thresholds.high {
            Self::High
        } else if score >= thresholds.low {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Outcome for one clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionResult {
    pub criterion_id: String,
    pub criterion_name: String,
    pub met: bool,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub needs_review: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_results: Vec<CriterionResult>,
}

impl CriterionResult {
    pub fn new(criterion: &Criterion, met: bool, confidence: f64, reasoning: &str) -> Self {
        Self {
            criterion_id: criterion.id.clone(),
            criterion_name: criterion.name.clone(),
            met,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: reasoning.to_string(),
            needs_review: false,
            sub_results: Vec::new(),
        }
    }

    /// Result recorded when a clause could not be evaluated
    pub fn degraded(criterion: &Criterion, error: &str) -> Self {
        Self {
            needs_review: true,
            ..Self::new(
                criterion,
                false,
                0.0,
                &format!("Evaluation failed: {}", error),
            )
        }
    }
}

/// Final verdict of one evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub policy_satisfied: bool,
    pub input_text: String,
    pub policy_title: String,
    /// Per clause, in policy order, sub-clauses nested
    pub criterion_results: Vec<CriterionResult>,
    pub overall_reasoning: String,
    pub overall_confidence: f64,
    #[serde(default)]
    pub confidence_level: ConfidenceLevel,
    #[serde(default)]
    pub needs_review: bool,
    #[serde(default)]
    pub low_confidence_criteria: Vec<String>,
}

impl YamlDocument for EvaluationResult {}

impl EvaluationResult {
    pub fn result_for(&self, criterion_id: &str) -> Option<&CriterionResult> {
        fn find<'a>(results: &'a [CriterionResult], id: &str) -> Option<&'a CriterionResult> {
            results.iter().find_map(|r| {
                if r.criterion_id == id {
                    Some(r)
                } else {
                    find(&r.sub_results, id)
                }
            })
        }
        find(&self.criterion_results, criterion_id)
    }
}
