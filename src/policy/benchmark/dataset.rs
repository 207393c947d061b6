// SPDX-License-Identifier: MIT

//! Golden datasets: labelled inputs with expected verdicts

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use crate::flow::error::{ConfigurationError, Result};
use crate::policy::models::YamlDocument;

fn default_category() -> String {
    "general".to_string()
}

/// One labelled input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub input_text: String,
    pub expected_satisfied: bool,
    /// Free-form tag used to cluster failures
    #[serde(default = "default_category")]
    pub category: String,
    /// Expected verdict per clause id, where labelled
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expected_criteria: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
}

impl TestCase {
    pub fn new(id: &str, input_text: &str, expected_satisfied: bool) -> Self {
        Self {
            id: id.to_string(),
            input_text: input_text.to_string(),
            expected_satisfied,
            category: default_category(),
            expected_criteria: BTreeMap::new(),
            notes: String::new(),
        }
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    pub fn expect_criterion(mut self, criterion_id: &str, met: bool) -> Self {
        self.expected_criteria.insert(criterion_id.to_string(), met);
        self
    }
}

/// Ordered test cases for one policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenDataset {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub cases: Vec<TestCase>,
}

fn default_version() -> String {
    "1".to_string()
}

impl YamlDocument for GoldenDataset {}

impl GoldenDataset {
    pub fn new(name: &str, cases: Vec<TestCase>) -> Self {
        Self {
            name: name.to_string(),
            version: default_version(),
            description: String::new(),
            cases,
        }
    }

    /// Load and validate a dataset file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let dataset = Self::load_yaml(path)?;
        dataset.validate()?;
        log::info!(
            "Loaded dataset '{}' v{} with {} cases",
            dataset.name,
            dataset.version,
            dataset.cases.len()
        );
        Ok(dataset)
    }

    /// Case ids must be unique and the dataset non-empty
    pub fn validate(&self) -> std::result::Result<(), ConfigurationError> {
        if self.cases.is_empty() {
            return Err(ConfigurationError::Invalid(format!(
                "dataset '{}' has no cases",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for case in &self.cases {
            if !seen.insert(case.id.as_str()) {
                return Err(ConfigurationError::Invalid(format!(
                    "dataset '{}' repeats case id '{}'",
                    self.name, case.id
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn categories(&self) -> BTreeSet<&str> {
        self.cases.iter().map(|c| c.category.as_str()).collect()
    }

    pub fn case(&self, id: &str) -> Option<&TestCase> {
        self.cases.iter().find(|c| c.id == id)
    }
}
