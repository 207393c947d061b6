// SPDX-License-Identifier: MIT

//! Experiment records
//!
//! An experiment is written once and never changed. The tracker keeps them
//! in memory and, when given a directory, as one YAML file per record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::hypothesis::Hypothesis;
use super::metrics::{BenchmarkMetrics, OptimizationMetric};
use super::runner::BenchmarkReport;
use crate::flow::error::{PolicyFlowError, Result};
use crate::policy::models::YamlDocument;
use crate::policy::workflow::types::WorkflowDefinition;

/// Immutable record of one benchmarked workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    id: Uuid,
    created_at: DateTime<Utc>,
    /// Experiment whose workflow this one modified
    parent_id: Option<Uuid>,
    workflow: WorkflowDefinition,
    dataset: String,
    dataset_version: String,
    hypothesis: Option<Hypothesis>,
    metrics: BenchmarkMetrics,
    accepted: bool,
}

impl YamlDocument for Experiment {}

impl Experiment {
    pub fn new(
        workflow: WorkflowDefinition,
        report: &BenchmarkReport,
        hypothesis: Option<Hypothesis>,
        parent_id: Option<Uuid>,
        accepted: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            parent_id,
            workflow,
            dataset: report.dataset.clone(),
            dataset_version: report.version.clone(),
            hypothesis,
            metrics: report.metrics.clone(),
            accepted,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn parent_id(&self) -> Option<Uuid> {
        self.parent_id
    }

    pub fn workflow(&self) -> &WorkflowDefinition {
        &self.workflow
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn dataset_version(&self) -> &str {
        &self.dataset_version
    }

    pub fn hypothesis(&self) -> Option<&Hypothesis> {
        self.hypothesis.as_ref()
    }

    pub fn metrics(&self) -> &BenchmarkMetrics {
        &self.metrics
    }

    /// Whether the optimizer kept this workflow
    pub fn accepted(&self) -> bool {
        self.accepted
    }

    fn file_name(&self) -> String {
        format!("{}-{}.yaml", self.created_at.format("%Y%m%dT%H%M%S"), self.id)
    }
}

/// Append-only experiment log
#[derive(Default)]
pub struct ExperimentTracker {
    experiments: RwLock<Vec<Arc<Experiment>>>,
    dir: Option<PathBuf>,
}

impl ExperimentTracker {
    /// Tracker that only keeps records in memory
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Tracker persisting to `dir`; existing records there are loaded
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let mut loaded = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let content = tokio::fs::read_to_string(&path).await?;
            match Experiment::from_yaml(&content) {
                Ok(experiment) => loaded.push(Arc::new(experiment)),
                Err(e) => log::warn!("Skipping unreadable experiment {}: {}", path.display(), e),
            }
        }
        loaded.sort_by_key(|e| e.created_at);
        log::info!("Loaded {} experiment(s) from {}", loaded.len(), dir.display());

        Ok(Self {
            experiments: RwLock::new(loaded),
            dir: Some(dir),
        })
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Append a record, writing it to disk first when persistent
    pub async fn record(&self, experiment: Experiment) -> Result<Arc<Experiment>> {
        if let Some(dir) = &self.dir {
            write_new(dir, &experiment).await?;
        }
        let experiment = Arc::new(experiment);
        self.experiments.write().await.push(experiment.clone());
        log::debug!("Recorded experiment {}", experiment.id);
        Ok(experiment)
    }

    pub async fn list(&self) -> Vec<Arc<Experiment>> {
        self.experiments.read().await.clone()
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<Experiment>> {
        self.experiments
            .read()
            .await
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.experiments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.experiments.read().await.is_empty()
    }

    /// Highest-scoring record for a metric; earlier records win ties
    pub async fn best(&self, metric: OptimizationMetric) -> Option<Arc<Experiment>> {
        let experiments = self.experiments.read().await;
        let mut best: Option<&Arc<Experiment>> = None;
        for experiment in experiments.iter() {
            if best.map_or(true, |b| experiment.metrics.get(metric) > b.metrics.get(metric)) {
                best = Some(experiment);
            }
        }
        best.cloned()
    }
}

/// Write beside the target, then hard-link into place so an existing record
/// is never replaced and readers never see a partial file
async fn write_new(dir: &Path, experiment: &Experiment) -> Result<()> {
    let content = experiment.to_yaml()?;
    let target = dir.join(experiment.file_name());
    let tmp = dir.join(format!(".{}.tmp", experiment.id));

    tokio::fs::write(&tmp, content).await?;
    let linked = tokio::fs::hard_link(&tmp, &target).await;
    if let Err(e) = tokio::fs::remove_file(&tmp).await {
        log::warn!("Could not remove temporary file {}: {}", tmp.display(), e);
    }

    match linked {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(PolicyFlowError::other(format!(
            "experiment record {} already exists",
            target.display()
        ))),
        Err(e) => Err(e.into()),
    }
}
