// SPDX-License-Identifier: MIT

//! Run results produced by the router

use serde::{Deserialize, Serialize};

use crate::flow::node::Action;
use crate::flow::state::SharedState;

/// One executed node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    /// 1-based step number
    pub step: usize,
    pub node: String,
    pub action: Action,
    /// Set when execute failed and the node degraded its result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Outcome of a completed run
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub state: SharedState,
    pub trace: Vec<TraceStep>,
    /// Node that ended the run
    pub final_node: String,
    pub final_action: Action,
    pub steps: usize,
}

impl WorkflowRun {
    /// Node ids in execution order
    pub fn path(&self) -> Vec<&str> {
        self.trace.iter().map(|s| s.node.as_str()).collect()
    }

    /// Whether any node degraded instead of failing
    pub fn has_errors(&self) -> bool {
        self.trace.iter().any(|s| s.error.is_some())
    }
}
