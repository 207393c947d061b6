// SPDX-License-Identifier: MIT

//! Graph execution: the router and its run trace

mod executor;
pub mod types;

pub use executor::WorkflowGraph;
pub use types::{TraceStep, WorkflowRun};
