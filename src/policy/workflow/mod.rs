// SPDX-License-Identifier: MIT

//! Workflow definitions, node registry, builder and router

pub mod builder;
pub mod graph;
pub mod loader;
pub mod registry;
pub mod types;

pub use builder::WorkflowBuilder;
pub use graph::{TraceStep, WorkflowGraph, WorkflowRun};
pub use loader::WorkflowLoader;
pub use registry::NodeRegistry;
pub use types::{NodeConfig, WorkflowDefinition};
