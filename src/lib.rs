// SPDX-License-Identifier: MIT

//! policyflow - evaluate text against policies compiled into node graphs
//!
//! `flow` holds the graph primitives (nodes, shared state, the LLM boundary,
//! cache and rate limiter). `policy` builds on them: concrete node types,
//! the workflow builder and router, the policy compiler and evaluator, and
//! the benchmark/optimizer loop.

pub mod flow;
pub mod policy;

pub use flow::error::{PolicyFlowError, Result};
pub use flow::model::{LlmClient, LlmRequest};
pub use policy::config::WorkflowConfig;
pub use policy::evaluator::PolicyEvaluator;
pub use policy::models::{EvaluationResult, ParsedPolicy};
