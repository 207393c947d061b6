// SPDX-License-Identifier: MIT

//! Shared state for workflow runs
//!
//! This module provides:
//! - `StateSchema` - declares reducers and defaults for state keys
//! - `SharedState` - the per-run key/value channel between nodes
//! - `ReducerType` - strategies for merging values into state

mod schema;
mod store;

pub use schema::{FieldType, ReducerType, StateFieldDef, StateSchema};
pub use store::SharedState;

/// Text under evaluation
pub const INPUT_TEXT: &str = "input_text";
/// Description of the policy being evaluated
pub const POLICY_CONTEXT: &str = "policy_context";
/// Map of clause id to clause result
pub const CRITERION_RESULTS: &str = "criterion_results";
/// Errors recorded against individual nodes
pub const ERRORS: &str = "errors";
