// SPDX-License-Identifier: MIT

//! Framework primitives: nodes, shared state, LLM access, caching and throttling

pub mod cache;
pub mod error;
pub mod model;
pub mod node;
pub mod rate_limiter;
pub mod state;
