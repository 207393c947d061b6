// SPDX-License-Identifier: MIT

//! Policy evaluation on top of the flow framework

pub mod benchmark;
pub mod compiler;
pub mod config;
pub mod evaluator;
pub mod models;
pub mod nodes;
pub mod workflow;
