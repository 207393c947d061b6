// SPDX-License-Identifier: MIT

//! Typed error handling for policyflow
//!
//! Errors are split by how they are handled:
//! - [`ConfigurationError`] - bad wiring or parameters, fatal at load time
//! - [`NodeExecutionError`] - a single node failed, may degrade into a flagged clause
//! - [`WorkflowExecutionError`] - the run itself cannot continue
//! - [`ProviderError`] - failures at the LLM/cache/rate-limit boundary, retried inside LLM nodes

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for policyflow
#[derive(Debug, Error)]
pub enum PolicyFlowError {
    /// Invalid graph wiring, parameters or configuration
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// A workflow run could not complete
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowExecutionError),

    /// A node failed and the failure was not absorbed by the graph
    #[error("Node error: {0}")]
    Node(#[from] NodeExecutionError),

    /// LLM provider boundary errors surfaced directly
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// Generic error wrapper
    #[error("{0}")]
    Other(String),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, PolicyFlowError>;

impl PolicyFlowError {
    /// Create from a generic message
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// Load-time errors. Never retried.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("Start node '{0}' is not defined")]
    MissingStartNode(String),

    #[error("Node '{node}' references unregistered type '{node_type}'")]
    UnknownNodeType { node: String, node_type: String },

    #[error("Node '{node}' routes action '{action}' to unknown node '{target}'")]
    UnknownRouteTarget {
        node: String,
        action: String,
        target: String,
    },

    #[error("Node '{node}' routes action '{action}' which it never returns (declared: {declared:?})")]
    UndeclaredRouteAction {
        node: String,
        action: String,
        declared: Vec<String>,
    },

    #[error("Node '{0}' is not reachable from the start node")]
    UnreachableNode(String),

    #[error("Nodes '{first}' and '{second}' both write state key '{key}'")]
    OutputKeyCollision {
        key: String,
        first: String,
        second: String,
    },

    #[error("Confidence thresholds must satisfy 0 <= low < high <= 1 (high={high}, low={low})")]
    InvalidThresholds { high: f64, low: f64 },

    #[error("Invalid parameters for node '{node}': {message}")]
    InvalidParams { node: String, message: String },

    #[error("Invalid pattern '{pattern}' in node '{node}': {message}")]
    InvalidPattern {
        node: String,
        pattern: String,
        message: String,
    },

    #[error("Node '{0}' needs an LLM client but none was configured")]
    MissingLlmClient(String),

    #[error("{0}")]
    Invalid(String),
}

impl ConfigurationError {
    pub fn invalid_params(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParams {
            node: node.into(),
            message: message.into(),
        }
    }
}

/// Failure of a single node's execute phase
#[derive(Debug, Error, Clone)]
pub enum NodeExecutionError {
    /// Provider failures after all retries
    #[error("Node '{node}' LLM call failed after {attempts} attempt(s): {source}")]
    Provider {
        node: String,
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    /// The model kept answering with something that is not a structured mapping
    #[error("Node '{node}' received a malformed response: {message}")]
    MalformedResponse { node: String, message: String },

    /// The prepared input did not have the expected shape
    #[error("Node '{node}' received invalid input: {message}")]
    InvalidInput { node: String, message: String },
}

impl NodeExecutionError {
    /// Id of the node that failed
    pub fn node(&self) -> &str {
        match self {
            Self::Provider { node, .. }
            | Self::MalformedResponse { node, .. }
            | Self::InvalidInput { node, .. } => node,
        }
    }

    pub fn invalid_input(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            node: node.into(),
            message: message.into(),
        }
    }
}

/// Errors that end a workflow run
#[derive(Debug, Error)]
pub enum WorkflowExecutionError {
    /// Cycle guard tripped
    #[error("Workflow exceeded {limit} steps (last node '{last_node}')")]
    StepLimitExceeded { limit: usize, last_node: String },

    #[error("Node '{node}' returned action '{action}' but no transition is configured")]
    MissingTransition { node: String, action: String },

    #[error("Node '{node}' returned undeclared action '{action}'")]
    UndeclaredAction { node: String, action: String },

    #[error("Unknown node '{0}'")]
    UnknownNode(String),

    #[error("Node '{node}' failed: {source}")]
    NodeFailed {
        node: String,
        #[source]
        source: NodeExecutionError,
    },
}

/// LLM/cache/rate-limit boundary errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    /// Network or API failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The call or the rate-limit wait took too long
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The response could not be parsed into a structured value
    #[error("Could not parse response: {0}")]
    Parse(String),
}

impl ProviderError {
    /// Transient failures are retried with backoff; parse failures take the reparse path
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Parse(_))
    }
}

/// Cache store failures. Callers treat the cache as best-effort.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_error_reports_node() {
        let err = NodeExecutionError::invalid_input("criterion_1", "missing text");
        assert_eq!(err.node(), "criterion_1");
        assert!(err.to_string().contains("criterion_1"));
    }

    #[test]
    fn test_parse_errors_are_not_retryable() {
        assert!(!ProviderError::Parse("bad".to_string()).is_retryable());
        assert!(ProviderError::Transport("reset".to_string()).is_retryable());
        assert!(ProviderError::RateLimited {
            retry_after_secs: Some(1)
        }
        .is_retryable());
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn test_configuration_error_converts_to_top_level() {
        let err: PolicyFlowError = ConfigurationError::MissingStartNode("start".to_string()).into();
        assert!(matches!(err, PolicyFlowError::Configuration(_)));
        assert!(err.to_string().contains("start"));
    }

    #[test]
    fn test_workflow_error_wraps_node_error() {
        let err = WorkflowExecutionError::NodeFailed {
            node: "classifier".to_string(),
            source: NodeExecutionError::MalformedResponse {
                node: "classifier".to_string(),
                message: "not a mapping".to_string(),
            },
        };
        assert!(err.to_string().contains("not a mapping"));
    }
}
