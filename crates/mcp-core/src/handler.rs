use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome of a failed tool invocation.
///
/// `InvalidParameters` is recovered by the router and reported to the caller as a
/// tool-level error result; every other variant escalates to the JSON-RPC layer.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum ToolError {
    #[error("{0}")]
    InvalidParameters(String),
    #[error("{0}")]
    ExecutionError(String),
    #[error("Tool not found: {0}")]
    NotFound(String),
    #[error("Request cancelled")]
    Cancelled,
}

impl ToolError {
    /// Whether the failure belongs in the tool result rather than in a protocol error.
    pub fn is_tool_level(&self) -> bool {
        matches!(self, ToolError::InvalidParameters(_))
    }
}

pub type ToolResult<T> = std::result::Result<T, ToolError>;
