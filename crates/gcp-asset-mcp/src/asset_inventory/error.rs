use mcp_core::ToolError;
use thiserror::Error;

use super::client::ClientError;

/// Failure of a single `list_gcp_assets` invocation.
///
/// Each variant names the phase that failed; the display text is what the caller
/// sees, so the prefixes are part of the tool's contract.
#[derive(Error, Debug)]
pub enum AssetInventoryError {
    #[error("{0}")]
    Validation(String),

    #[error("failed to create client: {0}")]
    ClientInit(#[source] ClientError),

    #[error("failed while iterating over assets: {0}")]
    Iteration(#[source] ClientError),

    #[error("failed to marshal results to json: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request cancelled")]
    Cancelled,
}

impl From<ToolError> for AssetInventoryError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::Cancelled => AssetInventoryError::Cancelled,
            other => AssetInventoryError::Validation(other.to_string()),
        }
    }
}

impl From<AssetInventoryError> for ToolError {
    fn from(err: AssetInventoryError) -> Self {
        match err {
            AssetInventoryError::Validation(message) => ToolError::InvalidParameters(message),
            AssetInventoryError::Cancelled => ToolError::Cancelled,
            other => ToolError::ExecutionError(other.to_string()),
        }
    }
}
