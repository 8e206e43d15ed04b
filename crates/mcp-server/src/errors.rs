use rmcp::model::{ErrorCode, ErrorData};
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Sync + Send>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid UTF-8 sequence: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouterError {
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// A tool failed past the point where a tool-level result makes sense.
    #[error("{0}")]
    ToolFailed(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl From<RouterError> for ErrorData {
    fn from(err: RouterError) -> Self {
        let code = match err {
            RouterError::MethodNotFound(_) => ErrorCode::METHOD_NOT_FOUND,
            RouterError::InvalidParams(_) | RouterError::ToolNotFound(_) => {
                ErrorCode::INVALID_PARAMS
            }
            RouterError::Internal(_) | RouterError::ToolFailed(_) | RouterError::Cancelled => {
                ErrorCode::INTERNAL_ERROR
            }
        };
        ErrorData {
            code,
            message: err.to_string().into(),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_error_codes() {
        let data: ErrorData = RouterError::MethodNotFound("resources/list".into()).into();
        assert_eq!(data.code, ErrorCode::METHOD_NOT_FOUND);
        assert_eq!(data.message, "Method not found: resources/list");

        let data: ErrorData = RouterError::ToolNotFound("nope".into()).into();
        assert_eq!(data.code, ErrorCode::INVALID_PARAMS);
    }

    #[test]
    fn test_tool_failure_message_is_not_prefixed() {
        let data: ErrorData =
            RouterError::ToolFailed("failed while iterating over assets: 503".into()).into();
        assert_eq!(data.code, ErrorCode::INTERNAL_ERROR);
        assert_eq!(data.message, "failed while iterating over assets: 503");
    }
}
