//! MCP Error Handling
//!
//! Errors that end a JSON-RPC request, and their mapping onto JSON-RPC
//! error objects. Failures inside a tool are not errors at this level; they
//! come back as tool results flagged `isError`.

use crate::mcp::protocol::*;
use thiserror::Error;
use tracing::{error, warn};

/// MCP-specific errors that can occur during server operation
#[derive(Error, Debug)]
pub enum McpError {
    #[error("Protocol version not supported: {version}. Supported versions: {supported:?}")]
    UnsupportedProtocolVersion {
        version: String,
        supported: Vec<String>,
    },

    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    #[error("Tool execution failed for {tool}: {message}")]
    ToolExecutionFailed { tool: String, message: String },

    #[error("Server not initialized")]
    ServerNotInitialized,

    #[error("Server already initialized")]
    ServerAlreadyInitialized,

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Internal server error: {message}")]
    InternalError { message: String },

    #[error("JSON-RPC parse error: {message}")]
    ParseError { message: String },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Invalid parameters: {message}")]
    InvalidParameters { message: String },
}

impl McpError {
    /// Convert MCP error to JSON-RPC error
    #[inline]
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        match self {
            Self::UnsupportedProtocolVersion { version, supported } => JsonRpcError::new(
                mcp_error_codes::INVALID_PROTOCOL_VERSION,
                format!(
                    "Unsupported protocol version: {}. Supported: {}",
                    version,
                    supported.join(", ")
                ),
                Some(serde_json::json!({ "supported": supported })),
            ),
            Self::ToolNotFound { name } => JsonRpcError::new(
                mcp_error_codes::TOOL_NOT_FOUND,
                format!("Tool not found: {}", name),
                None,
            ),
            Self::ToolExecutionFailed { tool, message } => JsonRpcError::new(
                error_codes::INTERNAL_ERROR,
                format!("Tool '{}' execution failed: {}", tool, message),
                None,
            ),
            Self::ServerNotInitialized => JsonRpcError::new(
                mcp_error_codes::SERVER_NOT_INITIALIZED,
                "Server not initialized. Send initialize request first.".to_string(),
                None,
            ),
            Self::ServerAlreadyInitialized => JsonRpcError::new(
                error_codes::INVALID_REQUEST,
                "Server already initialized.".to_string(),
                None,
            ),
            Self::InvalidRequest { message } => {
                JsonRpcError::new(error_codes::INVALID_REQUEST, message.clone(), None)
            }
            Self::InternalError { message } => {
                JsonRpcError::new(error_codes::INTERNAL_ERROR, message.clone(), None)
            }
            Self::ParseError { message } => {
                JsonRpcError::new(error_codes::PARSE_ERROR, message.clone(), None)
            }
            Self::MethodNotFound { method } => JsonRpcError::new(
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", method),
                None,
            ),
            Self::InvalidParameters { message } => {
                JsonRpcError::new(error_codes::INVALID_PARAMS, message.clone(), None)
            }
        }
    }

    /// Create error response message
    #[inline]
    pub fn to_error_response(&self, id: Option<RequestId>) -> JsonRpcMessage {
        let error = self.to_jsonrpc_error();
        let error_response = JsonRpcErrorResponse::new(error, id);
        JsonRpcMessage::ErrorResponse(error_response)
    }

    /// Log the error with appropriate level
    #[inline]
    pub fn log(&self) {
        match self {
            Self::ParseError { .. }
            | Self::InvalidRequest { .. }
            | Self::InvalidParameters { .. }
            | Self::MethodNotFound { .. }
            | Self::ToolNotFound { .. }
            | Self::ServerNotInitialized
            | Self::ServerAlreadyInitialized
            | Self::UnsupportedProtocolVersion { .. } => {
                warn!("Client error: {}", self);
            }
            Self::ToolExecutionFailed { .. } | Self::InternalError { .. } => {
                error!("Server error: {}", self);
            }
        }
    }
}

/// Result type for MCP operations
pub type McpResult<T> = Result<T, McpError>;

/// Convert from anyhow::Error to McpError
impl From<anyhow::Error> for McpError {
    #[inline]
    fn from(error: anyhow::Error) -> Self {
        Self::InternalError {
            message: format!("{:#}", error),
        }
    }
}

/// Results that fail to serialize are a server bug, not a client mistake
impl From<serde_json::Error> for McpError {
    #[inline]
    fn from(error: serde_json::Error) -> Self {
        Self::InternalError {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_not_found_error() {
        let error = McpError::ToolNotFound {
            name: "test_tool".to_string(),
        };

        let jsonrpc_error = error.to_jsonrpc_error();
        assert_eq!(jsonrpc_error.code, mcp_error_codes::TOOL_NOT_FOUND);
        assert!(jsonrpc_error.message.contains("test_tool"));
    }

    #[test]
    fn invalid_protocol_version_error() {
        let error = McpError::UnsupportedProtocolVersion {
            version: "invalid".to_string(),
            supported: vec!["2025-06-18".to_string(), "2024-11-05".to_string()],
        };

        let jsonrpc_error = error.to_jsonrpc_error();
        assert_eq!(
            jsonrpc_error.code,
            mcp_error_codes::INVALID_PROTOCOL_VERSION
        );
        assert!(jsonrpc_error.message.contains("invalid"));
        assert!(jsonrpc_error.message.contains("2025-06-18, 2024-11-05"));
        assert_eq!(
            jsonrpc_error.data,
            Some(serde_json::json!({"supported": ["2025-06-18", "2024-11-05"]}))
        );
    }

    #[test]
    fn error_response_creation() {
        let error = McpError::InternalError {
            message: "test error".to_string(),
        };

        let response = error.to_error_response(Some(RequestId::String("test".to_string())));

        if let JsonRpcMessage::ErrorResponse(err_resp) = response {
            assert_eq!(err_resp.error.code, error_codes::INTERNAL_ERROR);
            assert!(err_resp.error.message.contains("test error"));
            assert_eq!(err_resp.id, Some(RequestId::String("test".to_string())));
        } else {
            panic!("Expected error response");
        }
    }

    #[test]
    fn not_initialized_has_its_own_code() {
        let error = McpError::ServerNotInitialized.to_jsonrpc_error();
        assert_eq!(error.code, mcp_error_codes::SERVER_NOT_INITIALIZED);
        assert!(error.message.starts_with("Server not initialized"));
    }

    #[test]
    fn anyhow_context_is_kept() {
        let error: McpError = anyhow::anyhow!("socket closed")
            .context("writing response")
            .into();
        assert!(error.to_string().contains("writing response: socket closed"));
    }
}
