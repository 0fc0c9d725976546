//! JSON-RPC 2.0 Wire Types
//!
//! Response envelopes, the error object, and the error taxonomy used by the
//! dispatcher. Every failure on the JSON-RPC surface is expressed as an
//! `RpcError` and rendered into an `MCPResponse`; nothing here produces a
//! transport-level error.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::error::{ErrorContext, LaunchError, RegistryError, ResourceError};

/// JSON-RPC version identifier, always "2.0".
pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// Application-defined: a resource file could not be read.
pub const RESOURCE_READ_ERROR: i32 = -32000;
/// Application-defined: the tool subprocess could not be started.
pub const LAUNCH_ERROR: i32 = -32001;
/// Application-defined: another tool is already running.
pub const BUSY_ERROR: i32 = -32004;

/// Largest accepted batch.
pub const MAX_BATCH_SIZE: usize = 64;

/// JSON-RPC 2.0 response envelope.
///
/// Exactly one of `result` and `error` is present. `id` echoes the request
/// id, or is `null` when no id could be recovered.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MCPResponse {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Request id, echoed unchanged
    pub id: Value,
    /// Handler result on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error object on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<MCPError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MCPError {
    /// Standard (-32700..-32600) or application (-32000..-32099) code
    pub code: i32,
    /// Short human-readable description
    pub message: String,
    /// Extra detail; the parser message for parse errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl MCPResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: &RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error.to_error_object()),
        }
    }

    /// Build the envelope for a handler outcome.
    pub fn from_outcome(id: Value, outcome: &Result<Value, RpcError>) -> Self {
        match outcome {
            Ok(result) => Self::success(id, result.clone()),
            Err(error) => Self::failure(id, error),
        }
    }

    /// The error code, when this is an error envelope.
    pub fn error_code(&self) -> Option<i32> {
        self.error.as_ref().map(|e| e.code)
    }
}

/// Everything that can go wrong on the JSON-RPC surface.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// The body is not valid JSON. Carries the decoder's message.
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("unknown method: {0}")]
    MethodNotFound(String),

    /// A named entity (tool, command) does not exist.
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidParams(String),

    /// Unexpected failure inside a handler. Only the generic message is
    /// ever sent; the context stays local.
    #[error("Internal error")]
    Internal(ErrorContext),

    #[error("Busy: another tool is currently running in this workspace")]
    Busy,

    #[error("{0}")]
    Launch(String),

    #[error("{0}")]
    ResourceRead(String),
}

impl RpcError {
    pub fn invalid_request() -> Self {
        RpcError::InvalidRequest("invalid request".to_string())
    }

    pub fn invalid_params() -> Self {
        RpcError::InvalidParams("invalid params".to_string())
    }

    pub fn code(&self) -> i32 {
        match self {
            RpcError::Parse(_) => PARSE_ERROR,
            RpcError::InvalidRequest(_) => INVALID_REQUEST,
            RpcError::MethodNotFound(_) | RpcError::NotFound(_) => METHOD_NOT_FOUND,
            RpcError::InvalidParams(_) => INVALID_PARAMS,
            RpcError::Internal(_) => INTERNAL_ERROR,
            RpcError::Busy => BUSY_ERROR,
            RpcError::Launch(_) => LAUNCH_ERROR,
            RpcError::ResourceRead(_) => RESOURCE_READ_ERROR,
        }
    }

    /// Message as sent over the wire.
    pub fn message(&self) -> String {
        match self {
            RpcError::Parse(_) => "Parse error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn data(&self) -> Option<Value> {
        match self {
            RpcError::Parse(detail) => Some(Value::String(detail.clone())),
            _ => None,
        }
    }

    pub fn to_error_object(&self) -> MCPError {
        MCPError {
            code: self.code(),
            message: self.message(),
            data: self.data(),
        }
    }

    /// The locally-logged context of an internal error.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            RpcError::Internal(ctx) => Some(ctx),
            _ => None,
        }
    }
}

impl From<RegistryError> for RpcError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownTool(_) => RpcError::NotFound(err.to_string()),
            other => RpcError::InvalidParams(other.to_string()),
        }
    }
}

impl From<LaunchError> for RpcError {
    fn from(err: LaunchError) -> Self {
        RpcError::Launch(err.to_string())
    }
}

impl From<ResourceError> for RpcError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::InvalidUri(_) => RpcError::InvalidParams(err.to_string()),
            ResourceError::Read { .. } => RpcError::ResourceRead(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_envelope_omits_error() {
        let env = MCPResponse::success(json!(7), json!({}));
        assert_eq!(
            serde_json::to_value(&env).unwrap(),
            json!({"jsonrpc": "2.0", "id": 7, "result": {}})
        );
    }

    #[test]
    fn parse_error_carries_detail_in_data() {
        let env = MCPResponse::failure(Value::Null, &RpcError::Parse("expected value".into()));
        assert_eq!(
            serde_json::to_value(&env).unwrap(),
            json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": {"code": -32700, "message": "Parse error", "data": "expected value"}
            })
        );
    }

    #[test]
    fn internal_error_never_exposes_context() {
        let err = RpcError::Internal(ErrorContext::capture("tools/call", "secret /etc/path"));
        let obj = err.to_error_object();
        assert_eq!(obj.code, INTERNAL_ERROR);
        assert_eq!(obj.message, "Internal error");
        assert!(obj.data.is_none());
        assert!(err.context().is_some());
    }

    #[test]
    fn collaborator_errors_map_to_codes() {
        let unknown: RpcError = RegistryError::UnknownTool("nope".into()).into();
        assert_eq!(unknown.code(), METHOD_NOT_FOUND);
        assert_eq!(unknown.message(), "unknown tool: nope");

        let bad_uri: RpcError = ResourceError::InvalidUri("http://x".into()).into();
        assert_eq!(bad_uri.code(), INVALID_PARAMS);

        let unreadable: RpcError = ResourceError::Read {
            uri: "file:///nope".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        }
        .into();
        assert_eq!(unreadable.code(), RESOURCE_READ_ERROR);

        assert_eq!(RpcError::Busy.code(), BUSY_ERROR);
    }
}
