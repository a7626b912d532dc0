//! RPC request/response types for JSON-RPC 2.0 protocol
//!
//! Everything in here is pure: no I/O and no shared state, so the codec can be
//! used from the connection threads and the host thread alike.

use log::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;
use thiserror::Error;
use tungstenite::Message;

pub const JSONRPC_VERSION: &str = "2.0";

// Error codes, see https://www.jsonrpc.org/specification#error_object
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
/// Host failed to execute a George command
pub const SERVER_ERROR: i32 = -32000;
/// Command queue refused or displaced a request
pub const SERVER_BUSY: i32 = -32001;

pub const SERVER_ERROR_MESSAGE: &str = "Error when executing George command";
pub const SERVER_BUSY_MESSAGE: &str = "Server busy: command queue is full";

/// Method executing a George command on the host
pub const METHOD_EXECUTE: &str = "execute_george";
/// Short alias for [`METHOD_EXECUTE`]
pub const METHOD_EXECUTE_SHORT: &str = "exec";

/// WebSocket payload framing. Responses mirror the frame mode of the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum FrameMode {
    Text,
    Binary,
}

impl FrameMode {
    /// Wraps an encoded payload in a frame of this mode
    pub fn wrap(self, payload: String) -> Message {
        match self {
            Self::Text => Message::text(payload),
            Self::Binary => Message::binary(payload.into_bytes()),
        }
    }
}

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    /// `None` for notifications (absent or `null` id)
    #[serde(default)]
    pub id: Option<Value>,
}

impl RpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Extracts the George command text of an execute request
    pub fn command(&self) -> Result<String, CallError> {
        if self.method != METHOD_EXECUTE && self.method != METHOD_EXECUTE_SHORT {
            return Err(CallError::MethodNotFound);
        }

        let params: ExecuteParams = serde_json::from_value(self.params.clone()).map_err(|_| {
            CallError::InvalidParams(r#"expected {"command": string} or [string]"#.to_string())
        })?;
        let command = params.into_command();
        if command.trim().is_empty() {
            return Err(CallError::InvalidParams(
                "command must not be empty".to_string(),
            ));
        }
        Ok(command)
    }
}

/// Parameters of an execute request, by name or by position
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ExecuteParams {
    Named { command: String },
    Positional((String,)),
}

impl ExecuteParams {
    pub fn into_command(self) -> String {
        match self {
            Self::Named { command } | Self::Positional((command,)) => command,
        }
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Option<Value>,
}

impl RpcResponse {
    pub fn success(id: Option<Value>, result: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result.into()),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: &str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.to_string(),
                data: None,
            }),
            id,
        }
    }

    pub fn parse_error() -> Self {
        Self::error(None, PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request(id: Option<Value>) -> Self {
        Self::error(id, INVALID_REQUEST, "Invalid Request")
    }

    pub fn method_not_found(id: Option<Value>) -> Self {
        Self::error(id, METHOD_NOT_FOUND, "Method not found")
    }

    pub fn invalid_params(id: Option<Value>, msg: &str) -> Self {
        Self::error(id, INVALID_PARAMS, &format!("Invalid params: {}", msg))
    }

    pub fn server_error(id: Option<Value>) -> Self {
        Self::error(id, SERVER_ERROR, SERVER_ERROR_MESSAGE)
    }

    pub fn server_busy(id: Option<Value>) -> Self {
        Self::error(id, SERVER_BUSY, SERVER_BUSY_MESSAGE)
    }
}

/// JSON-RPC 2.0 error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Input that is not a conforming JSON-RPC 2.0 request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Not JSON at all (or not UTF-8)
    #[error("Parse error")]
    Parse,
    /// Valid JSON, but not a valid request object
    #[error("Invalid Request")]
    InvalidRequest { id: Option<Value> },
}

impl DecodeError {
    pub fn code(&self) -> i32 {
        match self {
            Self::Parse => PARSE_ERROR,
            Self::InvalidRequest { .. } => INVALID_REQUEST,
        }
    }

    pub fn to_response(&self) -> RpcResponse {
        match self {
            Self::Parse => RpcResponse::parse_error(),
            Self::InvalidRequest { id } => RpcResponse::invalid_request(id.clone()),
        }
    }
}

/// A well-formed request the bridge cannot accept
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("Method not found")]
    MethodNotFound,
    #[error("Invalid params: {0}")]
    InvalidParams(String),
}

impl CallError {
    pub fn to_response(&self, id: Option<Value>) -> RpcResponse {
        match self {
            Self::MethodNotFound => RpcResponse::method_not_found(id),
            Self::InvalidParams(msg) => RpcResponse::invalid_params(id, msg),
        }
    }
}

fn is_valid_id(id: &Value) -> bool {
    id.is_string() || id.is_number() || id.is_null()
}

/// Decodes a strict JSON-RPC 2.0 request from raw frame bytes
pub fn decode_request(bytes: &[u8]) -> Result<RpcRequest, DecodeError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|_| DecodeError::Parse)?;

    let Value::Object(ref object) = value else {
        // Batches are not supported
        return Err(DecodeError::InvalidRequest { id: None });
    };

    // Salvage the id so the error can be correlated by the client
    let id = match object.get("id") {
        Some(id) if !is_valid_id(id) => return Err(DecodeError::InvalidRequest { id: None }),
        Some(Value::Null) | None => None,
        Some(id) => Some(id.clone()),
    };

    let request: RpcRequest = serde_json::from_value(value)
        .map_err(|_| DecodeError::InvalidRequest { id: id.clone() })?;

    if request.jsonrpc != JSONRPC_VERSION {
        return Err(DecodeError::InvalidRequest { id });
    }

    Ok(request)
}

/// Encodes a response envelope
pub fn encode_response(response: &RpcResponse) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        error!("Failed to encode JSON-RPC response: {}", e);
        format!(
            r#"{{"jsonrpc":"2.0","error":{{"code":{},"message":"Internal error"}},"id":null}}"#,
            INTERNAL_ERROR
        )
    })
}

/// Encodes a success response carrying the command result text
pub fn encode_result(id: Option<&Value>, text: &str) -> String {
    encode_response(&RpcResponse::success(id.cloned(), text))
}

/// Encodes an error response
pub fn encode_error(id: Option<&Value>, code: i32, message: &str) -> String {
    encode_response(&RpcResponse::error(id.cloned(), code, message))
}
