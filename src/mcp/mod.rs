//! Model Context Protocol server over newline-delimited JSON-RPC 2.0.
//!
//! Only the tools surface is implemented: `initialize`, `ping`,
//! `tools/list` and `tools/call`, plus the `notifications/*` a client sends.

pub mod server;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub use server::McpServer;

/// Protocol revision announced when the client asks for one we do not know.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Protocol revisions this server can speak.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;

// ── Error types ──

/// Errors that stop the server loop.
#[derive(Debug, Error)]
pub enum McpError {
    /// Reading the input or writing the output failed.
    #[error("MCP I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A response could not be serialized.
    #[error("MCP JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The response writer stopped before the server did.
    #[error("MCP writer task ended: {0}")]
    Writer(String),
}

// ── Protocol types ──

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Short description.
    pub message: String,
}

impl JsonRpcError {
    /// Build an error object.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcResponse {
    jsonrpc: &'static str,
    /// Id of the request being answered, `null` if it could not be read.
    pub id: Value,
    /// Result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// A successful response.
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    /// An error response.
    pub fn error(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// A parsed inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Expects a response carrying `id`.
    Request {
        /// Request id (number or string).
        id: Value,
        /// Method name.
        method: String,
        /// Parameters, if any.
        params: Option<Value>,
    },
    /// Fire-and-forget.
    Notification {
        /// Method name.
        method: String,
    },
}

impl Incoming {
    /// Parse one line of input.
    ///
    /// # Errors
    ///
    /// Returns the error response to send back when the line is not valid
    /// JSON or not a valid JSON-RPC 2.0 request.
    pub fn parse(line: &str) -> Result<Self, JsonRpcResponse> {
        let value: Value = serde_json::from_str(line).map_err(|e| {
            JsonRpcResponse::error(
                Value::Null,
                JsonRpcError::new(PARSE_ERROR, format!("parse error: {e}")),
            )
        })?;

        let Value::Object(mut obj) = value else {
            return Err(invalid(Value::Null, "request must be a JSON object"));
        };
        let id = obj.remove("id");
        let reply_id = id.clone().unwrap_or(Value::Null);

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return Err(invalid(reply_id, "jsonrpc must be \"2.0\""));
        }
        if let Some(id) = &id {
            if !(id.is_string() || id.is_number()) {
                return Err(invalid(Value::Null, "id must be a string or number"));
            }
        }
        let method = match obj.remove("method") {
            Some(Value::String(method)) => method,
            _ => return Err(invalid(reply_id, "method must be a string")),
        };
        let params = obj.remove("params");

        Ok(match id {
            Some(id) => Incoming::Request { id, method, params },
            None => Incoming::Notification { method },
        })
    }
}

fn invalid(id: Value, message: &str) -> JsonRpcResponse {
    JsonRpcResponse::error(id, JsonRpcError::new(INVALID_REQUEST, message))
}

/// Pick the protocol revision to answer `initialize` with.
pub fn negotiate_version(params: Option<&Map<String, Value>>) -> &'static str {
    params
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str)
        .and_then(|wanted| {
            SUPPORTED_PROTOCOL_VERSIONS
                .iter()
                .find(|v| **v == wanted)
                .copied()
        })
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}
