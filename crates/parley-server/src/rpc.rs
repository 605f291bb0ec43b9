use serde::{Deserialize, Serialize};

use parley_core::errors::CoordinatorError;

/// Inbound request frame.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

/// Response frame: `{ id, success, result?, error?: { code, message } }`.
/// Error codes are strings so mobile clients can switch on them without a
/// numeric lookup table.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub id: Option<serde_json::Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
}

// Transport-level error codes. Domain errors carry their own codes via
// `CoordinatorError::code()`.
pub const PARSE_ERROR: &str = "PARSE_ERROR";
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";

impl RpcResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(
        id: Option<serde_json::Value>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(RpcError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    /// Map a domain error onto the wire, preserving its stable code.
    pub fn domain_error(id: Option<serde_json::Value>, err: &CoordinatorError) -> Self {
        Self::error(id, err.code(), err.to_string())
    }

    pub fn method_not_found(id: Option<serde_json::Value>, method: &str) -> Self {
        Self::error(id, METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(id: Option<serde_json::Value>, msg: impl Into<String>) -> Self {
        Self::error(id, INVALID_PARAMS, msg)
    }

    pub fn parse_error() -> Self {
        Self::error(None, PARSE_ERROR, "Parse error")
    }
}

/// Extract a required string param.
pub fn require_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str, String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("Missing required parameter: {key}"))
}

/// Extract a required bool param.
pub fn require_bool(params: &serde_json::Value, key: &str) -> Result<bool, String> {
    params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| format!("Missing required parameter: {key}"))
}

/// Extract an optional string param.
pub fn optional_str<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}
