//! MCP JSON-RPC message types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Request ID
    pub id: RequestId,
    /// Method name
    pub method: String,
    /// Parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a request
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.into(),
            method: method.into(),
            params: Some(params),
        }
    }
}

/// JSON-RPC notification (no id)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Method name
    pub method: String,
    /// Parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a notification without params
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params: None,
        }
    }
}

/// JSON-RPC internal error code
pub const INTERNAL_ERROR: i32 = -32603;

/// JSON-RPC error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    #[serde(default)]
    pub code: i32,
    /// Error message
    #[serde(default)]
    pub message: String,
    /// Optional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Request ID (string or number)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// String ID
    String(String),
    /// Numeric ID
    Number(i64),
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Decoded upstream reply: either a result or an error envelope
///
/// Missing fields decode leniently: a body with neither `result` nor
/// `error` is treated as an empty result.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcOutcome {
    /// `{result}`
    Result(Value),
    /// `{error: {code, message}}`
    Error(JsonRpcError),
}

impl RpcOutcome {
    /// Classify a decoded JSON body
    #[must_use]
    pub fn from_value(mut value: Value) -> Self {
        if let Some(error) = value.get_mut("error").map(Value::take) {
            if !error.is_null() {
                let error = serde_json::from_value(error.clone()).unwrap_or_else(|_| JsonRpcError {
                    code: INTERNAL_ERROR,
                    message: error.to_string(),
                    data: None,
                });
                return Self::Error(error);
            }
        }

        match value.get_mut("result").map(Value::take) {
            Some(result) if !result.is_null() => Self::Result(result),
            _ => Self::Result(Value::Object(serde_json::Map::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_envelope() {
        let request = JsonRpcRequest::new(7, "tools/list", json!({}));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "id": 7, "method": "tools/list", "params": {}})
        );
    }

    #[test]
    fn outcome_extracts_result() {
        let outcome = RpcOutcome::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": []}}));
        assert_eq!(outcome, RpcOutcome::Result(json!({"tools": []})));
    }

    #[test]
    fn outcome_extracts_error() {
        let outcome = RpcOutcome::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32602, "message": "Unknown tool"}
        }));
        let RpcOutcome::Error(error) = outcome else {
            panic!("expected error");
        };
        assert_eq!(error.code, -32602);
        assert_eq!(error.message, "Unknown tool");
    }

    #[test]
    fn outcome_defaults_missing_fields() {
        assert_eq!(
            RpcOutcome::from_value(json!({})),
            RpcOutcome::Result(json!({}))
        );
        let RpcOutcome::Error(error) = RpcOutcome::from_value(json!({"error": {}})) else {
            panic!("expected error");
        };
        assert_eq!(error.code, 0);
        assert!(error.message.is_empty());
    }
}
