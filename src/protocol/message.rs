//! Request, response and error objects.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Value of the `jsonrpc` member on every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision announced by `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// A JSON-RPC request or notification.
///
/// A request without `id` is a notification and is never answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol marker, always `"2.0"`.
    pub jsonrpc: String,
    /// Correlation identifier, absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Creates a request carrying an identifier.
    #[must_use]
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    /// Creates a notification.
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Returns `true` when the message expects no response.
    #[must_use]
    pub const fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Returns the identifier to echo in a response (`null` for notifications).
    #[must_use]
    pub fn response_id(&self) -> Value {
        self.id.clone().unwrap_or(Value::Null)
    }

    /// Returns a named member of an object-shaped `params`.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.as_ref().and_then(|params| params.get(name))
    }
}

/// A JSON-RPC response.
///
/// Exactly one of `result` and `error` is present on a well-formed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol marker, always `"2.0"`.
    pub jsonrpc: String,
    /// Identifier copied from the request.
    pub id: Value,
    /// Successful result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Creates a success response.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Creates an error response.
    #[must_use]
    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Returns `true` when the response carries an error object.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Replaces the identifier, keeping the payload.
    #[must_use]
    pub fn with_id(mut self, id: Value) -> Self {
        self.id = id;
        self
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i64,
    /// Short description.
    pub message: String,
    /// Structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Creates an error object without data.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attaches structured detail.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notification_omits_id_on_the_wire() {
        let notification = JsonRpcRequest::notification("notifications/initialized", None);

        let encoded = serde_json::to_value(&notification).expect("request should encode");

        assert_eq!(
            encoded,
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"})
        );
    }

    #[test]
    fn success_response_has_no_error_member() {
        let response = JsonRpcResponse::success(json!(7), json!({"ok": true}));

        let encoded = serde_json::to_value(&response).expect("response should encode");

        assert_eq!(
            encoded,
            json!({"jsonrpc": "2.0", "id": 7, "result": {"ok": true}})
        );
    }

    #[test]
    fn error_response_keeps_data() {
        let error = JsonRpcError::new(-32_002, "unknown service")
            .with_data(json!({"kind": "ServiceNotFound"}));
        let response = JsonRpcResponse::failure(Value::Null, error);

        let encoded = serde_json::to_value(&response).expect("response should encode");

        assert_eq!(encoded["error"]["data"]["kind"], "ServiceNotFound");
        assert_eq!(encoded["id"], Value::Null);
        assert!(encoded.get("result").is_none());
    }

    #[test]
    fn param_reads_object_members() {
        let request = JsonRpcRequest::new(1, "tools/call", Some(json!({"name": "git/log"})));

        assert_eq!(request.param("name"), Some(&json!("git/log")));
        assert_eq!(request.param("arguments"), None);
    }
}
