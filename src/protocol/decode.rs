//! Decoding of inbound lines into requests.

use super::{JSONRPC_VERSION, JsonRpcError, JsonRpcRequest, codes};
use serde_json::{Value, json};
use thiserror::Error;

/// Reasons an inbound line is not a usable request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The line is not valid JSON.
    #[error("parse error: {0}")]
    Parse(String),

    /// The line is JSON but not a JSON-RPC 2.0 request object.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl DecodeError {
    /// Converts the failure into the error object sent before disconnecting.
    #[must_use]
    pub fn to_rpc_error(&self) -> JsonRpcError {
        match self {
            Self::Parse(_) => JsonRpcError::new(codes::PARSE_ERROR, "Parse error")
                .with_data(json!({"kind": "ParseError"})),
            Self::InvalidRequest(reason) => {
                JsonRpcError::new(codes::INVALID_REQUEST, format!("Invalid request: {reason}"))
                    .with_data(json!({"kind": "InvalidRequest"}))
            }
        }
    }
}

/// Decodes one line of client input.
///
/// # Errors
///
/// Returns [`DecodeError::Parse`] for non-JSON input and
/// [`DecodeError::InvalidRequest`] when the JSON is not a request object with
/// `jsonrpc: "2.0"` and a string `method`.
pub fn decode_request(line: &str) -> Result<JsonRpcRequest, DecodeError> {
    let value: Value =
        serde_json::from_str(line).map_err(|err| DecodeError::Parse(err.to_string()))?;

    if !value.is_object() {
        return Err(DecodeError::InvalidRequest(
            "message must be a JSON object".to_owned(),
        ));
    }

    let request: JsonRpcRequest = serde_json::from_value(value)
        .map_err(|err| DecodeError::InvalidRequest(err.to_string()))?;

    if request.jsonrpc != JSONRPC_VERSION {
        return Err(DecodeError::InvalidRequest(format!(
            "unsupported jsonrpc version '{}'",
            request.jsonrpc
        )));
    }

    Ok(request)
}
