//! JSON-RPC 2.0 message model shared by the listener, dispatcher and proxy.
//!
//! Messages travel one JSON object per line on client connections and as
//! HTTP bodies towards service containers.

pub mod codes;
mod decode;
mod message;

pub use decode::{DecodeError, decode_request};
pub use message::{
    JSONRPC_VERSION, JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION,
};
