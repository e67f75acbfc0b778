//! Forwarding of tool calls to service containers.
//!
//! The [`ports::ProtocolProxy`] port delivers one JSON-RPC request to the
//! service running in a container and returns its response. The HTTP adapter
//! is used in production; the in-memory adapter scripts upstream behaviour in
//! tests.

pub mod adapters;
pub mod ports;
