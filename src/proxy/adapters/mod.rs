//! Adapter implementations for the proxy context.

mod http;
mod memory;

pub use http::HttpProtocolProxy;
pub use memory::{ForwardedCall, InMemoryProtocolProxy};
