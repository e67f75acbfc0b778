//! Port contracts for the proxy context.

mod proxy;

pub use proxy::{ProtocolProxy, ProxyError, ProxyResult};
