//! Client-facing server.
//!
//! [`FabricServer`] accepts TCP connections carrying newline-delimited
//! JSON-RPC and hands each decoded message to the [`Orchestrator`], which
//! routes registrations to the session registry and tool calls through the
//! container supervisor to the protocol proxy.

pub mod catalog;
mod error;
mod listener;
mod orchestrator;

pub use error::{FabricError, FabricResult};
pub use listener::{FabricServer, MAX_LINE_LENGTH};
pub use orchestrator::Orchestrator;
