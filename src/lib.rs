//! Reactor Fabric: a container-backed MCP tool fabric.
//!
//! This crate accepts JSON-RPC clients over TCP, validates the host
//! directories they want to expose, and routes each tool call to a service
//! running in a managed container, starting, reusing, refreshing and
//! stopping those containers according to each service's strategy.
//!
//! # Architecture
//!
//! Reactor Fabric follows hexagonal architecture principles:
//!
//! - **Domain**: Pure values and policies with no infrastructure dependencies
//! - **Ports**: Abstract trait interfaces for the container engine and the
//!   upstream transport
//! - **Adapters**: Concrete implementations of ports (Docker, HTTP, in-memory)
//!
//! # Modules
//!
//! - [`registry`]: Service definitions loaded from YAML configuration
//! - [`mount`]: Allow-list validation of client mount requests
//! - [`protocol`]: JSON-RPC message model and error codes
//! - [`session`]: Client sessions and their registered mounts
//! - [`container`]: Container lifecycle supervision
//! - [`proxy`]: Forwarding of tool calls to service containers
//! - [`server`]: TCP listener and request dispatch

pub mod container;
pub mod mount;
pub mod protocol;
pub mod proxy;
pub mod registry;
pub mod server;
pub mod session;

#[cfg(test)]
mod test_support;
