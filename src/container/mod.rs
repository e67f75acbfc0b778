//! Service container bounded context.
//!
//! The [`services::ContainerSupervisor`] owns the table of live containers
//! and decides, per service strategy, when to start, reuse, refresh or stop
//! one. Engines are reached through the [`ports::ContainerRuntime`] port.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;
