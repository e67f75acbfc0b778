//! Container lifecycle orchestration.

mod supervisor;

pub use supervisor::{ContainerSupervisor, SupervisorError, SupervisorResult, SupervisorSettings};
