//! Port contracts for the container context.

mod runtime;

pub use runtime::{
    ContainerRuntime, ContainerRuntimeError, ContainerRuntimeResult, ManagedContainer,
    RuntimeState,
};
