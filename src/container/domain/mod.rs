//! Container domain types.

mod instance;
mod key;
mod refresh;
mod spec;

pub use instance::{ContainerInstance, ServiceEndpoint, StartedContainer};
pub use key::ContainerKey;
pub use refresh::should_refresh;
pub use spec::{
    BindMount, CONTAINER_NAME_PREFIX, ContainerSpec, LABEL_CREATED, LABEL_KEY, LABEL_SERVICE,
    LABEL_SESSION,
};
