//! Session lifecycle services.

mod registry;

pub use registry::{SessionError, SessionRegistry, SessionResult};
