//! Host mount validation for client registrations.
//!
//! Clients describe the host directories they want exposed to service
//! containers when they call `fabric/registerClient`. Every requested source
//! must sit inside one of the operator-configured allowed roots. The check is
//! lexical: `.` and `..` segments are resolved before containment is tested,
//! but symbolic links are not followed.

mod error;
mod roots;
mod spec;
mod validator;

pub use error::MountError;
pub use roots::{AllowedRoots, normalize_lexically};
pub use spec::MountSpec;
pub use validator::{validate_mount, validate_mounts};
