//! Client session bounded context.
//!
//! A session exists for the lifetime of one client connection. It records the
//! client's validated mount context and the containers resolved on its behalf
//! so that they can be stopped when the connection ends.

pub mod domain;
pub mod services;

pub use domain::{ClientContext, ClientSession, SessionId};
pub use services::{SessionError, SessionRegistry, SessionResult};
