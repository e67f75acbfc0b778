//! Session domain types.

mod context;
mod ids;
mod session;

pub use context::ClientContext;
pub use ids::SessionId;
pub use session::ClientSession;
