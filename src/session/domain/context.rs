//! Validated client registration context.

use super::SessionId;
use crate::mount::MountSpec;

/// Mounts a client registered, after validation against the allowed roots.
///
/// Only constructed from a successful registration, so every source path is
/// canonical and contained in an allowed root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    session_id: SessionId,
    mounts: Vec<MountSpec>,
}

impl ClientContext {
    /// Creates a context from already validated mounts.
    #[must_use]
    pub const fn new(session_id: SessionId, mounts: Vec<MountSpec>) -> Self {
        Self { session_id, mounts }
    }

    /// Returns the owning session.
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Returns the validated mounts.
    #[must_use]
    pub fn mounts(&self) -> &[MountSpec] {
        &self.mounts
    }
}
