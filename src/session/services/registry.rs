//! Registry of live client sessions.

use crate::container::domain::{ContainerInstance, ContainerKey};
use crate::mount::{AllowedRoots, MountError, MountSpec, validate_mounts};
use crate::session::domain::{ClientContext, ClientSession, SessionId};
use mockable::Clock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, info};

/// Errors returned by [`SessionRegistry`].
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// No session with the identifier is open.
    #[error("session {0} is not open")]
    NotFound(SessionId),

    /// The session has not called `fabric/registerClient`.
    #[error("session {0} has not registered a client context")]
    NotRegistered(SessionId),

    /// A requested mount was rejected.
    #[error(transparent)]
    Mount(#[from] MountError),

    /// Lock acquisition failed.
    #[error("session registry lock poisoned: {0}")]
    Lock(String),
}

/// Result type for session registry operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Tracks open sessions, their mount contexts and the containers they own.
pub struct SessionRegistry<C>
where
    C: Clock + Send + Sync,
{
    allowed_roots: AllowedRoots,
    clock: Arc<C>,
    sessions: Arc<RwLock<HashMap<SessionId, ClientSession>>>,
}

impl<C> Clone for SessionRegistry<C>
where
    C: Clock + Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            allowed_roots: self.allowed_roots.clone(),
            clock: Arc::clone(&self.clock),
            sessions: Arc::clone(&self.sessions),
        }
    }
}

impl<C> SessionRegistry<C>
where
    C: Clock + Send + Sync,
{
    /// Creates an empty registry that validates mounts against `allowed_roots`.
    #[must_use]
    pub fn new(allowed_roots: AllowedRoots, clock: Arc<C>) -> Self {
        Self {
            allowed_roots,
            clock,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Opens a session for a newly accepted connection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Lock`] when the registry lock is poisoned.
    pub fn register(&self, peer: Option<SocketAddr>) -> SessionResult<ClientSession> {
        let session = ClientSession::new(peer, &*self.clock);
        self.write_sessions()?
            .insert(session.id(), session.clone());
        debug!(session = %session.id(), ?peer, "session opened");
        Ok(session)
    }

    /// Validates `mounts` and stores them as the session's client context.
    ///
    /// Either every mount is accepted and the context replaced, or the
    /// session is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Mount`] for the first rejected mount and
    /// [`SessionError::NotFound`] when the session is not open.
    pub fn attach_context(
        &self,
        session_id: SessionId,
        mounts: &[MountSpec],
    ) -> SessionResult<ClientContext> {
        let validated = validate_mounts(&self.allowed_roots, mounts)?;
        let context = ClientContext::new(session_id, validated);

        let mut sessions = self.write_sessions()?;
        let session = sessions
            .get_mut(&session_id)
            .ok_or(SessionError::NotFound(session_id))?;
        session.register(context.clone());
        session.touch(&*self.clock);
        info!(
            session = %session_id,
            mounts = context.mounts().len(),
            "client registered"
        );
        Ok(context)
    }

    /// Records activity on the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] when the session is not open.
    pub fn touch(&self, session_id: SessionId) -> SessionResult<()> {
        let mut sessions = self.write_sessions()?;
        let session = sessions
            .get_mut(&session_id)
            .ok_or(SessionError::NotFound(session_id))?;
        session.touch(&*self.clock);
        Ok(())
    }

    /// Returns the session's client context.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotRegistered`] before registration and
    /// [`SessionError::NotFound`] when the session is not open.
    pub fn context(&self, session_id: SessionId) -> SessionResult<ClientContext> {
        let sessions = self.read_sessions()?;
        let session = sessions
            .get(&session_id)
            .ok_or(SessionError::NotFound(session_id))?;
        session
            .context()
            .cloned()
            .ok_or(SessionError::NotRegistered(session_id))
    }

    /// Hands out the next call sequence number for the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] when the session is not open.
    pub fn next_call_sequence(&self, session_id: SessionId) -> SessionResult<u64> {
        let mut sessions = self.write_sessions()?;
        let session = sessions
            .get_mut(&session_id)
            .ok_or(SessionError::NotFound(session_id))?;
        Ok(session.next_call_sequence())
    }

    /// Records `instance` as owned by the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] when the session is not open.
    pub fn record_container(
        &self,
        session_id: SessionId,
        instance: ContainerInstance,
    ) -> SessionResult<()> {
        let mut sessions = self.write_sessions()?;
        let session = sessions
            .get_mut(&session_id)
            .ok_or(SessionError::NotFound(session_id))?;
        session.own(instance);
        Ok(())
    }

    /// Stops tracking the container for `key` on the session.
    ///
    /// Closed sessions are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Lock`] when the registry lock is poisoned.
    pub fn forget_container(
        &self,
        session_id: SessionId,
        key: &ContainerKey,
    ) -> SessionResult<Option<ContainerInstance>> {
        let mut sessions = self.write_sessions()?;
        Ok(sessions
            .get_mut(&session_id)
            .and_then(|session| session.release(key)))
    }

    /// Closes the session and returns the containers it owned.
    ///
    /// Closing an unknown session returns no containers.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Lock`] when the registry lock is poisoned.
    pub fn remove(&self, session_id: SessionId) -> SessionResult<Vec<ContainerInstance>> {
        let removed = self.write_sessions()?.remove(&session_id);
        Ok(removed.map_or_else(Vec::new, |mut session| {
            let owned = session.take_containers();
            debug!(session = %session_id, containers = owned.len(), "session closed");
            owned
        }))
    }

    /// Returns a snapshot of the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] when the session is not open.
    pub fn get(&self, session_id: SessionId) -> SessionResult<ClientSession> {
        self.read_sessions()?
            .get(&session_id)
            .cloned()
            .ok_or(SessionError::NotFound(session_id))
    }

    /// Returns the identifiers of every open session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Lock`] when the registry lock is poisoned.
    pub fn session_ids(&self) -> SessionResult<Vec<SessionId>> {
        let mut ids: Vec<SessionId> = self.read_sessions()?.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Returns the number of open sessions.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Lock`] when the registry lock is poisoned.
    pub fn len(&self) -> SessionResult<usize> {
        Ok(self.read_sessions()?.len())
    }

    /// Returns `true` when no session is open.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Lock`] when the registry lock is poisoned.
    pub fn is_empty(&self) -> SessionResult<bool> {
        Ok(self.read_sessions()?.is_empty())
    }

    fn read_sessions(&self) -> SessionResult<RwLockReadGuard<'_, HashMap<SessionId, ClientSession>>> {
        self.sessions
            .read()
            .map_err(|err| SessionError::Lock(err.to_string()))
    }

    fn write_sessions(
        &self,
    ) -> SessionResult<RwLockWriteGuard<'_, HashMap<SessionId, ClientSession>>> {
        self.sessions
            .write()
            .map_err(|err| SessionError::Lock(err.to_string()))
    }
}
