//! Client session aggregate.

use super::{ClientContext, SessionId};
use crate::container::domain::{ContainerInstance, ContainerKey};
use chrono::{DateTime, Utc};
use mockable::Clock;
use std::collections::BTreeMap;
use std::net::SocketAddr;

/// State kept for one client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSession {
    id: SessionId,
    peer: Option<SocketAddr>,
    context: Option<ClientContext>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    owned_containers: BTreeMap<ContainerKey, ContainerInstance>,
    call_sequence: u64,
}

impl ClientSession {
    /// Creates an unregistered session for a newly accepted connection.
    #[must_use]
    pub fn new(peer: Option<SocketAddr>, clock: &impl Clock) -> Self {
        let timestamp = clock.utc();
        Self {
            id: SessionId::new(),
            peer,
            context: None,
            created_at: timestamp,
            last_activity: timestamp,
            owned_containers: BTreeMap::new(),
            call_sequence: 0,
        }
    }

    /// Returns the session identifier.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the remote peer address, when known.
    #[must_use]
    pub const fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Returns the registration context, if the client has registered.
    #[must_use]
    pub const fn context(&self) -> Option<&ClientContext> {
        self.context.as_ref()
    }

    /// Returns `true` once `fabric/registerClient` has succeeded.
    #[must_use]
    pub const fn is_registered(&self) -> bool {
        self.context.is_some()
    }

    /// Returns the connection time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the time of the last received message.
    #[must_use]
    pub const fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// Returns the containers resolved on behalf of this session.
    #[must_use]
    pub const fn owned_containers(&self) -> &BTreeMap<ContainerKey, ContainerInstance> {
        &self.owned_containers
    }

    /// Returns the number of call sequences handed out so far.
    #[must_use]
    pub const fn call_sequence(&self) -> u64 {
        self.call_sequence
    }

    /// Stores the registration context, replacing any earlier one.
    pub fn register(&mut self, context: ClientContext) {
        self.context = Some(context);
    }

    /// Records activity at the current clock time.
    pub fn touch(&mut self, clock: &impl Clock) {
        self.last_activity = clock.utc();
    }

    /// Returns the next call sequence number, starting at one.
    pub const fn next_call_sequence(&mut self) -> u64 {
        self.call_sequence = self.call_sequence.saturating_add(1);
        self.call_sequence
    }

    /// Records a container as owned by this session.
    pub fn own(&mut self, instance: ContainerInstance) {
        self.owned_containers.insert(instance.key().clone(), instance);
    }

    /// Stops tracking the container for `key`.
    pub fn release(&mut self, key: &ContainerKey) -> Option<ContainerInstance> {
        self.owned_containers.remove(key)
    }

    /// Removes and returns every owned container.
    pub fn take_containers(&mut self) -> Vec<ContainerInstance> {
        std::mem::take(&mut self.owned_containers)
            .into_values()
            .collect()
    }
}
