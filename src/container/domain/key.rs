//! Keys identifying a slot in the container table.

use crate::registry::{ContainerStrategy, ServiceName};
use crate::session::SessionId;
use sha2::{Digest, Sha256};
use std::fmt;

const NAME_HASH_BYTES: usize = 6;

/// Identity of at most one live container.
///
/// Rendered as `service:session` or, for per-call containers,
/// `service:session:sequence`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerKey {
    service: ServiceName,
    session_id: SessionId,
    call_sequence: Option<u64>,
}

impl ContainerKey {
    /// Derives the key a call should use under `strategy`.
    ///
    /// Only [`ContainerStrategy::PerCall`] folds the call sequence into the
    /// key; the other strategies share one key per session.
    #[must_use]
    pub fn for_strategy(
        service: &ServiceName,
        session_id: SessionId,
        strategy: ContainerStrategy,
        call_sequence: u64,
    ) -> Self {
        let sequence = match strategy {
            ContainerStrategy::PerCall => Some(call_sequence),
            ContainerStrategy::PerSession | ContainerStrategy::SmartRefresh => None,
        };
        Self {
            service: service.clone(),
            session_id,
            call_sequence: sequence,
        }
    }

    /// Returns the service part.
    #[must_use]
    pub const fn service(&self) -> &ServiceName {
        &self.service
    }

    /// Returns the session part.
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Returns the call sequence for per-call keys.
    #[must_use]
    pub const fn call_sequence(&self) -> Option<u64> {
        self.call_sequence
    }

    /// Returns the deterministic engine-safe container name for this key.
    #[must_use]
    pub fn container_name(&self) -> String {
        let digest = Sha256::digest(self.to_string().as_bytes());
        let suffix: String = digest
            .iter()
            .take(NAME_HASH_BYTES)
            .map(|byte| format!("{byte:02x}"))
            .collect();
        format!("{}-{}-{suffix}", super::CONTAINER_NAME_PREFIX, self.service)
    }
}

impl fmt::Display for ContainerKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.call_sequence {
            Some(sequence) => write!(formatter, "{}:{}:{sequence}", self.service, self.session_id),
            None => write!(formatter, "{}:{}", self.service, self.session_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn service() -> ServiceName {
        ServiceName::new("git").expect("valid service name")
    }

    #[rstest]
    #[case(ContainerStrategy::PerSession, false)]
    #[case(ContainerStrategy::SmartRefresh, false)]
    #[case(ContainerStrategy::PerCall, true)]
    fn only_per_call_keys_include_sequence(
        #[case] strategy: ContainerStrategy,
        #[case] has_sequence: bool,
    ) {
        let session_id = SessionId::new();

        let key = ContainerKey::for_strategy(&service(), session_id, strategy, 4);

        assert_eq!(key.call_sequence().is_some(), has_sequence);
        assert!(key.to_string().starts_with(&format!("git:{session_id}")));
    }

    #[test]
    fn per_session_calls_share_a_key() {
        let session_id = SessionId::new();

        let first =
            ContainerKey::for_strategy(&service(), session_id, ContainerStrategy::PerSession, 1);
        let second =
            ContainerKey::for_strategy(&service(), session_id, ContainerStrategy::PerSession, 2);

        assert_eq!(first, second);
    }

    #[test]
    fn container_names_are_deterministic_and_distinct() {
        let session_id = SessionId::new();
        let first =
            ContainerKey::for_strategy(&service(), session_id, ContainerStrategy::PerCall, 1);
        let second =
            ContainerKey::for_strategy(&service(), session_id, ContainerStrategy::PerCall, 2);

        let name = first.container_name();

        assert_eq!(name, first.container_name());
        assert_ne!(name, second.container_name());
        assert!(name.starts_with("reactor-fabric-git-"));
        assert_eq!(name.len(), "reactor-fabric-git-".len() + 12);
    }
}
