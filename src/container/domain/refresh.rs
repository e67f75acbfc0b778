//! Refresh policy for smart-refresh containers.

use super::ContainerInstance;
use crate::registry::{ContainerStrategy, ServiceDefinition};
use chrono::{DateTime, Utc};

/// Returns `true` when `instance` must be replaced before its next call.
///
/// Only [`ContainerStrategy::SmartRefresh`] services rotate containers. A
/// container is due once it has served `max_calls_per_container` calls or
/// is at least `max_container_age` old. The memory threshold is not
/// consulted.
#[must_use]
pub fn should_refresh(
    instance: &ContainerInstance,
    service: &ServiceDefinition,
    now: DateTime<Utc>,
) -> bool {
    if service.strategy() != ContainerStrategy::SmartRefresh {
        return false;
    }

    let calls_exhausted = service
        .max_calls_per_container()
        .is_some_and(|max_calls| instance.call_count() >= max_calls);
    let too_old = service
        .max_container_age()
        .is_some_and(|max_age| instance.age(now) >= max_age);

    calls_exhausted || too_old
}
