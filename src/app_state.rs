//! Shared application state injected into all Axum handlers.

use std::collections::HashSet;
use std::sync::Arc;

use crate::api::auth::Principal;
use crate::error::ServiceError;
use crate::persistence::DeliveryStore;
use crate::service::GradeService;

/// Capability name required for every mutating endpoint.
pub const MANAGE_CAPABILITY: &str = "manage";

/// Maps actor ids to capabilities.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    manage_actors: HashSet<i64>,
}

impl AccessPolicy {
    /// Grants `manage` to every listed actor.
    #[must_use]
    pub fn new(manage_actors: HashSet<i64>) -> Self {
        Self { manage_actors }
    }

    /// Returns `true` if the actor holds `manage`.
    #[must_use]
    pub fn can_manage(&self, actor_id: i64) -> bool {
        self.manage_actors.contains(&actor_id)
    }

    /// Checks the `manage` capability for a caller.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Forbidden`] when the actor lacks it.
    pub fn require_manage(&self, principal: &Principal) -> Result<(), ServiceError> {
        if self.can_manage(principal.actor_id) {
            Ok(())
        } else {
            tracing::debug!(actor_id = principal.actor_id, "manage capability denied");
            Err(ServiceError::Forbidden(MANAGE_CAPABILITY.to_string()))
        }
    }
}

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Grade-apply use case.
    pub grade_service: Arc<GradeService>,
    /// Outbound delivery queue.
    pub deliveries: Arc<dyn DeliveryStore>,
    /// Capability lookup.
    pub access: AccessPolicy,
    /// Whether outbound delivery is switched on.
    pub webhooks_enabled: bool,
    /// Attempt ceiling used to classify deliveries in listings.
    pub max_attempts: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manage_is_granted_per_actor() {
        let policy = AccessPolicy::new(HashSet::from([7]));
        assert!(policy.require_manage(&Principal { actor_id: 7 }).is_ok());
        assert!(matches!(
            policy.require_manage(&Principal { actor_id: 8 }),
            Err(ServiceError::Forbidden(_))
        ));
    }

    #[test]
    fn empty_policy_denies_everyone() {
        assert!(!AccessPolicy::default().can_manage(1));
    }
}
