use bitflags::bitflags;
use convene_models::{Event, Privacy, UserId};
use std::sync::Arc;

use crate::config::PermissionsConfig;
use crate::error::CoreError;
use crate::ports::RoleOracle;
use crate::store::EntityStore;

bitflags! {
    /// What a user is relative to one event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Authority: u8 {
        const HOST      = 1 << 0;
        const COHOST    = 1 << 1;
        const ADMIN     = 1 << 2;
        const MODERATOR = 1 << 3;
    }
}

/// Authority a mutation requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Host,
    HostOrCohost,
    HostOrAdmin,
    HostCohostOrAdmin,
    ModeratorOrAbove,
}

impl Capability {
    pub fn accepted(self) -> Authority {
        match self {
            Capability::Host => Authority::HOST,
            Capability::HostOrCohost => Authority::HOST | Authority::COHOST,
            Capability::HostOrAdmin => Authority::HOST | Authority::ADMIN,
            Capability::HostCohostOrAdmin => Authority::HOST | Authority::COHOST | Authority::ADMIN,
            Capability::ModeratorOrAbove => Authority::all(),
        }
    }

    pub fn satisfied_by(self, authority: Authority) -> bool {
        authority.intersects(self.accepted())
    }
}

/// Host and co-host authority, derived from the event alone.
pub fn event_authority(event: &Event, user_id: UserId) -> Authority {
    let mut authority = Authority::empty();
    if event.host_id == user_id {
        authority |= Authority::HOST;
    }
    if event.is_cohost(user_id) {
        authority |= Authority::COHOST;
    }
    authority
}

/// Check if authority satisfies a capability, returning error if not
pub fn require(authority: Authority, capability: Capability) -> Result<(), CoreError> {
    if !capability.satisfied_by(authority) {
        return Err(CoreError::Forbidden);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PlatformRole {
    Admin,
    Moderator,
}

type RoleCacheKey = (UserId, PlatformRole);

fn build_role_cache(config: &PermissionsConfig) -> Option<moka::future::Cache<RoleCacheKey, bool>> {
    config.role_cache_ttl().map(|ttl| {
        moka::future::Cache::builder()
            .max_capacity(config.role_cache_capacity)
            .time_to_live(ttl)
            .build()
    })
}

/// Resolves host → co-host → platform admin → platform moderator, stopping as
/// soon as the requested capability is satisfied.
pub struct PermissionGate {
    roles: Arc<dyn RoleOracle>,
    cache: Option<moka::future::Cache<RoleCacheKey, bool>>,
}

impl PermissionGate {
    pub fn new(roles: Arc<dyn RoleOracle>, config: &PermissionsConfig) -> Self {
        Self {
            roles,
            cache: build_role_cache(config),
        }
    }

    /// Compute the caller's authority, consulting the role oracle only when
    /// the event-local authority does not already satisfy `capability`.
    pub async fn authority(
        &self,
        event: &Event,
        user_id: UserId,
        capability: Capability,
    ) -> Result<Authority, CoreError> {
        let mut authority = event_authority(event, user_id);
        if capability.satisfied_by(authority) {
            return Ok(authority);
        }

        let accepted = capability.accepted();
        if accepted.contains(Authority::ADMIN) && self.is_admin(user_id).await? {
            authority |= Authority::ADMIN;
            return Ok(authority);
        }
        if accepted.contains(Authority::MODERATOR)
            && self.role(user_id, PlatformRole::Moderator).await?
        {
            authority |= Authority::MODERATOR;
        }
        Ok(authority)
    }

    pub async fn check(
        &self,
        event: &Event,
        user_id: UserId,
        capability: Capability,
    ) -> Result<bool, CoreError> {
        let authority = self.authority(event, user_id, capability).await?;
        Ok(capability.satisfied_by(authority))
    }

    /// Like [`check`](Self::check) but denial becomes `Forbidden`.
    pub async fn authorize(
        &self,
        event: &Event,
        user_id: UserId,
        capability: Capability,
    ) -> Result<Authority, CoreError> {
        let authority = self.authority(event, user_id, capability).await?;
        if let Err(err) = require(authority, capability) {
            tracing::debug!(
                event_id = %event.id,
                user_id,
                ?capability,
                "permission gate denied request"
            );
            return Err(err);
        }
        Ok(authority)
    }

    /// Drop cached role answers for one user, e.g. after a promotion or
    /// demotion.
    pub async fn invalidate_user(&self, user_id: UserId) {
        if let Some(cache) = &self.cache {
            cache.invalidate(&(user_id, PlatformRole::Admin)).await;
            cache.invalidate(&(user_id, PlatformRole::Moderator)).await;
        }
    }

    pub fn invalidate_all(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
    }

    pub async fn is_admin(&self, user_id: UserId) -> Result<bool, CoreError> {
        self.role(user_id, PlatformRole::Admin).await
    }

    async fn role(&self, user_id: UserId, role: PlatformRole) -> Result<bool, CoreError> {
        let key = (user_id, role);
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&key).await {
                return Ok(hit);
            }
        }

        let answer = match role {
            PlatformRole::Admin => self.roles.is_admin(user_id).await,
            PlatformRole::Moderator => self.roles.is_moderator(user_id).await,
        };
        let answer = answer.map_err(|e| {
            tracing::warn!(user_id, ?role, "role lookup failed: {e:#}");
            CoreError::PermissionCheckFailed(format!("{role:?} lookup failed: {e}"))
        })?;

        if let Some(cache) = &self.cache {
            cache.insert(key, answer).await;
        }
        Ok(answer)
    }

    /// Private and invite-only events are visible to anyone holding an attendee
    /// record and to moderators or above. Public events are visible to all.
    pub async fn ensure_visible(
        &self,
        store: &dyn EntityStore,
        event: &Event,
        user_id: UserId,
    ) -> Result<(), CoreError> {
        if event.privacy == Privacy::Public {
            return Ok(());
        }
        if self
            .check(event, user_id, Capability::ModeratorOrAbove)
            .await?
        {
            return Ok(());
        }
        if store.get_attendee(event.id, user_id).await?.is_some() {
            return Ok(());
        }
        Err(CoreError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_support::{sample_event, StaticRoles};
    use chrono::Utc;
    use convene_models::Attendee;

    fn gate(roles: StaticRoles) -> (PermissionGate, Arc<StaticRoles>) {
        let roles = Arc::new(roles);
        let gate = PermissionGate::new(roles.clone(), &PermissionsConfig::default());
        (gate, roles)
    }

    #[test]
    fn event_authority_recognises_host_and_cohost() {
        let mut event = sample_event(1, Utc::now());
        event.co_host_ids.insert(2);
        assert_eq!(event_authority(&event, 1), Authority::HOST);
        assert_eq!(event_authority(&event, 2), Authority::COHOST);
        assert_eq!(event_authority(&event, 3), Authority::empty());
    }

    #[test]
    fn capabilities_accept_expected_authority() {
        assert!(Capability::Host.satisfied_by(Authority::HOST));
        assert!(!Capability::Host.satisfied_by(Authority::COHOST | Authority::ADMIN));
        assert!(Capability::HostOrCohost.satisfied_by(Authority::COHOST));
        assert!(!Capability::HostOrCohost.satisfied_by(Authority::ADMIN));
        assert!(Capability::HostOrAdmin.satisfied_by(Authority::ADMIN));
        assert!(!Capability::HostOrAdmin.satisfied_by(Authority::COHOST));
        assert!(Capability::HostCohostOrAdmin.satisfied_by(Authority::COHOST));
        assert!(!Capability::HostCohostOrAdmin.satisfied_by(Authority::MODERATOR));
        assert!(Capability::ModeratorOrAbove.satisfied_by(Authority::MODERATOR));
        assert!(!Capability::ModeratorOrAbove.satisfied_by(Authority::empty()));
    }

    #[test]
    fn require_fails_when_missing() {
        let result = require(Authority::COHOST, Capability::Host);
        assert!(matches!(result.unwrap_err(), CoreError::Forbidden));
    }

    #[tokio::test]
    async fn host_never_consults_role_oracle() {
        let (gate, roles) = gate(StaticRoles::default());
        let event = sample_event(1, Utc::now());
        gate.authorize(&event, 1, Capability::HostCohostOrAdmin)
            .await
            .unwrap();
        assert_eq!(roles.admin_calls(), 0);
    }

    #[tokio::test]
    async fn admin_override_applies() {
        let (gate, _) = gate(StaticRoles::default().with_admin(9));
        let event = sample_event(1, Utc::now());
        let authority = gate
            .authorize(&event, 9, Capability::HostOrAdmin)
            .await
            .unwrap();
        assert!(authority.contains(Authority::ADMIN));
        assert!(matches!(
            gate.authorize(&event, 9, Capability::Host).await,
            Err(CoreError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn cohost_cannot_use_host_or_admin() {
        let (gate, _) = gate(StaticRoles::default());
        let mut event = sample_event(1, Utc::now());
        event.co_host_ids.insert(2);
        let result = gate.authorize(&event, 2, Capability::HostOrAdmin).await;
        assert!(matches!(result, Err(CoreError::Forbidden)));
    }

    #[tokio::test]
    async fn moderator_only_counts_for_moderator_capability() {
        let (gate, _) = gate(StaticRoles::default().with_moderator(5));
        let event = sample_event(1, Utc::now());
        assert!(gate
            .check(&event, 5, Capability::ModeratorOrAbove)
            .await
            .unwrap());
        assert!(!gate
            .check(&event, 5, Capability::HostCohostOrAdmin)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn oracle_failure_is_not_treated_as_deny() {
        let (gate, _) = gate(StaticRoles::failing());
        let event = sample_event(1, Utc::now());
        let result = gate.check(&event, 3, Capability::HostCohostOrAdmin).await;
        let err = result.unwrap_err();
        assert!(matches!(err, CoreError::PermissionCheckFailed(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn role_answers_are_cached() {
        let (gate, roles) = gate(StaticRoles::default().with_admin(9));
        let event = sample_event(1, Utc::now());
        for _ in 0..3 {
            gate.authorize(&event, 9, Capability::HostOrAdmin)
                .await
                .unwrap();
        }
        assert_eq!(roles.admin_calls(), 1);
    }

    #[tokio::test]
    async fn invalidated_user_is_looked_up_again() {
        let (gate, roles) = gate(StaticRoles::default().with_admin(9).with_admin(10));
        let event = sample_event(1, Utc::now());
        for user in [9, 10, 9] {
            gate.authorize(&event, user, Capability::HostOrAdmin)
                .await
                .unwrap();
        }
        assert_eq!(roles.admin_calls(), 2);

        gate.invalidate_user(9).await;
        gate.authorize(&event, 9, Capability::HostOrAdmin)
            .await
            .unwrap();
        gate.authorize(&event, 10, Capability::HostOrAdmin)
            .await
            .unwrap();
        assert_eq!(roles.admin_calls(), 3);

        gate.invalidate_all();
        gate.authorize(&event, 10, Capability::HostOrAdmin)
            .await
            .unwrap();
        assert_eq!(roles.admin_calls(), 4);
    }

    #[tokio::test]
    async fn private_events_hidden_from_strangers() {
        let (gate, _) = gate(StaticRoles::default());
        let store = MemoryStore::new();
        let mut event = sample_event(1, Utc::now());
        event.privacy = Privacy::Private;

        let hidden = gate.ensure_visible(&store, &event, 4).await;
        assert!(matches!(hidden, Err(CoreError::NotFound)));

        store
            .upsert_attendee(&Attendee::invited(event.id, 4, Utc::now()))
            .await
            .unwrap();
        gate.ensure_visible(&store, &event, 4).await.unwrap();
        gate.ensure_visible(&store, &event, 1).await.unwrap();
    }
}
