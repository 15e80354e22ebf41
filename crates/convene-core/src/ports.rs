//! Collaborator interfaces the engine consumes but never implements.
//!
//! Identity is not a trait: every operation receives the acting user id
//! resolved by the caller's auth layer.

use anyhow::Result;
use async_trait::async_trait;
use convene_models::{EventId, GroupId, UserId};

/// Group-membership permission evaluation.
#[async_trait]
pub trait GroupOracle: Send + Sync {
    async fn can_act_on_group_events(&self, group_id: GroupId, user_id: UserId) -> Result<bool>;
}

/// Platform-wide roles used as overrides by the permission gate.
#[async_trait]
pub trait RoleOracle: Send + Sync {
    async fn is_admin(&self, user_id: UserId) -> Result<bool>;

    /// Platform moderators. Deployments without the role keep the default.
    async fn is_moderator(&self, user_id: UserId) -> Result<bool> {
        let _ = user_id;
        Ok(false)
    }
}

/// Push/email fan-out. Calls are always made from a cascade task; errors are
/// logged there and never reach the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_cancellation(&self, event_id: EventId, title: &str) -> Result<()>;

    async fn notify_followers(&self, host_id: UserId, event_id: EventId, title: &str)
        -> Result<()>;

    /// Attendees of an event whose schedule changed.
    async fn notify_update(&self, event_id: EventId, title: &str) -> Result<()> {
        let _ = (event_id, title);
        Ok(())
    }
}

/// Notifier that only logs. Useful where no delivery service is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_cancellation(&self, event_id: EventId, title: &str) -> Result<()> {
        tracing::info!(%event_id, title, "notify: event cancelled");
        Ok(())
    }

    async fn notify_followers(
        &self,
        host_id: UserId,
        event_id: EventId,
        title: &str,
    ) -> Result<()> {
        tracing::info!(%event_id, host_id, title, "notify: new event for followers");
        Ok(())
    }

    async fn notify_update(&self, event_id: EventId, title: &str) -> Result<()> {
        tracing::info!(%event_id, title, "notify: event updated");
        Ok(())
    }
}
