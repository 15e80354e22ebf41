use chrono::{DateTime, Utc};
use convene_models::{
    EventId, EventStatus, Page, PageRequest, Reminder, ReminderChannel, ReminderId,
    ReminderStatus, UserId,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::permissions::PermissionGate;
use crate::store::{require_event, EntityStore};

/// User-specific reminders tied to an event's start. Delivery happens
/// elsewhere; the delivery side polls [`due`](Self::due) and reports back
/// through [`mark_sent`](Self::mark_sent).
pub struct ReminderScheduler {
    store: Arc<dyn EntityStore>,
    gate: Arc<PermissionGate>,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<dyn EntityStore>,
        gate: Arc<PermissionGate>,
        clock: Arc<dyn Clock>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            gate,
            clock,
            config,
        }
    }

    pub async fn set_reminder(
        &self,
        actor: UserId,
        event_id: EventId,
        trigger_at: DateTime<Utc>,
        channel: ReminderChannel,
    ) -> Result<Reminder, CoreError> {
        let event = require_event(self.store.as_ref(), event_id).await?;
        self.gate
            .ensure_visible(self.store.as_ref(), &event, actor)
            .await?;
        if event.status == EventStatus::Cancelled {
            return Err(CoreError::Conflict("Event is cancelled".into()));
        }

        let now = self.clock.now();
        if trigger_at <= now {
            return Err(CoreError::InvalidTimeWindow(
                "reminder must trigger in the future".into(),
            ));
        }
        if trigger_at >= event.starts_at {
            return Err(CoreError::InvalidTimeWindow(
                "reminder must trigger before the event starts".into(),
            ));
        }

        let max = self.config.reminders.max_pending_per_user;
        let pending = self
            .store
            .list_event_reminders(event_id)
            .await?
            .iter()
            .filter(|r| r.user_id == actor && r.is_pending())
            .count();
        if pending >= max {
            return Err(CoreError::BadRequest(format!(
                "At most {max} pending reminders per event"
            )));
        }

        let reminder = Reminder {
            id: Uuid::new_v4(),
            event_id,
            user_id: actor,
            trigger_at,
            channel,
            status: ReminderStatus::Pending,
            sent_at: None,
            created_at: now,
        };
        self.store.insert_reminder(&reminder).await?;
        tracing::info!(
            %event_id,
            user_id = actor,
            reminder_id = %reminder.id,
            channel = ?channel,
            "reminder scheduled"
        );
        Ok(reminder)
    }

    pub async fn delete_reminder(&self, actor: UserId, id: ReminderId) -> Result<(), CoreError> {
        let reminder = self
            .store
            .get_reminder(id)
            .await?
            .ok_or(CoreError::NotFound)?;
        if reminder.user_id != actor {
            return Err(CoreError::Forbidden);
        }
        self.store.delete_reminder(id).await?;
        tracing::debug!(reminder_id = %id, user_id = actor, "reminder deleted");
        Ok(())
    }

    /// The caller's own reminders for one event.
    pub async fn list_reminders(
        &self,
        actor: UserId,
        event_id: EventId,
        page: PageRequest,
    ) -> Result<Page<Reminder>, CoreError> {
        let page = page.clamped(self.config.pagination.max_limit);
        Ok(self.store.list_reminders(event_id, actor, page).await?)
    }

    pub async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Reminder>, CoreError> {
        let limit = limit.clamp(1, self.config.pagination.max_limit.max(1));
        Ok(self.store.due_reminders(now, limit).await?)
    }

    pub async fn mark_sent(&self, id: ReminderId) -> Result<Reminder, CoreError> {
        let mut reminder = self
            .store
            .get_reminder(id)
            .await?
            .ok_or(CoreError::NotFound)?;
        if !reminder.is_pending() {
            return Err(CoreError::Conflict(format!(
                "Reminder is {:?}, not pending",
                reminder.status
            )));
        }
        reminder.status = ReminderStatus::Sent;
        reminder.sent_at = Some(self.clock.now());
        self.store.update_reminder(&reminder).await?;
        Ok(reminder)
    }

    /// Cancel every pending reminder of an event, continuing past failures.
    /// Returns how many were cancelled.
    pub async fn cancel_for_event(&self, event_id: EventId) -> Result<usize, CoreError> {
        let pending: Vec<Reminder> = self
            .store
            .list_event_reminders(event_id)
            .await?
            .into_iter()
            .filter(Reminder::is_pending)
            .collect();

        let attempted = pending.len();
        let mut failed = 0;
        for mut reminder in pending {
            reminder.status = ReminderStatus::Cancelled;
            if let Err(e) = self.store.update_reminder(&reminder).await {
                tracing::warn!(
                    %event_id,
                    reminder_id = %reminder.id,
                    "failed to cancel reminder: {e}"
                );
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(CoreError::CascadeFailure { attempted, failed });
        }
        if attempted > 0 {
            tracing::info!(%event_id, cancelled = attempted, "event reminders cancelled");
        }
        Ok(attempted)
    }
}
