pub mod clock;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod permissions;
pub mod ports;
pub mod recurrence;
pub mod reminders;
pub mod rsvp;
pub mod store;
pub mod tasks;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_support;

use chrono::{DateTime, Utc};
use convene_models::{
    Attendee, AttendeeFilter, Event, EventChanges, EventId, NewEvent, Page, PageRequest,
    Reminder, ReminderChannel, ReminderId, RsvpValue, UserId,
};
use std::sync::Arc;
use tokio::sync::broadcast;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::EngineConfig;
pub use error::CoreError;
pub use ports::{GroupOracle, LogNotifier, Notifier, RoleOracle};
pub use store::{EntityStore, MemoryStore, StoreError};
pub use tasks::{CascadeOutcome, CascadeReport, TaskKind};

use lifecycle::{LifecycleManager, LifecycleParts};
use permissions::PermissionGate;
use recurrence::RecurrenceExpander;
use reminders::ReminderScheduler;
use rsvp::RsvpEngine;
use tasks::Dispatcher;

/// Collaborators the engine is built from.
#[derive(Clone)]
pub struct EngineDeps {
    pub store: Arc<dyn EntityStore>,
    pub roles: Arc<dyn RoleOracle>,
    pub groups: Arc<dyn GroupOracle>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

impl EngineDeps {
    /// In-memory store, logging notifier and the system clock.
    pub fn in_memory(roles: Arc<dyn RoleOracle>, groups: Arc<dyn GroupOracle>) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            roles,
            groups,
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Entry point for every operation. The acting user is always passed in
/// explicitly; authentication happens before the engine is called.
pub struct Engine {
    lifecycle: LifecycleManager,
    rsvp: RsvpEngine,
    reminders: Arc<ReminderScheduler>,
    gate: Arc<PermissionGate>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(deps: EngineDeps, config: EngineConfig) -> Self {
        let config = Arc::new(config);
        let dispatcher = Dispatcher::new(config.dispatch.report_capacity);
        let gate = Arc::new(PermissionGate::new(deps.roles.clone(), &config.permissions));
        let expander = Arc::new(RecurrenceExpander::new(
            deps.store.clone(),
            deps.clock.clone(),
            config.recurrence.clone(),
        ));
        let reminders = Arc::new(ReminderScheduler::new(
            deps.store.clone(),
            gate.clone(),
            deps.clock.clone(),
            config.clone(),
        ));
        let rsvp = RsvpEngine::new(
            deps.store.clone(),
            gate.clone(),
            deps.clock.clone(),
            config.clone(),
        );
        let lifecycle = LifecycleManager::new(LifecycleParts {
            store: deps.store,
            gate: gate.clone(),
            groups: deps.groups,
            notifier: deps.notifier,
            clock: deps.clock.clone(),
            expander,
            reminders: reminders.clone(),
            dispatcher: dispatcher.clone(),
            config,
        });

        Self {
            lifecycle,
            rsvp,
            reminders,
            gate,
            dispatcher,
            clock: deps.clock,
        }
    }

    pub async fn create_event(
        &self,
        actor: UserId,
        template: NewEvent,
    ) -> Result<Event, CoreError> {
        self.lifecycle.create(actor, template).await
    }

    pub async fn update_event(
        &self,
        actor: UserId,
        event_id: EventId,
        changes: EventChanges,
        propagate_to_recurrence: bool,
    ) -> Result<Event, CoreError> {
        self.lifecycle
            .update(actor, event_id, changes, propagate_to_recurrence)
            .await
    }

    pub async fn cancel_event(
        &self,
        actor: UserId,
        event_id: EventId,
        reason: Option<String>,
    ) -> Result<Event, CoreError> {
        self.lifecycle.cancel(actor, event_id, reason).await
    }

    pub async fn delete_event(&self, actor: UserId, event_id: EventId) -> Result<(), CoreError> {
        self.lifecycle.delete(actor, event_id).await
    }

    pub async fn get_event(&self, actor: UserId, event_id: EventId) -> Result<Event, CoreError> {
        self.lifecycle.get(actor, event_id).await
    }

    pub async fn list_instances(
        &self,
        actor: UserId,
        event_id: EventId,
        page: PageRequest,
    ) -> Result<Page<Event>, CoreError> {
        self.lifecycle.list_instances(actor, event_id, page).await
    }

    pub async fn add_cohost(
        &self,
        actor: UserId,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<Event, CoreError> {
        self.lifecycle.add_cohost(actor, event_id, user_id).await
    }

    pub async fn remove_cohost(
        &self,
        actor: UserId,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<Event, CoreError> {
        self.lifecycle.remove_cohost(actor, event_id, user_id).await
    }

    pub async fn expand_recurrence(
        &self,
        actor: UserId,
        event_id: EventId,
        horizon: DateTime<Utc>,
    ) -> Result<Vec<Event>, CoreError> {
        self.lifecycle.expand(actor, event_id, horizon).await
    }

    pub async fn rsvp(
        &self,
        actor: UserId,
        event_id: EventId,
        value: RsvpValue,
        guest_count: u32,
        note: Option<String>,
    ) -> Result<Attendee, CoreError> {
        self.rsvp
            .rsvp(actor, event_id, value, guest_count, note)
            .await
    }

    pub async fn get_attendees(
        &self,
        actor: UserId,
        event_id: EventId,
        filter: AttendeeFilter,
        page: PageRequest,
    ) -> Result<Page<Attendee>, CoreError> {
        self.rsvp.get_attendees(actor, event_id, filter, page).await
    }

    pub async fn invite(
        &self,
        actor: UserId,
        event_id: EventId,
        user_ids: &[UserId],
    ) -> Result<Vec<Attendee>, CoreError> {
        self.rsvp.invite(actor, event_id, user_ids).await
    }

    pub async fn remove_attendee(
        &self,
        actor: UserId,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<(), CoreError> {
        self.rsvp.remove_attendee(actor, event_id, user_id).await
    }

    pub async fn check_in(
        &self,
        actor: UserId,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<Attendee, CoreError> {
        self.rsvp.check_in(actor, event_id, user_id).await
    }

    pub async fn set_reminder(
        &self,
        actor: UserId,
        event_id: EventId,
        trigger_at: DateTime<Utc>,
        channel: ReminderChannel,
    ) -> Result<Reminder, CoreError> {
        self.reminders
            .set_reminder(actor, event_id, trigger_at, channel)
            .await
    }

    pub async fn delete_reminder(&self, actor: UserId, id: ReminderId) -> Result<(), CoreError> {
        self.reminders.delete_reminder(actor, id).await
    }

    pub async fn list_reminders(
        &self,
        actor: UserId,
        event_id: EventId,
        page: PageRequest,
    ) -> Result<Page<Reminder>, CoreError> {
        self.reminders.list_reminders(actor, event_id, page).await
    }

    /// Pending reminders whose trigger time has passed. `now` defaults to the
    /// engine clock.
    pub async fn due_reminders(
        &self,
        now: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Reminder>, CoreError> {
        let now = now.unwrap_or_else(|| self.clock.now());
        self.reminders.due(now, limit).await
    }

    pub async fn mark_reminder_sent(&self, id: ReminderId) -> Result<Reminder, CoreError> {
        self.reminders.mark_sent(id).await
    }

    /// Forget cached platform roles for `user_id` so the next check asks the
    /// role oracle again.
    pub async fn invalidate_roles(&self, user_id: UserId) {
        self.gate.invalidate_user(user_id).await;
    }

    pub fn subscribe_reports(&self) -> broadcast::Receiver<CascadeReport> {
        self.dispatcher.subscribe()
    }

    /// Wait for every dispatched cascade and notification to finish.
    pub async fn flush(&self) {
        self.dispatcher.flush().await;
    }

    pub fn cascades_in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{utc, Harness};
    use chrono::Duration;

    #[tokio::test]
    async fn end_to_end_attendance_flow() {
        let h = Harness::new();
        let event = h
            .engine
            .create_event(
                1,
                NewEvent::new("Trivia night", utc(2024, 1, 5, 19), utc(2024, 1, 5, 22))
                    .with_capacity(2),
            )
            .await
            .unwrap();

        h.engine.rsvp(2, event.id, RsvpValue::Going, 1, None).await.unwrap();
        h.engine.rsvp(3, event.id, RsvpValue::Going, 0, None).await.unwrap();
        let reminder = h
            .engine
            .set_reminder(2, event.id, utc(2024, 1, 5, 18), ReminderChannel::Email)
            .await
            .unwrap();

        let going = h
            .engine
            .get_attendees(
                1,
                event.id,
                AttendeeFilter::status(convene_models::RsvpStatus::Going),
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(going.total, 2);
        assert_eq!(h.engine.get_event(4, event.id).await.unwrap().counters.going, 2);

        h.clock.set(utc(2024, 1, 5, 18) + Duration::minutes(1));
        let due = h.engine.due_reminders(None, 10).await.unwrap();
        assert_eq!(due.iter().map(|r| r.id).collect::<Vec<_>>(), vec![reminder.id]);
        h.engine.mark_reminder_sent(reminder.id).await.unwrap();

        let checked = h.engine.check_in(1, event.id, 2).await.unwrap();
        assert!(checked.checked_in_at.is_some());

        h.engine.flush().await;
        assert_eq!(h.engine.cascades_in_flight(), 0);
    }

    #[tokio::test]
    async fn in_memory_deps_build_an_engine() {
        let deps = EngineDeps::in_memory(
            Arc::new(crate::test_support::StaticRoles::default()),
            Arc::new(crate::test_support::StaticGroups::default()),
        );
        let engine = Engine::new(deps, EngineConfig::default());
        let start = Utc::now() + Duration::days(1);
        let event = engine
            .create_event(1, NewEvent::new("Park cleanup", start, start + Duration::hours(3)))
            .await
            .unwrap();
        assert_eq!(engine.get_event(1, event.id).await.unwrap().title, "Park cleanup");
        engine.flush().await;
    }
}
