use chrono::{DateTime, Utc};
use convene_models::{
    Event, EventChanges, EventId, EventStatus, GroupId, NewEvent, Page, PageRequest,
    RsvpCounters, UserId,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::permissions::{Capability, PermissionGate};
use crate::ports::{GroupOracle, Notifier};
use crate::recurrence::{normalize_rule, validate_rule, RecurrenceExpander};
use crate::reminders::ReminderScheduler;
use crate::store::{require_event, EntityStore};
use crate::tasks::{Dispatcher, TaskKind};
use crate::validation::{
    parse_timezone, validate_description, validate_location, validate_note, validate_title,
    validate_window,
};

/// Owns create/update/cancel/delete and dispatches the cascades they imply.
pub struct LifecycleManager {
    store: Arc<dyn EntityStore>,
    gate: Arc<PermissionGate>,
    groups: Arc<dyn GroupOracle>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    expander: Arc<RecurrenceExpander>,
    reminders: Arc<ReminderScheduler>,
    dispatcher: Dispatcher,
    config: Arc<EngineConfig>,
}

pub(crate) struct LifecycleParts {
    pub store: Arc<dyn EntityStore>,
    pub gate: Arc<PermissionGate>,
    pub groups: Arc<dyn GroupOracle>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub expander: Arc<RecurrenceExpander>,
    pub reminders: Arc<ReminderScheduler>,
    pub dispatcher: Dispatcher,
    pub config: Arc<EngineConfig>,
}

fn notification_error(err: anyhow::Error) -> CoreError {
    CoreError::Notification(format!("{err:#}"))
}

impl LifecycleManager {
    pub(crate) fn new(parts: LifecycleParts) -> Self {
        let LifecycleParts {
            store,
            gate,
            groups,
            notifier,
            clock,
            expander,
            reminders,
            dispatcher,
            config,
        } = parts;
        Self {
            store,
            gate,
            groups,
            notifier,
            clock,
            expander,
            reminders,
            dispatcher,
            config,
        }
    }

    async fn ensure_group_permission(
        &self,
        group_id: GroupId,
        user_id: UserId,
    ) -> Result<(), CoreError> {
        let allowed = self
            .groups
            .can_act_on_group_events(group_id, user_id)
            .await
            .map_err(|e| {
                tracing::warn!(group_id, user_id, "group permission lookup failed: {e:#}");
                CoreError::PermissionCheckFailed(format!("group lookup failed: {e}"))
            })?;
        if !allowed {
            return Err(CoreError::Forbidden);
        }
        Ok(())
    }

    /// Group permission for a mutation of a group event. Applies to every
    /// actor, platform admins included.
    async fn ensure_group_for(&self, event: &Event, actor: UserId) -> Result<(), CoreError> {
        match event.group_id {
            Some(group_id) => self.ensure_group_permission(group_id, actor).await,
            None => Ok(()),
        }
    }

    pub async fn create(&self, actor: UserId, template: NewEvent) -> Result<Event, CoreError> {
        let limits = &self.config.limits;
        let now = self.clock.now();

        validate_title(&template.title, limits)?;
        if let Some(description) = &template.description {
            validate_description(description, limits)?;
        }
        validate_location(&template.location, limits)?;
        parse_timezone(&template.timezone)?;
        validate_window(template.starts_at, template.ends_at, Some(now))?;

        let recurrence_rule = match template.recurrence_rule.as_deref() {
            Some(raw) => {
                let rule = normalize_rule(raw)?;
                validate_rule(template.starts_at, &template.timezone, &rule)?;
                Some(rule)
            }
            None if template.is_recurring => {
                return Err(CoreError::BadRequest(
                    "Recurring events need a recurrence rule".into(),
                ));
            }
            None => None,
        };

        if let Some(group_id) = template.group_id {
            self.ensure_group_permission(group_id, actor).await?;
        }

        let mut co_host_ids = template.co_host_ids;
        co_host_ids.remove(&actor);

        let event = Event {
            id: Uuid::new_v4(),
            host_id: actor,
            group_id: template.group_id,
            parent_event_id: None,
            co_host_ids,
            title: template.title.trim().to_string(),
            description: template.description,
            starts_at: template.starts_at,
            ends_at: template.ends_at,
            timezone: template.timezone,
            location: template.location,
            privacy: template.privacy,
            max_attendees: template.max_attendees,
            is_recurring: template.is_recurring,
            recurrence_rule,
            recurrence_anchor: None,
            status: EventStatus::Scheduled,
            cancel_reason: None,
            counters: RsvpCounters::default(),
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_event(&event).await?;
        tracing::info!(
            event_id = %event.id,
            user_id = actor,
            recurring = event.is_recurrence_parent(),
            "event created"
        );

        if event.is_recurrence_parent() {
            self.spawn_materialize(&event);
        }
        let notifier = self.notifier.clone();
        let (host_id, event_id, title) = (event.host_id, event.id, event.title.clone());
        self.dispatcher
            .spawn(TaskKind::NotifyFollowers, event.id, async move {
                notifier
                    .notify_followers(host_id, event_id, &title)
                    .await
                    .map_err(notification_error)
            });
        Ok(event)
    }

    fn spawn_materialize(&self, parent: &Event) {
        let expander = self.expander.clone();
        let horizon = expander.default_horizon(parent);
        let parent_id = parent.id;
        self.dispatcher
            .spawn(TaskKind::Materialize, parent_id, async move {
                let expansion = expander.expand(parent_id, horizon).await?;
                if expansion.failed > 0 {
                    return Err(CoreError::CascadeFailure {
                        attempted: expansion.created.len() + expansion.failed,
                        failed: expansion.failed,
                    });
                }
                Ok(())
            });
    }

    pub async fn update(
        &self,
        actor: UserId,
        event_id: EventId,
        changes: EventChanges,
        propagate_to_recurrence: bool,
    ) -> Result<Event, CoreError> {
        if changes.is_empty() {
            return Err(CoreError::BadRequest("No changes supplied".into()));
        }
        let previous = require_event(self.store.as_ref(), event_id).await?;
        if previous.status == EventStatus::Cancelled {
            return Err(CoreError::Conflict("Cannot update a cancelled event".into()));
        }
        self.gate
            .authorize(&previous, actor, Capability::HostCohostOrAdmin)
            .await?;
        if changes.co_host_ids.is_some() {
            self.gate
                .authorize(&previous, actor, Capability::Host)
                .await?;
        }
        self.ensure_group_for(&previous, actor).await?;

        let next = self.apply_changes(&previous, &changes).await?;
        let stored = self.store.update_event(&next).await.map_err(|e| {
            tracing::debug!(%event_id, "event update lost a version race: {e}");
            CoreError::from(e)
        })?;
        tracing::info!(%event_id, user_id = actor, version = stored.version, "event updated");

        if !previous.is_recurrence_parent() && stored.is_recurrence_parent() {
            self.spawn_materialize(&stored);
        } else if propagate_to_recurrence && previous.is_recurrence_parent() {
            let expander = self.expander.clone();
            let cascade_changes = changes.clone();
            self.dispatcher
                .spawn(TaskKind::PropagateUpdate, event_id, async move {
                    expander
                        .propagate_update(&previous, &cascade_changes)
                        .await?
                        .into_result()
                        .map(|_| ())
                });
        }

        if changes.touches_schedule() {
            let notifier = self.notifier.clone();
            let title = stored.title.clone();
            self.dispatcher
                .spawn(TaskKind::NotifyUpdate, event_id, async move {
                    notifier
                        .notify_update(event_id, &title)
                        .await
                        .map_err(notification_error)
                });
        }
        Ok(stored)
    }

    /// Validate `changes` against `event` and return the updated copy.
    async fn apply_changes(
        &self,
        event: &Event,
        changes: &EventChanges,
    ) -> Result<Event, CoreError> {
        let limits = &self.config.limits;
        let now = self.clock.now();
        let mut next = event.clone();

        if let Some(title) = &changes.title {
            validate_title(title, limits)?;
            next.title = title.trim().to_string();
        }
        if let Some(description) = &changes.description {
            validate_description(description, limits)?;
            next.description = Some(description.clone()).filter(|d| !d.is_empty());
        }
        if let Some(location) = &changes.location {
            validate_location(location, limits)?;
            next.location = location.clone();
        }
        if let Some(timezone) = &changes.timezone {
            parse_timezone(timezone)?;
            next.timezone = timezone.clone();
        }
        if let Some(privacy) = changes.privacy {
            next.privacy = privacy;
        }
        if let Some(co_hosts) = &changes.co_host_ids {
            if co_hosts.contains(&event.host_id) {
                return Err(CoreError::BadRequest(
                    "The host cannot also be a co-host".into(),
                ));
            }
            next.co_host_ids = co_hosts.clone();
        }

        next.starts_at = changes.starts_at.unwrap_or(event.starts_at);
        next.ends_at = changes.ends_at.unwrap_or(event.ends_at);
        validate_window(next.starts_at, next.ends_at, None)?;
        if changes.starts_at.is_some() && next.starts_at <= now {
            return Err(CoreError::InvalidTimeWindow(
                "start must be in the future".into(),
            ));
        }

        if let Some(max_attendees) = changes.max_attendees {
            if max_attendees > 0 {
                let going = self.store.tally_rsvps(event.id).await?.going;
                if max_attendees < going {
                    return Err(CoreError::BadRequest(format!(
                        "Cannot reduce capacity below the {going} attendees already going"
                    )));
                }
            }
            next.max_attendees = max_attendees;
        }

        if changes.touches_recurrence() {
            if event.is_instance() {
                return Err(CoreError::BadRequest(
                    "Recurrence instances cannot recur".into(),
                ));
            }
            if let Some(raw) = &changes.recurrence_rule {
                next.recurrence_rule = Some(normalize_rule(raw)?);
            }
            if let Some(is_recurring) = changes.is_recurring {
                next.is_recurring = is_recurring;
            }
            if next.is_recurring && next.recurrence_rule.is_none() {
                return Err(CoreError::BadRequest(
                    "Recurring events need a recurrence rule".into(),
                ));
            }
        }
        if let Some(rule) = &next.recurrence_rule {
            if changes.touches_recurrence() || changes.touches_schedule() {
                validate_rule(next.starts_at, &next.timezone, rule)?;
            }
        }

        next.updated_at = now;
        Ok(next)
    }

    /// Cancel one event. Recurrence siblings and children are untouched.
    pub async fn cancel(
        &self,
        actor: UserId,
        event_id: EventId,
        reason: Option<String>,
    ) -> Result<Event, CoreError> {
        if let Some(reason) = &reason {
            validate_note(reason, &self.config.limits)?;
        }
        let mut event = require_event(self.store.as_ref(), event_id).await?;
        if event.status == EventStatus::Cancelled {
            return Err(CoreError::Conflict("Event is already cancelled".into()));
        }
        self.gate
            .authorize(&event, actor, Capability::HostCohostOrAdmin)
            .await?;

        event.status = EventStatus::Cancelled;
        event.cancel_reason = reason;
        event.updated_at = self.clock.now();
        let stored = self.store.update_event(&event).await?;
        tracing::info!(%event_id, user_id = actor, "event cancelled");

        self.spawn_reminder_cancellation(event_id);
        self.spawn_cancellation_notice(event_id, stored.title.clone());
        Ok(stored)
    }

    fn spawn_reminder_cancellation(&self, event_id: EventId) {
        let reminders = self.reminders.clone();
        self.dispatcher
            .spawn(TaskKind::CancelReminders, event_id, async move {
                reminders.cancel_for_event(event_id).await.map(|_| ())
            });
    }

    fn spawn_cancellation_notice(&self, event_id: EventId, title: String) {
        let notifier = self.notifier.clone();
        self.dispatcher
            .spawn(TaskKind::NotifyCancellation, event_id, async move {
                notifier
                    .notify_cancellation(event_id, &title)
                    .await
                    .map_err(notification_error)
            });
    }

    /// Tombstone an event. A recurrence parent takes all of its children
    /// with it; a single instance goes alone.
    pub async fn delete(&self, actor: UserId, event_id: EventId) -> Result<(), CoreError> {
        let mut event = require_event(self.store.as_ref(), event_id).await?;
        self.gate
            .authorize(&event, actor, Capability::HostOrAdmin)
            .await?;
        self.ensure_group_for(&event, actor).await?;

        let was_cancelled = event.status == EventStatus::Cancelled;
        event.status = EventStatus::Deleted;
        event.updated_at = self.clock.now();
        self.store.update_event(&event).await?;
        tracing::info!(%event_id, user_id = actor, "event deleted");

        if !event.is_instance() && event.is_recurring {
            let expander = self.expander.clone();
            let reminders = self.reminders.clone();
            self.dispatcher
                .spawn(TaskKind::CascadeDelete, event_id, async move {
                    let mut summary = expander.remove_instances(event_id).await?;
                    for child_id in &summary.succeeded {
                        if let Err(e) = reminders.cancel_for_event(*child_id).await {
                            tracing::warn!(
                                %event_id,
                                instance_id = %child_id,
                                "failed to cancel instance reminders: {e}"
                            );
                            summary.failed += 1;
                        }
                    }
                    summary.into_result().map(|_| ())
                });
        }

        self.spawn_reminder_cancellation(event_id);
        if !was_cancelled {
            self.spawn_cancellation_notice(event_id, event.title);
        }
        Ok(())
    }

    pub async fn get(&self, actor: UserId, event_id: EventId) -> Result<Event, CoreError> {
        let event = require_event(self.store.as_ref(), event_id).await?;
        self.gate
            .ensure_visible(self.store.as_ref(), &event, actor)
            .await?;
        Ok(event)
    }

    /// Live children of a recurrence parent, by start time.
    pub async fn list_instances(
        &self,
        actor: UserId,
        event_id: EventId,
        page: PageRequest,
    ) -> Result<Page<Event>, CoreError> {
        let parent = self.get(actor, event_id).await?;
        let mut children: Vec<Event> = self
            .store
            .list_instances(parent.id)
            .await?
            .into_iter()
            .filter(|child| !child.is_deleted())
            .collect();
        children.sort_by_key(|child| (child.starts_at, child.id));
        Ok(Page::from_sorted(
            children,
            page.clamped(self.config.pagination.max_limit),
        ))
    }

    pub async fn add_cohost(
        &self,
        actor: UserId,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<Event, CoreError> {
        let mut event = require_event(self.store.as_ref(), event_id).await?;
        self.gate.authorize(&event, actor, Capability::Host).await?;
        if user_id == event.host_id {
            return Err(CoreError::BadRequest(
                "The host cannot also be a co-host".into(),
            ));
        }
        if !event.co_host_ids.insert(user_id) {
            return Ok(event);
        }
        event.updated_at = self.clock.now();
        let stored = self.store.update_event(&event).await?;
        tracing::info!(%event_id, user_id, added_by = actor, "co-host added");
        Ok(stored)
    }

    pub async fn remove_cohost(
        &self,
        actor: UserId,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<Event, CoreError> {
        let mut event = require_event(self.store.as_ref(), event_id).await?;
        self.gate.authorize(&event, actor, Capability::Host).await?;
        if !event.co_host_ids.remove(&user_id) {
            return Ok(event);
        }
        event.updated_at = self.clock.now();
        let stored = self.store.update_event(&event).await?;
        tracing::info!(%event_id, user_id, removed_by = actor, "co-host removed");
        Ok(stored)
    }

    /// Materialize a parent's instances up to `horizon` now, returning the
    /// newly created ones.
    pub async fn expand(
        &self,
        actor: UserId,
        event_id: EventId,
        horizon: DateTime<Utc>,
    ) -> Result<Vec<Event>, CoreError> {
        let parent = require_event(self.store.as_ref(), event_id).await?;
        self.gate
            .authorize(&parent, actor, Capability::HostCohostOrAdmin)
            .await?;
        if !parent.is_recurrence_parent() {
            return Err(CoreError::BadRequest(
                "Event is not a recurrence parent".into(),
            ));
        }
        if horizon < parent.starts_at {
            return Err(CoreError::InvalidTimeWindow(
                "horizon precedes the event start".into(),
            ));
        }
        let expansion = self.expander.expand(event_id, horizon).await?;
        if expansion.failed > 0 {
            return Err(CoreError::CascadeFailure {
                attempted: expansion.created.len() + expansion.failed,
                failed: expansion.failed,
            });
        }
        Ok(expansion.created)
    }
}
