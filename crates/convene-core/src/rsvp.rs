use chrono::Duration;
use convene_models::{
    Attendee, AttendeeFilter, Event, EventId, EventStatus, Page, PageRequest, Privacy,
    RsvpCounters, RsvpStatus, RsvpValue, UserId,
};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::permissions::{Capability, PermissionGate};
use crate::store::{require_event, EntityStore};
use crate::validation::validate_note;

/// Attendance state and capacity enforcement.
pub struct RsvpEngine {
    store: Arc<dyn EntityStore>,
    gate: Arc<PermissionGate>,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
}

fn ensure_open(event: &Event) -> Result<(), CoreError> {
    if event.status == EventStatus::Cancelled {
        return Err(CoreError::Conflict("Event is cancelled".into()));
    }
    Ok(())
}

impl RsvpEngine {
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

    pub async fn rsvp(
        &self,
        actor: UserId,
        event_id: EventId,
        value: RsvpValue,
        guest_count: u32,
        note: Option<String>,
    ) -> Result<Attendee, CoreError> {
        let limits = &self.config.limits;
        if guest_count > limits.max_guest_count {
            return Err(CoreError::BadRequest(format!(
                "guest_count must be at most {}",
                limits.max_guest_count
            )));
        }
        if let Some(note) = &note {
            validate_note(note, limits)?;
        }

        let event = require_event(self.store.as_ref(), event_id).await?;
        ensure_open(&event)?;
        let now = self.clock.now();
        if event.has_ended(now) {
            return Err(CoreError::EventEnded);
        }

        let existing = self.store.get_attendee(event_id, actor).await?;
        if existing.is_none() {
            match event.privacy {
                Privacy::Public => {}
                Privacy::Private => {
                    self.gate
                        .ensure_visible(self.store.as_ref(), &event, actor)
                        .await?;
                }
                Privacy::InviteOnly => {
                    self.gate
                        .authorize(&event, actor, Capability::HostOrCohost)
                        .await?;
                }
            }
        }

        let already_going = existing.as_ref().is_some_and(Attendee::is_going);
        let mut waitlisted = false;
        if event.has_capacity_limit() && !already_going {
            let at_capacity = match value {
                RsvpValue::Going | RsvpValue::Interested => {
                    self.store.tally_rsvps(event_id).await?.going >= event.max_attendees
                }
                RsvpValue::NotGoing => false,
            };
            match value {
                RsvpValue::Going if at_capacity => {
                    tracing::debug!(%event_id, user_id = actor, "rsvp rejected at capacity");
                    return Err(CoreError::CapacityExceeded);
                }
                RsvpValue::Interested => waitlisted = at_capacity,
                _ => {}
            }
        }

        let status = RsvpStatus::from(value);
        let mut attendee = existing.unwrap_or_else(|| Attendee::invited(event_id, actor, now));
        if status != RsvpStatus::Going {
            attendee.checked_in_at = None;
        }
        attendee.status = status;
        attendee.guest_count = guest_count;
        attendee.note = note;
        attendee.waitlisted = waitlisted;
        attendee.updated_at = now;
        let stored = self.store.upsert_attendee(&attendee).await?;

        tracing::info!(
            %event_id,
            user_id = actor,
            status = ?stored.status,
            waitlisted = stored.waitlisted,
            "rsvp recorded"
        );
        self.refresh_counters(event_id).await?;
        Ok(stored)
    }

    /// Recompute the event's counters from every attendee record.
    pub async fn recompute(&self, event_id: EventId) -> Result<RsvpCounters, CoreError> {
        let counters = self.store.tally_rsvps(event_id).await?;
        self.store.update_counters(event_id, counters).await?;
        Ok(counters)
    }

    /// Like [`recompute`](Self::recompute), for callers whose primary write
    /// already succeeded.
    async fn refresh_counters(&self, event_id: EventId) -> Result<RsvpCounters, CoreError> {
        self.recompute(event_id).await.map_err(|err| {
            tracing::warn!(%event_id, "failed to refresh rsvp counters: {err}");
            CoreError::CountersStale(err.to_string())
        })
    }

    pub async fn get_attendees(
        &self,
        actor: UserId,
        event_id: EventId,
        filter: AttendeeFilter,
        page: PageRequest,
    ) -> Result<Page<Attendee>, CoreError> {
        let event = require_event(self.store.as_ref(), event_id).await?;
        self.gate
            .ensure_visible(self.store.as_ref(), &event, actor)
            .await?;
        let page = page.clamped(self.config.pagination.max_limit);
        Ok(self.store.list_attendees(event_id, filter, page).await?)
    }

    /// Create `no_reply` records for users who have none yet. Returns the new
    /// records; users already holding one are left untouched.
    pub async fn invite(
        &self,
        actor: UserId,
        event_id: EventId,
        user_ids: &[UserId],
    ) -> Result<Vec<Attendee>, CoreError> {
        let max = self.config.limits.max_invites_per_request;
        if user_ids.is_empty() || user_ids.len() > max {
            return Err(CoreError::BadRequest(format!(
                "Invite between 1 and {max} users per request"
            )));
        }

        let event = require_event(self.store.as_ref(), event_id).await?;
        ensure_open(&event)?;
        let now = self.clock.now();
        if event.has_ended(now) {
            return Err(CoreError::EventEnded);
        }
        self.gate
            .authorize(&event, actor, Capability::HostOrCohost)
            .await?;

        let mut invited = Vec::new();
        for user_id in user_ids.iter().copied().collect::<BTreeSet<_>>() {
            if self.store.get_attendee(event_id, user_id).await?.is_some() {
                continue;
            }
            let record = Attendee::invited(event_id, user_id, now);
            invited.push(self.store.upsert_attendee(&record).await?);
        }

        tracing::info!(%event_id, user_id = actor, invited = invited.len(), "attendees invited");
        if !invited.is_empty() {
            self.refresh_counters(event_id).await?;
        }
        Ok(invited)
    }

    pub async fn remove_attendee(
        &self,
        actor: UserId,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<(), CoreError> {
        let event = require_event(self.store.as_ref(), event_id).await?;
        if actor != user_id {
            self.gate
                .authorize(&event, actor, Capability::ModeratorOrAbove)
                .await?;
        }
        if !self.store.remove_attendee(event_id, user_id).await? {
            return Err(CoreError::NotFound);
        }
        tracing::info!(%event_id, user_id, removed_by = actor, "attendee removed");
        self.refresh_counters(event_id).await?;
        Ok(())
    }

    pub async fn check_in(
        &self,
        actor: UserId,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<Attendee, CoreError> {
        let event = require_event(self.store.as_ref(), event_id).await?;
        ensure_open(&event)?;
        self.gate
            .authorize(&event, actor, Capability::HostCohostOrAdmin)
            .await?;

        let mut attendee = self
            .store
            .get_attendee(event_id, user_id)
            .await?
            .ok_or(CoreError::NotFound)?;
        if !attendee.is_going() {
            return Err(CoreError::BadRequest(
                "Only attendees who are going can check in".into(),
            ));
        }
        if attendee.checked_in_at.is_some() {
            return Ok(attendee);
        }

        let now = self.clock.now();
        let opens_at =
            event.starts_at - Duration::minutes(self.config.attendance.check_in_opens_minutes);
        if now < opens_at {
            return Err(CoreError::BadRequest("Check-in is not open yet".into()));
        }
        if event.has_ended(now) {
            return Err(CoreError::EventEnded);
        }

        attendee.checked_in_at = Some(now);
        attendee.updated_at = now;
        let stored = self.store.upsert_attendee(&attendee).await?;
        tracing::info!(%event_id, user_id, checked_in_by = actor, "attendee checked in");
        Ok(stored)
    }
}
