use async_trait::async_trait;
use chrono::{DateTime, Utc};
use convene_models::{
    Attendee, AttendeeFilter, Event, EventId, Page, PageRequest, Reminder, ReminderId,
    RsvpCounters, UserId,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{EntityStore, StoreError};

/// Reference entity store kept entirely in memory.
///
/// Each map shard is locked for the duration of a single write, which gives
/// the per-record atomicity the engine relies on: versioned event writes and
/// one attendee record per `(event, user)`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    events: DashMap<EventId, Event>,
    attendees: DashMap<(EventId, UserId), Attendee>,
    reminders: DashMap<ReminderId, Reminder>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn attendee_count(&self, event_id: EventId) -> usize {
        self.attendees
            .iter()
            .filter(|entry| entry.key().0 == event_id)
            .count()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn insert_event(&self, event: &Event) -> Result<(), StoreError> {
        match self.events.entry(event.id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(format!("event {}", event.id))),
            Entry::Vacant(slot) => {
                slot.insert(event.clone());
                Ok(())
            }
        }
    }

    async fn get_event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        Ok(self.events.get(&id).map(|entry| entry.value().clone()))
    }

    async fn update_event(&self, event: &Event) -> Result<Event, StoreError> {
        let mut stored = self.events.get_mut(&event.id).ok_or(StoreError::NotFound)?;
        if stored.version != event.version {
            return Err(StoreError::VersionMismatch {
                expected: event.version,
                found: stored.version,
            });
        }
        let mut next = event.clone();
        next.version = stored.version + 1;
        // counters are owned by update_counters
        next.counters = stored.counters;
        *stored = next.clone();
        Ok(next)
    }

    async fn list_instances(&self, parent_id: EventId) -> Result<Vec<Event>, StoreError> {
        let mut children: Vec<Event> = self
            .events
            .iter()
            .filter(|entry| entry.parent_event_id == Some(parent_id))
            .map(|entry| entry.value().clone())
            .collect();
        children.sort_by_key(|child| (child.recurrence_anchor, child.starts_at));
        Ok(children)
    }

    async fn update_counters(
        &self,
        id: EventId,
        counters: RsvpCounters,
    ) -> Result<(), StoreError> {
        let mut stored = self.events.get_mut(&id).ok_or(StoreError::NotFound)?;
        stored.counters = counters;
        Ok(())
    }

    async fn get_attendee(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<Option<Attendee>, StoreError> {
        Ok(self
            .attendees
            .get(&(event_id, user_id))
            .map(|entry| entry.value().clone()))
    }

    async fn upsert_attendee(&self, attendee: &Attendee) -> Result<Attendee, StoreError> {
        let key = (attendee.event_id, attendee.user_id);
        let stored = match self.attendees.entry(key) {
            Entry::Occupied(mut slot) => {
                let created_at = slot.get().created_at;
                let mut next = attendee.clone();
                next.created_at = created_at;
                slot.insert(next.clone());
                next
            }
            Entry::Vacant(slot) => {
                slot.insert(attendee.clone());
                attendee.clone()
            }
        };
        Ok(stored)
    }

    async fn remove_attendee(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<bool, StoreError> {
        Ok(self.attendees.remove(&(event_id, user_id)).is_some())
    }

    async fn list_attendees(
        &self,
        event_id: EventId,
        filter: AttendeeFilter,
        page: PageRequest,
    ) -> Result<Page<Attendee>, StoreError> {
        let mut rows: Vec<Attendee> = self
            .attendees
            .iter()
            .filter(|entry| entry.key().0 == event_id && filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by_key(|row| (row.created_at, row.user_id));
        Ok(Page::from_sorted(rows, page))
    }

    async fn tally_rsvps(&self, event_id: EventId) -> Result<RsvpCounters, StoreError> {
        let rows: Vec<Attendee> = self
            .attendees
            .iter()
            .filter(|entry| entry.key().0 == event_id)
            .map(|entry| entry.value().clone())
            .collect();
        Ok(RsvpCounters::tally(&rows))
    }

    async fn insert_reminder(&self, reminder: &Reminder) -> Result<(), StoreError> {
        match self.reminders.entry(reminder.id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(format!("reminder {}", reminder.id))),
            Entry::Vacant(slot) => {
                slot.insert(reminder.clone());
                Ok(())
            }
        }
    }

    async fn get_reminder(&self, id: ReminderId) -> Result<Option<Reminder>, StoreError> {
        Ok(self.reminders.get(&id).map(|entry| entry.value().clone()))
    }

    async fn update_reminder(&self, reminder: &Reminder) -> Result<(), StoreError> {
        let mut stored = self
            .reminders
            .get_mut(&reminder.id)
            .ok_or(StoreError::NotFound)?;
        *stored = reminder.clone();
        Ok(())
    }

    async fn delete_reminder(&self, id: ReminderId) -> Result<bool, StoreError> {
        Ok(self.reminders.remove(&id).is_some())
    }

    async fn list_reminders(
        &self,
        event_id: EventId,
        user_id: UserId,
        page: PageRequest,
    ) -> Result<Page<Reminder>, StoreError> {
        let mut rows: Vec<Reminder> = self
            .reminders
            .iter()
            .filter(|entry| entry.event_id == event_id && entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by_key(|row| (row.trigger_at, row.id));
        Ok(Page::from_sorted(rows, page))
    }

    async fn list_event_reminders(&self, event_id: EventId) -> Result<Vec<Reminder>, StoreError> {
        let mut rows: Vec<Reminder> = self
            .reminders
            .iter()
            .filter(|entry| entry.event_id == event_id)
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by_key(|row| (row.trigger_at, row.id));
        Ok(rows)
    }

    async fn due_reminders(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reminder>, StoreError> {
        let mut rows: Vec<Reminder> = self
            .reminders
            .iter()
            .filter(|entry| entry.is_due(now))
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by_key(|row| (row.trigger_at, row.id));
        rows.truncate(limit);
        Ok(rows)
    }
}
