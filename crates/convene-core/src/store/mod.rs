pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use convene_models::{
    Attendee, AttendeeFilter, Event, EventId, Page, PageRequest, Reminder, ReminderId,
    RsvpCounters, UserId,
};
use thiserror::Error;

use crate::error::CoreError;

pub use memory::MemoryStore;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u64, found: u64 },
    #[error("duplicate key: {0}")]
    Duplicate(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Backend(_) | StoreError::VersionMismatch { .. }
        )
    }
}

/// Durable storage for events, attendees and reminders.
///
/// `update_event` is versioned: it succeeds only when the stored version equals
/// `event.version` and bumps it. `tally_rsvps` must read every attendee write
/// that completed before it was called.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn insert_event(&self, event: &Event) -> Result<(), StoreError>;

    async fn get_event(&self, id: EventId) -> Result<Option<Event>, StoreError>;

    /// Returns the stored copy with its new version.
    async fn update_event(&self, event: &Event) -> Result<Event, StoreError>;

    /// Every child of `parent_id`, tombstones included, ordered by anchor.
    async fn list_instances(&self, parent_id: EventId) -> Result<Vec<Event>, StoreError>;

    /// Unversioned write of the aggregate counters.
    async fn update_counters(&self, id: EventId, counters: RsvpCounters)
        -> Result<(), StoreError>;

    async fn get_attendee(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<Option<Attendee>, StoreError>;

    /// Insert or replace the single record for `(event_id, user_id)`.
    async fn upsert_attendee(&self, attendee: &Attendee) -> Result<Attendee, StoreError>;

    async fn remove_attendee(&self, event_id: EventId, user_id: UserId)
        -> Result<bool, StoreError>;

    async fn list_attendees(
        &self,
        event_id: EventId,
        filter: AttendeeFilter,
        page: PageRequest,
    ) -> Result<Page<Attendee>, StoreError>;

    async fn tally_rsvps(&self, event_id: EventId) -> Result<RsvpCounters, StoreError>;

    async fn insert_reminder(&self, reminder: &Reminder) -> Result<(), StoreError>;

    async fn get_reminder(&self, id: ReminderId) -> Result<Option<Reminder>, StoreError>;

    async fn update_reminder(&self, reminder: &Reminder) -> Result<(), StoreError>;

    async fn delete_reminder(&self, id: ReminderId) -> Result<bool, StoreError>;

    /// A user's reminders for one event, ordered by trigger time.
    async fn list_reminders(
        &self,
        event_id: EventId,
        user_id: UserId,
        page: PageRequest,
    ) -> Result<Page<Reminder>, StoreError>;

    async fn list_event_reminders(&self, event_id: EventId) -> Result<Vec<Reminder>, StoreError>;

    /// Pending reminders with `trigger_at <= now`, oldest first.
    async fn due_reminders(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reminder>, StoreError>;
}

/// Load an event the engine may act on. Tombstones read as absent.
pub async fn require_event(store: &dyn EntityStore, id: EventId) -> Result<Event, CoreError> {
    match store.get_event(id).await? {
        Some(event) if !event.is_deleted() => Ok(event),
        _ => Err(CoreError::NotFound),
    }
}

/// Read-modify-write for cascade work, re-reading once on a version clash.
pub async fn modify_event<F>(
    store: &dyn EntityStore,
    id: EventId,
    mut apply: F,
) -> Result<Event, CoreError>
where
    F: FnMut(&mut Event) -> Result<(), CoreError> + Send,
{
    for attempt in 0..2 {
        let mut event = require_event(store, id).await?;
        apply(&mut event)?;
        match store.update_event(&event).await {
            Ok(stored) => return Ok(stored),
            Err(StoreError::VersionMismatch { .. }) if attempt == 0 => {
                tracing::debug!(event_id = %id, "version clash, retrying cascade write");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(CoreError::ConcurrencyConflict)
}
