//! Fakes shared by the unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use convene_models::event::DEFAULT_TIMEZONE;
use convene_models::{
    Attendee, AttendeeFilter, Event, EventId, EventStatus, GroupId, Location, Page, PageRequest,
    Privacy, Reminder, ReminderId, RsvpCounters, UserId,
};
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::clock::FixedClock;
use crate::config::EngineConfig;
use crate::ports::{GroupOracle, Notifier, RoleOracle};
use crate::store::{EntityStore, MemoryStore, StoreError};
use crate::{Engine, EngineDeps};

/// Plain public event starting at `starts_at`, two hours long.
pub fn sample_event(host_id: UserId, starts_at: DateTime<Utc>) -> Event {
    let created_at = starts_at - Duration::days(30);
    Event {
        id: Uuid::new_v4(),
        host_id,
        group_id: None,
        parent_event_id: None,
        co_host_ids: BTreeSet::new(),
        title: "Community meetup".into(),
        description: None,
        starts_at,
        ends_at: starts_at + Duration::hours(2),
        timezone: DEFAULT_TIMEZONE.into(),
        location: Location::default(),
        privacy: Privacy::Public,
        max_attendees: 0,
        is_recurring: false,
        recurrence_rule: None,
        recurrence_anchor: None,
        status: EventStatus::Scheduled,
        cancel_reason: None,
        counters: RsvpCounters::default(),
        version: 0,
        created_at,
        updated_at: created_at,
    }
}

pub fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

#[derive(Default)]
pub struct StaticRoles {
    admins: HashSet<UserId>,
    moderators: HashSet<UserId>,
    failing: bool,
    admin_calls: AtomicUsize,
}

impl StaticRoles {
    pub fn with_admin(mut self, user_id: UserId) -> Self {
        self.admins.insert(user_id);
        self
    }

    pub fn with_moderator(mut self, user_id: UserId) -> Self {
        self.moderators.insert(user_id);
        self
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn admin_calls(&self) -> usize {
        self.admin_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoleOracle for StaticRoles {
    async fn is_admin(&self, user_id: UserId) -> Result<bool> {
        self.admin_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(anyhow!("role service unavailable"));
        }
        Ok(self.admins.contains(&user_id))
    }

    async fn is_moderator(&self, user_id: UserId) -> Result<bool> {
        if self.failing {
            return Err(anyhow!("role service unavailable"));
        }
        Ok(self.moderators.contains(&user_id))
    }
}

#[derive(Default)]
pub struct StaticGroups {
    members: HashSet<(GroupId, UserId)>,
}

impl StaticGroups {
    pub fn with_member(mut self, group_id: GroupId, user_id: UserId) -> Self {
        self.members.insert((group_id, user_id));
        self
    }
}

#[async_trait]
impl GroupOracle for StaticGroups {
    async fn can_act_on_group_events(&self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        Ok(self.members.contains(&(group_id, user_id)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Cancellation(EventId),
    Followers(UserId, EventId),
    Update(EventId),
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, notification: Notification) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("push gateway unavailable"));
        }
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_cancellation(&self, event_id: EventId, _title: &str) -> Result<()> {
        self.record(Notification::Cancellation(event_id))
    }

    async fn notify_followers(
        &self,
        host_id: UserId,
        event_id: EventId,
        _title: &str,
    ) -> Result<()> {
        self.record(Notification::Followers(host_id, event_id))
    }

    async fn notify_update(&self, event_id: EventId, _title: &str) -> Result<()> {
        self.record(Notification::Update(event_id))
    }
}

/// [`MemoryStore`] wrapper that fails selected writes.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing_updates: Mutex<HashSet<EventId>>,
    fail_counters: AtomicBool,
}

impl FlakyStore {
    pub fn fail_updates_for(&self, id: EventId) {
        self.failing_updates.lock().unwrap().insert(id);
    }

    pub fn set_fail_counters(&self, failing: bool) {
        self.fail_counters.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EntityStore for FlakyStore {
    async fn insert_event(&self, event: &Event) -> Result<(), StoreError> {
        self.inner.insert_event(event).await
    }

    async fn get_event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        self.inner.get_event(id).await
    }

    async fn update_event(&self, event: &Event) -> Result<Event, StoreError> {
        if self.failing_updates.lock().unwrap().contains(&event.id) {
            return Err(StoreError::Backend("injected write failure".into()));
        }
        self.inner.update_event(event).await
    }

    async fn list_instances(&self, parent_id: EventId) -> Result<Vec<Event>, StoreError> {
        self.inner.list_instances(parent_id).await
    }

    async fn update_counters(&self, id: EventId, counters: RsvpCounters) -> Result<(), StoreError> {
        if self.fail_counters.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected counter failure".into()));
        }
        self.inner.update_counters(id, counters).await
    }

    async fn get_attendee(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<Option<Attendee>, StoreError> {
        self.inner.get_attendee(event_id, user_id).await
    }

    async fn upsert_attendee(&self, attendee: &Attendee) -> Result<Attendee, StoreError> {
        self.inner.upsert_attendee(attendee).await
    }

    async fn remove_attendee(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<bool, StoreError> {
        self.inner.remove_attendee(event_id, user_id).await
    }

    async fn list_attendees(
        &self,
        event_id: EventId,
        filter: AttendeeFilter,
        page: PageRequest,
    ) -> Result<Page<Attendee>, StoreError> {
        self.inner.list_attendees(event_id, filter, page).await
    }

    async fn tally_rsvps(&self, event_id: EventId) -> Result<RsvpCounters, StoreError> {
        self.inner.tally_rsvps(event_id).await
    }

    async fn insert_reminder(&self, reminder: &Reminder) -> Result<(), StoreError> {
        self.inner.insert_reminder(reminder).await
    }

    async fn get_reminder(&self, id: ReminderId) -> Result<Option<Reminder>, StoreError> {
        self.inner.get_reminder(id).await
    }

    async fn update_reminder(&self, reminder: &Reminder) -> Result<(), StoreError> {
        self.inner.update_reminder(reminder).await
    }

    async fn delete_reminder(&self, id: ReminderId) -> Result<bool, StoreError> {
        self.inner.delete_reminder(id).await
    }

    async fn list_reminders(
        &self,
        event_id: EventId,
        user_id: UserId,
        page: PageRequest,
    ) -> Result<Page<Reminder>, StoreError> {
        self.inner.list_reminders(event_id, user_id, page).await
    }

    async fn list_event_reminders(&self, event_id: EventId) -> Result<Vec<Reminder>, StoreError> {
        self.inner.list_event_reminders(event_id).await
    }

    async fn due_reminders(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reminder>, StoreError> {
        self.inner.due_reminders(now, limit).await
    }
}

/// A fully wired engine over fakes, clock fixed at 2023-12-01T00:00Z.
pub struct Harness {
    pub engine: Engine,
    pub store: Arc<FlakyStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<FixedClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_oracles(StaticRoles::default(), StaticGroups::default())
    }

    pub fn with_oracles(roles: StaticRoles, groups: StaticGroups) -> Self {
        let store = Arc::new(FlakyStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(FixedClock::new(utc(2023, 12, 1, 0)));
        let deps = EngineDeps {
            store: store.clone(),
            roles: Arc::new(roles),
            groups: Arc::new(groups),
            notifier: notifier.clone(),
            clock: clock.clone(),
        };
        Self {
            engine: Engine::new(deps, EngineConfig::default()),
            store,
            notifier,
            clock,
        }
    }
}
