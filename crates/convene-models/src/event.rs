use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::attendee::RsvpCounters;
use crate::{EventId, GroupId, UserId};

pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Persisted lifecycle status. `Active` is never written by the engine; it is
/// derived from the time window via [`Event::effective_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Scheduled,
    Active,
    Cancelled,
    Deleted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privacy {
    #[default]
    Public,
    Private,
    InviteOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub venue: Option<String>,
    pub online_url: Option<String>,
}

impl Location {
    pub fn venue(venue: impl Into<String>) -> Self {
        Self {
            venue: Some(venue.into()),
            online_url: None,
        }
    }

    pub fn online(url: impl Into<String>) -> Self {
        Self {
            venue: None,
            online_url: Some(url.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.venue.is_none() && self.online_url.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub host_id: UserId,
    pub group_id: Option<GroupId>,
    /// Set only on a materialized recurrence instance.
    pub parent_event_id: Option<EventId>,
    pub co_host_ids: BTreeSet<UserId>,
    pub title: String,
    pub description: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// IANA zone the event is scheduled in, e.g. `Europe/Berlin`.
    pub timezone: String,
    pub location: Location,
    pub privacy: Privacy,
    /// 0 means unlimited.
    pub max_attendees: u32,
    pub is_recurring: bool,
    pub recurrence_rule: Option<String>,
    /// Occurrence start generated by the parent's rule. Identifies the period an
    /// instance covers even after its own start has been moved.
    pub recurrence_anchor: Option<DateTime<Utc>>,
    pub status: EventStatus,
    pub cancel_reason: Option<String>,
    pub counters: RsvpCounters,
    /// Bumped by the store on every versioned write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn is_instance(&self) -> bool {
        self.parent_event_id.is_some()
    }

    pub fn is_recurrence_parent(&self) -> bool {
        self.parent_event_id.is_none() && self.is_recurring && self.recurrence_rule.is_some()
    }

    pub fn is_cohost(&self, user_id: UserId) -> bool {
        self.co_host_ids.contains(&user_id)
    }

    pub fn has_capacity_limit(&self) -> bool {
        self.max_attendees > 0
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now > self.ends_at
    }

    pub fn is_deleted(&self) -> bool {
        self.status == EventStatus::Deleted
    }

    /// Scheduled or active, i.e. neither cancelled nor deleted.
    pub fn is_live(&self) -> bool {
        matches!(self.status, EventStatus::Scheduled | EventStatus::Active)
    }

    pub fn effective_status(&self, now: DateTime<Utc>) -> EventStatus {
        match self.status {
            EventStatus::Scheduled if self.starts_at <= now && now < self.ends_at => {
                EventStatus::Active
            }
            other => other,
        }
    }
}

/// Everything a caller supplies to create an event. The host is the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub title: String,
    pub description: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub privacy: Privacy,
    #[serde(default)]
    pub max_attendees: u32,
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub co_host_ids: BTreeSet<UserId>,
    #[serde(default)]
    pub is_recurring: bool,
    pub recurrence_rule: Option<String>,
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

impl NewEvent {
    pub fn new(title: impl Into<String>, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            description: None,
            starts_at,
            ends_at,
            timezone: default_timezone(),
            location: Location::default(),
            privacy: Privacy::default(),
            max_attendees: 0,
            group_id: None,
            co_host_ids: BTreeSet::new(),
            is_recurring: false,
            recurrence_rule: None,
        }
    }

    pub fn recurring(mut self, rule: impl Into<String>) -> Self {
        self.is_recurring = true;
        self.recurrence_rule = Some(rule.into());
        self
    }

    pub fn with_capacity(mut self, max_attendees: u32) -> Self {
        self.max_attendees = max_attendees;
        self
    }

    pub fn in_group(mut self, group_id: GroupId) -> Self {
        self.group_id = Some(group_id);
        self
    }

    pub fn with_privacy(mut self, privacy: Privacy) -> Self {
        self.privacy = privacy;
        self
    }
}

/// Partial update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub timezone: Option<String>,
    pub location: Option<Location>,
    pub privacy: Option<Privacy>,
    pub max_attendees: Option<u32>,
    pub co_host_ids: Option<BTreeSet<UserId>>,
    pub is_recurring: Option<bool>,
    pub recurrence_rule: Option<String>,
}

impl EventChanges {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn touches_schedule(&self) -> bool {
        self.starts_at.is_some() || self.ends_at.is_some() || self.timezone.is_some()
    }

    pub fn touches_recurrence(&self) -> bool {
        self.is_recurring.is_some() || self.recurrence_rule.is_some()
    }
}
