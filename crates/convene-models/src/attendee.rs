use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EventId, UserId};

/// A value a user can submit through an RSVP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsvpValue {
    Going,
    Interested,
    NotGoing,
}

/// Stored attendance state. `NoReply` only ever comes from an invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsvpStatus {
    Going,
    Interested,
    NotGoing,
    NoReply,
}

impl From<RsvpValue> for RsvpStatus {
    fn from(value: RsvpValue) -> Self {
        match value {
            RsvpValue::Going => RsvpStatus::Going,
            RsvpValue::Interested => RsvpStatus::Interested,
            RsvpValue::NotGoing => RsvpStatus::NotGoing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub event_id: EventId,
    pub user_id: UserId,
    pub status: RsvpStatus,
    pub guest_count: u32,
    pub note: Option<String>,
    /// Marked when an `interested` RSVP arrived while the event was full.
    pub waitlisted: bool,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Attendee {
    pub fn invited(event_id: EventId, user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            event_id,
            user_id,
            status: RsvpStatus::NoReply,
            guest_count: 0,
            note: None,
            waitlisted: false,
            checked_in_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_going(&self) -> bool {
        self.status == RsvpStatus::Going
    }
}

/// Aggregate RSVP counts kept on the event. Always recomputed from the full
/// attendee set, never adjusted incrementally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsvpCounters {
    pub going: u32,
    pub interested: u32,
    pub not_going: u32,
    pub no_reply: u32,
    pub waitlist: u32,
}

impl RsvpCounters {
    pub fn tally<'a>(attendees: impl IntoIterator<Item = &'a Attendee>) -> Self {
        let mut counters = Self::default();
        for attendee in attendees {
            match attendee.status {
                RsvpStatus::Going => counters.going += 1,
                RsvpStatus::Interested => {
                    counters.interested += 1;
                    if attendee.waitlisted {
                        counters.waitlist += 1;
                    }
                }
                RsvpStatus::NotGoing => counters.not_going += 1,
                RsvpStatus::NoReply => counters.no_reply += 1,
            }
        }
        counters
    }
}

/// Optional filter for attendee listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendeeFilter {
    pub status: Option<RsvpStatus>,
    #[serde(default)]
    pub waitlisted_only: bool,
}

impl AttendeeFilter {
    pub fn status(status: RsvpStatus) -> Self {
        Self {
            status: Some(status),
            waitlisted_only: false,
        }
    }

    pub fn matches(&self, attendee: &Attendee) -> bool {
        if let Some(status) = self.status {
            if attendee.status != status {
                return false;
            }
        }
        !self.waitlisted_only || attendee.waitlisted
    }
}
