pub mod attendee;
pub mod event;
pub mod page;
pub mod reminder;

pub use attendee::{Attendee, AttendeeFilter, RsvpCounters, RsvpStatus, RsvpValue};
pub use event::{Event, EventChanges, EventStatus, Location, NewEvent, Privacy};
pub use page::{Page, PageRequest};
pub use reminder::{Reminder, ReminderChannel, ReminderStatus};

pub type EventId = uuid::Uuid;
pub type ReminderId = uuid::Uuid;
/// Identities come from the external auth layer.
pub type UserId = i64;
pub type GroupId = i64;
