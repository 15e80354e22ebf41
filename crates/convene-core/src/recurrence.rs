//! Recurrence rule handling and instance materialization.
//!
//! A recurring parent keeps its rule; each occurrence after the parent's own
//! start becomes a child event keyed by its anchor (the occurrence start the
//! rule produced). Anchors make expansion idempotent and let updates find the
//! child for a period without regenerating identities. Deleted children stay
//! as tombstones so their period is never materialized again.

use chrono::{DateTime, Duration, Utc};
use convene_models::{Event, EventChanges, EventId, EventStatus, RsvpCounters};
use dashmap::DashMap;
use rrule::RRuleSet;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::RecurrenceConfig;
use crate::error::CoreError;
use crate::store::{modify_event, require_event, EntityStore};
use crate::validation::parse_timezone;

/// Accepts an RRULE body (`FREQ=WEEKLY;BYDAY=MO`, optionally prefixed with
/// `RRULE:`) or one of the shorthands `daily`, `weekly`, `monthly`, `yearly`.
pub fn normalize_rule(raw: &str) -> Result<String, CoreError> {
    let trimmed = raw.trim();
    let body = match trimmed.get(..6) {
        Some(prefix) if prefix.eq_ignore_ascii_case("RRULE:") => &trimmed[6..],
        _ => trimmed,
    };
    if body.is_empty() || body.contains(['\n', '\r']) {
        return Err(CoreError::BadRequest("Invalid recurrence rule".into()));
    }
    let normalized = match body.to_ascii_lowercase().as_str() {
        "daily" => "FREQ=DAILY".to_string(),
        "weekly" => "FREQ=WEEKLY".to_string(),
        "monthly" => "FREQ=MONTHLY".to_string(),
        "yearly" => "FREQ=YEARLY".to_string(),
        _ => body.to_ascii_uppercase(),
    };
    if !normalized.split(';').any(|part| part.starts_with("FREQ=")) {
        return Err(CoreError::BadRequest(
            "Recurrence rule must specify FREQ".into(),
        ));
    }
    Ok(normalized)
}

/// iCalendar text for the rrule parser. The start is written in the event's
/// own zone so the rule keeps wall-clock time across DST changes.
fn build_rrule_string(starts_at: DateTime<Utc>, tz: chrono_tz::Tz, rule: &str) -> String {
    let dtstart = if tz == chrono_tz::UTC {
        format!("DTSTART:{}", starts_at.format("%Y%m%dT%H%M%SZ"))
    } else {
        format!(
            "DTSTART;TZID={}:{}",
            tz.name(),
            starts_at.with_timezone(&tz).format("%Y%m%dT%H%M%S")
        )
    };
    format!("{dtstart}\nRRULE:{rule}")
}

fn parse_rule_set(
    starts_at: DateTime<Utc>,
    timezone: &str,
    rule: &str,
) -> Result<RRuleSet, CoreError> {
    let tz = parse_timezone(timezone)?;
    build_rrule_string(starts_at, tz, rule)
        .parse::<RRuleSet>()
        .map_err(|e| CoreError::BadRequest(format!("Invalid recurrence rule: {e}")))
}

/// Check that `rule` (already normalized) parses against this start and zone.
pub fn validate_rule(
    starts_at: DateTime<Utc>,
    timezone: &str,
    rule: &str,
) -> Result<(), CoreError> {
    parse_rule_set(starts_at, timezone, rule).map(|_| ())
}

/// Occurrence starts strictly after the parent's start and no later than
/// `horizon`, at most `limit` of them.
pub fn occurrences(
    parent: &Event,
    horizon: DateTime<Utc>,
    limit: u16,
) -> Result<Vec<DateTime<Utc>>, CoreError> {
    let Some(rule) = parent.recurrence_rule.as_deref() else {
        return Ok(Vec::new());
    };
    if horizon <= parent.starts_at {
        return Ok(Vec::new());
    }

    let rule_set = parse_rule_set(parent.starts_at, &parent.timezone, rule)?;
    let tz: rrule::Tz = Utc.into();
    let after = parent.starts_at.with_timezone(&tz);
    let before = shift(horizon, Duration::seconds(1))?.with_timezone(&tz);

    // one extra slot in case the parent's own start is returned
    let result = rule_set
        .after(after)
        .before(before)
        .all(limit.saturating_add(1));
    if result.limited {
        tracing::debug!(event_id = %parent.id, limit, "recurrence expansion hit instance limit");
    }

    Ok(result
        .dates
        .iter()
        .map(|occurrence| occurrence.with_timezone(&Utc))
        .filter(|occurrence| *occurrence > parent.starts_at && *occurrence <= horizon)
        .take(usize::from(limit))
        .collect())
}

/// `at` moved by `by`, or `InvalidTimeWindow` when that leaves the
/// representable range.
fn shift(at: DateTime<Utc>, by: Duration) -> Result<DateTime<Utc>, CoreError> {
    at.checked_add_signed(by)
        .ok_or_else(|| CoreError::InvalidTimeWindow("time is out of range".into()))
}

/// A fresh child for the period starting at `anchor`.
pub fn instance_from(
    parent: &Event,
    anchor: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Event, CoreError> {
    let duration = parent.ends_at - parent.starts_at;
    Ok(Event {
        id: Uuid::new_v4(),
        parent_event_id: Some(parent.id),
        starts_at: anchor,
        ends_at: shift(anchor, duration)?,
        is_recurring: false,
        recurrence_rule: None,
        recurrence_anchor: Some(anchor),
        status: EventStatus::Scheduled,
        cancel_reason: None,
        counters: RsvpCounters::default(),
        version: 0,
        created_at: now,
        updated_at: now,
        ..parent.clone()
    })
}

#[derive(Debug, Clone, Default)]
pub struct Expansion {
    pub created: Vec<Event>,
    /// Periods that already had a child, live or tombstoned.
    pub already_materialized: usize,
    pub failed: usize,
}

/// Result of applying a parent mutation to its children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeSummary {
    pub attempted: usize,
    pub succeeded: Vec<EventId>,
    pub failed: usize,
}

impl CascadeSummary {
    fn absorb(&mut self, expansion: &Expansion) {
        self.attempted += expansion.created.len() + expansion.failed;
        self.succeeded
            .extend(expansion.created.iter().map(|child| child.id));
        self.failed += expansion.failed;
    }

    pub fn into_result(self) -> Result<Self, CoreError> {
        if self.failed > 0 {
            return Err(CoreError::CascadeFailure {
                attempted: self.attempted,
                failed: self.failed,
            });
        }
        Ok(self)
    }
}

pub struct RecurrenceExpander {
    store: Arc<dyn EntityStore>,
    clock: Arc<dyn Clock>,
    config: RecurrenceConfig,
    locks: DashMap<EventId, Arc<Mutex<()>>>,
}

impl RecurrenceExpander {
    pub fn new(
        store: Arc<dyn EntityStore>,
        clock: Arc<dyn Clock>,
        config: RecurrenceConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            locks: DashMap::new(),
        }
    }

    /// Default materialization horizon for a parent, pinned just short of
    /// the latest representable time.
    pub fn default_horizon(&self, parent: &Event) -> DateTime<Utc> {
        let latest = DateTime::<Utc>::MAX_UTC - Duration::seconds(1);
        parent
            .ends_at
            .checked_add_signed(self.config.horizon())
            .map_or(latest, |horizon| horizon.min(latest))
    }

    fn lock_for(&self, parent_id: EventId) -> Arc<Mutex<()>> {
        self.locks
            .entry(parent_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release(&self, parent_id: EventId) {
        self.locks
            .remove_if(&parent_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Materialize every missing period up to `horizon`. Runs are serialized
    /// per parent, so concurrent triggers cannot double-materialize a period.
    pub async fn expand(
        &self,
        parent_id: EventId,
        horizon: DateTime<Utc>,
    ) -> Result<Expansion, CoreError> {
        let lock = self.lock_for(parent_id);
        let result = {
            let _guard = lock.lock().await;
            self.expand_locked(parent_id, horizon).await
        };
        drop(lock);
        self.release(parent_id);
        result
    }

    async fn expand_locked(
        &self,
        parent_id: EventId,
        horizon: DateTime<Utc>,
    ) -> Result<Expansion, CoreError> {
        let parent = require_event(self.store.as_ref(), parent_id).await?;
        if !parent.is_recurrence_parent() {
            return Err(CoreError::BadRequest(
                "Event is not a recurrence parent".into(),
            ));
        }
        if !parent.is_live() {
            return Err(CoreError::Conflict("Event is cancelled".into()));
        }

        let now = self.clock.now();
        let anchors = occurrences(&parent, horizon, self.config.max_instances)?;
        let existing: HashSet<DateTime<Utc>> = self
            .store
            .list_instances(parent_id)
            .await?
            .iter()
            .filter_map(|child| child.recurrence_anchor)
            .collect();

        let mut expansion = Expansion::default();
        for anchor in anchors {
            if existing.contains(&anchor) {
                expansion.already_materialized += 1;
                continue;
            }
            if anchor <= now {
                continue;
            }
            let instance = instance_from(&parent, anchor, now)?;
            match self.store.insert_event(&instance).await {
                Ok(()) => expansion.created.push(instance),
                Err(e) => {
                    tracing::warn!(
                        event_id = %parent_id,
                        anchor = %anchor,
                        "failed to materialize instance: {e}"
                    );
                    expansion.failed += 1;
                }
            }
        }

        tracing::info!(
            event_id = %parent_id,
            created = expansion.created.len(),
            existing = expansion.already_materialized,
            failed = expansion.failed,
            "recurrence expanded"
        );
        Ok(expansion)
    }

    /// Apply an already-persisted parent update to its live future children.
    ///
    /// `previous` is the parent as it was before the update. Non-time fields
    /// named in `changes` are copied from the parent; start and end move by the
    /// parent's own shift. A changed rule retires children whose period no
    /// longer occurs and materializes the new ones; a parent that stopped
    /// recurring retires all of them.
    pub async fn propagate_update(
        &self,
        previous: &Event,
        changes: &EventChanges,
    ) -> Result<CascadeSummary, CoreError> {
        let lock = self.lock_for(previous.id);
        let result = {
            let _guard = lock.lock().await;
            self.propagate_locked(previous, changes).await
        };
        drop(lock);
        self.release(previous.id);
        result
    }

    async fn propagate_locked(
        &self,
        previous: &Event,
        changes: &EventChanges,
    ) -> Result<CascadeSummary, CoreError> {
        let parent = require_event(self.store.as_ref(), previous.id).await?;
        let now = self.clock.now();
        let start_shift = parent.starts_at - previous.starts_at;
        let end_shift = parent.ends_at - previous.ends_at;
        let rule_changed = parent.recurrence_rule != previous.recurrence_rule;
        let still_recurring = parent.is_recurrence_parent();

        let live: Vec<Event> = self
            .store
            .list_instances(parent.id)
            .await?
            .into_iter()
            .filter(|child| child.is_live() && child.starts_at > now)
            .collect();

        let keep: Option<HashSet<DateTime<Utc>>> = if !still_recurring {
            Some(HashSet::new())
        } else if rule_changed {
            let default_horizon = self.default_horizon(&parent);
            let horizon = live
                .iter()
                .filter_map(|child| child.recurrence_anchor)
                .max()
                .and_then(|anchor| anchor.checked_add_signed(start_shift))
                .map_or(default_horizon, |anchor| anchor.max(default_horizon));
            Some(
                occurrences(&parent, horizon, self.config.max_instances)?
                    .into_iter()
                    .collect(),
            )
        } else {
            None
        };

        let mut summary = CascadeSummary::default();
        for child in live {
            summary.attempted += 1;
            let shifted_anchor = child
                .recurrence_anchor
                .and_then(|anchor| anchor.checked_add_signed(start_shift));
            let retire = match (&keep, shifted_anchor) {
                (Some(keep), Some(anchor)) => !keep.contains(&anchor),
                (Some(_), None) => true,
                (None, _) => false,
            };

            let outcome = if retire {
                self.tombstone(child.id, now).await
            } else {
                self.rewrite_child(&child, &parent, changes, start_shift, end_shift, now)
                    .await
            };
            match outcome {
                Ok(()) => summary.succeeded.push(child.id),
                Err(e) => {
                    tracing::warn!(
                        event_id = %parent.id,
                        instance_id = %child.id,
                        "failed to propagate update to instance: {e}"
                    );
                    summary.failed += 1;
                }
            }
        }

        if still_recurring && rule_changed {
            let expansion = self
                .expand_locked(parent.id, self.default_horizon(&parent))
                .await?;
            summary.absorb(&expansion);
        }
        Ok(summary)
    }

    async fn rewrite_child(
        &self,
        child: &Event,
        parent: &Event,
        changes: &EventChanges,
        start_shift: Duration,
        end_shift: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        if changes.max_attendees.is_some() && parent.max_attendees > 0 {
            let going = self.store.tally_rsvps(child.id).await?.going;
            if going > parent.max_attendees {
                return Err(CoreError::BadRequest(format!(
                    "instance already has {going} attendees going"
                )));
            }
        }

        modify_event(self.store.as_ref(), child.id, |instance| {
            copy_changed_fields(instance, parent, changes);
            instance.starts_at = shift(instance.starts_at, start_shift)?;
            instance.ends_at = shift(instance.ends_at, end_shift)?;
            instance.recurrence_anchor = instance
                .recurrence_anchor
                .map(|anchor| shift(anchor, start_shift))
                .transpose()?;
            if instance.ends_at < instance.starts_at {
                return Err(CoreError::InvalidTimeWindow(
                    "shift would end instance before it starts".into(),
                ));
            }
            if instance.starts_at <= now {
                return Err(CoreError::InvalidTimeWindow(
                    "shift would move instance into the past".into(),
                ));
            }
            instance.updated_at = now;
            Ok(())
        })
        .await
        .map(|_| ())
    }

    async fn tombstone(&self, id: EventId, now: DateTime<Utc>) -> Result<(), CoreError> {
        modify_event(self.store.as_ref(), id, |instance| {
            instance.status = EventStatus::Deleted;
            instance.updated_at = now;
            Ok(())
        })
        .await
        .map(|_| ())
    }

    /// Delete every child still referencing `parent_id`. Best effort: a failed
    /// child never stops the remaining ones.
    pub async fn remove_instances(&self, parent_id: EventId) -> Result<CascadeSummary, CoreError> {
        let lock = self.lock_for(parent_id);
        let result = {
            let _guard = lock.lock().await;
            self.remove_locked(parent_id).await
        };
        drop(lock);
        self.release(parent_id);
        result
    }

    async fn remove_locked(&self, parent_id: EventId) -> Result<CascadeSummary, CoreError> {
        let now = self.clock.now();
        let children = self.store.list_instances(parent_id).await?;
        let mut summary = CascadeSummary::default();
        for child in children.into_iter().filter(|child| !child.is_deleted()) {
            summary.attempted += 1;
            match self.tombstone(child.id, now).await {
                Ok(()) => summary.succeeded.push(child.id),
                Err(e) => {
                    tracing::warn!(
                        event_id = %parent_id,
                        instance_id = %child.id,
                        "failed to delete instance: {e}"
                    );
                    summary.failed += 1;
                }
            }
        }
        tracing::info!(
            event_id = %parent_id,
            removed = summary.succeeded.len(),
            failed = summary.failed,
            "recurrence instances removed"
        );
        Ok(summary)
    }
}

fn copy_changed_fields(instance: &mut Event, parent: &Event, changes: &EventChanges) {
    if changes.title.is_some() {
        instance.title = parent.title.clone();
    }
    if changes.description.is_some() {
        instance.description = parent.description.clone();
    }
    if changes.timezone.is_some() {
        instance.timezone = parent.timezone.clone();
    }
    if changes.location.is_some() {
        instance.location = parent.location.clone();
    }
    if changes.privacy.is_some() {
        instance.privacy = parent.privacy;
    }
    if changes.max_attendees.is_some() {
        instance.max_attendees = parent.max_attendees;
    }
    if changes.co_host_ids.is_some() {
        instance.co_host_ids = parent.co_host_ids.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::MemoryStore;
    use crate::test_support::sample_event;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn weekly_parent(start: DateTime<Utc>) -> Event {
        let mut parent = sample_event(1, start);
        parent.is_recurring = true;
        parent.recurrence_rule = Some("FREQ=WEEKLY".into());
        parent
    }

    fn expander(store: Arc<MemoryStore>, now: DateTime<Utc>) -> RecurrenceExpander {
        RecurrenceExpander::new(
            store,
            Arc::new(FixedClock::new(now)),
            RecurrenceConfig::default(),
        )
    }

    #[test]
    fn normalizes_shorthands_and_prefixes() {
        assert_eq!(normalize_rule("weekly").unwrap(), "FREQ=WEEKLY");
        assert_eq!(normalize_rule(" Monthly ").unwrap(), "FREQ=MONTHLY");
        assert_eq!(
            normalize_rule("RRULE:freq=weekly;byday=mo,we").unwrap(),
            "FREQ=WEEKLY;BYDAY=MO,WE"
        );
    }

    #[test]
    fn rejects_rules_without_freq_or_with_extra_lines() {
        assert!(normalize_rule("").is_err());
        assert!(normalize_rule("BYDAY=MO").is_err());
        assert!(normalize_rule("FREQ=DAILY\nEXDATE:20300101T000000Z").is_err());
    }

    #[test]
    fn validate_rule_reports_parse_errors() {
        let start = utc(2030, 1, 7, 10);
        assert!(validate_rule(start, "UTC", "FREQ=WEEKLY;BYDAY=MO").is_ok());
        assert!(matches!(
            validate_rule(start, "UTC", "FREQ=FORTNIGHTLY"),
            Err(CoreError::BadRequest(_))
        ));
    }

    #[test]
    fn weekly_occurrences_within_horizon() {
        let parent = weekly_parent(utc(2024, 1, 1, 10));
        let found = occurrences(&parent, utc(2024, 2, 1, 0), 100).unwrap();
        assert_eq!(
            found,
            vec![
                utc(2024, 1, 8, 10),
                utc(2024, 1, 15, 10),
                utc(2024, 1, 22, 10),
                utc(2024, 1, 29, 10),
            ]
        );
    }

    #[test]
    fn occurrences_keep_wall_clock_across_dst() {
        // 09:00 Berlin: CET (UTC+1) before 2030-03-31, CEST (UTC+2) after
        let mut parent = weekly_parent(utc(2030, 3, 25, 8));
        parent.timezone = "Europe/Berlin".into();
        let found = occurrences(&parent, utc(2030, 4, 2, 0), 10).unwrap();
        assert_eq!(found, vec![utc(2030, 4, 1, 7)]);
    }

    #[test]
    fn occurrences_respect_limit() {
        let mut parent = weekly_parent(utc(2030, 1, 1, 10));
        parent.recurrence_rule = Some("FREQ=DAILY".into());
        let found = occurrences(&parent, utc(2031, 1, 1, 0), 5).unwrap();
        assert_eq!(found.len(), 5);
        assert_eq!(found[0], utc(2030, 1, 2, 10));
    }

    #[test]
    fn horizon_at_end_of_time_is_rejected() {
        let parent = weekly_parent(utc(2030, 1, 1, 10));
        let err = occurrences(&parent, DateTime::<Utc>::MAX_UTC, 5).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTimeWindow(_)));
    }

    #[test]
    fn instance_past_end_of_time_is_rejected() {
        let parent = weekly_parent(utc(2030, 1, 1, 10));
        let anchor = DateTime::<Utc>::MAX_UTC - Duration::minutes(30);
        let err = instance_from(&parent, anchor, utc(2029, 12, 1, 0)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTimeWindow(_)));
    }

    #[test]
    fn instance_inherits_parent_but_not_rule_or_counters() {
        let mut parent = weekly_parent(utc(2030, 1, 1, 10));
        parent.counters.going = 4;
        parent.max_attendees = 12;
        let anchor = utc(2030, 1, 8, 10);
        let child = instance_from(&parent, anchor, utc(2029, 12, 1, 0)).unwrap();

        assert_ne!(child.id, parent.id);
        assert_eq!(child.parent_event_id, Some(parent.id));
        assert_eq!(child.recurrence_rule, None);
        assert!(!child.is_recurring);
        assert_eq!(child.recurrence_anchor, Some(anchor));
        assert_eq!(child.ends_at - child.starts_at, parent.ends_at - parent.starts_at);
        assert_eq!(child.counters, RsvpCounters::default());
        assert_eq!(child.max_attendees, 12);
        assert_eq!(child.title, parent.title);
    }

    #[tokio::test]
    async fn expansion_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let parent = weekly_parent(utc(2024, 1, 1, 10));
        store.insert_event(&parent).await.unwrap();
        let expander = expander(store.clone(), utc(2023, 12, 1, 0));

        let first = expander.expand(parent.id, utc(2024, 2, 1, 0)).await.unwrap();
        assert_eq!(first.created.len(), 4);
        let second = expander.expand(parent.id, utc(2024, 2, 1, 0)).await.unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.already_materialized, 4);
        assert_eq!(store.list_instances(parent.id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn concurrent_expansions_do_not_duplicate_periods() {
        let store = Arc::new(MemoryStore::new());
        let parent = weekly_parent(utc(2024, 1, 1, 10));
        store.insert_event(&parent).await.unwrap();
        let expander = Arc::new(expander(store.clone(), utc(2023, 12, 1, 0)));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let expander = expander.clone();
            let id = parent.id;
            handles.push(tokio::spawn(async move {
                expander.expand(id, utc(2024, 3, 1, 0)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let children = store.list_instances(parent.id).await.unwrap();
        let anchors: HashSet<_> = children.iter().filter_map(|c| c.recurrence_anchor).collect();
        assert_eq!(children.len(), anchors.len());
        assert_eq!(children.len(), 8);
    }

    #[tokio::test]
    async fn tombstoned_periods_are_not_rematerialized() {
        let store = Arc::new(MemoryStore::new());
        let parent = weekly_parent(utc(2024, 1, 1, 10));
        store.insert_event(&parent).await.unwrap();
        let expander = expander(store.clone(), utc(2023, 12, 1, 0));

        let first = expander.expand(parent.id, utc(2024, 2, 1, 0)).await.unwrap();
        let removed = &first.created[1];
        expander
            .tombstone(removed.id, utc(2023, 12, 1, 0))
            .await
            .unwrap();

        let again = expander.expand(parent.id, utc(2024, 2, 1, 0)).await.unwrap();
        assert!(again.created.is_empty());
    }

    #[tokio::test]
    async fn past_periods_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let parent = weekly_parent(utc(2024, 1, 1, 10));
        store.insert_event(&parent).await.unwrap();
        let expander = expander(store.clone(), utc(2024, 1, 16, 0));

        let expansion = expander.expand(parent.id, utc(2024, 2, 1, 0)).await.unwrap();
        let starts: Vec<_> = expansion.created.iter().map(|c| c.starts_at).collect();
        assert_eq!(starts, vec![utc(2024, 1, 22, 10), utc(2024, 1, 29, 10)]);
    }

    #[tokio::test]
    async fn expand_rejects_plain_events() {
        let store = Arc::new(MemoryStore::new());
        let event = sample_event(1, utc(2030, 1, 1, 10));
        store.insert_event(&event).await.unwrap();
        let expander = expander(store.clone(), utc(2029, 1, 1, 0));
        let result = expander.expand(event.id, utc(2031, 1, 1, 0)).await;
        assert!(matches!(result, Err(CoreError::BadRequest(_))));
    }

    #[tokio::test]
    async fn remove_instances_deletes_all_children() {
        let store = Arc::new(MemoryStore::new());
        let parent = weekly_parent(utc(2024, 1, 1, 10));
        store.insert_event(&parent).await.unwrap();
        let expander = expander(store.clone(), utc(2023, 12, 1, 0));
        expander.expand(parent.id, utc(2024, 2, 1, 0)).await.unwrap();

        let summary = expander.remove_instances(parent.id).await.unwrap();
        assert_eq!(summary.attempted, 4);
        assert_eq!(summary.succeeded.len(), 4);
        assert_eq!(summary.failed, 0);
        let children = store.list_instances(parent.id).await.unwrap();
        assert!(children.iter().all(|child| child.is_deleted()));
    }

    #[tokio::test]
    async fn locks_are_released_after_use() {
        let store = Arc::new(MemoryStore::new());
        let parent = weekly_parent(utc(2024, 1, 1, 10));
        store.insert_event(&parent).await.unwrap();
        let expander = expander(store.clone(), utc(2023, 12, 1, 0));
        expander.expand(parent.id, utc(2024, 2, 1, 0)).await.unwrap();
        assert!(expander.locks.is_empty());
    }
}
