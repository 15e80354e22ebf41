use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::tasks::TaskKind;

static CASCADE_TASKS_STARTED: AtomicU64 = AtomicU64::new(0);
static CASCADE_TASKS_IN_FLIGHT: AtomicU64 = AtomicU64::new(0);
static CASCADE_FAILURES_TOTAL: AtomicU64 = AtomicU64::new(0);
static CASCADE_FAILURES_BY_KIND: OnceLock<Mutex<HashMap<&'static str, u64>>> = OnceLock::new();

fn failures_by_kind() -> &'static Mutex<HashMap<&'static str, u64>> {
    CASCADE_FAILURES_BY_KIND.get_or_init(|| Mutex::new(HashMap::new()))
}

fn lock_failures_by_kind() -> std::sync::MutexGuard<'static, HashMap<&'static str, u64>> {
    match failures_by_kind().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub fn cascade_started() {
    CASCADE_TASKS_STARTED.fetch_add(1, Ordering::Relaxed);
    CASCADE_TASKS_IN_FLIGHT.fetch_add(1, Ordering::Relaxed);
}

pub fn cascade_finished(kind: TaskKind, succeeded: bool) {
    let _ = CASCADE_TASKS_IN_FLIGHT.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_sub(1))
    });
    if succeeded {
        return;
    }
    CASCADE_FAILURES_TOTAL.fetch_add(1, Ordering::Relaxed);
    let mut by_kind = lock_failures_by_kind();
    let entry = by_kind.entry(kind.as_str()).or_insert(0);
    *entry = entry.saturating_add(1);
}

#[derive(Clone, Debug, Default)]
pub struct CascadeMetricsSnapshot {
    pub started: u64,
    pub in_flight: u64,
    pub failures: u64,
    pub failures_by_kind: Vec<(String, u64)>,
}

pub fn cascade_metrics_snapshot() -> CascadeMetricsSnapshot {
    let mut failures_by_kind: Vec<(String, u64)> = lock_failures_by_kind()
        .iter()
        .map(|(kind, count)| (kind.to_string(), *count))
        .collect();
    failures_by_kind.sort_by(|a, b| a.0.cmp(&b.0));

    CascadeMetricsSnapshot {
        started: CASCADE_TASKS_STARTED.load(Ordering::Relaxed),
        in_flight: CASCADE_TASKS_IN_FLIGHT.load(Ordering::Relaxed),
        failures: CASCADE_FAILURES_TOTAL.load(Ordering::Relaxed),
        failures_by_kind,
    }
}
