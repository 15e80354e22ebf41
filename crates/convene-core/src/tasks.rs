use convene_models::EventId;
use std::future::Future;
use tokio::sync::broadcast;
use tokio_util::task::TaskTracker;

use crate::error::CoreError;
use crate::observability;

/// Kinds of work that run detached from the request that triggered them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Materialize,
    PropagateUpdate,
    CascadeDelete,
    CancelReminders,
    NotifyFollowers,
    NotifyCancellation,
    NotifyUpdate,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Materialize => "materialize",
            TaskKind::PropagateUpdate => "propagate_update",
            TaskKind::CascadeDelete => "cascade_delete",
            TaskKind::CancelReminders => "cancel_reminders",
            TaskKind::NotifyFollowers => "notify_followers",
            TaskKind::NotifyCancellation => "notify_cancellation",
            TaskKind::NotifyUpdate => "notify_update",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeOutcome {
    Completed,
    Failed { error_code: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct CascadeReport {
    pub kind: TaskKind,
    pub event_id: EventId,
    pub outcome: CascadeOutcome,
}

impl CascadeReport {
    pub fn failed(&self) -> bool {
        matches!(self.outcome, CascadeOutcome::Failed { .. })
    }
}

/// Runs cascades and notifications as tracked tokio tasks.
///
/// A task's error never reaches the request that spawned it: it is logged,
/// counted in [`observability`] and published to every report subscriber.
#[derive(Clone)]
pub struct Dispatcher {
    tracker: TaskTracker,
    reports: broadcast::Sender<CascadeReport>,
}

impl Dispatcher {
    pub fn new(capacity: usize) -> Self {
        let (reports, _) = broadcast::channel(capacity.max(16));
        Self {
            tracker: TaskTracker::new(),
            reports,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CascadeReport> {
        self.reports.subscribe()
    }

    pub fn spawn<F>(&self, kind: TaskKind, event_id: EventId, task: F)
    where
        F: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        observability::cascade_started();
        let reports = self.reports.clone();
        self.tracker.spawn(async move {
            let outcome = match task.await {
                Ok(()) => {
                    tracing::debug!(task = kind.as_str(), %event_id, "cascade task completed");
                    CascadeOutcome::Completed
                }
                Err(err) => {
                    tracing::warn!(
                        task = kind.as_str(),
                        %event_id,
                        retryable = err.is_retryable(),
                        "cascade task failed: {err}"
                    );
                    CascadeOutcome::Failed {
                        error_code: err.error_code(),
                        message: err.to_string(),
                    }
                }
            };
            observability::cascade_finished(kind, outcome == CascadeOutcome::Completed);
            // no subscribers is fine
            let _ = reports.send(CascadeReport {
                kind,
                event_id,
                outcome,
            });
        });
    }

    /// Wait until every task spawned so far, and any they spawn, has finished.
    pub async fn flush(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(1024)
    }
}
