// src/services/reconcile.rs

//! Counter reconciliation.
//!
//! When an increment fails after its event was stored, `views_count` lags
//! the event log. Reconciliation raises the counter back to the event count.
//! It never lowers a counter.
//!
//! A recording between its insert and its increment also looks like a lag.
//! Lessons whose newest event is younger than the settle period are skipped
//! so that such a view is not counted twice; the recorder bounds that gap by
//! its storage timeout, see [`settle_period`].

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::models::{LessonId, TrackingConfig};
use crate::storage::{LessonStore, ViewStore};

/// Result of reconciling one lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub lesson_id: LessonId,
    /// Recorded view events
    pub events: u64,
    /// Counter before reconciliation
    pub before: u64,
    /// Counter after reconciliation
    pub after: u64,
    /// Left alone because a recording may still be in flight
    pub skipped: bool,
}

impl Reconciliation {
    /// Whether the counter had to be raised.
    pub fn repaired(&self) -> bool {
        self.after > self.before
    }
}

/// Quiet time a lesson needs before its counter is touched: an insert plus
/// an increment, each bounded by the storage timeout.
pub fn settle_period(config: &TrackingConfig) -> Duration {
    Duration::milliseconds(config.storage_timeout_ms.saturating_mul(2).min(i64::MAX as u64) as i64)
}

/// Raise the lesson's counter to its event count if it lags.
pub async fn reconcile<S: ViewStore>(
    store: &S,
    lesson_id: &LessonId,
    settle: Duration,
) -> Result<Reconciliation> {
    reconcile_at(store, lesson_id, settle, Utc::now()).await
}

/// [`reconcile`] as of `now`.
pub async fn reconcile_at<S: ViewStore>(
    store: &S,
    lesson_id: &LessonId,
    settle: Duration,
    now: DateTime<Utc>,
) -> Result<Reconciliation> {
    let latest = store.latest_event_at(lesson_id).await?;
    let events = store.event_count(lesson_id).await?;
    let before = store.views_count(lesson_id).await?;

    let unsettled = latest.is_some_and(|at| now.signed_duration_since(at) < settle);
    if unsettled && events > before {
        log::info!(
            "Skipping lesson {}: newest view is younger than {}ms",
            lesson_id,
            settle.num_milliseconds()
        );
        return Ok(Reconciliation {
            lesson_id: lesson_id.clone(),
            events,
            before,
            after: before,
            skipped: true,
        });
    }

    let after = if events > before {
        let after = store.increment_views(lesson_id, events - before).await?;
        log::warn!(
            "Reconciled lesson {}: counter {} → {} ({} events)",
            lesson_id,
            before,
            after,
            events
        );
        after
    } else {
        before
    };

    Ok(Reconciliation {
        lesson_id: lesson_id.clone(),
        events,
        before,
        after,
        skipped: false,
    })
}

/// Reconcile every known lesson.
pub async fn reconcile_all<S: ViewStore + LessonStore>(
    store: &S,
    settle: Duration,
) -> Result<Vec<Reconciliation>> {
    let mut results = Vec::new();
    for lesson in store.lessons().await? {
        results.push(reconcile(store, &lesson.id, settle).await?);
    }
    let repaired = results.iter().filter(|r| r.repaired()).count();
    let skipped = results.iter().filter(|r| r.skipped).count();
    log::info!(
        "Reconciliation checked {} lessons, repaired {}, skipped {}",
        results.len(),
        repaired,
        skipped
    );
    Ok(results)
}
