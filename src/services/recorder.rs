// src/services/recorder.rs

//! View event recorder.
//!
//! Decides whether a view report is a new, distinct view and, if so,
//! records it and bumps the lesson's denormalized counter:
//!
//! ```text
//! Validated → HashComputed ─┬─ duplicate ─────────────→ not counted
//!                           └─ inserted ─┬─ increment ok ───→ counted
//!                                        └─ increment failed → counted (drift logged)
//! ```

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::models::{AnonymousPolicy, LessonId, RecordOutcome, TrackingConfig, ViewEvent};
use crate::services::identity::VisitorIdentity;
use crate::storage::ViewStore;

/// A validated record-view request.
#[derive(Debug, Clone)]
pub struct ViewRequest {
    pub lesson_id: LessonId,
    pub identity: VisitorIdentity,
}

impl ViewRequest {
    pub fn new(lesson_id: LessonId, identity: VisitorIdentity) -> Self {
        Self {
            lesson_id,
            identity,
        }
    }
}

/// Records views against a [`ViewStore`].
#[derive(Debug, Clone)]
pub struct ViewRecorder<S> {
    store: S,
    config: TrackingConfig,
}

impl<S: ViewStore> ViewRecorder<S> {
    pub fn new(store: S, config: TrackingConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Record a view at the current time.
    pub async fn record(&self, request: &ViewRequest) -> Result<RecordOutcome> {
        self.record_at(request, Utc::now()).await
    }

    /// Record a view as if it arrived at `now`.
    pub async fn record_at(
        &self,
        request: &ViewRequest,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome> {
        let window_start = self.window_start(&request.identity, now)?;

        let visitor_hash = request.identity.hash();
        let event = ViewEvent::new(request.lesson_id.clone(), visitor_hash, now);

        let inserted = self
            .with_timeout(
                "insert view event",
                self.store.insert_if_absent(&event, window_start),
            )
            .await?;
        if !inserted {
            log::debug!(
                "Duplicate view of lesson {} by {} inside {}h window",
                event.lesson_id,
                event.visitor_hash,
                self.config.window_hours
            );
            return Ok(RecordOutcome::Duplicate);
        }

        match self
            .with_timeout(
                "increment views",
                self.store.increment_views(&event.lesson_id, 1),
            )
            .await
        {
            Ok(views_count) => {
                log::info!("Counted view of lesson {} (total {})", event.lesson_id, views_count);
                Ok(RecordOutcome::Counted { views_count })
            }
            Err(e) => {
                log::warn!(
                    "View counter drift for lesson {}: event recorded but increment failed: {}",
                    event.lesson_id,
                    e
                );
                Ok(RecordOutcome::CountedWithDrift)
            }
        }
    }

    /// Read-side counter value.
    pub async fn views_count(&self, lesson_id: &LessonId) -> Result<u64> {
        self.with_timeout("read views", self.store.views_count(lesson_id))
            .await
    }

    /// Start of the dedup window, honouring the anonymous-identity policy.
    fn window_start(
        &self,
        identity: &VisitorIdentity,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        if identity.is_anonymous() {
            match self.config.anonymous_policy {
                AnonymousPolicy::Dedup => {}
                AnonymousPolicy::AlwaysCount => return Ok(DateTime::<Utc>::MAX_UTC),
                AnonymousPolicy::Reject => {
                    return Err(AppError::invalid_input(
                        "visitor identity is entirely unknown",
                    ));
                }
            }
        }
        now.checked_sub_signed(self.config.window()).ok_or_else(|| {
            AppError::config(format!(
                "dedup window of {}h reaches before the earliest representable time",
                self.config.window_hours
            ))
        })
    }

    /// Run a storage call under the configured timeout; every failure becomes a storage error.
    async fn with_timeout<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let limit = self.config.storage_timeout();
        match tokio::time::timeout(limit, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(AppError::Storage(message))) => Err(AppError::Storage(message)),
            Ok(Err(e)) => Err(AppError::storage(format!("{} failed: {}", operation, e))),
            Err(_) => Err(AppError::storage(format!(
                "{} timed out after {}ms",
                operation,
                limit.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;

    use crate::storage::{Faults, MemoryStorage};

    fn request(lesson: &str, token: &str) -> ViewRequest {
        ViewRequest::new(
            LessonId::parse(lesson).unwrap(),
            VisitorIdentity::new("1.2.3.4", "UA-A", token),
        )
    }

    fn recorder(store: MemoryStorage) -> ViewRecorder<MemoryStorage> {
        ViewRecorder::new(store, TrackingConfig::default())
    }

    #[tokio::test]
    async fn test_first_view_counts_once() {
        let recorder = recorder(MemoryStorage::new());
        let req = request("L1", "V1");

        let outcome = recorder.record(&req).await.unwrap();
        assert_eq!(outcome, RecordOutcome::Counted { views_count: 1 });
        assert_eq!(recorder.store().event_count(&req.lesson_id).await.unwrap(), 1);
        assert_eq!(recorder.views_count(&req.lesson_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_scenario_same_then_new_token() {
        let recorder = recorder(MemoryStorage::new());

        assert!(recorder.record(&request("L1", "V1")).await.unwrap().counted());
        assert_eq!(
            recorder.record(&request("L1", "V1")).await.unwrap(),
            RecordOutcome::Duplicate
        );
        assert!(recorder.record(&request("L1", "V2")).await.unwrap().counted());

        let id = LessonId::parse("L1").unwrap();
        assert_eq!(recorder.store().event_count(&id).await.unwrap(), 2);
        assert_eq!(recorder.views_count(&id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sliding_window() {
        let recorder = recorder(MemoryStorage::new());
        let req = request("L1", "V1");
        let t0 = Utc::now();

        assert!(recorder.record_at(&req, t0).await.unwrap().counted());
        // 11 hours later: still inside the window
        let t11 = t0 + ChronoDuration::hours(11);
        assert!(!recorder.record_at(&req, t11).await.unwrap().counted());
        // 13 hours after the sole event: accepted
        let t13 = t0 + ChronoDuration::hours(13);
        assert!(recorder.record_at(&req, t13).await.unwrap().counted());

        assert_eq!(recorder.store().event_count(&req.lesson_id).await.unwrap(), 2);
        assert_eq!(recorder.views_count(&req.lesson_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_identical_requests_count_once() {
        let recorder = recorder(MemoryStorage::new());
        let req = request("L1", "V1");

        let (a, b) = tokio::join!(recorder.record(&req), recorder.record(&req));
        let counted = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|o| o.counted())
            .count();
        assert_eq!(counted, 1);
        assert_eq!(recorder.store().event_count(&req.lesson_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_increment_failure_still_counts() {
        let store = MemoryStorage::with_faults(Faults {
            fail_increments: true,
            ..Faults::default()
        });
        let recorder = recorder(store);
        let req = request("L1", "V1");

        let outcome = recorder.record(&req).await.unwrap();
        assert_eq!(outcome, RecordOutcome::CountedWithDrift);
        assert!(outcome.counted());
        assert_eq!(recorder.store().event_count(&req.lesson_id).await.unwrap(), 1);
        assert_eq!(recorder.views_count(&req.lesson_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_failure_is_storage_error() {
        let store = MemoryStorage::with_faults(Faults {
            fail_inserts: true,
            ..Faults::default()
        });
        let recorder = recorder(store);
        let req = request("L1", "V1");

        let err = recorder.record(&req).await.unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert_eq!(recorder.views_count(&req.lesson_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_slow_storage_fails_closed() {
        let store = MemoryStorage::with_faults(Faults {
            insert_delay: Some(Duration::from_millis(500)),
            ..Faults::default()
        });
        let config = TrackingConfig {
            storage_timeout_ms: 20,
            ..TrackingConfig::default()
        };
        let recorder = ViewRecorder::new(store, config);
        let req = request("L1", "V1");

        let err = recorder.record(&req).await.unwrap_err();
        assert!(matches!(err, AppError::Storage(ref m) if m.contains("timed out")));
        assert_eq!(recorder.store().event_count(&req.lesson_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_oversized_window_is_config_error() {
        let config = TrackingConfig {
            window_hours: u32::MAX,
            ..TrackingConfig::default()
        };
        let recorder = ViewRecorder::new(MemoryStorage::new(), config);
        let req = request("L1", "V1");

        let err = recorder.record(&req).await.unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert_eq!(recorder.store().event_count(&req.lesson_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_anonymous_policies() {
        let anonymous = ViewRequest::new(
            LessonId::parse("L1").unwrap(),
            VisitorIdentity::new("unknown", "unknown", ""),
        );

        let dedup = recorder(MemoryStorage::new());
        assert!(dedup.record(&anonymous).await.unwrap().counted());
        assert!(!dedup.record(&anonymous).await.unwrap().counted());

        let always = ViewRecorder::new(
            MemoryStorage::new(),
            TrackingConfig {
                anonymous_policy: AnonymousPolicy::AlwaysCount,
                ..TrackingConfig::default()
            },
        );
        assert!(always.record(&anonymous).await.unwrap().counted());
        assert!(always.record(&anonymous).await.unwrap().counted());

        let reject = ViewRecorder::new(
            MemoryStorage::new(),
            TrackingConfig {
                anonymous_policy: AnonymousPolicy::Reject,
                ..TrackingConfig::default()
            },
        );
        assert!(matches!(
            reject.record(&anonymous).await,
            Err(AppError::InvalidInput(_))
        ));
        assert_eq!(
            reject.store().event_count(&anonymous.lesson_id).await.unwrap(),
            0
        );
    }
}
