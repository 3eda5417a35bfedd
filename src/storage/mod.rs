//! Storage abstractions for view events, lessons and engagement.
//!
//! Every backend owns two shared resources: the append-only view event log
//! and the per-lesson `views_count`. Both are mutated only through
//! [`ViewStore`].
//!
//! ## Backends
//!
//! - [`MemoryStorage`]: process-local maps, with fault injection for tests
//! - [`LocalStorage`]: JSON files under a root directory (CLI, development)
//! - `S3Storage`: objects in a bucket with conditional writes (Lambda)

pub mod local;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Comment, LessonId, LessonRecord, ViewEvent};

// Re-export for convenience
pub use local::LocalStorage;
pub use memory::{Faults, MemoryStorage};

/// Trait for the view event log and denormalized counter.
#[async_trait]
pub trait ViewStore: Send + Sync {
    /// Atomically insert `event` unless an event with the same lesson and
    /// visitor hash exists with `created_at >= window_start`.
    ///
    /// Returns `true` when the event was inserted.
    async fn insert_if_absent(&self, event: &ViewEvent, window_start: DateTime<Utc>)
    -> Result<bool>;

    /// Atomically add `by` to the lesson's `views_count`, returning the new value.
    ///
    /// A lesson without a record gets one created.
    async fn increment_views(&self, lesson_id: &LessonId, by: u64) -> Result<u64>;

    /// Current `views_count` (0 for unknown lessons).
    async fn views_count(&self, lesson_id: &LessonId) -> Result<u64>;

    /// Number of recorded view events for the lesson.
    async fn event_count(&self, lesson_id: &LessonId) -> Result<u64>;

    /// Creation time of the lesson's newest view event.
    async fn latest_event_at(&self, lesson_id: &LessonId) -> Result<Option<DateTime<Utc>>>;
}

/// Trait for lesson records.
#[async_trait]
pub trait LessonStore: Send + Sync {
    /// Insert or replace a lesson. An existing `views_count` is kept when it is larger.
    async fn upsert_lesson(&self, lesson: &LessonRecord) -> Result<()>;

    /// Load a single lesson.
    async fn lesson(&self, lesson_id: &LessonId) -> Result<Option<LessonRecord>>;

    /// All lessons, published or not.
    async fn lessons(&self) -> Result<Vec<LessonRecord>>;

    /// Published lessons only.
    async fn published_lessons(&self) -> Result<Vec<LessonRecord>> {
        Ok(self
            .lessons()
            .await?
            .into_iter()
            .filter(|l| l.published)
            .collect())
    }
}

/// Trait for likes and comments.
#[async_trait]
pub trait EngagementStore: Send + Sync {
    /// Insert or delete the `(lesson, user)` like. Returns `true` if state changed.
    async fn set_like(&self, lesson_id: &LessonId, user_id: &str, liked: bool) -> Result<bool>;

    async fn is_liked(&self, lesson_id: &LessonId, user_id: &str) -> Result<bool>;

    async fn like_count(&self, lesson_id: &LessonId) -> Result<u64>;

    async fn add_comment(&self, comment: &Comment) -> Result<()>;

    /// Comments for a lesson, oldest first.
    async fn comments(&self, lesson_id: &LessonId) -> Result<Vec<Comment>>;

    async fn comment(&self, comment_id: Uuid) -> Result<Option<Comment>>;

    /// Returns `true` if a comment was removed.
    async fn delete_comment(&self, comment_id: Uuid) -> Result<bool>;
}

/// Merge an incoming lesson with the stored one, never lowering the counter.
pub(crate) fn merge_lesson(existing: Option<&LessonRecord>, incoming: &LessonRecord) -> LessonRecord {
    let mut merged = incoming.clone();
    if let Some(existing) = existing {
        merged.views_count = merged.views_count.max(existing.views_count);
    }
    merged
}
