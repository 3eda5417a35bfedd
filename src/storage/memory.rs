//! In-memory storage implementation.
//!
//! Keeps everything in process-local maps behind one async mutex. Used by
//! tests and as a scratch backend; [`Faults`] lets callers force storage
//! failures on specific operations.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Comment, LessonId, LessonRecord, ViewEvent};
use crate::storage::{EngagementStore, LessonStore, ViewStore, merge_lesson};

/// Failures to inject into [`MemoryStorage`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// Every event insert fails
    pub fail_inserts: bool,
    /// Every counter increment fails
    pub fail_increments: bool,
    /// Event inserts stall this long before touching state
    pub insert_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct Inner {
    events: Vec<ViewEvent>,
    lessons: BTreeMap<LessonId, LessonRecord>,
    likes: HashSet<(LessonId, String)>,
    comments: Vec<Comment>,
}

/// Process-local storage backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<Inner>>,
    faults: Faults,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a storage that fails as described by `faults`.
    pub fn with_faults(faults: Faults) -> Self {
        Self {
            inner: Arc::default(),
            faults,
        }
    }

    /// Share this storage's state under a different fault plan.
    pub fn with_shared_faults(&self, faults: Faults) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            faults,
        }
    }

    /// Snapshot of every stored view event.
    pub async fn events(&self) -> Vec<ViewEvent> {
        self.inner.lock().await.events.clone()
    }
}

#[async_trait]
impl ViewStore for MemoryStorage {
    async fn insert_if_absent(
        &self,
        event: &ViewEvent,
        window_start: DateTime<Utc>,
    ) -> Result<bool> {
        if let Some(delay) = self.faults.insert_delay {
            tokio::time::sleep(delay).await;
        }
        if self.faults.fail_inserts {
            return Err(AppError::storage("injected insert failure"));
        }

        let mut inner = self.inner.lock().await;
        let duplicate = inner.events.iter().any(|e| {
            e.lesson_id == event.lesson_id
                && e.visitor_hash == event.visitor_hash
                && e.is_within(window_start)
        });
        if duplicate {
            return Ok(false);
        }
        inner.events.push(event.clone());
        Ok(true)
    }

    async fn increment_views(&self, lesson_id: &LessonId, by: u64) -> Result<u64> {
        if self.faults.fail_increments {
            return Err(AppError::storage("injected increment failure"));
        }

        let mut inner = self.inner.lock().await;
        let lesson = inner
            .lessons
            .entry(lesson_id.clone())
            .or_insert_with(|| LessonRecord::new(lesson_id.clone(), ""));
        lesson.views_count = lesson.views_count.saturating_add(by);
        Ok(lesson.views_count)
    }

    async fn views_count(&self, lesson_id: &LessonId) -> Result<u64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .lessons
            .get(lesson_id)
            .map(|l| l.views_count)
            .unwrap_or(0))
    }

    async fn event_count(&self, lesson_id: &LessonId) -> Result<u64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .events
            .iter()
            .filter(|e| &e.lesson_id == lesson_id)
            .count() as u64)
    }

    async fn latest_event_at(&self, lesson_id: &LessonId) -> Result<Option<DateTime<Utc>>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .events
            .iter()
            .filter(|e| &e.lesson_id == lesson_id)
            .map(|e| e.created_at)
            .max())
    }
}

#[async_trait]
impl LessonStore for MemoryStorage {
    async fn upsert_lesson(&self, lesson: &LessonRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let merged = merge_lesson(inner.lessons.get(&lesson.id), lesson);
        inner.lessons.insert(lesson.id.clone(), merged);
        Ok(())
    }

    async fn lesson(&self, lesson_id: &LessonId) -> Result<Option<LessonRecord>> {
        Ok(self.inner.lock().await.lessons.get(lesson_id).cloned())
    }

    async fn lessons(&self) -> Result<Vec<LessonRecord>> {
        Ok(self.inner.lock().await.lessons.values().cloned().collect())
    }
}

#[async_trait]
impl EngagementStore for MemoryStorage {
    async fn set_like(&self, lesson_id: &LessonId, user_id: &str, liked: bool) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let key = (lesson_id.clone(), user_id.to_string());
        Ok(if liked {
            inner.likes.insert(key)
        } else {
            inner.likes.remove(&key)
        })
    }

    async fn is_liked(&self, lesson_id: &LessonId, user_id: &str) -> Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner
            .likes
            .contains(&(lesson_id.clone(), user_id.to_string())))
    }

    async fn like_count(&self, lesson_id: &LessonId) -> Result<u64> {
        let inner = self.inner.lock().await;
        Ok(inner.likes.iter().filter(|(l, _)| l == lesson_id).count() as u64)
    }

    async fn add_comment(&self, comment: &Comment) -> Result<()> {
        self.inner.lock().await.comments.push(comment.clone());
        Ok(())
    }

    async fn comments(&self, lesson_id: &LessonId) -> Result<Vec<Comment>> {
        let inner = self.inner.lock().await;
        let mut comments: Vec<Comment> = inner
            .comments
            .iter()
            .filter(|c| &c.lesson_id == lesson_id)
            .cloned()
            .collect();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(comments)
    }

    async fn comment(&self, comment_id: Uuid) -> Result<Option<Comment>> {
        let inner = self.inner.lock().await;
        Ok(inner.comments.iter().find(|c| c.id == comment_id).cloned())
    }

    async fn delete_comment(&self, comment_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.comments.len();
        inner.comments.retain(|c| c.id != comment_id);
        Ok(inner.comments.len() != before)
    }
}
