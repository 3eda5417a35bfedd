//! Local filesystem storage implementation.
//!
//! JSON-file backend for development and the CLI. Production deployments
//! should use `S3Storage`.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── lessons.json          # Lesson records with views_count
//! ├── likes.json            # (lesson_id, user_id) pairs
//! ├── comments.json         # Reader comments
//! └── views/
//!     └── {lesson_id}.json  # Append-only view event log
//! ```
//!
//! Every read-modify-write runs under one async lock per storage handle, so
//! conditional inserts and increments are atomic within a process. Files are
//! replaced by write-then-rename.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Comment, LessonId, LessonRecord, Like, ViewEvent};
use crate::storage::{EngagementStore, LessonStore, ViewStore, merge_lesson};

const LESSONS_KEY: &str = "lessons.json";
const LIKES_KEY: &str = "likes.json";
const COMMENTS_KEY: &str = "comments.json";

type LessonMap = BTreeMap<LessonId, LessonRecord>;

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data, falling back to the type's default when absent.
    async fn read_json_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(T::default()),
        }
    }

    /// Event log key for a lesson.
    fn views_key(lesson_id: &LessonId) -> String {
        format!("views/{}.json", lesson_id)
    }

    async fn load_lessons(&self) -> Result<LessonMap> {
        self.read_json_or_default(LESSONS_KEY).await
    }
}

#[async_trait]
impl ViewStore for LocalStorage {
    async fn insert_if_absent(
        &self,
        event: &ViewEvent,
        window_start: DateTime<Utc>,
    ) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let key = Self::views_key(&event.lesson_id);

        let mut events: Vec<ViewEvent> = self.read_json_or_default(&key).await?;
        let duplicate = events
            .iter()
            .any(|e| e.visitor_hash == event.visitor_hash && e.is_within(window_start));
        if duplicate {
            return Ok(false);
        }

        events.push(event.clone());
        self.write_json(&key, &events).await?;
        log::debug!("Appended view event to {} ({} total)", key, events.len());
        Ok(true)
    }

    async fn increment_views(&self, lesson_id: &LessonId, by: u64) -> Result<u64> {
        let _guard = self.lock.lock().await;
        let mut lessons = self.load_lessons().await?;
        let lesson = lessons
            .entry(lesson_id.clone())
            .or_insert_with(|| LessonRecord::new(lesson_id.clone(), ""));
        lesson.views_count = lesson.views_count.saturating_add(by);
        let count = lesson.views_count;
        self.write_json(LESSONS_KEY, &lessons).await?;
        Ok(count)
    }

    async fn views_count(&self, lesson_id: &LessonId) -> Result<u64> {
        let _guard = self.lock.lock().await;
        let lessons = self.load_lessons().await?;
        Ok(lessons.get(lesson_id).map(|l| l.views_count).unwrap_or(0))
    }

    async fn event_count(&self, lesson_id: &LessonId) -> Result<u64> {
        let _guard = self.lock.lock().await;
        let events: Vec<ViewEvent> = self
            .read_json_or_default(&Self::views_key(lesson_id))
            .await?;
        Ok(events.len() as u64)
    }

    async fn latest_event_at(&self, lesson_id: &LessonId) -> Result<Option<DateTime<Utc>>> {
        let _guard = self.lock.lock().await;
        let events: Vec<ViewEvent> = self
            .read_json_or_default(&Self::views_key(lesson_id))
            .await?;
        Ok(events.iter().map(|e| e.created_at).max())
    }
}

#[async_trait]
impl LessonStore for LocalStorage {
    async fn upsert_lesson(&self, lesson: &LessonRecord) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut lessons = self.load_lessons().await?;
        let merged = merge_lesson(lessons.get(&lesson.id), lesson);
        lessons.insert(lesson.id.clone(), merged);
        self.write_json(LESSONS_KEY, &lessons).await
    }

    async fn lesson(&self, lesson_id: &LessonId) -> Result<Option<LessonRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self.load_lessons().await?.remove(lesson_id))
    }

    async fn lessons(&self) -> Result<Vec<LessonRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self.load_lessons().await?.into_values().collect())
    }
}

#[async_trait]
impl EngagementStore for LocalStorage {
    async fn set_like(&self, lesson_id: &LessonId, user_id: &str, liked: bool) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut likes: Vec<Like> = self.read_json_or_default(LIKES_KEY).await?;
        let position = likes
            .iter()
            .position(|l| &l.lesson_id == lesson_id && l.user_id == user_id);

        let changed = match (position, liked) {
            (None, true) => {
                likes.push(Like {
                    lesson_id: lesson_id.clone(),
                    user_id: user_id.to_string(),
                });
                true
            }
            (Some(i), false) => {
                likes.remove(i);
                true
            }
            _ => false,
        };
        if changed {
            self.write_json(LIKES_KEY, &likes).await?;
        }
        Ok(changed)
    }

    async fn is_liked(&self, lesson_id: &LessonId, user_id: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let likes: Vec<Like> = self.read_json_or_default(LIKES_KEY).await?;
        Ok(likes
            .iter()
            .any(|l| &l.lesson_id == lesson_id && l.user_id == user_id))
    }

    async fn like_count(&self, lesson_id: &LessonId) -> Result<u64> {
        let _guard = self.lock.lock().await;
        let likes: Vec<Like> = self.read_json_or_default(LIKES_KEY).await?;
        Ok(likes.iter().filter(|l| &l.lesson_id == lesson_id).count() as u64)
    }

    async fn add_comment(&self, comment: &Comment) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut comments: Vec<Comment> = self.read_json_or_default(COMMENTS_KEY).await?;
        comments.push(comment.clone());
        self.write_json(COMMENTS_KEY, &comments).await
    }

    async fn comments(&self, lesson_id: &LessonId) -> Result<Vec<Comment>> {
        let _guard = self.lock.lock().await;
        let comments: Vec<Comment> = self.read_json_or_default(COMMENTS_KEY).await?;
        let mut comments: Vec<Comment> = comments
            .into_iter()
            .filter(|c| &c.lesson_id == lesson_id)
            .collect();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(comments)
    }

    async fn comment(&self, comment_id: Uuid) -> Result<Option<Comment>> {
        let _guard = self.lock.lock().await;
        let comments: Vec<Comment> = self.read_json_or_default(COMMENTS_KEY).await?;
        Ok(comments.into_iter().find(|c| c.id == comment_id))
    }

    async fn delete_comment(&self, comment_id: Uuid) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut comments: Vec<Comment> = self.read_json_or_default(COMMENTS_KEY).await?;
        let before = comments.len();
        comments.retain(|c| c.id != comment_id);
        if comments.len() == before {
            return Ok(false);
        }
        self.write_json(COMMENTS_KEY, &comments).await?;
        Ok(true)
    }
}
