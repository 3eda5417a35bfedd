//! AWS S3 storage implementation.
//!
//! Object layout under `{bucket}/{prefix}`:
//!
//! ```text
//! lessons/{lesson_id}.json                  # LessonRecord with views_count
//! views/{lesson_id}/{visitor_hash}.json     # timestamps of accepted views
//! ```
//!
//! Keying the event log by `(lesson, visitor_hash)` turns the dedup check
//! into a single-object compare-and-swap: writes carry `If-Match` (existing
//! object) or `If-None-Match: *` (new object), and a 409/412 answer means a
//! concurrent writer won, so the read-decide-write cycle is retried.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{AppError, Result};
use crate::models::{LessonId, LessonRecord, ViewEvent};
use crate::storage::{LessonStore, ViewStore, merge_lesson};

/// Attempts per compare-and-swap cycle before giving up.
const MAX_CAS_ATTEMPTS: usize = 5;

/// S3-backed view and lesson storage.
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    prefix: String,
}

/// A stored object together with its entity tag.
struct Versioned<T> {
    value: T,
    etag: Option<String>,
}

impl S3Storage {
    /// Create a new S3 storage instance.
    pub fn new(client: Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    /// Create S3 storage from environment configuration.
    pub async fn from_env() -> Result<Self> {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = Client::new(&config);

        let bucket = std::env::var("S3_BUCKET").unwrap_or_else(|_| "lesson-views".to_string());
        let prefix = std::env::var("S3_PREFIX").unwrap_or_else(|_| "lesson-views".to_string());

        Ok(Self::new(client, bucket, prefix))
    }

    fn key(&self, relative: &str) -> String {
        if self.prefix.is_empty() {
            relative.to_string()
        } else {
            format!("{}/{}", self.prefix, relative)
        }
    }

    fn lesson_key(&self, lesson_id: &LessonId) -> String {
        self.key(&format!("lessons/{}.json", lesson_id))
    }

    fn views_prefix(&self, lesson_id: &LessonId) -> String {
        self.key(&format!("views/{}/", lesson_id))
    }

    fn views_key(&self, event: &ViewEvent) -> String {
        format!("{}{}.json", self.views_prefix(&event.lesson_id), event.visitor_hash)
    }

    /// Read raw bytes from S3, returning None if the key does not exist.
    pub async fn read_bytes_optional(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .read_versioned_bytes(key)
            .await?
            .map(|versioned| versioned.value))
    }

    async fn read_versioned_bytes(&self, key: &str) -> Result<Option<Versioned<Vec<u8>>>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let etag = output.e_tag().map(str::to_string);
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| AppError::S3(e.to_string()))?;
                Ok(Some(Versioned {
                    value: bytes.into_bytes().to_vec(),
                    etag,
                }))
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(AppError::S3(DisplayErrorContext(&service_err).to_string()))
                }
            }
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Versioned<T>>> {
        match self.read_versioned_bytes(key).await? {
            Some(versioned) => Ok(Some(Versioned {
                value: serde_json::from_slice(&versioned.value)?,
                etag: versioned.etag,
            })),
            None => Ok(None),
        }
    }

    /// Write JSON only if the object is still at `etag` (or still absent when `None`).
    ///
    /// Returns `false` when the precondition failed.
    async fn write_json_if<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        etag: Option<&str>,
    ) -> Result<bool> {
        let json = serde_json::to_vec(value)?;
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(json))
            .content_type("application/json");
        request = match etag {
            Some(tag) => request.if_match(tag),
            None => request.if_none_match("*"),
        };

        match request.send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                let status = err.raw_response().map(|r| r.status().as_u16());
                if matches!(status, Some(409) | Some(412)) {
                    log::debug!("Conditional write lost race on s3://{}/{}", self.bucket, key);
                    Ok(false)
                } else {
                    Err(AppError::S3(DisplayErrorContext(&err).to_string()))
                }
            }
        }
    }

    /// List every key below `prefix`.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }
            let output = request
                .send()
                .await
                .map_err(|e| AppError::S3(DisplayErrorContext(&e).to_string()))?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match output.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }

    /// Apply `update` to a lesson record with compare-and-swap retries.
    async fn update_lesson<F>(&self, lesson_id: &LessonId, mut update: F) -> Result<LessonRecord>
    where
        F: FnMut(Option<LessonRecord>) -> LessonRecord + Send,
    {
        let key = self.lesson_key(lesson_id);
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current: Option<Versioned<LessonRecord>> = self.read_json(&key).await?;
            let (existing, etag) = match current {
                Some(v) => (Some(v.value), v.etag),
                None => (None, None),
            };
            let updated = update(existing);
            if self.write_json_if(&key, &updated, etag.as_deref()).await? {
                return Ok(updated);
            }
        }
        Err(AppError::storage(format!(
            "too much contention updating {}",
            key
        )))
    }
}

#[async_trait]
impl ViewStore for S3Storage {
    async fn insert_if_absent(
        &self,
        event: &ViewEvent,
        window_start: DateTime<Utc>,
    ) -> Result<bool> {
        let key = self.views_key(event);
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current: Option<Versioned<Vec<DateTime<Utc>>>> = self.read_json(&key).await?;
            let (mut seen, etag) = match current {
                Some(v) => (v.value, v.etag),
                None => (Vec::new(), None),
            };
            if seen.iter().any(|at| *at >= window_start) {
                return Ok(false);
            }

            seen.push(event.created_at);
            if self.write_json_if(&key, &seen, etag.as_deref()).await? {
                return Ok(true);
            }
        }
        Err(AppError::storage(format!(
            "too much contention recording view at {}",
            key
        )))
    }

    async fn increment_views(&self, lesson_id: &LessonId, by: u64) -> Result<u64> {
        let lesson = self
            .update_lesson(lesson_id, |existing| {
                let mut lesson =
                    existing.unwrap_or_else(|| LessonRecord::new(lesson_id.clone(), ""));
                lesson.views_count = lesson.views_count.saturating_add(by);
                lesson
            })
            .await?;
        Ok(lesson.views_count)
    }

    async fn views_count(&self, lesson_id: &LessonId) -> Result<u64> {
        let current: Option<Versioned<LessonRecord>> =
            self.read_json(&self.lesson_key(lesson_id)).await?;
        Ok(current.map(|v| v.value.views_count).unwrap_or(0))
    }

    async fn event_count(&self, lesson_id: &LessonId) -> Result<u64> {
        let mut total = 0u64;
        for key in self.list_keys(&self.views_prefix(lesson_id)).await? {
            let seen: Option<Versioned<Vec<DateTime<Utc>>>> = self.read_json(&key).await?;
            total += seen.map(|v| v.value.len() as u64).unwrap_or(0);
        }
        Ok(total)
    }

    async fn latest_event_at(&self, lesson_id: &LessonId) -> Result<Option<DateTime<Utc>>> {
        let mut latest = None;
        for key in self.list_keys(&self.views_prefix(lesson_id)).await? {
            let seen: Option<Versioned<Vec<DateTime<Utc>>>> = self.read_json(&key).await?;
            let newest = seen.and_then(|v| v.value.into_iter().max());
            latest = latest.max(newest);
        }
        Ok(latest)
    }
}

#[async_trait]
impl LessonStore for S3Storage {
    async fn upsert_lesson(&self, lesson: &LessonRecord) -> Result<()> {
        self.update_lesson(&lesson.id, |existing| merge_lesson(existing.as_ref(), lesson))
            .await?;
        Ok(())
    }

    async fn lesson(&self, lesson_id: &LessonId) -> Result<Option<LessonRecord>> {
        let current: Option<Versioned<LessonRecord>> =
            self.read_json(&self.lesson_key(lesson_id)).await?;
        Ok(current.map(|v| v.value))
    }

    async fn lessons(&self) -> Result<Vec<LessonRecord>> {
        let mut lessons = Vec::new();
        for key in self.list_keys(&self.key("lessons/")).await? {
            if let Some(v) = self.read_json::<LessonRecord>(&key).await? {
                lessons.push(v.value);
            }
        }
        log::info!("Loaded {} lessons from s3://{}", lessons.len(), self.bucket);
        Ok(lessons)
    }
}
