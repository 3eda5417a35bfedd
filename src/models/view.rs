// src/models/view.rs

//! View tracking data structures.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Maximum accepted length of a lesson identifier.
pub const MAX_LESSON_ID_LEN: usize = 128;

/// Validated identifier of a lesson (content item).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LessonId(String);

impl LessonId {
    /// Parse and validate a raw identifier.
    ///
    /// Surrounding whitespace is ignored. The identifier must be non-empty,
    /// at most [`MAX_LESSON_ID_LEN`] bytes, and consist of ASCII letters,
    /// digits, `-` or `_` (UUIDs and slugs both qualify).
    pub fn parse(raw: &str) -> Result<Self> {
        let id = raw.trim();
        if id.is_empty() {
            return Err(AppError::invalid_input("lessonId is required"));
        }
        if id.len() > MAX_LESSON_ID_LEN {
            return Err(AppError::invalid_input(format!(
                "lessonId exceeds {} characters",
                MAX_LESSON_ID_LEN
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(AppError::invalid_input("lessonId contains invalid characters"));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LessonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One-way digest standing in for a visitor (lowercase SHA-256 hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VisitorHash(String);

impl VisitorHash {
    /// Wrap an already computed digest.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VisitorHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A recorded, accepted view. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewEvent {
    pub lesson_id: LessonId,
    pub visitor_hash: VisitorHash,
    pub created_at: DateTime<Utc>,
}

impl ViewEvent {
    pub fn new(lesson_id: LessonId, visitor_hash: VisitorHash, created_at: DateTime<Utc>) -> Self {
        Self {
            lesson_id,
            visitor_hash,
            created_at,
        }
    }

    /// Whether this event falls inside a window starting at `window_start`.
    pub fn is_within(&self, window_start: DateTime<Utc>) -> bool {
        self.created_at >= window_start
    }
}

/// Final state of a record-view request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Event inserted and counter incremented
    Counted { views_count: u64 },
    /// Event inserted but the counter increment failed
    CountedWithDrift,
    /// Same visitor viewed the lesson inside the dedup window
    Duplicate,
}

impl RecordOutcome {
    /// Whether the request produced a new view.
    pub fn counted(&self) -> bool {
        !matches!(self, Self::Duplicate)
    }
}
