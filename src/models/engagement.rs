// src/models/engagement.rs

//! Likes and comments attached to a lesson.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::LessonId;

/// Maximum comment length in characters.
pub const MAX_COMMENT_CHARS: usize = 1000;

/// The authenticated user on whose behalf an engagement call is made.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Viewer {
    pub user_id: String,
}

impl Viewer {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// A like by one user on one lesson. Unique per pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Like {
    pub lesson_id: LessonId,
    pub user_id: String,
}

/// Like state after a toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LikeState {
    pub liked: bool,
    pub likes_count: u64,
}

/// A reader comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub lesson_id: LessonId,
    pub user_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    /// Build a new comment, validating its content.
    pub fn new(lesson_id: LessonId, viewer: &Viewer, content: &str) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            lesson_id,
            user_id: viewer.user_id.clone(),
            content: validate_comment(content)?,
            created_at: Utc::now(),
        })
    }
}

/// Trim comment content and check its length bounds.
pub fn validate_comment(content: &str) -> Result<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation("תוכן התגובה נדרש"));
    }
    if trimmed.chars().count() > MAX_COMMENT_CHARS {
        return Err(AppError::validation("תגובה חייבת להיות עד 1,000 תווים"));
    }
    Ok(trimmed.to_string())
}
