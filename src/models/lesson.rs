// src/models/lesson.rs

//! Lesson record as seen by the tracking services.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::LessonId;

/// A lesson with its denormalized view counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonRecord {
    /// Lesson identifier
    pub id: LessonId,

    /// Lesson title (Hebrew)
    pub title: String,

    /// Only published lessons are public
    #[serde(default)]
    pub published: bool,

    /// Last edit time, used as sitemap `lastmod`
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    /// Accepted views
    #[serde(default)]
    pub views_count: u64,
}

impl LessonRecord {
    /// Create an unpublished lesson with no views.
    pub fn new(id: LessonId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            published: false,
            updated_at: None,
            views_count: 0,
        }
    }

    /// Load lesson records from a JSON file.
    pub fn load_all(path: impl AsRef<Path>) -> Result<Vec<Self>> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Sort lessons newest edit first; lessons without an edit time go last.
pub fn sort_by_recent(lessons: &mut [LessonRecord]) {
    lessons.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}
