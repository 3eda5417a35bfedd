// src/models/mod.rs

//! Domain models for the tracking services.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod engagement;
mod lesson;
mod view;
mod wire;

// Re-export all public types
pub use config::{
    AnonymousPolicy, Config, LoggingConfig, MAX_WINDOW_HOURS, ReporterConfig, SitemapConfig,
    StorageConfig, TrackingConfig,
};
pub use engagement::{Comment, Like, LikeState, MAX_COMMENT_CHARS, Viewer, validate_comment};
pub use lesson::{LessonRecord, sort_by_recent};
pub use view::{LessonId, MAX_LESSON_ID_LEN, RecordOutcome, ViewEvent, VisitorHash};
pub use wire::{TrackViewBody, TrackViewResponse};
