// src/models/wire.rs

//! JSON bodies exchanged with the record-view endpoint.

use serde::{Deserialize, Serialize};

/// Request body of the record-view endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackViewBody {
    #[serde(rename = "lessonId", default, skip_serializing_if = "Option::is_none")]
    pub lesson_id: Option<String>,
}

impl TrackViewBody {
    pub fn new(lesson_id: impl Into<String>) -> Self {
        Self {
            lesson_id: Some(lesson_id.into()),
        }
    }
}

/// Response body of the record-view endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackViewResponse {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counted: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TrackViewResponse {
    pub fn counted(counted: bool) -> Self {
        Self {
            success: true,
            counted: Some(counted),
            message: (!counted).then(|| "View already counted".to_string()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            counted: None,
            message: None,
            error: Some(error.into()),
        }
    }
}
