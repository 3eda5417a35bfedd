// src/lambda/mod.rs

//! AWS Lambda adapter for the HTTP handlers.
//!
//! One function serves both endpoints:
//! 1. paths ending in `sitemap` / `sitemap.xml` render the sitemap
//! 2. everything else is a record-view call

use lambda_http::{Body, Error as LambdaError, Request, Response};
use tracing::{info, instrument};

use crate::config::LambdaConfigLoader;
use crate::error::Result;
use crate::models::Config;
use crate::routes::{self, Route};
use crate::services::{SitemapBuilder, ViewRecorder};
use crate::storage::s3::S3Storage;

/// Per-container state shared by all invocations.
pub struct AppState {
    recorder: ViewRecorder<S3Storage>,
    sitemap: SitemapBuilder,
}

impl AppState {
    pub fn new(storage: S3Storage, config: &Config) -> Self {
        Self {
            recorder: ViewRecorder::new(storage, config.tracking.clone()),
            sitemap: SitemapBuilder::new(&config.sitemap),
        }
    }

    /// Build state from the environment: S3 storage plus config from S3.
    pub async fn from_env() -> Result<Self> {
        let storage = S3Storage::from_env().await?;
        let config = LambdaConfigLoader::from_env(storage.clone())
            .load_or_default()
            .await?;
        info!(
            "Config loaded: window={}h, storage_timeout={}ms, anonymous_policy={:?}",
            config.tracking.window_hours,
            config.tracking.storage_timeout_ms,
            config.tracking.anonymous_policy
        );
        Ok(Self::new(storage, &config))
    }
}

/// Main Lambda handler function.
#[instrument(skip(state, event), fields(method = %event.method(), path = %event.uri().path()))]
pub async fn handler(
    state: &AppState,
    event: Request,
) -> std::result::Result<Response<Body>, LambdaError> {
    let route = Route::for_path(event.uri().path());
    let (parts, body) = event.into_parts();
    let request = http::Request::from_parts(parts, body.to_vec());

    let response = match route {
        Route::TrackView => routes::track_view(&state.recorder, &request).await,
        Route::Sitemap => {
            routes::sitemap(&state.sitemap, state.recorder.store(), &request).await
        }
    };

    info!("{:?} answered {}", route, response.status());
    Ok(response.map(Body::from))
}
