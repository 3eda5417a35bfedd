//! AWS Lambda entry point for the lesson view services
//!
//! Deploy with `cargo lambda build --release --features lambda`.
//!
//! ## Environment Variables
//!
//! - `S3_BUCKET`: bucket holding lessons and view events (default: `lesson-views`)
//! - `S3_PREFIX`: key prefix for data objects (default: `lesson-views`)
//! - `CONFIG_S3_PREFIX`: key prefix of `config.toml` (default: `lesson-views/config`)
//! - `VIEW_WINDOW_HOURS`, `STORAGE_TIMEOUT_MS`, `ANONYMOUS_POLICY`, `SITEMAP_BASE_URL`: config overrides
//! - `RUST_LOG`: Log level (e.g., `info`, `debug`)

use lambda_http::{Error as LambdaError, service_fn};
use lesson_views::lambda::{AppState, handler};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the AWS Lambda function.
#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Lesson views Lambda starting...");

    let state = AppState::from_env().await?;
    let state = &state;
    lambda_http::run(service_fn(move |event| async move { handler(state, event).await })).await
}
