//! Lesson views CLI
//!
//! Local execution entry point. For AWS Lambda, use `lesson-views-lambda`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lesson_views::{
    error::Result,
    models::{Config, LessonId, LessonRecord, RecordOutcome, Viewer},
    services::{
        EngagementService, Environment, FileVisitorStore, HttpTransport, SessionFlags, SitemapBuilder,
        ViewRecorder, ViewReporter, ViewRequest, VisitorIdentity, reconcile, reconcile_all,
        settle_period,
    },
    storage::{LessonStore, LocalStorage},
    utils::format_view_count,
};

/// Lesson view tracking tools
#[derive(Parser, Debug)]
#[command(
    name = "lesson-views",
    version,
    about = "Deduplicated lesson view tracking"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Data directory (default: `storage.root_dir` from the config)
    #[arg(short, long)]
    storage_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a view directly against local storage
    Record {
        lesson_id: String,

        #[arg(long, default_value = "unknown")]
        ip: String,

        #[arg(long, default_value = "unknown")]
        user_agent: String,

        /// Client visitor token
        #[arg(long, default_value = "")]
        visitor_id: String,
    },

    /// Report a view to the record-view endpoint
    Report {
        lesson_id: String,

        /// Override the configured endpoint
        #[arg(long)]
        endpoint: Option<String>,

        /// Run as a non-interactive pre-render: no view is reported
        #[arg(long)]
        headless: bool,
    },

    /// Import lesson records from a JSON file
    Import { path: PathBuf },

    /// Toggle a like on behalf of a user
    Like {
        lesson_id: String,

        #[arg(long)]
        user: String,
    },

    /// Add a comment on behalf of a user
    Comment {
        lesson_id: String,

        #[arg(long)]
        user: String,

        content: String,
    },

    /// List comments of a lesson
    Comments { lesson_id: String },

    /// Write the sitemap XML
    Sitemap {
        /// Output file (default: {storage_dir}/sitemap.xml)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Raise lagging view counters to the event count
    Reconcile {
        /// Single lesson to reconcile (default: all)
        lesson_id: Option<String>,
    },

    /// Validate configuration files
    Validate,

    /// Show stored lessons and their counters
    Info,
}

/// Initialize logging with the given default filter.
fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config is read before the logger exists so that its level applies
    let config_path = cli.config;
    let loaded = Config::load(&config_path);
    let level = match &loaded {
        _ if cli.verbose => "debug".to_string(),
        Ok(config) => config.logging.level.clone(),
        Err(_) => "info".to_string(),
    };
    init_logging(&level);

    let config = loaded.unwrap_or_else(|e| {
        log::warn!("Failed to load config from {}: {}", config_path.display(), e);
        log::warn!("Using default configuration.");
        Config::default()
    });

    let storage_dir = cli.storage_dir.unwrap_or_else(|| config.storage.root_dir.clone());
    let storage = LocalStorage::new(&storage_dir);

    match cli.command {
        Command::Record {
            lesson_id,
            ip,
            user_agent,
            visitor_id,
        } => {
            let recorder = ViewRecorder::new(storage, config.tracking.clone());
            let request = ViewRequest::new(
                LessonId::parse(&lesson_id)?,
                VisitorIdentity::new(ip, user_agent, visitor_id),
            );
            match recorder.record(&request).await? {
                RecordOutcome::Counted { views_count } => {
                    log::info!("Counted ({} views)", views_count);
                }
                RecordOutcome::CountedWithDrift => {
                    log::warn!("Counted, but the counter lags; run 'reconcile'");
                }
                RecordOutcome::Duplicate => log::info!("View already counted"),
            }
        }

        Command::Report {
            lesson_id,
            endpoint,
            headless,
        } => {
            let mut reporter_config = config.reporter.clone();
            if let Some(endpoint) = endpoint {
                reporter_config.endpoint = endpoint;
            }
            let reporter = ViewReporter::new(
                FileVisitorStore::new(&reporter_config.visitor_id_path),
                SessionFlags::default(),
                HttpTransport::new(&reporter_config)?,
            )
            .with_environment(Environment::from_headless_flag(headless));
            let outcome = reporter.try_report(&lesson_id).await;
            log::info!("Report outcome: {:?}", outcome);
        }

        Command::Import { path } => {
            let lessons = LessonRecord::load_all(&path)?;
            for lesson in &lessons {
                storage.upsert_lesson(lesson).await?;
            }
            log::info!("Imported {} lessons from {}", lessons.len(), path.display());
        }

        Command::Like { lesson_id, user } => {
            let service = EngagementService::new(storage);
            let state = service
                .toggle_like(&LessonId::parse(&lesson_id)?, Some(&Viewer::new(user)))
                .await?;
            log::info!(
                "{} ({} likes)",
                if state.liked { "Liked" } else { "Unliked" },
                state.likes_count
            );
        }

        Command::Comment {
            lesson_id,
            user,
            content,
        } => {
            let service = EngagementService::new(storage);
            let comment = service
                .add_comment(&LessonId::parse(&lesson_id)?, Some(&Viewer::new(user)), &content)
                .await?;
            log::info!("Comment {} added", comment.id);
        }

        Command::Comments { lesson_id } => {
            let service = EngagementService::new(storage);
            for comment in service.comments(&LessonId::parse(&lesson_id)?).await? {
                println!(
                    "{} [{}] {}",
                    comment.created_at.format("%Y-%m-%d %H:%M"),
                    comment.user_id,
                    comment.content
                );
            }
        }

        Command::Sitemap { output } => {
            let output = output.unwrap_or_else(|| storage_dir.join("sitemap.xml"));
            let xml = SitemapBuilder::new(&config.sitemap)
                .generate(&storage)
                .await?;
            tokio::fs::write(&output, xml).await?;
            log::info!("Sitemap saved to {}", output.display());
        }

        Command::Reconcile { lesson_id } => {
            let settle = settle_period(&config.tracking);
            let results = match lesson_id {
                Some(id) => vec![reconcile(&storage, &LessonId::parse(&id)?, settle).await?],
                None => reconcile_all(&storage, settle).await?,
            };
            for r in &results {
                if r.repaired() {
                    log::info!("{}: {} → {}", r.lesson_id, r.before, r.after);
                } else if r.skipped {
                    log::info!("{}: recent views, try again later", r.lesson_id);
                }
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK");
        }

        Command::Info => {
            log::info!("Storage directory: {}", storage_dir.display());
            let lessons = storage.lessons().await?;
            if lessons.is_empty() {
                log::info!("No lessons stored yet.");
            }
            for lesson in lessons {
                println!(
                    "{:<24} {:>8} {}{}",
                    lesson.id.as_str(),
                    format_view_count(lesson.views_count),
                    lesson.title,
                    if lesson.published { "" } else { " (draft)" }
                );
            }
        }
    }

    Ok(())
}
