// src/services/reporter.rs

//! Client view reporter.
//!
//! Issues at most one record-view call per lesson per session and supplies
//! a durable pseudonymous visitor id. Failures never reach the caller: they
//! are logged and folded into "not counted".

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;
use url::Url;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{ReporterConfig, TrackViewBody, TrackViewResponse};
use crate::services::identity::VISITOR_ID_HEADER;
use crate::utils::http;

/// Durable storage for the visitor id (survives sessions).
#[async_trait]
pub trait VisitorIdStore: Send + Sync {
    async fn load(&self) -> Result<Option<String>>;
    async fn save(&self, visitor_id: &str) -> Result<()>;
}

/// Visitor id kept in a single file.
#[derive(Debug, Clone)]
pub struct FileVisitorStore {
    path: PathBuf,
}

impl FileVisitorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl VisitorIdStore for FileVisitorStore {
    async fn load(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let id = content.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn save(&self, visitor_id: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, visitor_id).await?;
        Ok(())
    }
}

/// Visitor id kept in memory.
#[derive(Debug, Default)]
pub struct MemoryVisitorStore {
    value: Mutex<Option<String>>,
}

#[async_trait]
impl VisitorIdStore for MemoryVisitorStore {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.value.lock().await.clone())
    }

    async fn save(&self, visitor_id: &str) -> Result<()> {
        *self.value.lock().await = Some(visitor_id.to_string());
        Ok(())
    }
}

/// Session-scoped suppression flags, keyed by lesson.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Set the flag; returns `false` if it was already set.
    async fn try_claim(&self, key: &str) -> bool;

    /// Clear a flag set by [`try_claim`](Self::try_claim).
    async fn release(&self, key: &str);

    async fn is_set(&self, key: &str) -> bool;
}

/// In-memory session flags; dropped with the session.
#[derive(Debug, Default)]
pub struct SessionFlags {
    flags: Mutex<HashSet<String>>,
}

#[async_trait]
impl SessionStore for SessionFlags {
    async fn try_claim(&self, key: &str) -> bool {
        self.flags.lock().await.insert(key.to_string())
    }

    async fn release(&self, key: &str) {
        self.flags.lock().await.remove(key);
    }

    async fn is_set(&self, key: &str) -> bool {
        self.flags.lock().await.contains(key)
    }
}

/// Network leg of a view report.
#[async_trait]
pub trait ViewTransport: Send + Sync {
    async fn send(&self, lesson_id: &str, visitor_id: &str) -> Result<TrackViewResponse>;
}

/// Record-view calls over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl HttpTransport {
    /// Create a transport from reporter settings.
    pub fn new(config: &ReporterConfig) -> Result<Self> {
        Ok(Self {
            client: http::create_client(config)?,
            endpoint: Url::parse(&config.endpoint)?,
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ViewTransport for HttpTransport {
    async fn send(&self, lesson_id: &str, visitor_id: &str) -> Result<TrackViewResponse> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header(VISITOR_ID_HEADER, visitor_id)
            .json(&TrackViewBody::new(lesson_id));
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key).bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if is_permanent_rejection(status) {
            let message = response
                .json::<TrackViewResponse>()
                .await
                .ok()
                .and_then(|body| body.error)
                .unwrap_or_else(|| status.to_string());
            return Err(AppError::invalid_input(message));
        }
        Ok(response.error_for_status()?.json().await?)
    }
}

/// 4xx answers other than timeouts and throttling: resending cannot help.
fn is_permanent_rejection(status: reqwest::StatusCode) -> bool {
    status.is_client_error()
        && status != reqwest::StatusCode::REQUEST_TIMEOUT
        && status != reqwest::StatusCode::TOO_MANY_REQUESTS
}

/// Where the reporter runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// A real reader session
    Interactive,
    /// Pre-rendering or other non-interactive execution; never reports
    Headless,
}

impl Environment {
    pub fn from_headless_flag(headless: bool) -> Self {
        if headless { Self::Headless } else { Self::Interactive }
    }
}

/// Why a report was skipped without a network call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyId,
    Headless,
    AlreadyReported,
}

/// Result of one report attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    Counted,
    NotCounted,
    Skipped(SkipReason),
    /// The server refused the report; not resent this session
    Rejected(String),
    /// Transport or server failure; a later report may try again
    Failed(String),
}

impl ReportOutcome {
    pub fn counted(&self) -> bool {
        matches!(self, Self::Counted)
    }
}

/// Session suppression key for a lesson.
pub fn session_key(lesson_id: &str) -> String {
    format!("viewed_{}", lesson_id)
}

/// Reports lesson views once per session.
pub struct ViewReporter<V, S, T> {
    visitor_ids: V,
    session: S,
    transport: T,
    environment: Environment,
    id_lock: Mutex<()>,
}

impl<V, S, T> ViewReporter<V, S, T>
where
    V: VisitorIdStore,
    S: SessionStore,
    T: ViewTransport,
{
    pub fn new(visitor_ids: V, session: S, transport: T) -> Self {
        Self {
            visitor_ids,
            session,
            transport,
            environment: Environment::Interactive,
            id_lock: Mutex::new(()),
        }
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Read the durable visitor id, creating and storing one on first use.
    pub async fn get_or_create_visitor_id(&self) -> Result<String> {
        let _guard = self.id_lock.lock().await;
        if let Some(id) = self.visitor_ids.load().await? {
            return Ok(id);
        }
        let id = Uuid::new_v4().to_string();
        self.visitor_ids.save(&id).await?;
        log::debug!("Created visitor id {}", id);
        Ok(id)
    }

    /// Report a view; `true` only when the server counted it.
    pub async fn report_view(&self, lesson_id: &str) -> bool {
        self.try_report(lesson_id).await.counted()
    }

    /// Report a view and describe what happened.
    pub async fn try_report(&self, lesson_id: &str) -> ReportOutcome {
        let lesson_id = lesson_id.trim();
        if lesson_id.is_empty() {
            return ReportOutcome::Skipped(SkipReason::EmptyId);
        }
        if self.environment == Environment::Headless {
            return ReportOutcome::Skipped(SkipReason::Headless);
        }

        let key = session_key(lesson_id);
        if !self.session.try_claim(&key).await {
            return ReportOutcome::Skipped(SkipReason::AlreadyReported);
        }

        let visitor_id = match self.get_or_create_visitor_id().await {
            Ok(id) => id,
            Err(e) => {
                log::warn!("Visitor id unavailable, reporting without it: {}", e);
                String::new()
            }
        };

        match self.transport.send(lesson_id, &visitor_id).await {
            Ok(response) if response.success => {
                if response.counted.unwrap_or(false) {
                    ReportOutcome::Counted
                } else {
                    ReportOutcome::NotCounted
                }
            }
            Ok(response) => {
                let message = response.error.unwrap_or_else(|| "unknown error".to_string());
                log::error!("Error tracking view of {}: {}", lesson_id, message);
                self.session.release(&key).await;
                ReportOutcome::Failed(message)
            }
            Err(AppError::InvalidInput(message)) => {
                log::warn!("View of {} rejected: {}", lesson_id, message);
                ReportOutcome::Rejected(message)
            }
            Err(e) => {
                log::error!("Error tracking view of {}: {}", lesson_id, e);
                self.session.release(&key).await;
                ReportOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::TempDir;

    use crate::utils::testing;

    /// Transport answering from a script and counting calls.
    struct FakeTransport {
        calls: AtomicUsize,
        counted: bool,
        fail: bool,
        reject: bool,
        last_visitor: Mutex<Option<String>>,
    }

    impl FakeTransport {
        fn answering(counted: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                counted,
                fail: false,
                reject: false,
                last_visitor: Mutex::new(None),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::answering(false)
            }
        }

        fn rejecting() -> Self {
            Self {
                reject: true,
                ..Self::answering(false)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ViewTransport for FakeTransport {
        async fn send(&self, _lesson_id: &str, visitor_id: &str) -> Result<TrackViewResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_visitor.lock().await = Some(visitor_id.to_string());
            if self.fail {
                return Err(AppError::storage("connection refused"));
            }
            if self.reject {
                return Err(AppError::invalid_input("lessonId is required"));
            }
            Ok(TrackViewResponse::counted(self.counted))
        }
    }

    fn reporter(
        transport: FakeTransport,
    ) -> ViewReporter<MemoryVisitorStore, SessionFlags, FakeTransport> {
        ViewReporter::new(
            MemoryVisitorStore::default(),
            SessionFlags::default(),
            transport,
        )
    }

    #[tokio::test]
    async fn test_reports_once_per_session() {
        let reporter = reporter(FakeTransport::answering(true));

        assert!(reporter.report_view("L1").await);
        assert!(!reporter.report_view("L1").await);
        assert_eq!(reporter.transport().calls(), 1);
        assert!(reporter.session().is_set("viewed_L1").await);

        // Another lesson is independent
        assert!(reporter.report_view("L2").await);
        assert_eq!(reporter.transport().calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_reports_issue_one_call() {
        let reporter = reporter(FakeTransport::answering(true));
        let (a, b) = tokio::join!(reporter.report_view("L1"), reporter.report_view("L1"));
        assert!(a ^ b);
        assert_eq!(reporter.transport().calls(), 1);
    }

    #[tokio::test]
    async fn test_not_counted_still_suppresses() {
        let reporter = reporter(FakeTransport::answering(false));
        assert_eq!(reporter.try_report("L1").await, ReportOutcome::NotCounted);
        assert_eq!(
            reporter.try_report("L1").await,
            ReportOutcome::Skipped(SkipReason::AlreadyReported)
        );
        assert_eq!(reporter.transport().calls(), 1);
    }

    #[tokio::test]
    async fn test_skips_without_calls() {
        let reporter = reporter(FakeTransport::answering(true));
        assert_eq!(
            reporter.try_report("  ").await,
            ReportOutcome::Skipped(SkipReason::EmptyId)
        );

        let headless = reporter.with_environment(Environment::from_headless_flag(true));
        assert_eq!(
            headless.try_report("L1").await,
            ReportOutcome::Skipped(SkipReason::Headless)
        );
        assert_eq!(headless.transport().calls(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_swallowed_and_retryable() {
        let reporter = reporter(FakeTransport::failing());
        assert!(!reporter.report_view("L1").await);
        assert!(!reporter.session().is_set("viewed_L1").await);

        // A later page load tries again
        assert!(matches!(reporter.try_report("L1").await, ReportOutcome::Failed(_)));
        assert_eq!(reporter.transport().calls(), 2);
    }

    #[tokio::test]
    async fn test_rejection_is_not_resent() {
        let reporter = reporter(FakeTransport::rejecting());
        assert_eq!(
            reporter.try_report("L1").await,
            ReportOutcome::Rejected("lessonId is required".to_string())
        );
        for _ in 0..2 {
            assert!(!reporter.report_view("L1").await);
        }
        assert_eq!(reporter.transport().calls(), 1);
        assert!(reporter.session().is_set("viewed_L1").await);
    }

    fn http_reporter(
        endpoint: String,
    ) -> ViewReporter<MemoryVisitorStore, SessionFlags, HttpTransport> {
        let config = ReporterConfig {
            endpoint,
            ..ReporterConfig::default()
        };
        ViewReporter::new(
            MemoryVisitorStore::default(),
            SessionFlags::default(),
            HttpTransport::new(&config).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_http_bad_request_sent_once_per_session() {
        let (base, requests) = testing::spawn_server(|_, _| {
            testing::response(
                "400 Bad Request",
                &[("Content-Type", "application/json")],
                r#"{"success":false,"error":"Invalid input: bad lesson id"}"#,
            )
        })
        .await;
        let reporter = http_reporter(format!("{}/functions/v1/track-view", base));

        assert_eq!(
            reporter.try_report("bad.id").await,
            ReportOutcome::Rejected("Invalid input: bad lesson id".to_string())
        );
        assert!(!reporter.report_view("bad.id").await);
        assert!(!reporter.report_view("bad.id").await);
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_http_server_error_is_retried_later() {
        let (base, requests) = testing::spawn_server(|index, _| {
            if index == 0 {
                testing::response(
                    "500 Internal Server Error",
                    &[("Content-Type", "application/json")],
                    r#"{"success":false,"error":"Failed to record view"}"#,
                )
            } else {
                testing::response(
                    "200 OK",
                    &[("Content-Type", "application/json")],
                    r#"{"success":true,"counted":true}"#,
                )
            }
        })
        .await;
        let reporter = http_reporter(base);

        assert!(matches!(reporter.try_report("L1").await, ReportOutcome::Failed(_)));
        assert!(reporter.report_view("L1").await);

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let sent = requests[1].to_lowercase();
        assert!(sent.starts_with("post "));
        assert!(sent.contains("x-visitor-id: "));
        assert!(sent.contains(r#"{"lessonid":"l1"}"#));
    }

    #[tokio::test]
    async fn test_visitor_id_is_stable_and_sent() {
        let reporter = reporter(FakeTransport::answering(true));
        let first = reporter.get_or_create_visitor_id().await.unwrap();
        let second = reporter.get_or_create_visitor_id().await.unwrap();
        assert_eq!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());

        reporter.report_view("L1").await;
        let sent = reporter.transport().last_visitor.lock().await.clone();
        assert_eq!(sent, Some(first));
    }

    #[tokio::test]
    async fn test_file_visitor_store_survives_sessions() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("client/visitor_id");

        let first = ViewReporter::new(
            FileVisitorStore::new(&path),
            SessionFlags::default(),
            FakeTransport::answering(true),
        );
        let id = first.get_or_create_visitor_id().await.unwrap();

        let second = ViewReporter::new(
            FileVisitorStore::new(&path),
            SessionFlags::default(),
            FakeTransport::answering(true),
        );
        assert_eq!(second.get_or_create_visitor_id().await.unwrap(), id);
        // New session, same lesson: reported again
        assert!(second.report_view("L1").await);
    }

    #[test]
    fn test_environment_from_flag() {
        assert_eq!(Environment::from_headless_flag(false), Environment::Interactive);
        assert_eq!(Environment::from_headless_flag(true), Environment::Headless);
    }

    #[test]
    fn test_http_transport_rejects_bad_endpoint() {
        let config = ReporterConfig {
            endpoint: "not a url".to_string(),
            ..ReporterConfig::default()
        };
        assert!(HttpTransport::new(&config).is_err());
    }
}
