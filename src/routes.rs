// src/routes.rs

//! HTTP handlers for the record-view and sitemap endpoints.
//!
//! Handlers take and return plain `http` types so that any transport (the
//! Lambda adapter, tests) can drive them.

use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{Method, Request, Response, StatusCode};

use crate::error::AppError;
use crate::models::{LessonId, TrackViewBody, TrackViewResponse};
use crate::services::identity::VisitorIdentity;
use crate::services::{SitemapBuilder, ViewRecorder, ViewRequest};
use crate::storage::{LessonStore, ViewStore};

const ALLOW_ORIGIN: &str = "*";
const TRACK_VIEW_ALLOW_HEADERS: &str =
    "authorization, x-client-info, apikey, content-type, x-visitor-id";
const SITEMAP_ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type";
const ALLOW_METHODS: &str = "POST, OPTIONS";

const JSON: &str = "application/json";
const XML: &str = "application/xml; charset=utf-8";

/// Which handler serves a request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    TrackView,
    Sitemap,
}

impl Route {
    /// Paths ending in `sitemap` or `sitemap.xml` serve the sitemap.
    pub fn for_path(path: &str) -> Self {
        let path = path.trim_end_matches('/');
        if path.ends_with("sitemap") || path.ends_with("sitemap.xml") {
            Self::Sitemap
        } else {
            Self::TrackView
        }
    }
}

/// Handle a record-view call.
pub async fn track_view<S: ViewStore>(
    recorder: &ViewRecorder<S>,
    request: &Request<Vec<u8>>,
) -> Response<String> {
    if request.method() == Method::OPTIONS {
        return with_track_view_cors(Response::new(String::new()));
    }

    let response = match record(recorder, request).await {
        Ok(counted) => json_response(StatusCode::OK, &TrackViewResponse::counted(counted)),
        Err(e) => error_response(&e),
    };
    with_track_view_cors(response)
}

async fn record<S: ViewStore>(
    recorder: &ViewRecorder<S>,
    request: &Request<Vec<u8>>,
) -> Result<bool, AppError> {
    if request.method() != Method::POST {
        return Err(AppError::method_not_allowed(request.method()));
    }

    let body: TrackViewBody = serde_json::from_slice(request.body())
        .map_err(|e| AppError::invalid_input(format!("malformed body: {}", e)))?;
    let raw_id = body
        .lesson_id
        .ok_or_else(|| AppError::invalid_input("lessonId is required"))?;
    let lesson_id = LessonId::parse(&raw_id)?;

    let identity = VisitorIdentity::from_headers(request.headers());
    let outcome = recorder
        .record(&ViewRequest::new(lesson_id, identity))
        .await?;
    Ok(outcome.counted())
}

/// Handle a sitemap request.
pub async fn sitemap<S: LessonStore>(
    builder: &SitemapBuilder,
    store: &S,
    request: &Request<Vec<u8>>,
) -> Response<String> {
    if request.method() == Method::OPTIONS {
        return with_sitemap_cors(Response::new(String::new()));
    }

    let response = match builder.generate(store).await {
        Ok(xml) => {
            let mut response = Response::new(xml);
            set_header(&mut response, CONTENT_TYPE, XML);
            response
        }
        Err(e) => {
            log::error!("Error generating sitemap: {}", e);
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &TrackViewResponse::failure(e.to_string()),
            )
        }
    };
    with_sitemap_cors(response)
}

/// Map an error to its status and a client-safe JSON body.
fn error_response(error: &AppError) -> Response<String> {
    let status = error.status();
    let message = match error {
        AppError::MethodNotAllowed(_) => "Method not allowed".to_string(),
        AppError::InvalidInput(message) => message.clone(),
        _ if error.is_storage() => {
            log::error!("Error recording view: {}", error);
            "Failed to record view".to_string()
        }
        _ => {
            log::error!("Error in track-view: {}", error);
            "Internal server error".to_string()
        }
    };
    json_response(status, &TrackViewResponse::failure(message))
}

fn json_response(status: StatusCode, body: &TrackViewResponse) -> Response<String> {
    let body = serde_json::to_string(body)
        .unwrap_or_else(|_| r#"{"success":false,"error":"Internal server error"}"#.to_string());
    let mut response = Response::new(body);
    *response.status_mut() = status;
    set_header(&mut response, CONTENT_TYPE, JSON);
    response
}

fn with_track_view_cors(mut response: Response<String>) -> Response<String> {
    set_header(&mut response, http::header::ACCESS_CONTROL_ALLOW_ORIGIN, ALLOW_ORIGIN);
    set_header(
        &mut response,
        http::header::ACCESS_CONTROL_ALLOW_HEADERS,
        TRACK_VIEW_ALLOW_HEADERS,
    );
    set_header(&mut response, http::header::ACCESS_CONTROL_ALLOW_METHODS, ALLOW_METHODS);
    response
}

fn with_sitemap_cors(mut response: Response<String>) -> Response<String> {
    set_header(&mut response, http::header::ACCESS_CONTROL_ALLOW_ORIGIN, ALLOW_ORIGIN);
    set_header(
        &mut response,
        http::header::ACCESS_CONTROL_ALLOW_HEADERS,
        SITEMAP_ALLOW_HEADERS,
    );
    response
}

fn set_header(response: &mut Response<String>, name: HeaderName, value: &'static str) {
    response
        .headers_mut()
        .insert(name, HeaderValue::from_static(value));
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::models::{LessonRecord, SitemapConfig, TrackingConfig};
    use crate::storage::{Faults, MemoryStorage};

    fn recorder(store: MemoryStorage) -> ViewRecorder<MemoryStorage> {
        ViewRecorder::new(store, TrackingConfig::default())
    }

    fn post(body: &str, token: &str) -> Request<Vec<u8>> {
        Request::builder()
            .method(Method::POST)
            .uri("/functions/v1/track-view")
            .header("x-forwarded-for", "1.2.3.4, 10.0.0.1")
            .header("user-agent", "UA-A")
            .header("x-visitor-id", token)
            .body(body.as_bytes().to_vec())
            .unwrap()
    }

    fn json(response: &Response<String>) -> serde_json::Value {
        serde_json::from_str(response.body()).unwrap()
    }

    fn assert_cors(response: &Response<String>) {
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(headers["access-control-allow-methods"], "POST, OPTIONS");
        assert!(
            headers["access-control-allow-headers"]
                .to_str()
                .unwrap()
                .contains("x-visitor-id")
        );
    }

    #[tokio::test]
    async fn test_record_then_duplicate_then_new_token() {
        let recorder = recorder(MemoryStorage::new());
        let body = r#"{"lessonId": "L1"}"#;

        let first = track_view(&recorder, &post(body, "V1")).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(json(&first), serde_json::json!({ "success": true, "counted": true }));
        assert_cors(&first);

        let second = track_view(&recorder, &post(body, "V1")).await;
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(
            json(&second),
            serde_json::json!({
                "success": true,
                "counted": false,
                "message": "View already counted"
            })
        );

        let third = track_view(&recorder, &post(body, "V2")).await;
        assert_eq!(json(&third)["counted"], true);

        let id = LessonId::parse("L1").unwrap();
        assert_eq!(recorder.views_count(&id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_options_preflight() {
        let recorder = recorder(MemoryStorage::new());
        let request = Request::builder()
            .method(Method::OPTIONS)
            .body(Vec::new())
            .unwrap();
        let response = track_view(&recorder, &request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.body().is_empty());
        assert_cors(&response);
    }

    #[tokio::test]
    async fn test_wrong_method() {
        // A write attempt would fail and turn the answer into a 500
        let recorder = recorder(MemoryStorage::with_faults(Faults {
            fail_inserts: true,
            fail_increments: true,
            ..Faults::default()
        }));
        let request = Request::builder()
            .method(Method::GET)
            .header("x-visitor-id", "V1")
            .body(br#"{"lessonId": "L1"}"#.to_vec())
            .unwrap();
        let response = track_view(&recorder, &request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(json(&response)["error"], "Method not allowed");
        assert_cors(&response);
        assert!(recorder.store().events().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_input() {
        let recorder = recorder(MemoryStorage::new());
        for body in ["{}", "not json", r#"{"lessonId": ""}"#, r#"{"lessonId": "a/b"}"#] {
            let response = track_view(&recorder, &post(body, "V1")).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {}", body);
            assert_cors(&response);
        }

        let response = track_view(&recorder, &post("{}", "V1")).await;
        assert_eq!(json(&response)["error"], "lessonId is required");
        assert_eq!(recorder.store().events().await.len(), 0);
    }

    #[tokio::test]
    async fn test_storage_failure_is_500() {
        let recorder = recorder(MemoryStorage::with_faults(Faults {
            fail_inserts: true,
            ..Faults::default()
        }));
        let response = track_view(&recorder, &post(r#"{"lessonId": "L1"}"#, "V1")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json(&response),
            serde_json::json!({ "success": false, "error": "Failed to record view" })
        );
        assert_cors(&response);
    }

    #[tokio::test]
    async fn test_increment_failure_still_counted() {
        let recorder = recorder(MemoryStorage::with_faults(Faults {
            fail_increments: true,
            ..Faults::default()
        }));
        let response = track_view(&recorder, &post(r#"{"lessonId": "L1"}"#, "V1")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(&response)["counted"], true);
    }

    #[tokio::test]
    async fn test_sitemap_handler() {
        let store = MemoryStorage::new();
        let mut lesson = LessonRecord::new(LessonId::parse("L1").unwrap(), "Title");
        lesson.published = true;
        store.upsert_lesson(&lesson).await.unwrap();

        let builder = SitemapBuilder::new(&SitemapConfig::default());
        let request = Request::builder()
            .method(Method::GET)
            .uri("/sitemap.xml")
            .body(Vec::new())
            .unwrap();
        let response = sitemap(&builder, &store, &request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], XML);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert!(response.body().contains("/lesson/L1</loc>"));
    }

    #[test]
    fn test_route_for_path() {
        assert_eq!(Route::for_path("/sitemap.xml"), Route::Sitemap);
        assert_eq!(Route::for_path("/functions/v1/generate-sitemap"), Route::Sitemap);
        assert_eq!(Route::for_path("/functions/v1/track-view"), Route::TrackView);
        assert_eq!(Route::for_path("/"), Route::TrackView);
    }
}
