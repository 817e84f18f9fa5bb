//! Request classification and admission.
//!
//! The dispatcher never waits for a scan: a valid `/scan` request is queued
//! and answered with `202 Accepted` right away. Rejected scan requests still
//! produce an error notification so the transfer has an outcome.

use crate::core::{TransferError, TransferFailure, TransferInfo};
use crate::manager::WorkerPool;
use crate::notify::NotificationPublisher;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;

/// Largest request body accepted on `/scan`.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

const JSON_CONTENT_TYPE: &str = "application/json";

/// What an inbound request asks for, by path alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// `/scan`
    Scan,
    /// `/` or the empty path
    Default,
    /// Anything else
    Unrecognized,
}

impl RequestKind {
    /// Classifies `path`. The method is not considered.
    pub fn classify(path: &str) -> Self {
        match path {
            "/scan" => Self::Scan,
            "" | "/" => Self::Default,
            _ => Self::Unrecognized,
        }
    }
}

/// Shared state of the HTTP handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pool: Arc<WorkerPool>,
    publisher: NotificationPublisher,
}

impl AppState {
    /// Creates handler state over `pool` and `publisher`.
    pub fn new(pool: Arc<WorkerPool>, publisher: NotificationPublisher) -> Self {
        Self { pool, publisher }
    }

    /// Returns the worker pool.
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error_message: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        error_message: message.into(),
    };
    (status, Json(body)).into_response()
}

/// Builds the router. Every path goes through [`dispatch`].
pub fn router(state: AppState) -> Router {
    Router::new().fallback(dispatch).with_state(state)
}

/// Classifies the request and answers it.
pub async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    tracing::info!(method = %request.method(), path = %path, "Request received");

    match RequestKind::classify(&path) {
        RequestKind::Scan => {
            let (parts, body) = request.into_parts();
            handle_scan(&state, &parts.headers, body).await
        }
        RequestKind::Default => StatusCode::OK.into_response(),
        RequestKind::Unrecognized => {
            tracing::info!(path = %path, "No handler for request path");
            error_response(
                StatusCode::NOT_FOUND,
                format!("Unrecognized request path: {path}"),
            )
        }
    }
}

async fn handle_scan(state: &AppState, headers: &HeaderMap, body: Body) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .unwrap_or_default();

    if !is_json(&content_type) {
        tracing::error!(content_type = %content_type, "Wrong request Content-type for scanning");
        // The body only feeds identity recovery here; an unreadable one
        // leaves the identity empty.
        let body = to_bytes(body, MAX_BODY_BYTES).await.unwrap_or_default();
        let failure = TransferFailure::content_type(content_type);
        return reject(state, StatusCode::BAD_REQUEST, &body, failure).await;
    }

    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            let failure = TransferFailure::MalformedRequest {
                reason: e.to_string(),
            };
            return reject(state, StatusCode::BAD_REQUEST, &[], failure).await;
        }
    };

    let info = match TransferInfo::from_json_slice(&body) {
        Ok(info) => info,
        Err(e) => {
            let failure = TransferFailure::MalformedRequest {
                reason: e.to_string(),
            };
            return reject(state, StatusCode::BAD_REQUEST, &body, failure).await;
        }
    };

    let transfer_id = info.transfer_id().to_string();
    match state.pool.submit(info) {
        Ok(()) => {
            tracing::info!(transfer_id = %transfer_id, "Scan request accepted");
            StatusCode::ACCEPTED.into_response()
        }
        Err(e) => {
            let failure = TransferFailure::QueueRejected {
                reason: e.to_string(),
            };
            reject(state, StatusCode::SERVICE_UNAVAILABLE, &body, failure).await
        }
    }
}

fn is_json(content_type: &str) -> bool {
    content_type
        .get(..JSON_CONTENT_TYPE.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(JSON_CONTENT_TYPE))
}

/// Publishes `failure` for whatever identity the body carries and answers
/// with `status`. The notification gets one delivery attempt.
async fn reject(
    state: &AppState,
    status: StatusCode,
    body: &[u8],
    failure: TransferFailure,
) -> Response {
    let info = TransferInfo::from_partial_body(body);
    let message = failure.to_string();
    tracing::warn!(
        transfer_id = %info.transfer_id(),
        failure = failure.kind(),
        status = status.as_u16(),
        "Scan request rejected"
    );

    let error = TransferError::from_transfer(&info, message.as_str());
    state.publisher.notify_rejected(&error).await;
    error_response(status, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MockDownloader, MockScanner};
    use crate::config::{required_values, Settings, SettingsHandle};
    use crate::manager::ScanOrchestrator;
    use crate::notify::{EventKind, MemoryPublisher};
    use axum::http::{Method, Request as HttpRequest};
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        memory: Arc<MemoryPublisher>,
        pool: Arc<WorkerPool>,
        _staging: TempDir,
    }

    fn test_app(workers: usize, capacity: usize, scan_latency: Duration) -> TestApp {
        let staging = TempDir::new().unwrap();
        let source = required_values().with("TEMP_DIR", staging.path().to_string_lossy());
        let settings = Arc::new(SettingsHandle::fixed(Settings::from_source(&source).unwrap()));
        let memory = Arc::new(MemoryPublisher::new());
        let publisher = NotificationPublisher::new(Arc::clone(&memory) as _, Arc::clone(&settings));

        let orchestrator = ScanOrchestrator::builder()
            .downloader(MockDownloader::with_content(b"data".to_vec()))
            .scanner(MockScanner::new_clean().with_latency(scan_latency))
            .publisher(publisher.clone())
            .settings(settings)
            .build()
            .unwrap();
        let pool = Arc::new(WorkerPool::start(Arc::new(orchestrator), workers, capacity));

        TestApp {
            router: router(AppState::new(Arc::clone(&pool), publisher)),
            memory,
            pool,
            _staging: staging,
        }
    }

    fn scan_request(content_type: &str, body: &str) -> Request {
        HttpRequest::builder()
            .method(Method::POST)
            .uri("/scan")
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_classify() {
        assert_eq!(RequestKind::classify("/scan"), RequestKind::Scan);
        assert_eq!(RequestKind::classify("/"), RequestKind::Default);
        assert_eq!(RequestKind::classify(""), RequestKind::Default);
        assert_eq!(RequestKind::classify("/scan/"), RequestKind::Unrecognized);
        assert_eq!(RequestKind::classify("/health"), RequestKind::Unrecognized);
    }

    #[test]
    fn test_is_json() {
        assert!(is_json("application/json"));
        assert!(is_json("Application/JSON; charset=utf-8"));
        assert!(!is_json("text/plain"));
        assert!(!is_json("application/js"));
        assert!(!is_json(""));
    }

    #[tokio::test]
    async fn test_valid_scan_is_accepted() {
        let app = test_app(1, 4, Duration::ZERO);
        let response = app
            .router
            .oneshot(scan_request(
                "application/json",
                r#"{"TransferId":"t-1","fileName":"a.txt","FILEPATH":"uploads"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());

        app.pool.shutdown().await;
        let completed = app.memory.events_of(EventKind::Completed);
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].data["transferId"], "t-1");
        assert_eq!(completed[0].data["filePath"], "uploads");
    }

    #[tokio::test]
    async fn test_wrong_content_type_is_rejected_and_reported() {
        let app = test_app(1, 4, Duration::ZERO);
        let response = app
            .router
            .oneshot(scan_request("text/plain", r#"{"transferId":"t-2"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"errorMessage": "Wrong request Content-type: text/plain"})
        );

        let errors = app.memory.events_of(EventKind::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].data["transferId"], "t-2");
        assert_eq!(app.pool.stats().finished, 0);
    }

    #[tokio::test]
    async fn test_wrong_content_type_wins_over_oversized_body() {
        let app = test_app(1, 4, Duration::ZERO);
        let oversized = "x".repeat(2 * MAX_BODY_BYTES);
        let response = app
            .router
            .oneshot(scan_request("text/plain", &oversized))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"errorMessage": "Wrong request Content-type: text/plain"})
        );

        let errors = app.memory.events_of(EventKind::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].data["message"], "Wrong request Content-type: text/plain");
        assert_eq!(errors[0].data["transferId"], "");
    }

    #[tokio::test]
    async fn test_oversized_json_body_is_malformed() {
        let app = test_app(1, 4, Duration::ZERO);
        let oversized = format!(r#"{{"transferId":"{}"}}"#, "x".repeat(2 * MAX_BODY_BYTES));
        let response = app
            .router
            .oneshot(scan_request("application/json", &oversized))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["errorMessage"]
            .as_str()
            .unwrap()
            .starts_with("Malformed request body:"));
        assert_eq!(app.memory.events_of(EventKind::Error).len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected_and_reported() {
        let app = test_app(1, 4, Duration::ZERO);
        let response = app
            .router
            .oneshot(scan_request("application/json", "[1, 2, 3]"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["errorMessage"]
            .as_str()
            .unwrap()
            .starts_with("Malformed request body:"));
        assert_eq!(app.memory.events_of(EventKind::Error).len(), 1);
    }

    #[tokio::test]
    async fn test_default_path_does_nothing() {
        let app = test_app(1, 4, Duration::ZERO);
        let request = HttpRequest::builder().uri("/").body(Body::empty()).unwrap();
        let response = app.router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
        assert!(app.memory.is_empty());
        assert_eq!(app.pool.stats().pending, 0);
    }

    #[tokio::test]
    async fn test_unrecognized_path_is_not_found() {
        let app = test_app(1, 4, Duration::ZERO);
        let request = HttpRequest::builder()
            .method(Method::POST)
            .uri("/upload?x=1")
            .body(Body::empty())
            .unwrap();
        let response = app.router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"errorMessage": "Unrecognized request path: /upload"})
        );
        assert!(app.memory.is_empty());
    }

    #[tokio::test]
    async fn test_closed_pool_answers_service_unavailable() {
        let app = test_app(1, 4, Duration::ZERO);
        app.pool.shutdown().await;

        let response = app
            .router
            .oneshot(scan_request("application/json", r#"{"transferId":"t-9"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"errorMessage": "Scan service is shutting down"})
        );
        let errors = app.memory.events_of(EventKind::Error);
        assert_eq!(errors[0].data["transferId"], "t-9");
        assert_eq!(errors[0].data["message"], "Scan service is shutting down");
    }

    #[tokio::test]
    async fn test_full_queue_answers_service_unavailable() {
        let app = test_app(1, 1, Duration::from_millis(300));
        let body = r#"{"transferId":"t-busy"}"#;

        let first = app.router.clone().oneshot(scan_request("application/json", body)).await.unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        tokio::time::timeout(Duration::from_secs(2), async {
            while app.pool.stats().active == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let second = app.router.clone().oneshot(scan_request("application/json", body)).await.unwrap();
        assert_eq!(second.status(), StatusCode::ACCEPTED);

        let third = app.router.clone().oneshot(scan_request("application/json", body)).await.unwrap();
        assert_eq!(third.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_json(third).await,
            serde_json::json!({"errorMessage": "Scan queue is full"})
        );

        app.pool.shutdown().await;
        assert_eq!(app.memory.events_of(EventKind::Completed).len(), 2);
        assert_eq!(app.memory.events_of(EventKind::Error).len(), 1);
    }
}
