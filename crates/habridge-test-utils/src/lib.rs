//! Common test helpers for habridge tests
//!
//! - Port allocation
//! - Condition-based waiting (no hardcoded sleeps)
//! - A local HTTP server standing in for the openHAB REST API

use axum::{
    body::Body,
    extract::{Path, Query, Request},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{any, get},
    Router,
};
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Chunks served by `/stream`, in order
pub const STREAM_CHUNKS: [&str; 3] = ["first,", "second,", "third"];

/// Delay between `/stream` chunks
pub const STREAM_CHUNK_DELAY: Duration = Duration::from_millis(50);

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available TCP port for testing
pub async fn find_available_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait for an atomic counter to reach a target value
pub async fn wait_for_count(counter: &AtomicU32, target: u32, max_wait: Duration) -> bool {
    wait_for(
        || async { counter.load(Ordering::SeqCst) >= target },
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

/// Wait for a boolean flag to become true
pub async fn wait_for_flag(flag: &AtomicBool, max_wait: Duration) -> bool {
    wait_for(
        || async { flag.load(Ordering::SeqCst) },
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

// ============================================================================
// Test HTTP Server - RAII wrapper with proper cleanup
// ============================================================================

/// Local stand-in for the openHAB HTTP server.
///
/// Routes:
/// - `GET /rest/items`: JSON item list
/// - `ANY /echo/*rest`: JSON with method, path, query, headers and body
/// - `GET /stream`: [`STREAM_CHUNKS`] with a delay between chunks
/// - `GET /slow`: answers after 30 s
/// - `GET /status/:code`: empty response with that status
pub struct TestHttpServer {
    port: u16,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestHttpServer {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, Self::router()).await;
        });

        let _ = wait_for(
            || async move {
                tokio::net::TcpStream::connect(format!("127.0.0.1:{}", port))
                    .await
                    .is_ok()
            },
            DEFAULT_CHECK_INTERVAL,
            Duration::from_secs(5),
        )
        .await;

        Self {
            port,
            handle: Some(handle),
        }
    }

    fn router() -> Router {
        Router::new()
            .route("/rest/items", get(items))
            .route("/echo/*rest", any(echo))
            .route("/stream", get(stream))
            .route("/slow", get(slow))
            .route("/status/:code", get(status))
    }

    /// Base URL, e.g. `http://127.0.0.1:41234`
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop the server explicitly (also happens on drop)
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TestHttpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

// HTTP Handlers

async fn items() -> impl IntoResponse {
    Json(serde_json::json!([
        { "name": "Kitchen_Light", "type": "Switch", "state": "ON" },
        { "name": "Hall_Dimmer", "type": "Dimmer", "state": "40" },
    ]))
}

async fn echo(
    Path(rest): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    request: Request,
) -> impl IntoResponse {
    let method = request.method().to_string();
    let body = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .unwrap_or_default();
    let headers: HashMap<String, String> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect();
    Json(serde_json::json!({
        "method": method,
        "path": format!("/echo/{}", rest),
        "query": query,
        "headers": headers,
        "body": String::from_utf8_lossy(&body),
    }))
}

async fn stream() -> Response {
    let chunks = futures::stream::iter(STREAM_CHUNKS).then(|chunk| async move {
        tokio::time::sleep(STREAM_CHUNK_DELAY).await;
        Ok::<_, std::io::Error>(Bytes::from_static(chunk.as_bytes()))
    });
    Response::builder()
        .header("content-type", "text/plain")
        .body(Body::from_stream(chunks))
        .unwrap()
}

async fn slow() -> impl IntoResponse {
    tokio::time::sleep(Duration::from_secs(30)).await;
    "too late"
}

async fn status(Path(code): Path<u16>) -> impl IntoResponse {
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}
