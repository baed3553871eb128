//! Proxy Integration Tests
//!
//! These tests run relayed requests against a real local HTTP server:
//! - header, content and finished events in order
//! - header filtering and query forwarding
//! - local failures surfacing as responseError
//! - cancellation of a request in flight

use habridge_cloud::events::OutboundEvent;
use habridge_cloud::proxy::CANCELLED;
use habridge_cloud::{CloudConfig, ProxyRequest, RequestProxy};
use habridge_test_utils::{
    find_available_port, wait_for, TestHttpServer, DEFAULT_CHECK_INTERVAL, STREAM_CHUNKS,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;

type Proxy = RequestProxy<mpsc::UnboundedSender<OutboundEvent>>;

fn proxy_for(base: &str) -> (Proxy, mpsc::UnboundedReceiver<OutboundEvent>) {
    let mut config = CloudConfig::new("test-uuid", "test-secret");
    config.local_base_url = base.to_string();
    config.request_timeout_secs = 5;
    let (tx, rx) = mpsc::unbounded_channel();
    (RequestProxy::new(&config, tx).expect("proxy"), rx)
}

fn request(id: u64, method: &str, path: &str) -> ProxyRequest {
    ProxyRequest {
        id,
        method: method.to_string(),
        path: path.to_string(),
        headers: BTreeMap::new(),
        query: serde_json::Map::new(),
        body: String::new(),
    }
}

/// Collect events until the terminal one for `id`
async fn collect(rx: &mut mpsc::UnboundedReceiver<OutboundEvent>) -> Vec<OutboundEvent> {
    let mut events = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = rx.recv().await {
            let done = event.is_terminal();
            events.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .expect("timed out waiting for terminal event");
    events
}

fn body_of(events: &[OutboundEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            OutboundEvent::ResponseContentBinary { body, .. } => Some(body.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

// ============================================================================
// Successful requests
// ============================================================================

#[tokio::test]
async fn test_get_items() {
    let server = TestHttpServer::start().await;
    let (proxy, mut rx) = proxy_for(&server.url());

    proxy.handle_request(request(1, "GET", "/rest/items"));
    let events = collect(&mut rx).await;

    let OutboundEvent::ResponseHeader {
        id,
        status_code,
        status_text,
        headers,
    } = &events[0]
    else {
        panic!("expected header first, got {:?}", events[0]);
    };
    assert_eq!(*id, 1);
    assert_eq!(*status_code, 200);
    assert_eq!(status_text, "OK");
    assert_eq!(headers["content-type"], "application/json");

    assert_eq!(events.last(), Some(&OutboundEvent::ResponseFinished { id: 1 }));
    let items: Value = serde_json::from_slice(&body_of(&events)).unwrap();
    assert_eq!(items[0]["name"], "Kitchen_Light");
    assert_eq!(proxy.in_flight(), 0);
}

#[tokio::test]
async fn test_streamed_body_arrives_in_chunks() {
    let server = TestHttpServer::start().await;
    let (proxy, mut rx) = proxy_for(&server.url());

    proxy.handle_request(request(2, "GET", "/stream"));
    let events = collect(&mut rx).await;

    let chunks = events
        .iter()
        .filter(|e| matches!(e, OutboundEvent::ResponseContentBinary { .. }))
        .count();
    assert!(chunks >= 2, "expected several content events, got {}", chunks);
    assert_eq!(body_of(&events), STREAM_CHUNKS.concat().as_bytes());
    assert_eq!(events.last(), Some(&OutboundEvent::ResponseFinished { id: 2 }));
}

#[tokio::test]
async fn test_headers_query_and_body_forwarded() {
    let server = TestHttpServer::start().await;
    let (proxy, mut rx) = proxy_for(&server.url());

    let mut req = request(3, "post", "/echo/items/42");
    req.headers.insert("Content-Length".into(), "999".into());
    req.headers.insert("Host".into(), "myopenhab.org".into());
    req.headers.insert("X-Forwarded-For".into(), "10.0.0.1".into());
    req.query = json!({ "state": "ON" }).as_object().unwrap().clone();
    req.body = "ON".into();
    proxy.handle_request(req);

    let events = collect(&mut rx).await;
    let echoed: Value = serde_json::from_slice(&body_of(&events)).unwrap();
    assert_eq!(echoed["method"], "POST");
    assert!(echoed["path"].as_str().unwrap().ends_with("items/42"));
    assert_eq!(echoed["query"]["state"], "ON");
    assert_eq!(echoed["body"], "ON");
    assert_eq!(echoed["headers"]["x-forwarded-for"], "10.0.0.1");
    assert_eq!(echoed["headers"]["content-length"], "2");
    assert_ne!(echoed["headers"]["host"], "myopenhab.org");
}

#[tokio::test]
async fn test_error_status_is_not_a_proxy_error() {
    let server = TestHttpServer::start().await;
    let (proxy, mut rx) = proxy_for(&server.url());

    proxy.handle_request(request(4, "GET", "/status/404"));
    let events = collect(&mut rx).await;
    assert!(matches!(
        events[0],
        OutboundEvent::ResponseHeader {
            status_code: 404,
            ..
        }
    ));
    assert_eq!(events.last(), Some(&OutboundEvent::ResponseFinished { id: 4 }));
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_unreachable_server_reports_error() {
    let port = find_available_port().await;
    let (proxy, mut rx) = proxy_for(&format!("http://127.0.0.1:{}", port));

    proxy.handle_request(request(5, "GET", "/rest/items"));
    let events = collect(&mut rx).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], OutboundEvent::ResponseError { id: 5, .. }));
    assert_eq!(proxy.in_flight(), 0);
}

#[tokio::test]
async fn test_bad_method_reports_error() {
    let server = TestHttpServer::start().await;
    let (proxy, mut rx) = proxy_for(&server.url());

    proxy.handle_request(request(6, "GET POST", "/rest/items"));
    let events = collect(&mut rx).await;
    assert!(matches!(&events[..], [OutboundEvent::ResponseError { id: 6, .. }]));
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_in_flight_request() {
    let server = TestHttpServer::start().await;
    let (proxy, mut rx) = proxy_for(&server.url());

    proxy.handle_request(request(7, "GET", "/slow"));
    assert!(proxy.is_in_flight(7));

    assert!(proxy.cancel(7).await);
    assert!(!proxy.is_in_flight(7));

    let events = collect(&mut rx).await;
    assert_eq!(
        events,
        vec![OutboundEvent::ResponseError {
            id: 7,
            status_text: CANCELLED.to_string()
        }]
    );

    // nothing else for this id, and a second cancel is a no-op
    assert!(!proxy.cancel(7).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_cancel_mid_stream_stops_content() {
    let server = TestHttpServer::start().await;
    let (proxy, mut rx) = proxy_for(&server.url());

    proxy.handle_request(request(8, "GET", "/stream"));
    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(first, OutboundEvent::ResponseHeader { id: 8, .. }));

    proxy.cancel(8).await;
    let mut rest = Vec::new();
    while let Ok(event) = rx.try_recv() {
        rest.push(event);
    }
    assert_eq!(
        rest.last(),
        Some(&OutboundEvent::ResponseError {
            id: 8,
            status_text: CANCELLED.to_string()
        })
    );

    tokio::time::sleep(STREAM_CHUNKS.len() as u32 * habridge_test_utils::STREAM_CHUNK_DELAY * 2)
        .await;
    assert!(rx.try_recv().is_err(), "no events after cancellation");
}

#[tokio::test]
async fn test_concurrent_requests_tracked_separately() {
    let server = TestHttpServer::start().await;
    let (proxy, mut rx) = proxy_for(&server.url());

    proxy.handle_request(request(10, "GET", "/slow"));
    proxy.handle_request(request(11, "GET", "/rest/items"));

    let mut finished = false;
    while let Some(event) = rx.recv().await {
        if event == (OutboundEvent::ResponseFinished { id: 11 }) {
            finished = true;
            break;
        }
        assert_eq!(event.request_id(), Some(11));
    }
    assert!(finished);
    assert!(
        wait_for(
            || async { proxy.in_flight() == 1 },
            DEFAULT_CHECK_INTERVAL,
            Duration::from_secs(2)
        )
        .await
    );
    assert!(proxy.is_in_flight(10));
    proxy.abort_all();
    assert_eq!(proxy.in_flight(), 0);
}
