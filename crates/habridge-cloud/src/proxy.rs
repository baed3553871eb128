//! Relayed HTTP requests against the local server
//!
//! Every request runs on its own task and is tracked in the in-flight map
//! until exactly one terminal event (`responseFinished` or `responseError`)
//! has been emitted for it.

use crate::events::{OutboundEvent, ProxyRequest, RequestId};
use crate::{CloudConfig, CloudError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::{AbortHandle, Abortable};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, HOST};
use reqwest::{Method, Url};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Status text of the error emitted for a cancelled request
pub const CANCELLED: &str = "cancelled";

/// Destination of outbound relay events
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn emit(&self, event: OutboundEvent);
}

#[async_trait]
impl EventSink for mpsc::UnboundedSender<OutboundEvent> {
    async fn emit(&self, event: OutboundEvent) {
        if self.send(event).is_err() {
            debug!("event sink closed");
        }
    }
}

#[async_trait]
impl EventSink for mpsc::Sender<OutboundEvent> {
    async fn emit(&self, event: OutboundEvent) {
        if self.send(event).await.is_err() {
            debug!("event sink closed");
        }
    }
}

/// Serializes emits of one request against its cancellation. `false` once
/// the terminal event has been sent.
type Gate = Arc<Mutex<bool>>;

struct InFlightRequest {
    method: String,
    path: String,
    started: Instant,
    gate: Gate,
    abort: AbortHandle,
}

/// HTTP bridge between relay events and the local server
pub struct RequestProxy<S: EventSink> {
    base: Url,
    http: reqwest::Client,
    sink: Arc<S>,
    in_flight: Arc<DashMap<RequestId, InFlightRequest>>,
}

impl<S: EventSink> Clone for RequestProxy<S> {
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            http: self.http.clone(),
            sink: self.sink.clone(),
            in_flight: self.in_flight.clone(),
        }
    }
}

impl<S: EventSink> RequestProxy<S> {
    pub fn new(config: &CloudConfig, sink: S) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            base: Url::parse(&config.local_base_url)?,
            http,
            sink: Arc::new(sink),
            in_flight: Arc::new(DashMap::new()),
        })
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, id: RequestId) -> bool {
        self.in_flight.contains_key(&id)
    }

    /// Local URL for a relayed path and query
    pub fn target_url(&self, path: &str, query: &serde_json::Map<String, Value>) -> Result<Url> {
        let mut url = self.base.join(path)?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                match value {
                    Value::Array(values) => {
                        for v in values {
                            pairs.append_pair(key, &query_value(v));
                        }
                    }
                    other => {
                        pairs.append_pair(key, &query_value(other));
                    }
                }
            }
        }
        Ok(url)
    }

    /// Start proxying a request. Must be called inside a tokio runtime.
    pub fn handle_request(&self, request: ProxyRequest) {
        let id = request.id;
        if self.in_flight.contains_key(&id) {
            warn!("request {} already in flight, ignoring duplicate", id);
            return;
        }
        let (abort, registration) = AbortHandle::new_pair();
        let gate: Gate = Arc::new(Mutex::new(true));
        debug!("proxying request {}: {} {}", id, request.method, request.path);
        self.in_flight.insert(
            id,
            InFlightRequest {
                method: request.method.clone(),
                path: request.path.clone(),
                started: Instant::now(),
                gate: gate.clone(),
                abort,
            },
        );

        let this = self.clone();
        tokio::spawn(Abortable::new(
            async move { this.run(request, gate).await },
            registration,
        ));
    }

    /// Abort a request and report it as cancelled. Unknown ids are ignored.
    pub async fn cancel(&self, id: RequestId) -> bool {
        let Some((_, entry)) = self.in_flight.remove(&id) else {
            debug!("cancel for unknown request {}", id);
            return false;
        };
        entry.abort.abort();
        info!(
            "cancelled request {}: {} {} after {:?}",
            id,
            entry.method,
            entry.path,
            entry.started.elapsed()
        );
        let mut open = entry.gate.lock().await;
        if *open {
            *open = false;
            self.sink
                .emit(OutboundEvent::ResponseError {
                    id,
                    status_text: CANCELLED.to_string(),
                })
                .await;
        }
        true
    }

    /// Abort every request without emitting anything, e.g. on shutdown
    pub fn abort_all(&self) {
        let ids: Vec<RequestId> = self.in_flight.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, entry)) = self.in_flight.remove(&id) {
                entry.abort.abort();
            }
        }
    }

    async fn run(&self, request: ProxyRequest, gate: Gate) {
        let id = request.id;
        let mut response = match self.send(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("request {} to local server failed: {}", id, e);
                self.finish(id, &gate, error_event(id, &e)).await;
                return;
            }
        };

        let status = response.status();
        let header = OutboundEvent::ResponseHeader {
            id,
            status_code: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers: response_headers(response.headers()),
        };
        if !self.emit_open(&gate, header).await {
            return;
        }

        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    let event = OutboundEvent::ResponseContentBinary {
                        id,
                        body: chunk.to_vec(),
                    };
                    if !self.emit_open(&gate, event).await {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("reading response body of request {} failed: {}", id, e);
                    self.finish(id, &gate, error_event(id, &e)).await;
                    return;
                }
            }
        }
        debug!("request {} finished with {}", id, status);
        self.finish(id, &gate, OutboundEvent::ResponseFinished { id })
            .await;
    }

    async fn send(&self, request: &ProxyRequest) -> Result<reqwest::Response> {
        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| CloudError::InvalidEvent {
                event: "request".to_string(),
                reason: format!("bad method {}", request.method),
            })?;
        let url = self.target_url(&request.path, &request.query)?;
        let mut builder = self
            .http
            .request(method, url)
            .headers(request_headers(&request.headers));
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }
        Ok(builder.send().await?)
    }

    async fn emit_open(&self, gate: &Gate, event: OutboundEvent) -> bool {
        let open = gate.lock().await;
        if !*open {
            return false;
        }
        self.sink.emit(event).await;
        true
    }

    async fn finish(&self, id: RequestId, gate: &Gate, event: OutboundEvent) {
        let mut open = gate.lock().await;
        if !*open {
            return;
        }
        *open = false;
        self.in_flight.remove(&id);
        self.sink.emit(event).await;
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn error_event(id: RequestId, error: &dyn std::fmt::Display) -> OutboundEvent {
    OutboundEvent::ResponseError {
        id,
        status_text: error.to_string(),
    }
}

/// Relayed headers minus Content-Length and Host. Invalid entries are dropped.
fn request_headers(headers: &BTreeMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            debug!("dropping invalid header name {}", name);
            continue;
        };
        if name == CONTENT_LENGTH || name == HOST {
            continue;
        }
        match HeaderValue::from_str(value) {
            Ok(value) => {
                map.append(name, value);
            }
            Err(_) => debug!("dropping invalid value for header {}", name),
        }
    }
    map
}

fn response_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        out.entry(name.as_str().to_string())
            .and_modify(|v| {
                v.push_str(", ");
                v.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn proxy() -> RequestProxy<mpsc::UnboundedSender<OutboundEvent>> {
        let mut config = CloudConfig::new("uuid", "secret");
        config.local_base_url = "http://127.0.0.1:8080/".to_string();
        let (tx, _rx) = mpsc::unbounded_channel();
        RequestProxy::new(&config, tx).unwrap()
    }

    #[test]
    fn test_target_url_with_query() {
        let query = json!({ "type": "Switch", "recursive": false, "tags": ["a", "b"] });
        let url = proxy()
            .target_url("/rest/items", query.as_object().unwrap())
            .unwrap();
        assert_eq!(url.path(), "/rest/items");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("type".into(), "Switch".into())));
        assert!(pairs.contains(&("recursive".into(), "false".into())));
        assert!(pairs.contains(&("tags".into(), "a".into())));
        assert!(pairs.contains(&("tags".into(), "b".into())));
    }

    #[test]
    fn test_request_headers_skip_length_and_host() {
        let headers = BTreeMap::from([
            ("Content-Length".to_string(), "12".to_string()),
            ("host".to_string(), "myopenhab.org".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
            ("bad header".to_string(), "x".to_string()),
        ]);
        let map = request_headers(&headers);
        assert_eq!(map.len(), 1);
        assert_eq!(map["accept"], "application/json");
    }

    #[test]
    fn test_response_headers_joined() {
        let mut map = HeaderMap::new();
        map.append("set-cookie", HeaderValue::from_static("a=1"));
        map.append("set-cookie", HeaderValue::from_static("b=2"));
        let out = response_headers(&map);
        assert_eq!(out["set-cookie"], "a=1, b=2");
    }

    #[tokio::test]
    async fn test_cancel_unknown_is_noop() {
        assert!(!proxy().cancel(99).await);
    }
}
