//! Relay event payloads
//!
//! Inbound: `request`, `cancel`, `command`. Outbound: the four proxy
//! response events plus notifications and item updates.
//!
//! Every payload is a single JSON object. Response bodies in
//! `responseContentBinary` travel as a base64 string in its `body` key, not
//! as a Socket.IO binary attachment, so the relay has to decode them before
//! writing the HTTP response.

use crate::{CloudError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Relay-assigned identifier of a proxied request
pub type RequestId = u64;

/// A relayed HTTP request to replay against the local server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRequest {
    pub id: RequestId,
    pub method: String,
    pub path: String,
    #[serde(default, deserialize_with = "lenient_headers")]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query: Map<String, Value>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub body: String,
}

/// Header values as sent by the relay may be numbers or lists
fn lenient_headers<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k, value_text(v)))
        .collect())
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(value_text)
}

fn value_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Array(items) => items
            .into_iter()
            .map(value_text)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

/// An item command sent from the cloud side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCommand {
    pub item: String,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Request(ProxyRequest),
    Cancel { id: RequestId },
    Command(ItemCommand),
}

#[derive(Deserialize)]
struct CancelPayload {
    id: RequestId,
}

impl InboundEvent {
    pub const NAMES: [&'static str; 3] = ["request", "cancel", "command"];

    /// Request id of a payload that may not parse as a whole
    pub fn raw_request_id(payload: &Value) -> Option<RequestId> {
        payload.get("id").and_then(Value::as_u64)
    }

    /// Parse the JSON payload of a named relay event
    pub fn parse(event: &str, payload: Value) -> Result<Self> {
        let invalid = |reason: String| CloudError::InvalidEvent {
            event: event.to_string(),
            reason,
        };
        match event {
            "request" => serde_json::from_value(payload)
                .map(InboundEvent::Request)
                .map_err(|e| invalid(e.to_string())),
            "cancel" => serde_json::from_value::<CancelPayload>(payload)
                .map(|c| InboundEvent::Cancel { id: c.id })
                .map_err(|e| invalid(e.to_string())),
            "command" => serde_json::from_value(payload)
                .map(InboundEvent::Command)
                .map_err(|e| invalid(e.to_string())),
            other => Err(invalid(format!("unexpected event {}", other))),
        }
    }
}

/// Something to emit to the relay
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    ResponseHeader {
        id: RequestId,
        status_code: u16,
        status_text: String,
        headers: BTreeMap<String, String>,
    },
    ResponseContentBinary {
        id: RequestId,
        body: Vec<u8>,
    },
    ResponseFinished {
        id: RequestId,
    },
    ResponseError {
        id: RequestId,
        status_text: String,
    },
    Notification(Notification),
    BroadcastNotification(Notification),
    LogNotification(Notification),
    ItemUpdate {
        item_name: String,
        item_status: String,
    },
}

/// Push or log notification for the cloud's users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Target user for direct notifications
    #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub severity: String,
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::ResponseHeader { .. } => "responseHeader",
            OutboundEvent::ResponseContentBinary { .. } => "responseContentBinary",
            OutboundEvent::ResponseFinished { .. } => "responseFinished",
            OutboundEvent::ResponseError { .. } => "responseError",
            OutboundEvent::Notification(_) => "notification",
            OutboundEvent::BroadcastNotification(_) => "broadcastnotification",
            OutboundEvent::LogNotification(_) => "lognotification",
            OutboundEvent::ItemUpdate { .. } => "itemupdate",
        }
    }

    /// Request id for proxy responses
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            OutboundEvent::ResponseHeader { id, .. }
            | OutboundEvent::ResponseContentBinary { id, .. }
            | OutboundEvent::ResponseFinished { id }
            | OutboundEvent::ResponseError { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// JSON payload as sent on the socket; binary bodies are base64
    pub fn payload(&self) -> Value {
        match self {
            OutboundEvent::ResponseHeader {
                id,
                status_code,
                status_text,
                headers,
            } => json!({
                "id": id,
                "responseStatusCode": status_code,
                "responseStatusText": status_text,
                "headers": headers,
            }),
            OutboundEvent::ResponseContentBinary { id, body } => json!({
                "id": id,
                "body": STANDARD.encode(body),
            }),
            OutboundEvent::ResponseFinished { id } => json!({ "id": id }),
            OutboundEvent::ResponseError { id, status_text } => json!({
                "id": id,
                "responseStatusText": status_text,
            }),
            OutboundEvent::Notification(n)
            | OutboundEvent::BroadcastNotification(n)
            | OutboundEvent::LogNotification(n) => {
                serde_json::to_value(n).unwrap_or(Value::Null)
            }
            OutboundEvent::ItemUpdate {
                item_name,
                item_status,
            } => json!({
                "itemName": item_name,
                "itemStatus": item_status,
            }),
        }
    }

    /// True for responseFinished and responseError
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OutboundEvent::ResponseFinished { .. } | OutboundEvent::ResponseError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request() {
        let event = InboundEvent::parse(
            "request",
            json!({
                "id": 17,
                "method": "GET",
                "path": "/rest/items",
                "headers": { "accept": "application/json" },
                "query": { "recursive": "false" },
            }),
        )
        .unwrap();
        let InboundEvent::Request(req) = event else {
            panic!("expected request");
        };
        assert_eq!(req.id, 17);
        assert_eq!(req.headers["accept"], "application/json");
        assert_eq!(req.query["recursive"], "false");
        assert!(req.body.is_empty());
    }

    #[test]
    fn test_parse_cancel_and_command() {
        assert_eq!(
            InboundEvent::parse("cancel", json!({ "id": 3 })).unwrap(),
            InboundEvent::Cancel { id: 3 }
        );
        assert_eq!(
            InboundEvent::parse("command", json!({ "item": "Light", "command": "ON" })).unwrap(),
            InboundEvent::Command(ItemCommand {
                item: "Light".into(),
                command: "ON".into()
            })
        );
    }

    #[test]
    fn test_parse_request_with_loose_types() {
        let payload = json!({
            "id": 5,
            "method": "GET",
            "path": "/rest/items",
            "headers": {
                "x-forwarded-port": 443,
                "accept": ["text/html", "application/json"],
                "x-empty": null,
            },
            "body": null,
        });
        let InboundEvent::Request(req) = InboundEvent::parse("request", payload).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(req.headers["x-forwarded-port"], "443");
        assert_eq!(req.headers["accept"], "text/html, application/json");
        assert!(!req.headers.contains_key("x-empty"));
        assert!(req.body.is_empty());
    }

    #[test]
    fn test_binary_body_is_base64_text() {
        let body: Vec<u8> = (0u8..=255).collect();
        let chunk = OutboundEvent::ResponseContentBinary {
            id: 8,
            body: body.clone(),
        };
        let encoded = chunk.payload()["body"].as_str().unwrap().to_string();
        assert_eq!(STANDARD.decode(encoded).unwrap(), body);
    }

    #[test]
    fn test_raw_request_id() {
        assert_eq!(InboundEvent::raw_request_id(&json!({ "id": 12, "path": 3 })), Some(12));
        assert_eq!(InboundEvent::raw_request_id(&json!({ "path": "/" })), None);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(InboundEvent::parse("request", json!({ "id": 1 })).is_err());
        assert!(InboundEvent::parse("cancel", json!({})).is_err());
        assert!(InboundEvent::parse("bogus", json!({})).is_err());
    }

    #[test]
    fn test_outbound_payloads() {
        let header = OutboundEvent::ResponseHeader {
            id: 5,
            status_code: 404,
            status_text: "Not Found".into(),
            headers: BTreeMap::from([("content-type".into(), "text/plain".into())]),
        };
        assert_eq!(header.name(), "responseHeader");
        assert_eq!(
            header.payload(),
            json!({
                "id": 5,
                "responseStatusCode": 404,
                "responseStatusText": "Not Found",
                "headers": { "content-type": "text/plain" },
            })
        );

        let chunk = OutboundEvent::ResponseContentBinary {
            id: 5,
            body: b"hi".to_vec(),
        };
        assert_eq!(chunk.payload()["body"], "aGk=");
        assert_eq!(chunk.payload()["id"], 5);
        assert!(!chunk.is_terminal());
        assert!(OutboundEvent::ResponseFinished { id: 5 }.is_terminal());

        let note = OutboundEvent::LogNotification(Notification {
            user_id: None,
            message: "door open".into(),
            icon: "door".into(),
            severity: "warn".into(),
        });
        assert_eq!(note.name(), "lognotification");
        assert_eq!(
            note.payload(),
            json!({ "message": "door open", "icon": "door", "severity": "warn" })
        );
        assert_eq!(note.request_id(), None);
    }
}
