//! habridge Cloud
//!
//! Connector for an openHAB Cloud style relay.
//!
//! This crate provides:
//! - The relay session over Socket.IO ([`CloudClient`])
//! - A transport-independent connection state machine ([`ConnectionStateMachine`])
//! - Exponential backoff with jitter ([`Backoff`])
//! - Proxying of relayed HTTP requests with cancellation ([`RequestProxy`])

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod proxy;
pub mod reconnect;
pub mod state;

pub use backoff::Backoff;
pub use client::CloudClient;
pub use config::{BackoffConfig, CloudConfig};
pub use error::{CloudError, Result};
pub use events::{InboundEvent, ItemCommand, Notification, OutboundEvent, ProxyRequest, RequestId};
pub use proxy::{EventSink, RequestProxy};
pub use reconnect::ReconnectScheduler;
pub use state::{ConnectionState, ConnectionStateMachine, DisconnectReason, ReconnectAction};
