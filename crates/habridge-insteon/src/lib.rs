//! habridge Insteon
//!
//! Decoding and dispatch pipeline for Insteon PLM traffic.
//!
//! This crate provides:
//! - Frame decoding against a named-field schema ([`Msg`], [`schema`])
//! - Serial stream reassembly ([`MsgReader`])
//! - The message handler catalog ([`MessageHandler`], [`HandlerKind`])
//! - Device features with query tracking ([`DeviceFeature`])
//! - Per-device request queues with quiet time ([`RequestQueue`])
//! - Feature and device-type tables ([`Catalog`])
//! - Message routing across devices ([`Network`])

pub mod address;
pub mod catalog;
pub mod device;
pub mod error;
pub mod feature;
pub mod group;
pub mod handler;
pub mod msg;
pub mod network;
pub mod params;
pub mod poll;
pub mod queue;
pub mod schema;
pub mod state;

pub use address::{DeviceAddress, InsteonAddress, X10Address};
pub use catalog::Catalog;
pub use device::{DeviceConfig, DeviceInfo, FeatureEvent, InsteonDevice};
pub use error::{FieldError, InsteonError, Result};
pub use feature::{DeviceFeature, DispatchKey, QueryStatus, ReplyKind};
pub use handler::{
    ChangeType, HandlerContext, HandlerFilter, HandlerKind, HandlerOutcome, MessageHandler,
    OutboundCommand, StateUpdate,
};
pub use msg::{Msg, MsgReader, MsgType, ReadEvent};
pub use network::{DeviceEntry, Network, NetworkConfig};
pub use params::HandlerParams;
pub use poll::PollHandler;
pub use queue::RequestQueue;
pub use state::{OnOff, OpenClosed, State, Unit};

/// Start byte of every PLM frame
pub const START_BYTE: u8 = 0x02;

/// ACK byte appended by the modem to echoed commands
pub const ACK: u8 = 0x06;

/// NAK byte, either appended to an echo or sent alone when the modem is busy
pub const NAK: u8 = 0x15;

/// Product key of the 2844-222 motion sensor II
pub const MOTION_SENSOR_II_PRODUCT_KEY: &str = "F00.00.24";
