//! Insteon and X10 devices

use crate::feature::{DeviceFeature, QueryStatus};
use crate::group::{GroupMessage, GroupMessageStateMachine};
use crate::handler::{OutboundCommand, EXTENDED_QUERY_QUIET_TIME};
use crate::queue::RequestQueue;
use crate::{DeviceAddress, InsteonError, Msg, Result, State};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Per-device options from the network configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    /// Sleeping motion sensors: do not query on every contact message
    #[serde(default)]
    pub heartbeat_only: bool,
}

/// Identity of a device as seen by its handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub address: DeviceAddress,
    pub product_key: Option<String>,
    pub config: DeviceConfig,
}

impl DeviceInfo {
    pub fn has_product_key(&self, key: &str) -> bool {
        self.product_key.as_deref() == Some(key)
    }
}

/// A state change published by a feature
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureEvent {
    pub address: DeviceAddress,
    pub feature: String,
    pub state: State,
}

/// A device with its features, group duplicate state and request queue
#[derive(Debug)]
pub struct InsteonDevice {
    info: DeviceInfo,
    features: Vec<DeviceFeature>,
    group_state: HashMap<u8, GroupMessageStateMachine>,
    queue: RequestQueue,
}

impl InsteonDevice {
    pub fn new(info: DeviceInfo) -> Self {
        Self {
            info,
            features: Vec::new(),
            group_state: HashMap::new(),
            queue: RequestQueue::new(),
        }
    }

    pub fn add_feature(&mut self, feature: DeviceFeature) -> Result<()> {
        if self.feature(feature.name()).is_some() {
            return Err(InsteonError::Catalog(format!(
                "duplicate feature {} on {}",
                feature.name(),
                self.info.address
            )));
        }
        self.features.push(feature);
        Ok(())
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn address(&self) -> DeviceAddress {
        self.info.address
    }

    pub fn features(&self) -> &[DeviceFeature] {
        &self.features
    }

    pub fn feature(&self, name: &str) -> Option<&DeviceFeature> {
        self.features.iter().find(|f| f.name() == name)
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// All-link group carried by a message, if any
    pub fn message_group(msg: &Msg) -> Option<u8> {
        if msg.is_all_link_broadcast() {
            msg.get_address("toAddress").ok().map(|a| a.low_byte())
        } else if msg.is_cleanup() {
            msg.get_byte("command2").ok()
        } else {
            None
        }
    }

    /// Run the group duplicate state machine for this message
    fn is_duplicate(&mut self, msg: &Msg, cmd1: u8, now: Instant) -> bool {
        let (group, kind, cmd) = if msg.is_all_link_broadcast() {
            let Ok(to) = msg.get_address("toAddress") else {
                return false;
            };
            let kind = if cmd1 == 0x06 {
                GroupMessage::Success
            } else {
                GroupMessage::Bcast
            };
            (to.low_byte(), kind, cmd1)
        } else if msg.is_cleanup() {
            let Ok(group) = msg.get_byte("command2") else {
                return false;
            };
            (group, GroupMessage::Clean, 0)
        } else {
            return false;
        };
        !self
            .group_state
            .entry(group)
            .or_default()
            .action(kind, cmd, now)
    }

    /// Dispatch a message to every feature and enqueue the follow-up commands
    pub fn handle_message(&mut self, msg: &Msg, cmd1: u8, now: Instant) -> Vec<FeatureEvent> {
        let group = Self::message_group(msg);
        let duplicate = self.is_duplicate(msg, cmd1, now);
        let mut events = Vec::new();
        let mut commands = Vec::new();
        for feature in self.features.iter_mut() {
            let outcome = feature.dispatch(&self.info, msg, cmd1, group, duplicate);
            if let Some(update) = outcome.update {
                debug!("{} {} -> {}", self.info.address, feature.name(), update.state);
                events.push(FeatureEvent {
                    address: self.info.address,
                    feature: feature.name().to_string(),
                    state: update.state,
                });
            }
            for command in outcome.commands {
                commands.push((feature.name().to_string(), command));
            }
        }
        for (feature, command) in commands {
            self.apply_command(&feature, command, now);
        }
        events
    }

    fn apply_command(&mut self, feature: &str, command: OutboundCommand, now: Instant) {
        match command {
            OutboundCommand::Poll { delay } => {
                self.poll_feature(feature, delay, now);
            }
            OutboundCommand::PollDevice { delay } => {
                self.poll_all(delay, now);
            }
            OutboundCommand::ExtendedQuery { cmd1, cmd2 } => {
                self.send_extended_query(feature, cmd1, cmd2, now);
            }
        }
    }

    fn enqueue_for(&mut self, feature: &str, msg: Msg, delay: Duration, now: Instant) {
        self.queue.enqueue(feature, msg, delay, now);
        if let Some(f) = self.features.iter_mut().find(|f| f.name() == feature) {
            f.set_query_status(QueryStatus::QueryPending);
        }
    }

    /// Enqueue the poll message of one feature. Returns false if it has none.
    pub fn poll_feature(&mut self, feature: &str, delay: Duration, now: Instant) -> bool {
        let address = self.info.address.insteon();
        let Some(msg) = self
            .feature(feature)
            .and_then(|f| f.make_poll_msg(address))
        else {
            return false;
        };
        self.enqueue_for(feature, msg, delay, now);
        true
    }

    /// Enqueue the poll message of every feature; identical polls collapse
    /// into one request. Returns the number of features polled.
    pub fn poll_all(&mut self, delay: Duration, now: Instant) -> usize {
        let names: Vec<String> = self.features.iter().map(|f| f.name().to_string()).collect();
        let polled = names
            .iter()
            .filter(|name| self.poll_feature(name, delay, now))
            .count();
        if polled > 0 {
            info!("polling {} features of {}", polled, self.info.address);
        }
        polled
    }

    pub fn send_extended_query(&mut self, feature: &str, cmd1: u8, cmd2: u8, now: Instant) {
        let Some(address) = self.info.address.insteon() else {
            warn!("cannot send extended query to X10 device {}", self.info.address);
            return;
        };
        let msg = Msg::extended(address, 0x1F, cmd1, cmd2, &[])
            .with_quiet_time(EXTENDED_QUERY_QUIET_TIME);
        self.enqueue_for(feature, msg, Duration::ZERO, now);
    }

    /// Next message to write, honouring due times and quiet time
    pub fn next_request(&mut self, now: Instant) -> Option<Msg> {
        self.queue.next_due(now).map(|e| e.msg)
    }

    pub fn next_wake(&self) -> Option<Instant> {
        self.queue.next_wake()
    }

    /// Modem echo for a message we sent to this device
    pub fn on_echo(&mut self, echo: &Msg, now: Instant) {
        if echo.is_nak() {
            debug!("{} NAK echo, retrying", self.info.address);
            self.queue.retry_last(now);
        } else {
            self.queue.acknowledge(echo);
        }
    }

    /// The modem was busy and dropped our last write
    pub fn on_modem_busy(&mut self, now: Instant) -> bool {
        self.queue.retry_last(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::DispatchKey;
    use crate::{HandlerParams, InsteonAddress, MessageHandler, PollHandler};

    const ADDR: InsteonAddress = InsteonAddress::new(0xAA, 0xBB, 0xCC);

    fn handler(name: &str) -> MessageHandler {
        MessageHandler::from_name(name, &HandlerParams::new()).unwrap()
    }

    fn dimmer_device() -> InsteonDevice {
        let mut dev = InsteonDevice::new(DeviceInfo {
            address: ADDR.into(),
            product_key: Some("F00.00.1A".to_string()),
            config: DeviceConfig::default(),
        });
        dev.add_feature(
            DeviceFeature::new("dimmer", "GenericDimmer")
                .with_handler(DispatchKey::any(0x11), handler("LightOnDimmerHandler"))
                .with_default_handler(handler("DimmerRequestReplyHandler"))
                .with_poll_handler(PollHandler::Default),
        )
        .unwrap();
        dev.add_feature(
            DeviceFeature::new("lastheardfrom", "GenericLastTime")
                .with_default_handler(handler("LastTimeHandler")),
        )
        .unwrap();
        dev
    }

    fn frame(flags: u8, to: [u8; 3], cmd1: u8, cmd2: u8) -> Msg {
        Msg::from_frame(&[
            0x02, 0x50, 0xAA, 0xBB, 0xCC, to[0], to[1], to[2], flags, cmd1, cmd2,
        ])
        .unwrap()
    }

    #[test]
    fn test_light_on_schedules_delayed_poll() {
        let mut dev = dimmer_device();
        let now = Instant::now();
        let events = dev.handle_message(&frame(0xCF, [0, 0, 1], 0x11, 0x00), 0x11, now);
        let dimmer: Vec<_> = events.iter().filter(|e| e.feature == "dimmer").collect();
        assert_eq!(dimmer.len(), 1);
        assert_eq!(dimmer[0].state, State::Percent(100));
        assert_eq!(
            dev.feature("dimmer").unwrap().query_status(),
            QueryStatus::QueryPending
        );
        assert!(dev.next_request(now).is_none());
        let poll = dev.next_request(now + Duration::from_millis(1000)).unwrap();
        assert_eq!(poll.get_byte("command1").unwrap(), 0x19);
    }

    #[test]
    fn test_poll_reply_answers_query() {
        let mut dev = dimmer_device();
        let now = Instant::now();
        assert_eq!(dev.poll_all(Duration::ZERO, now), 1);
        dev.next_request(now).unwrap();
        let events = dev.handle_message(&frame(0x2B, [0x11, 0x22, 0x33], 0x03, 0x7F), 0x03, now);
        assert!(events
            .iter()
            .any(|e| e.feature == "dimmer" && e.state == State::Percent(49)));
        assert_eq!(
            dev.feature("dimmer").unwrap().query_status(),
            QueryStatus::QueryAnswered
        );
    }

    #[test]
    fn test_group_duplicates_suppressed() {
        let mut dev = dimmer_device();
        let now = Instant::now();
        let bcast = frame(0xCF, [0, 0, 1], 0x11, 0x00);
        let cleanup = frame(0x4F, [0x11, 0x22, 0x33], 0x11, 0x01);
        let first = dev.handle_message(&bcast, 0x11, now);
        assert!(first.iter().any(|e| e.feature == "dimmer"));
        let again = dev.handle_message(&cleanup, 0x11, now);
        assert!(!again.iter().any(|e| e.feature == "dimmer"));
    }

    #[test]
    fn test_echo_nak_retries() {
        let mut dev = dimmer_device();
        let now = Instant::now();
        dev.poll_feature("dimmer", Duration::ZERO, now);
        let sent = dev.next_request(now).unwrap();
        let mut bytes = sent.as_bytes().to_vec();
        bytes.push(crate::NAK);
        dev.on_echo(&Msg::from_frame(&bytes).unwrap(), now);
        let later = now + Duration::from_secs(1);
        assert_eq!(dev.next_request(later), Some(sent));
    }

    #[test]
    fn test_duplicate_feature_rejected() {
        let mut dev = dimmer_device();
        assert!(dev
            .add_feature(DeviceFeature::new("dimmer", "GenericDimmer"))
            .is_err());
    }
}
