//! Routing of modem traffic to devices

use crate::device::{DeviceConfig, FeatureEvent, InsteonDevice};
use crate::{
    Catalog, DeviceAddress, InsteonError, Msg, MsgReader, ReadEvent, Result, X10Address,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// X10 flag value of a command frame; 0x00 marks an address frame
pub const X10_COMMAND_FLAG: u8 = 0x80;

/// One configured device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub address: DeviceAddress,
    pub product_key: String,
    #[serde(default)]
    pub config: DeviceConfig,
}

/// Devices on the modem's network
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

/// All devices behind one modem, fed from the serial stream
#[derive(Debug, Default)]
pub struct Network {
    devices: BTreeMap<DeviceAddress, InsteonDevice>,
    reader: MsgReader,
    /// Last X10 address frame per house code
    x10_selected: HashMap<u8, X10Address>,
    /// Devices whose written request the modem has not answered yet, in
    /// write order
    awaiting_echo: VecDeque<DeviceAddress>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured device from the catalog
    pub fn from_config(catalog: &Catalog, config: &NetworkConfig) -> Result<Self> {
        let mut network = Self::new();
        for entry in &config.devices {
            let device =
                catalog.make_device(entry.address, &entry.product_key, entry.config.clone())?;
            network.add_device(device)?;
        }
        info!("network configured with {} devices", network.devices.len());
        Ok(network)
    }

    pub fn add_device(&mut self, device: InsteonDevice) -> Result<()> {
        let address = device.address();
        if self.devices.contains_key(&address) {
            return Err(InsteonError::DuplicateDevice(address.to_string()));
        }
        self.devices.insert(address, device);
        Ok(())
    }

    pub fn device(&self, address: &DeviceAddress) -> Option<&InsteonDevice> {
        self.devices.get(address)
    }

    pub fn devices(&self) -> impl Iterator<Item = &InsteonDevice> {
        self.devices.values()
    }

    /// Feed raw serial bytes and dispatch every complete frame
    pub fn feed(&mut self, bytes: &[u8], now: Instant) -> Vec<FeatureEvent> {
        self.reader.extend(bytes);
        let mut events = Vec::new();
        while let Some(event) = self.reader.next_event() {
            events.extend(self.handle_event(event, now));
        }
        events
    }

    pub fn handle_event(&mut self, event: ReadEvent, now: Instant) -> Vec<FeatureEvent> {
        match event {
            ReadEvent::Msg(msg) => self.handle_msg(&msg, now),
            ReadEvent::PureNak => {
                // the modem answers writes in order, so the NAK is for the oldest
                match self
                    .awaiting_echo
                    .pop_front()
                    .and_then(|a| self.devices.get_mut(&a))
                {
                    Some(device) => {
                        debug!("modem busy, retrying request to {}", device.address());
                        device.on_modem_busy(now);
                    }
                    None => debug!("modem busy with nothing to retry"),
                }
                Vec::new()
            }
        }
    }

    /// Route one decoded message
    pub fn handle_msg(&mut self, msg: &Msg, now: Instant) -> Vec<FeatureEvent> {
        if msg.is_insteon_received() {
            return self.handle_insteon(msg, now);
        }
        if msg.is_x10() {
            return self.handle_x10(msg, now);
        }
        if msg.is_echo() {
            self.handle_echo(msg, now);
            return Vec::new();
        }
        debug!("modem message: {}", msg);
        Vec::new()
    }

    fn handle_insteon(&mut self, msg: &Msg, now: Instant) -> Vec<FeatureEvent> {
        let (from, cmd1) = match (msg.get_address("fromAddress"), msg.get_byte("command1")) {
            (Ok(from), Ok(cmd1)) => (from, cmd1),
            (Err(e), _) | (_, Err(e)) => {
                warn!("dropping malformed message {}: {}", msg, e);
                return Vec::new();
            }
        };
        match self.devices.get_mut(&DeviceAddress::Insteon(from)) {
            Some(device) => device.handle_message(msg, cmd1, now),
            None => {
                debug!("message from unconfigured device {}: {}", from, msg);
                Vec::new()
            }
        }
    }

    fn handle_echo(&mut self, echo: &Msg, now: Instant) {
        if echo.cmd() != 0x62 {
            trace!("x10 echo: {}", echo);
            return;
        }
        let Ok(to) = echo.get_address("toAddress") else {
            return;
        };
        let address = DeviceAddress::Insteon(to);
        if let Some(pos) = self.awaiting_echo.iter().position(|a| *a == address) {
            self.awaiting_echo.remove(pos);
        }
        if let Some(device) = self.devices.get_mut(&DeviceAddress::Insteon(to)) {
            device.on_echo(echo, now);
        }
    }

    fn handle_x10(&mut self, msg: &Msg, now: Instant) -> Vec<FeatureEvent> {
        let (raw, flag) = match (msg.get_byte("rawX10"), msg.get_byte("X10Flag")) {
            (Ok(raw), Ok(flag)) => (raw, flag),
            (Err(e), _) | (_, Err(e)) => {
                warn!("dropping malformed x10 message {}: {}", msg, e);
                return Vec::new();
            }
        };
        if flag != X10_COMMAND_FLAG {
            let address = X10Address::from_raw(raw);
            trace!("x10 address frame selects {}", address);
            self.x10_selected.insert(address.house_code(), address);
            return Vec::new();
        }
        let house = raw >> 4;
        let function = raw & 0x0F;
        let Some(address) = self.x10_selected.get(&house).copied() else {
            debug!("x10 command 0x{:02x} without address, ignoring", function);
            return Vec::new();
        };
        match self.devices.get_mut(&DeviceAddress::X10(address)) {
            Some(device) => device.handle_message(msg, function, now),
            None => {
                debug!("x10 command for unconfigured device {}", address);
                Vec::new()
            }
        }
    }

    /// Poll every feature of every Insteon device
    pub fn poll_all(&mut self, delay: Duration, now: Instant) -> usize {
        self.devices
            .values_mut()
            .map(|d| d.poll_all(delay, now))
            .sum()
    }

    /// Messages ready to be written, at most one per device
    pub fn poll_due(&mut self, now: Instant) -> Vec<Msg> {
        let mut out = Vec::new();
        for (address, device) in self.devices.iter_mut() {
            if let Some(msg) = device.next_request(now) {
                self.awaiting_echo.push_back(*address);
                out.push(msg);
            }
        }
        out
    }

    /// Earliest instant at which [`Network::poll_due`] may return something
    pub fn next_wake(&self) -> Option<Instant> {
        self.devices.values().filter_map(|d| d.next_wake()).min()
    }
}
