//! Message handler catalog
//!
//! A [`MessageHandler`] turns one decoded frame into at most one state update
//! plus follow-up commands for the device queue. Handlers hold only their
//! immutable configuration; everything else arrives through [`HandlerContext`].
//!
//! Handlers are looked up by name from the feature table:
//!
//! ```text
//! [[feature.handler]]
//! cmd1 = 0x19
//! name = "DimmerRequestReplyHandler"
//! params = { button = 2 }
//! ```

use crate::device::DeviceInfo;
use crate::error::FieldError;
use crate::feature::QueryStatus;
use crate::state::{OpenClosed, State, Unit};
use crate::{HandlerParams, InsteonError, Msg, Result, MOTION_SENSOR_II_PRODUCT_KEY};
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Delay before polling a dimmer that reported "on" without a level
pub const LIGHT_ON_POLL_DELAY: Duration = Duration::from_millis(1000);

/// Delay before a device-wide poll triggered by an ACK
pub const TRIGGER_POLL_DELAY: Duration = Duration::from_millis(2000);

/// Quiet time for extended queries sent to sleeping devices
pub const EXTENDED_QUERY_QUIET_TIME: Duration = Duration::from_millis(500);

/// Whether an update is published unconditionally or only on change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Always,
    Changed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub state: State,
    pub change: ChangeType,
}

/// Follow-up work a handler asks the device to enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundCommand {
    /// Send this feature's poll message after `delay`
    Poll { delay: Duration },
    /// Poll every feature of the device after `delay`
    PollDevice { delay: Duration },
    /// Send an extended query with the extended-query quiet time
    ExtendedQuery { cmd1: u8, cmd2: u8 },
}

/// Result of running one handler on one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutcome {
    pub update: Option<StateUpdate>,
    pub commands: Vec<OutboundCommand>,
}

impl HandlerOutcome {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn publish(state: State, change: ChangeType) -> Self {
        Self {
            update: Some(StateUpdate { state, change }),
            commands: Vec::new(),
        }
    }

    pub fn command(command: OutboundCommand) -> Self {
        Self {
            update: None,
            commands: vec![command],
        }
    }

    pub fn with_command(mut self, command: OutboundCommand) -> Self {
        self.commands.push(command);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.update.is_none() && self.commands.is_empty()
    }
}

/// What a handler may know besides the frame itself
#[derive(Debug, Clone, Copy)]
pub struct HandlerContext<'a> {
    pub device: &'a DeviceInfo,
    pub feature: &'a str,
    /// All-link group of a broadcast or cleanup, None for direct messages
    pub group: Option<u8>,
    /// cmd1 used for dispatch; X10 frames carry the X10 function here
    pub cmd1: u8,
    pub query_status: QueryStatus,
}

/// Value reported by the battery/light sensor reply handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorField {
    LightLevel,
    BatteryLevel,
    BatteryPercentage,
    TemperatureLevel,
    BatteryWatermarkLevel,
}

impl SensorField {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "light_level" => Some(Self::LightLevel),
            "battery_level" => Some(Self::BatteryLevel),
            "battery_percentage" => Some(Self::BatteryPercentage),
            "temperature_level" => Some(Self::TemperatureLevel),
            "battery_watermark_level" => Some(Self::BatteryWatermarkLevel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterField {
    Watts,
    Kwh,
}

/// Temperature scale of a number handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    Celsius,
    Fahrenheit,
}

/// Lookup applied to the cooked value of a number handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberTransform {
    Identity,
    /// Status message encoding
    ThermostatSystemMode,
    /// Set-mode reply encoding, differs from the status encoding
    ThermostatSystemModeReply,
    ThermostatFanModeReply,
    FanLincFan,
}

impl NumberTransform {
    pub fn apply(&self, raw: i64) -> i64 {
        match self {
            NumberTransform::Identity => raw,
            NumberTransform::ThermostatSystemMode => match raw {
                0 => 0,
                1 => 3,
                2 => 1,
                3 => 2,
                _ => 4,
            },
            NumberTransform::ThermostatSystemModeReply => match raw {
                0x09 => 0,
                0x04 => 1,
                0x05 => 2,
                0x06 => 3,
                _ => 4,
            },
            NumberTransform::ThermostatFanModeReply => match raw {
                0x07 => 1,
                _ => 0,
            },
            NumberTransform::FanLincFan => match raw {
                0x00 => 0,
                0x55 => 1,
                0xAA => 2,
                0xFF => 3,
                other => {
                    warn!("fanlinc got unexpected level: {}", other);
                    0
                }
            },
        }
    }
}

/// Source byte of a number handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ByteSource {
    /// The all-link group of the message
    Group,
    /// A named message field
    Field(String),
}

impl ByteSource {
    fn parse(s: &str) -> Self {
        if s == "group" {
            ByteSource::Group
        } else {
            ByteSource::Field(s.to_string())
        }
    }

    fn read(&self, msg: &Msg, group: Option<u8>) -> std::result::Result<i64, FieldError> {
        match self {
            ByteSource::Group => group
                .map(i64::from)
                .ok_or_else(|| FieldError::NotFound("group".to_string())),
            ByteSource::Field(name) => msg.get_byte(name).map(i64::from),
        }
    }
}

/// `value = offset + transform((raw & mask) >> rshift) * factor`
#[derive(Debug, Clone, PartialEq)]
pub struct NumberConfig {
    pub low_byte: ByteSource,
    pub high_byte: Option<ByteSource>,
    pub mask: i64,
    pub rshift: u32,
    pub offset: f64,
    pub factor: f64,
    pub scale: Option<Scale>,
    pub transform: NumberTransform,
}

impl NumberConfig {
    fn from_params(params: &HandlerParams, transform: NumberTransform) -> Result<Self> {
        let low_byte = params
            .string("low_byte")
            .map(ByteSource::parse)
            .ok_or_else(|| InsteonError::Catalog("number handler missing low_byte".to_string()))?;
        let scale = match params.string("scale") {
            Some("celsius") => Some(Scale::Celsius),
            Some("fahrenheit") => Some(Scale::Fahrenheit),
            Some(other) => {
                warn!("ignoring unknown scale {}", other);
                None
            }
            None => None,
        };
        Ok(Self {
            low_byte,
            high_byte: params.string("high_byte").map(ByteSource::parse),
            mask: params.int_or("mask", 0xFFFF),
            rshift: params.int_or("rshift", 0).clamp(0, 31) as u32,
            offset: params.double_or("offset", 0.0),
            factor: params.double_or("factor", 1.0),
            scale,
            transform,
        })
    }

    pub fn evaluate(&self, msg: &Msg, group: Option<u8>) -> std::result::Result<State, FieldError> {
        let mut raw = self.low_byte.read(msg, group)?;
        if let Some(high) = &self.high_byte {
            raw |= high.read(msg, group)? << 8;
        }
        let cooked = (raw & self.mask) >> self.rshift;
        let value = self.offset + self.transform.apply(cooked) as f64 * self.factor;
        Ok(match self.scale {
            Some(Scale::Celsius) => State::Quantity {
                value,
                unit: Unit::Celsius,
            },
            Some(Scale::Fahrenheit) => State::Quantity {
                value,
                unit: Unit::Fahrenheit,
            },
            None => State::Decimal(value),
        })
    }
}

/// The handler variants
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerKind {
    Default,
    NoOp,
    LightOnDimmer,
    LightOffDimmer,
    LightOnSwitch,
    LightOffSwitch,
    RampDimmer { on_cmd: u8, off_cmd: u8 },
    SwitchRequestReply,
    DimmerRequestReply,
    DimmerStopManualChange,
    StartManualChange,
    StopManualChange,
    InfoRequestReply,
    MotionSensorDataReply { field: SensorField },
    MotionSensor2AlternateHeartbeat { field: SensorField },
    HiddenDoorSensorDataReply { field: SensorField },
    PowerMeterUpdate { field: MeterField },
    PowerMeterReset,
    LastTime,
    ContactRequestReply,
    ClosedContact,
    OpenedContact,
    OpenedOrClosedContact,
    ClosedSleepingContact,
    OpenedSleepingContact,
    TriggerPoll,
    Number(NumberConfig),
    X10On,
    X10Off,
    X10Bright,
    X10Dim,
    X10Open,
    X10Closed,
}

/// Every handler name the feature table may use
pub const HANDLER_NAMES: &[&str] = &[
    "DefaultMsgHandler",
    "NoOpMsgHandler",
    "LightOnDimmerHandler",
    "LightOffDimmerHandler",
    "LightOnSwitchHandler",
    "LightOffSwitchHandler",
    "RampDimmerHandler",
    "SwitchRequestReplyHandler",
    "DimmerRequestReplyHandler",
    "DimmerStopManualChangeHandler",
    "StartManualChangeHandler",
    "StopManualChangeHandler",
    "InfoRequestReplyHandler",
    "MotionSensorDataReplyHandler",
    "MotionSensor2AlternateHeartbeatHandler",
    "HiddenDoorSensorDataReplyHandler",
    "PowerMeterUpdateHandler",
    "PowerMeterResetHandler",
    "LastTimeHandler",
    "ContactRequestReplyHandler",
    "ClosedContactHandler",
    "OpenedContactHandler",
    "OpenedOrClosedContactHandler",
    "ClosedSleepingContactHandler",
    "OpenedSleepingContactHandler",
    "TriggerPollMsgHandler",
    "NumberMsgHandler",
    "ThermostatSystemModeMsgHandler",
    "ThermostatSystemModeReplyHandler",
    "ThermostatFanModeReplyHandler",
    "FanLincFanReplyHandler",
    "X10OnHandler",
    "X10OffHandler",
    "X10BrightHandler",
    "X10DimHandler",
    "X10OpenHandler",
    "X10ClosedHandler",
];

fn sensor_field(params: &HandlerParams, default: SensorField) -> Result<SensorField> {
    match params.string("field") {
        None => Ok(default),
        Some(s) => SensorField::parse(s)
            .ok_or_else(|| InsteonError::Catalog(format!("unknown sensor field: {}", s))),
    }
}

impl HandlerKind {
    /// Build a handler variant from its table name and parameters
    pub fn from_name(name: &str, params: &HandlerParams) -> Result<Self> {
        let kind = match name {
            "DefaultMsgHandler" => HandlerKind::Default,
            "NoOpMsgHandler" => HandlerKind::NoOp,
            "LightOnDimmerHandler" => HandlerKind::LightOnDimmer,
            "LightOffDimmerHandler" => HandlerKind::LightOffDimmer,
            "LightOnSwitchHandler" => HandlerKind::LightOnSwitch,
            "LightOffSwitchHandler" => HandlerKind::LightOffSwitch,
            "RampDimmerHandler" => HandlerKind::RampDimmer {
                on_cmd: params.byte("on").unwrap_or(0x2E),
                off_cmd: params.byte("off").unwrap_or(0x2F),
            },
            "SwitchRequestReplyHandler" => HandlerKind::SwitchRequestReply,
            "DimmerRequestReplyHandler" => HandlerKind::DimmerRequestReply,
            "DimmerStopManualChangeHandler" => HandlerKind::DimmerStopManualChange,
            "StartManualChangeHandler" => HandlerKind::StartManualChange,
            "StopManualChangeHandler" => HandlerKind::StopManualChange,
            "InfoRequestReplyHandler" => HandlerKind::InfoRequestReply,
            "MotionSensorDataReplyHandler" => HandlerKind::MotionSensorDataReply {
                field: sensor_field(params, SensorField::LightLevel)?,
            },
            "MotionSensor2AlternateHeartbeatHandler" => {
                HandlerKind::MotionSensor2AlternateHeartbeat {
                    field: sensor_field(params, SensorField::LightLevel)?,
                }
            }
            "HiddenDoorSensorDataReplyHandler" => HandlerKind::HiddenDoorSensorDataReply {
                field: sensor_field(params, SensorField::BatteryWatermarkLevel)?,
            },
            "PowerMeterUpdateHandler" => HandlerKind::PowerMeterUpdate {
                field: match params.string("field") {
                    None | Some("watts") => MeterField::Watts,
                    Some("kwh") => MeterField::Kwh,
                    Some(other) => {
                        return Err(InsteonError::Catalog(format!(
                            "unknown power meter field: {}",
                            other
                        )))
                    }
                },
            },
            "PowerMeterResetHandler" => HandlerKind::PowerMeterReset,
            "LastTimeHandler" => HandlerKind::LastTime,
            "ContactRequestReplyHandler" => HandlerKind::ContactRequestReply,
            "ClosedContactHandler" => HandlerKind::ClosedContact,
            "OpenedContactHandler" => HandlerKind::OpenedContact,
            "OpenedOrClosedContactHandler" => HandlerKind::OpenedOrClosedContact,
            "ClosedSleepingContactHandler" => HandlerKind::ClosedSleepingContact,
            "OpenedSleepingContactHandler" => HandlerKind::OpenedSleepingContact,
            "TriggerPollMsgHandler" => HandlerKind::TriggerPoll,
            "NumberMsgHandler" => {
                HandlerKind::Number(NumberConfig::from_params(params, NumberTransform::Identity)?)
            }
            "ThermostatSystemModeMsgHandler" => HandlerKind::Number(NumberConfig::from_params(
                params,
                NumberTransform::ThermostatSystemMode,
            )?),
            "ThermostatSystemModeReplyHandler" => HandlerKind::Number(NumberConfig::from_params(
                params,
                NumberTransform::ThermostatSystemModeReply,
            )?),
            "ThermostatFanModeReplyHandler" => HandlerKind::Number(NumberConfig::from_params(
                params,
                NumberTransform::ThermostatFanModeReply,
            )?),
            "FanLincFanReplyHandler" => {
                HandlerKind::Number(NumberConfig::from_params(params, NumberTransform::FanLincFan)?)
            }
            "X10OnHandler" => HandlerKind::X10On,
            "X10OffHandler" => HandlerKind::X10Off,
            "X10BrightHandler" => HandlerKind::X10Bright,
            "X10DimHandler" => HandlerKind::X10Dim,
            "X10OpenHandler" => HandlerKind::X10Open,
            "X10ClosedHandler" => HandlerKind::X10Closed,
            other => return Err(InsteonError::UnknownHandler(other.to_string())),
        };
        Ok(kind)
    }

    pub fn name(&self) -> &'static str {
        match self {
            HandlerKind::Default => "DefaultMsgHandler",
            HandlerKind::NoOp => "NoOpMsgHandler",
            HandlerKind::LightOnDimmer => "LightOnDimmerHandler",
            HandlerKind::LightOffDimmer => "LightOffDimmerHandler",
            HandlerKind::LightOnSwitch => "LightOnSwitchHandler",
            HandlerKind::LightOffSwitch => "LightOffSwitchHandler",
            HandlerKind::RampDimmer { .. } => "RampDimmerHandler",
            HandlerKind::SwitchRequestReply => "SwitchRequestReplyHandler",
            HandlerKind::DimmerRequestReply => "DimmerRequestReplyHandler",
            HandlerKind::DimmerStopManualChange => "DimmerStopManualChangeHandler",
            HandlerKind::StartManualChange => "StartManualChangeHandler",
            HandlerKind::StopManualChange => "StopManualChangeHandler",
            HandlerKind::InfoRequestReply => "InfoRequestReplyHandler",
            HandlerKind::MotionSensorDataReply { .. } => "MotionSensorDataReplyHandler",
            HandlerKind::MotionSensor2AlternateHeartbeat { .. } => {
                "MotionSensor2AlternateHeartbeatHandler"
            }
            HandlerKind::HiddenDoorSensorDataReply { .. } => "HiddenDoorSensorDataReplyHandler",
            HandlerKind::PowerMeterUpdate { .. } => "PowerMeterUpdateHandler",
            HandlerKind::PowerMeterReset => "PowerMeterResetHandler",
            HandlerKind::LastTime => "LastTimeHandler",
            HandlerKind::ContactRequestReply => "ContactRequestReplyHandler",
            HandlerKind::ClosedContact => "ClosedContactHandler",
            HandlerKind::OpenedContact => "OpenedContactHandler",
            HandlerKind::OpenedOrClosedContact => "OpenedOrClosedContactHandler",
            HandlerKind::ClosedSleepingContact => "ClosedSleepingContactHandler",
            HandlerKind::OpenedSleepingContact => "OpenedSleepingContactHandler",
            HandlerKind::TriggerPoll => "TriggerPollMsgHandler",
            HandlerKind::Number(cfg) => match cfg.transform {
                NumberTransform::Identity => "NumberMsgHandler",
                NumberTransform::ThermostatSystemMode => "ThermostatSystemModeMsgHandler",
                NumberTransform::ThermostatSystemModeReply => "ThermostatSystemModeReplyHandler",
                NumberTransform::ThermostatFanModeReply => "ThermostatFanModeReplyHandler",
                NumberTransform::FanLincFan => "FanLincFanReplyHandler",
            },
            HandlerKind::X10On => "X10OnHandler",
            HandlerKind::X10Off => "X10OffHandler",
            HandlerKind::X10Bright => "X10BrightHandler",
            HandlerKind::X10Dim => "X10DimHandler",
            HandlerKind::X10Open => "X10OpenHandler",
            HandlerKind::X10Closed => "X10ClosedHandler",
        }
    }

    /// Manual-change messages have no cleanup or success follow-ups, so
    /// they bypass group duplicate elimination
    pub fn checks_duplicates(&self) -> bool {
        !matches!(
            self,
            HandlerKind::DimmerStopManualChange
                | HandlerKind::StartManualChange
                | HandlerKind::StopManualChange
        )
    }
}

/// Message filters shared by all handler variants
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerFilter {
    pub group: Option<u8>,
    pub button: Option<u8>,
    /// 1 = extended only, 0 = standard only
    pub ext: Option<u8>,
    pub match_cmd1: Option<u8>,
    pub match_cmd2: Option<u8>,
    pub match_d1: Option<u8>,
    pub match_d2: Option<u8>,
    pub match_d3: Option<u8>,
}

impl HandlerFilter {
    pub fn from_params(params: &HandlerParams) -> Self {
        Self {
            group: params.byte("group"),
            button: params.byte("button"),
            ext: params.byte("ext"),
            match_cmd1: params.byte("match_cmd1"),
            match_cmd2: params.byte("match_cmd2"),
            match_d1: params.byte("match_d1"),
            match_d2: params.byte("match_d2"),
            match_d3: params.byte("match_d3"),
        }
    }

    pub fn matches_group(&self, group: Option<u8>) -> bool {
        match self.group {
            None => true,
            Some(g) => group == Some(g),
        }
    }

    /// Test the message against ext and the match_* filters
    pub fn matches(&self, msg: &Msg) -> bool {
        if let Some(ext) = self.ext {
            if msg.is_extended() != (ext == 1) {
                return false;
            }
        }
        let checks = [
            (self.match_cmd1, "command1"),
            (self.match_cmd2, "command2"),
            (self.match_d1, "userData1"),
            (self.match_d2, "userData2"),
            (self.match_d3, "userData3"),
        ];
        for (expected, field) in checks {
            let Some(expected) = expected else {
                continue;
            };
            match msg.get_byte(field) {
                Ok(v) if v == expected => {}
                Ok(_) => return false,
                Err(e) => {
                    warn!("error matching message {}: {}", msg, e);
                    return false;
                }
            }
        }
        true
    }

    /// True if no button is configured or the message addresses this button
    pub fn is_my_button(&self, msg: &Msg) -> bool {
        match self.button {
            None => true,
            Some(button) => button_info(msg) == Some(button),
        }
    }
}

/// Button number carried by a message: cmd2 for cleanups, the low byte of
/// the to-address for broadcasts
pub fn button_info(msg: &Msg) -> Option<u8> {
    let result = if msg.is_cleanup() {
        msg.get_byte("command2")
    } else {
        msg.get_address("toAddress").map(|a| a.low_byte())
    };
    match result {
        Ok(b) => Some(b),
        Err(e) => {
            warn!("field error while reading button from {}: {}", msg, e);
            None
        }
    }
}

/// Dimmer level in percent from a raw status byte
pub fn dimmer_level(raw: u8) -> u8 {
    match raw {
        0 => 0,
        0xFE | 0xFF => 100,
        b => ((u32::from(b) * 100 / 255) as u8).max(1),
    }
}

/// Ramp level from the upper nibble of cmd2
pub fn ramp_level(cmd2: u8) -> u8 {
    let nibble = f64::from((cmd2 >> 4) & 0x0F);
    (nibble * (100.0 / 15.0)).round() as u8
}

/// LED status of a button in a keypad bitmask
pub fn led_lit(bitmask: u8, button: u8) -> bool {
    match button {
        1..=8 => bitmask & (1 << (button - 1)) != 0,
        _ => false,
    }
}

/// Signed power reading from two big-endian bytes
pub fn power_watts(high: u8, low: u8) -> i16 {
    i16::from_be_bytes([high, low])
}

/// Energy counter in kWh, None when the first byte is a 254/255 sentinel
pub fn power_kwh(b9: u8, b10: u8, b11: u8, b12: u8) -> Option<f64> {
    if b9 >= 254 {
        return None;
    }
    let counter = i32::from_be_bytes([b9, b10, b11, b12]);
    let kwh = f64::from(counter) * 65535.0 / (1000.0 * 60.0 * 60.0 * 60.0);
    Some((kwh * 10_000.0).round() / 10_000.0)
}

/// Battery percentage of the 2844-222, linear over 0x70..=0xD2
pub fn motion_battery_percentage(level: u8) -> u8 {
    match level {
        l if l >= 0xD2 => 100,
        l if l <= 0x70 => 0,
        l => ((u32::from(l) - 0x70) * 100 / (0xD2 - 0x70)) as u8,
    }
}

/// Product data carried by an info reply: (product key, category, subcategory)
pub fn product_data(msg: &Msg) -> std::result::Result<(u32, u8, u8), FieldError> {
    Ok((
        msg.get_int24("userData2", "userData3", "userData4")?,
        msg.user_data(5)?,
        msg.user_data(6)?,
    ))
}

fn format_product_key(key: u32) -> String {
    format!(
        "F{:02X}.{:02X}.{:02X}",
        (key >> 16) & 0xFF,
        (key >> 8) & 0xFF,
        key & 0xFF
    )
}

fn level_state(field: SensorField, value: u8) -> State {
    match field {
        SensorField::BatteryPercentage => State::Quantity {
            value: f64::from(value),
            unit: Unit::Percent,
        },
        _ => State::Decimal(f64::from(value)),
    }
}

/// One configured handler: the variant plus its filters
#[derive(Debug, Clone, PartialEq)]
pub struct MessageHandler {
    pub kind: HandlerKind,
    pub filter: HandlerFilter,
}

impl MessageHandler {
    pub fn new(kind: HandlerKind, filter: HandlerFilter) -> Self {
        Self { kind, filter }
    }

    pub fn from_name(name: &str, params: &HandlerParams) -> Result<Self> {
        Ok(Self {
            kind: HandlerKind::from_name(name, params)?,
            filter: HandlerFilter::from_params(params),
        })
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Run the handler. Field errors are logged and yield an empty outcome.
    pub fn handle(&self, ctx: &HandlerContext<'_>, msg: &Msg) -> HandlerOutcome {
        match self.try_handle(ctx, msg) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    "{}: {} {} error parsing {}: {}",
                    self.name(),
                    ctx.device.address,
                    ctx.feature,
                    msg,
                    e
                );
                HandlerOutcome::none()
            }
        }
    }

    fn try_handle(
        &self,
        ctx: &HandlerContext<'_>,
        msg: &Msg,
    ) -> std::result::Result<HandlerOutcome, FieldError> {
        let name = self.name();
        let addr = &ctx.device.address;
        let outcome = match &self.kind {
            HandlerKind::Default => {
                debug!("{} ignoring unimpl message with cmd1: 0x{:02x}", name, ctx.cmd1);
                HandlerOutcome::none()
            }
            HandlerKind::NoOp => {
                trace!("{} ignore msg 0x{:02x}: {}", name, ctx.cmd1, msg);
                HandlerOutcome::none()
            }
            HandlerKind::LightOnDimmer => {
                if !self.filter.is_my_button(msg) {
                    return Ok(HandlerOutcome::none());
                }
                if msg.is_ack_of_direct() {
                    warn!("{}: device {}: ignoring ack of direct", name, addr);
                    return Ok(HandlerOutcome::none());
                }
                debug!("{}: device {} was turned on, polling for level", name, addr);
                HandlerOutcome::publish(State::Percent(100), ChangeType::Always).with_command(
                    OutboundCommand::Poll {
                        delay: LIGHT_ON_POLL_DELAY,
                    },
                )
            }
            HandlerKind::LightOffDimmer => {
                if !self.filter.is_my_button(msg) {
                    return Ok(HandlerOutcome::none());
                }
                debug!("{}: device {} was turned off", name, addr);
                HandlerOutcome::publish(State::Percent(0), ChangeType::Always)
            }
            HandlerKind::LightOnSwitch | HandlerKind::LightOffSwitch => {
                if !self.filter.is_my_button(msg) {
                    debug!("{}: ignored message for other button", name);
                    return Ok(HandlerOutcome::none());
                }
                let on = matches!(self.kind, HandlerKind::LightOnSwitch);
                debug!("{}: device {} was switched {}", name, addr, if on { "on" } else { "off" });
                HandlerOutcome::publish(State::OnOff(on.into()), ChangeType::Always)
            }
            HandlerKind::RampDimmer { on_cmd, off_cmd } => {
                if ctx.cmd1 == *on_cmd {
                    let level = ramp_level(msg.get_byte("command2")?);
                    debug!("{}: device {} ramped on to level {}", name, addr, level);
                    let state = if level == 100 {
                        State::on()
                    } else {
                        State::Percent(level)
                    };
                    HandlerOutcome::publish(state, ChangeType::Always)
                } else if ctx.cmd1 == *off_cmd {
                    debug!("{}: device {} ramped off", name, addr);
                    HandlerOutcome::publish(State::Percent(0), ChangeType::Always)
                } else {
                    HandlerOutcome::none()
                }
            }
            HandlerKind::SwitchRequestReply => {
                let cmd2 = msg.get_byte("command2")?;
                match self.filter.button {
                    Some(button) => {
                        let lit = led_lit(cmd2, button);
                        debug!("{}: dev {} button {} lit: {}", name, addr, button, lit);
                        HandlerOutcome::publish(State::OnOff(lit.into()), ChangeType::Changed)
                    }
                    None => match cmd2 {
                        0x00 => HandlerOutcome::publish(State::off(), ChangeType::Changed),
                        0xFF => HandlerOutcome::publish(State::on(), ChangeType::Changed),
                        other => {
                            warn!(
                                "{}: {} ignoring unexpected cmd2 0x{:02x} in msg: {}",
                                name, addr, other, msg
                            );
                            HandlerOutcome::none()
                        }
                    },
                }
            }
            HandlerKind::DimmerRequestReply => {
                let level = dimmer_level(msg.get_byte("command2")?);
                debug!("{}: set device {} to level {}", name, addr, level);
                HandlerOutcome::publish(State::Percent(level), ChangeType::Changed)
            }
            HandlerKind::DimmerStopManualChange | HandlerKind::PowerMeterReset => {
                debug!("{}: polling device {}", name, addr);
                HandlerOutcome::command(OutboundCommand::Poll {
                    delay: Duration::ZERO,
                })
            }
            HandlerKind::StartManualChange => {
                let up_down = if msg.get_byte("command2")? == 0 { 0.0 } else { 2.0 };
                debug!(
                    "{}: dev {} manual state change: {}",
                    name,
                    addr,
                    if up_down == 0.0 { "DOWN" } else { "UP" }
                );
                HandlerOutcome::publish(State::Decimal(up_down), ChangeType::Always)
            }
            HandlerKind::StopManualChange => {
                debug!("{}: dev {} manual state change stopped", name, addr);
                HandlerOutcome::publish(State::Decimal(1.0), ChangeType::Always)
            }
            HandlerKind::InfoRequestReply => {
                if !msg.is_extended() {
                    warn!("{}: device {} expected extended info reply, got {}", name, addr, msg);
                    return Ok(HandlerOutcome::none());
                }
                match msg.get_byte("command2")? {
                    0x00 => {
                        let (key, cat, subcat) = product_data(msg)?;
                        debug!(
                            "{}: {} got product data: cat: {} subcat: {} key: {}",
                            name,
                            addr,
                            cat,
                            subcat,
                            format_product_key(key)
                        );
                    }
                    0x02 => debug!("{}: {} got text string {}", name, addr, msg),
                    other => warn!("{}: unknown cmd2 0x{:02x} in info reply {}", name, other, msg),
                }
                HandlerOutcome::none()
            }
            HandlerKind::MotionSensorDataReply { field } => {
                if !msg.is_extended() {
                    trace!("{}: device {} ignoring non-extended msg {}", name, addr, msg);
                    return Ok(HandlerOutcome::none());
                }
                let value = match msg.get_byte("command2")? {
                    0x00 => {
                        let light = msg.user_data(11)?;
                        let battery = msg.user_data(12)?;
                        debug!("{}: {} light level: {}, battery level: {}", name, addr, light, battery);
                        match field {
                            SensorField::LightLevel => Some(light),
                            SensorField::BatteryLevel => Some(battery),
                            _ => None,
                        }
                    }
                    0x03 => {
                        let battery = msg.user_data(6)?;
                        let light = msg.user_data(7)?;
                        let temperature = msg.user_data(8)?;
                        let percentage = motion_battery_percentage(battery);
                        debug!(
                            "{}: {} light level: {}, battery level: {} ({}%), temperature level: {}",
                            name, addr, light, battery, percentage, temperature
                        );
                        match field {
                            SensorField::LightLevel => Some(light),
                            SensorField::BatteryLevel => Some(battery),
                            SensorField::TemperatureLevel => Some(temperature),
                            SensorField::BatteryPercentage => Some(percentage),
                            SensorField::BatteryWatermarkLevel => None,
                        }
                    }
                    other => {
                        warn!("{}: unknown cmd2 0x{:02x} in data reply {}", name, other, msg);
                        None
                    }
                };
                match value {
                    Some(v) => HandlerOutcome::publish(level_state(*field, v), ChangeType::Changed),
                    None => HandlerOutcome::none(),
                }
            }
            HandlerKind::MotionSensor2AlternateHeartbeat { field } => {
                let to = msg.get_address("toAddress")?;
                let battery = to.high_byte();
                let light = to.middle_byte();
                let temperature = msg.get_byte("command2")?;
                let percentage = motion_battery_percentage(battery);
                debug!(
                    "{}: {} light level: {}, battery level: {} ({}%), temperature level: {}",
                    name, addr, light, battery, percentage, temperature
                );
                let value = match field {
                    SensorField::LightLevel => light,
                    SensorField::BatteryLevel => battery,
                    SensorField::TemperatureLevel => temperature,
                    SensorField::BatteryPercentage => percentage,
                    SensorField::BatteryWatermarkLevel => return Ok(HandlerOutcome::none()),
                };
                HandlerOutcome::publish(level_state(*field, value), ChangeType::Changed)
            }
            HandlerKind::HiddenDoorSensorDataReply { field } => {
                if !msg.is_extended() {
                    trace!("{}: device {} ignoring non-extended msg {}", name, addr, msg);
                    return Ok(HandlerOutcome::none());
                }
                match msg.get_byte("command2")? {
                    0x00 => {
                        let battery = msg.user_data(4)?;
                        let watermark = msg.user_data(7)?;
                        debug!(
                            "{}: {} battery watermark: {}, battery level: {}",
                            name, addr, watermark, battery
                        );
                        let value = match field {
                            SensorField::BatteryWatermarkLevel => watermark,
                            SensorField::BatteryLevel => battery,
                            _ => return Ok(HandlerOutcome::none()),
                        };
                        HandlerOutcome::publish(level_state(*field, value), ChangeType::Changed)
                    }
                    other => {
                        warn!("{}: unknown cmd2 0x{:02x} in data reply {}", name, other, msg);
                        HandlerOutcome::none()
                    }
                }
            }
            HandlerKind::PowerMeterUpdate { field } => {
                if !msg.is_extended() {
                    return Ok(HandlerOutcome::none());
                }
                let watts = power_watts(msg.user_data(7)?, msg.user_data(8)?);
                let kwh = power_kwh(
                    msg.user_data(9)?,
                    msg.user_data(10)?,
                    msg.user_data(11)?,
                    msg.user_data(12)?,
                )
                .unwrap_or(0.0);
                debug!("{}: {} watts: {} kwh: {}", name, addr, watts, kwh);
                let state = match field {
                    MeterField::Watts => State::Quantity {
                        value: f64::from(watts),
                        unit: Unit::Watt,
                    },
                    MeterField::Kwh => State::Quantity {
                        value: kwh,
                        unit: Unit::KilowattHour,
                    },
                };
                HandlerOutcome::publish(state, ChangeType::Changed)
            }
            HandlerKind::LastTime => {
                HandlerOutcome::publish(State::DateTime(Utc::now()), ChangeType::Always)
            }
            HandlerKind::ContactRequestReply => {
                let cmd = msg.get_byte("Cmd")?;
                let cmd2 = msg.get_byte("command2")?;
                if msg.is_ack_of_direct()
                    && ctx.query_status == QueryStatus::QueryPending
                    && cmd == 0x50
                {
                    let state = if cmd2 == 0 {
                        OpenClosed::Open
                    } else {
                        OpenClosed::Closed
                    };
                    debug!("{}: set contact {} to {:?}", name, addr, state);
                    HandlerOutcome::publish(State::OpenClosed(state), ChangeType::Changed)
                } else {
                    HandlerOutcome::none()
                }
            }
            HandlerKind::ClosedContact => HandlerOutcome::publish(State::closed(), ChangeType::Always),
            HandlerKind::OpenedContact => HandlerOutcome::publish(State::open(), ChangeType::Always),
            HandlerKind::OpenedOrClosedContact => {
                let cmd2 = msg.get_byte("command2")?;
                let state = match (ctx.cmd1, cmd2) {
                    (0x11, 0x02) => Some(State::closed()),
                    (0x11, 0x01 | 0x04) => Some(State::open()),
                    (0x13, 0x04) => Some(State::closed()),
                    _ => None,
                };
                match state {
                    Some(s) => HandlerOutcome::publish(s, ChangeType::Changed),
                    None => HandlerOutcome::none(),
                }
            }
            HandlerKind::ClosedSleepingContact | HandlerKind::OpenedSleepingContact => {
                let state = if matches!(self.kind, HandlerKind::OpenedSleepingContact) {
                    State::open()
                } else {
                    State::closed()
                };
                let outcome = HandlerOutcome::publish(state, ChangeType::Always);
                if ctx.device.has_product_key(MOTION_SENSOR_II_PRODUCT_KEY) {
                    if ctx.device.config.heartbeat_only {
                        outcome
                    } else {
                        outcome.with_command(OutboundCommand::ExtendedQuery {
                            cmd1: 0x2E,
                            cmd2: 0x03,
                        })
                    }
                } else {
                    outcome.with_command(OutboundCommand::ExtendedQuery {
                        cmd1: 0x2E,
                        cmd2: 0x00,
                    })
                }
            }
            HandlerKind::TriggerPoll => HandlerOutcome::command(OutboundCommand::PollDevice {
                delay: TRIGGER_POLL_DELAY,
            }),
            HandlerKind::Number(cfg) => {
                let state = cfg.evaluate(msg, ctx.group)?;
                debug!("{}: {} {} = {}", name, addr, ctx.feature, state);
                HandlerOutcome::publish(state, ChangeType::Changed)
            }
            HandlerKind::X10On => {
                debug!("{}: set X10 device {} to ON", name, addr);
                HandlerOutcome::publish(State::on(), ChangeType::Always)
            }
            HandlerKind::X10Off => {
                debug!("{}: set X10 device {} to OFF", name, addr);
                HandlerOutcome::publish(State::off(), ChangeType::Always)
            }
            HandlerKind::X10Bright => {
                debug!("{}: ignoring brighten message for device {}", name, addr);
                HandlerOutcome::none()
            }
            HandlerKind::X10Dim => {
                debug!("{}: ignoring dim message for device {}", name, addr);
                HandlerOutcome::none()
            }
            HandlerKind::X10Open => {
                debug!("{}: set X10 device {} to OPEN", name, addr);
                HandlerOutcome::publish(State::open(), ChangeType::Always)
            }
            HandlerKind::X10Closed => {
                debug!("{}: set X10 device {} to CLOSED", name, addr);
                HandlerOutcome::publish(State::closed(), ChangeType::Always)
            }
        };
        Ok(outcome)
    }
}
