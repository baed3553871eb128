//! Abstract state values published by device features

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OnOff {
    On,
    Off,
}

impl From<bool> for OnOff {
    fn from(on: bool) -> Self {
        if on {
            OnOff::On
        } else {
            OnOff::Off
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpenClosed {
    Open,
    Closed,
}

/// Unit attached to a [`State::Quantity`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Percent,
    Watt,
    KilowattHour,
    Celsius,
    Fahrenheit,
}

impl Unit {
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Percent => "%",
            Unit::Watt => "W",
            Unit::KilowattHour => "kWh",
            Unit::Celsius => "°C",
            Unit::Fahrenheit => "°F",
        }
    }
}

/// State value carried by a state update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum State {
    OnOff(OnOff),
    /// 0..=100
    Percent(u8),
    Decimal(f64),
    Quantity { value: f64, unit: Unit },
    OpenClosed(OpenClosed),
    DateTime(DateTime<Utc>),
    Undef,
}

impl State {
    pub fn on() -> Self {
        State::OnOff(OnOff::On)
    }

    pub fn off() -> Self {
        State::OnOff(OnOff::Off)
    }

    pub fn open() -> Self {
        State::OpenClosed(OpenClosed::Open)
    }

    pub fn closed() -> Self {
        State::OpenClosed(OpenClosed::Closed)
    }

    /// Numeric view of the state if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            State::Percent(p) => Some(f64::from(*p)),
            State::Decimal(v) => Some(*v),
            State::Quantity { value, .. } => Some(*value),
            State::OnOff(OnOff::On) => Some(100.0),
            State::OnOff(OnOff::Off) => Some(0.0),
            _ => None,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::OnOff(OnOff::On) => write!(f, "ON"),
            State::OnOff(OnOff::Off) => write!(f, "OFF"),
            State::Percent(p) => write!(f, "{}", p),
            State::Decimal(v) => write!(f, "{}", v),
            State::Quantity { value, unit } => write!(f, "{} {}", value, unit.symbol()),
            State::OpenClosed(OpenClosed::Open) => write!(f, "OPEN"),
            State::OpenClosed(OpenClosed::Closed) => write!(f, "CLOSED"),
            State::DateTime(t) => write!(f, "{}", t.to_rfc3339()),
            State::Undef => write!(f, "UNDEF"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_item_strings() {
        assert_eq!(State::on().to_string(), "ON");
        assert_eq!(State::closed().to_string(), "CLOSED");
        assert_eq!(State::Percent(53).to_string(), "53");
        assert_eq!(
            State::Quantity {
                value: 12.5,
                unit: Unit::Watt
            }
            .to_string(),
            "12.5 W"
        );
    }
}
