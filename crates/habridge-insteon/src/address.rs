//! Insteon and X10 device addresses

use crate::{InsteonError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Three byte Insteon address, printed as `AA.BB.CC`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InsteonAddress([u8; 3]);

impl InsteonAddress {
    pub const fn new(high: u8, middle: u8, low: u8) -> Self {
        Self([high, middle, low])
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [h, m, l] => Some(Self([*h, *m, *l])),
            _ => None,
        }
    }

    pub fn high_byte(&self) -> u8 {
        self.0[0]
    }

    pub fn middle_byte(&self) -> u8 {
        self.0[1]
    }

    pub fn low_byte(&self) -> u8 {
        self.0[2]
    }

    pub fn as_bytes(&self) -> [u8; 3] {
        self.0
    }
}

impl fmt::Display for InsteonAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}.{:02X}.{:02X}", self.0[0], self.0[1], self.0[2])
    }
}

impl FromStr for InsteonAddress {
    type Err = InsteonError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(InsteonError::InvalidAddress(s.to_string()));
        }
        let mut bytes = [0u8; 3];
        for (byte, part) in bytes.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(InsteonError::InvalidAddress(s.to_string()));
            }
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| InsteonError::InvalidAddress(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

/// X10 house and unit codes share one nibble encoding, indexed A..P and 1..16
const X10_CODES: [u8; 16] = [
    0x6, 0xE, 0x2, 0xA, 0x1, 0x9, 0x5, 0xD, 0x7, 0xF, 0x3, 0xB, 0x0, 0x8, 0x4, 0xC,
];

/// X10 address as raw house/unit nibbles, printed as `A.1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct X10Address {
    house: u8,
    unit: u8,
}

impl X10Address {
    /// Build from the raw X10 byte of an address frame (house high nibble, unit low nibble)
    pub fn from_raw(raw: u8) -> Self {
        Self {
            house: raw >> 4,
            unit: raw & 0x0f,
        }
    }

    pub fn raw(&self) -> u8 {
        (self.house << 4) | self.unit
    }

    pub fn house_code(&self) -> u8 {
        self.house
    }

    /// House letter 'A'..'P'
    pub fn house_letter(&self) -> char {
        let idx = X10_CODES.iter().position(|&c| c == self.house).unwrap_or(0);
        (b'A' + idx as u8) as char
    }

    /// Unit number 1..16
    pub fn unit_number(&self) -> u8 {
        X10_CODES.iter().position(|&c| c == self.unit).unwrap_or(0) as u8 + 1
    }
}

impl fmt::Display for X10Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.house_letter(), self.unit_number())
    }
}

impl FromStr for X10Address {
    type Err = InsteonError;

    fn from_str(s: &str) -> Result<Self> {
        let err = || InsteonError::InvalidAddress(s.to_string());
        let (house, unit) = s.trim().split_once('.').ok_or_else(err)?;
        let mut letters = house.chars();
        let letter = letters.next().ok_or_else(err)?.to_ascii_uppercase();
        if letters.next().is_some() || !('A'..='P').contains(&letter) {
            return Err(err());
        }
        let unit: usize = unit.parse().map_err(|_| err())?;
        if !(1..=16).contains(&unit) {
            return Err(err());
        }
        Ok(Self {
            house: X10_CODES[(letter as u8 - b'A') as usize],
            unit: X10_CODES[unit - 1],
        })
    }
}

/// Any address a device on the network can have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceAddress {
    Insteon(InsteonAddress),
    X10(X10Address),
}

impl DeviceAddress {
    pub fn is_x10(&self) -> bool {
        matches!(self, DeviceAddress::X10(_))
    }

    pub fn insteon(&self) -> Option<InsteonAddress> {
        match self {
            DeviceAddress::Insteon(a) => Some(*a),
            DeviceAddress::X10(_) => None,
        }
    }
}

impl From<InsteonAddress> for DeviceAddress {
    fn from(a: InsteonAddress) -> Self {
        DeviceAddress::Insteon(a)
    }
}

impl From<X10Address> for DeviceAddress {
    fn from(a: X10Address) -> Self {
        DeviceAddress::X10(a)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceAddress::Insteon(a) => a.fmt(f),
            DeviceAddress::X10(a) => a.fmt(f),
        }
    }
}

impl FromStr for DeviceAddress {
    type Err = InsteonError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().split('.').count() == 3 {
            s.parse().map(DeviceAddress::Insteon)
        } else {
            s.parse().map(DeviceAddress::X10)
        }
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insteon_address_parse_display() {
        let addr: InsteonAddress = "1a.2B.3c".parse().unwrap();
        assert_eq!(addr, InsteonAddress::new(0x1a, 0x2b, 0x3c));
        assert_eq!(addr.to_string(), "1A.2B.3C");
        assert_eq!(addr.low_byte(), 0x3c);
    }

    #[test]
    fn test_insteon_address_rejects_garbage() {
        assert!("1A.2B".parse::<InsteonAddress>().is_err());
        assert!("1A.2B.ZZ".parse::<InsteonAddress>().is_err());
        assert!("1A.2B.333".parse::<InsteonAddress>().is_err());
    }

    #[test]
    fn test_x10_address_codes() {
        let addr: X10Address = "A.1".parse().unwrap();
        assert_eq!(addr.raw(), 0x66);
        assert_eq!(X10Address::from_raw(0x66), addr);

        let addr: X10Address = "p.16".parse().unwrap();
        assert_eq!(addr.raw(), 0xCC);
        assert_eq!(addr.to_string(), "P.16");

        assert!("Q.1".parse::<X10Address>().is_err());
        assert!("A.17".parse::<X10Address>().is_err());
    }

    #[test]
    fn test_device_address_dispatch() {
        assert!(matches!(
            "AA.BB.CC".parse::<DeviceAddress>().unwrap(),
            DeviceAddress::Insteon(_)
        ));
        assert!("B.3".parse::<DeviceAddress>().unwrap().is_x10());
    }
}
