//! String-keyed handler parameters from the feature table

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Parameters attached to a handler or poll handler entry.
///
/// Values are kept as strings so that `0x0f`, `15` and `"15"` all read the same.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HandlerParams(BTreeMap<String, String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl RawValue {
    fn into_string(self) -> String {
        match self {
            RawValue::Int(v) => v.to_string(),
            RawValue::Float(v) => v.to_string(),
            RawValue::Bool(v) => v.to_string(),
            RawValue::Str(v) => v,
        }
    }
}

impl<'de> Deserialize<'de> for HandlerParams {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, RawValue>::deserialize(deserializer)?;
        Ok(Self(
            raw.into_iter().map(|(k, v)| (k, v.into_string())).collect(),
        ))
    }
}

fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

impl HandlerParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl ToString) {
        self.0.insert(key.to_string(), value.to_string());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Integer parameter, hex with `0x` or decimal
    pub fn int(&self, key: &str) -> Option<i64> {
        let raw = self.0.get(key)?;
        let parsed = parse_int(raw);
        if parsed.is_none() {
            warn!("malformed int parameter {}: {}", key, raw);
        }
        parsed
    }

    pub fn int_or(&self, key: &str, default: i64) -> i64 {
        self.int(key).unwrap_or(default)
    }

    /// Byte-sized parameter; out-of-range values are ignored with a warning
    pub fn byte(&self, key: &str) -> Option<u8> {
        let v = self.int(key)?;
        match u8::try_from(v) {
            Ok(b) => Some(b),
            Err(_) => {
                warn!("parameter {} out of byte range: {}", key, v);
                None
            }
        }
    }

    pub fn double_or(&self, key: &str, default: f64) -> f64 {
        match self.0.get(key) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!("malformed double parameter {}: {}", key, raw);
                default
            }),
            None => default,
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        match self.0.get(key).map(|s| s.trim().to_ascii_lowercase()) {
            Some(v) if v == "true" => true,
            Some(v) if v == "false" => false,
            Some(v) => {
                warn!("malformed bool parameter {}: {}", key, v);
                default
            }
            None => default,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_accepts_hex_and_decimal() {
        let p = HandlerParams::new()
            .with("mask", "0x0f")
            .with("rshift", 4)
            .with("bad", "zz");
        assert_eq!(p.int("mask"), Some(15));
        assert_eq!(p.int("rshift"), Some(4));
        assert_eq!(p.int("bad"), None);
        assert_eq!(p.int_or("missing", 7), 7);
    }

    #[test]
    fn test_deserialize_mixed_toml_values() {
        #[derive(Deserialize)]
        struct Entry {
            params: HandlerParams,
        }
        let entry: Entry =
            toml::from_str("params = { button = 3, factor = 0.5, field = \"kwh\", ext = true }")
                .unwrap();
        assert_eq!(entry.params.byte("button"), Some(3));
        assert_eq!(entry.params.double_or("factor", 1.0), 0.5);
        assert_eq!(entry.params.string("field"), Some("kwh"));
        assert!(entry.params.bool_or("ext", false));
    }

    #[test]
    fn test_byte_range() {
        let p = HandlerParams::new().with("group", 300);
        assert_eq!(p.byte("group"), None);
    }
}
