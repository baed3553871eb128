//! Feature and device-type tables
//!
//! Both tables are TOML. The built-in copies ship inside the crate; a
//! deployment may load its own with [`Catalog::from_toml`]. Every handler
//! name and parameter set is validated when the catalog is built, so device
//! creation cannot fail on a bad table entry.

use crate::device::{DeviceConfig, DeviceInfo, InsteonDevice};
use crate::feature::{DeviceFeature, DispatchKey, ReplyKind};
use crate::{DeviceAddress, HandlerParams, InsteonError, MessageHandler, PollHandler, Result};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

const BUILTIN_FEATURES: &str = include_str!("../resources/device_features.toml");
const BUILTIN_DEVICE_TYPES: &str = include_str!("../resources/device_types.toml");

/// Handler reference: a bare name or a name with parameters
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "HandlerSpecRepr")]
pub struct HandlerSpec {
    pub name: String,
    pub params: HandlerParams,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HandlerSpecRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        params: HandlerParams,
    },
}

impl From<HandlerSpecRepr> for HandlerSpec {
    fn from(repr: HandlerSpecRepr) -> Self {
        match repr {
            HandlerSpecRepr::Name(name) => Self {
                name,
                params: HandlerParams::new(),
            },
            HandlerSpecRepr::Full { name, params } => Self { name, params },
        }
    }
}

impl HandlerSpec {
    fn merged(&self, extra: &HandlerParams) -> HandlerParams {
        merge(&self.params, extra)
    }
}

/// Device-level parameters override the table's
fn merge(base: &HandlerParams, extra: &HandlerParams) -> HandlerParams {
    let mut params = base.clone();
    for (k, v) in extra.iter() {
        params.insert(k, v);
    }
    params
}

/// Handler bound to a dispatch key
#[derive(Debug, Clone, Deserialize)]
pub struct KeyedHandler {
    pub cmd1: u8,
    #[serde(default)]
    pub reply: ReplyKind,
    pub name: String,
    #[serde(default)]
    pub params: HandlerParams,
}

/// One feature type from the feature table
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureTemplate {
    #[serde(rename = "type")]
    pub feature_type: String,
    pub default: HandlerSpec,
    pub poll: HandlerSpec,
    #[serde(default)]
    pub handler: Vec<KeyedHandler>,
}

impl FeatureTemplate {
    /// Build a feature instance with device-level parameters merged in
    pub fn instantiate(&self, name: &str, extra: &HandlerParams) -> Result<DeviceFeature> {
        let default = MessageHandler::from_name(&self.default.name, &self.default.merged(extra))?;
        let poll = PollHandler::from_name(&self.poll.name, &self.poll.params)?;
        let mut feature = DeviceFeature::new(name, self.feature_type.as_str())
            .with_default_handler(default)
            .with_poll_handler(poll);
        for keyed in &self.handler {
            let handler = MessageHandler::from_name(&keyed.name, &merge(&keyed.params, extra))?;
            let key = DispatchKey::new(keyed.cmd1, keyed.reply);
            if feature.handler(&key).is_some() {
                return Err(InsteonError::Catalog(format!(
                    "{}: duplicate handler for cmd1 0x{:02x} {:?}",
                    self.feature_type, keyed.cmd1, keyed.reply
                )));
            }
            feature = feature.with_handler(key, handler);
        }
        Ok(feature)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureRef {
    pub name: String,
    #[serde(rename = "type")]
    pub feature_type: String,
    #[serde(default)]
    pub params: HandlerParams,
}

/// One entry of the device-type table
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceType {
    pub product_key: String,
    pub model: String,
    #[serde(default)]
    pub description: String,
    pub features: Vec<FeatureRef>,
}

#[derive(Deserialize)]
struct FeatureFile {
    #[serde(default)]
    feature: Vec<FeatureTemplate>,
}

#[derive(Deserialize)]
struct DeviceTypeFile {
    #[serde(default)]
    device: Vec<DeviceType>,
}

/// Registry of feature templates and device types
#[derive(Debug, Clone)]
pub struct Catalog {
    features: HashMap<String, FeatureTemplate>,
    device_types: HashMap<String, DeviceType>,
}

impl Catalog {
    /// The tables shipped with the crate
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN_FEATURES, BUILTIN_DEVICE_TYPES)
    }

    pub fn from_toml(features: &str, device_types: &str) -> Result<Self> {
        let feature_file: FeatureFile = toml::from_str(features)?;
        let device_file: DeviceTypeFile = toml::from_str(device_types)?;

        let mut catalog = Self {
            features: HashMap::new(),
            device_types: HashMap::new(),
        };
        for template in feature_file.feature {
            template.instantiate(&template.feature_type, &HandlerParams::new())?;
            let key = template.feature_type.clone();
            if catalog.features.insert(key.clone(), template).is_some() {
                return Err(InsteonError::Catalog(format!("duplicate feature type {}", key)));
            }
        }
        for device_type in device_file.device {
            for feature in &device_type.features {
                catalog
                    .feature_template(&feature.feature_type)?
                    .instantiate(&feature.name, &feature.params)?;
            }
            let key = device_type.product_key.clone();
            if catalog.device_types.insert(key.clone(), device_type).is_some() {
                return Err(InsteonError::Catalog(format!("duplicate product key {}", key)));
            }
        }
        debug!(
            "catalog loaded: {} feature types, {} device types",
            catalog.features.len(),
            catalog.device_types.len()
        );
        Ok(catalog)
    }

    fn feature_template(&self, feature_type: &str) -> Result<&FeatureTemplate> {
        self.features
            .get(feature_type)
            .ok_or_else(|| InsteonError::UnknownFeature(feature_type.to_string()))
    }

    pub fn device_type(&self, product_key: &str) -> Option<&DeviceType> {
        self.device_types.get(product_key)
    }

    /// Product keys in sorted order
    pub fn product_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.device_types.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn feature_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.features.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Instantiate a single feature of the given type
    pub fn make_feature(&self, name: &str, feature_type: &str) -> Result<DeviceFeature> {
        self.feature_template(feature_type)?
            .instantiate(name, &HandlerParams::new())
    }

    /// Create a device with every feature of its device type
    pub fn make_device(
        &self,
        address: DeviceAddress,
        product_key: &str,
        config: DeviceConfig,
    ) -> Result<InsteonDevice> {
        let device_type = self
            .device_type(product_key)
            .ok_or_else(|| InsteonError::UnknownProductKey(product_key.to_string()))?;
        let mut device = InsteonDevice::new(DeviceInfo {
            address,
            product_key: Some(product_key.to_string()),
            config,
        });
        for feature in &device_type.features {
            let template = self.feature_template(&feature.feature_type)?;
            device.add_feature(template.instantiate(&feature.name, &feature.params)?)?;
        }
        debug!(
            "created {} ({}) at {} with {} features",
            device_type.model,
            product_key,
            address,
            device.features().len()
        );
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerKind, SensorField};
    use crate::InsteonAddress;

    #[test]
    fn test_builtin_catalog_loads() {
        let catalog = Catalog::builtin().unwrap();
        assert!(catalog.product_keys().contains(&"F00.00.24"));
        assert!(catalog.feature_types().contains(&"GenericDimmer"));
    }

    #[test]
    fn test_make_device_merges_feature_params() {
        let catalog = Catalog::builtin().unwrap();
        let dev = catalog
            .make_device(
                InsteonAddress::new(1, 2, 3).into(),
                "F00.00.03",
                DeviceConfig::default(),
            )
            .unwrap();
        let key = DispatchKey::any(0x2E);
        let watermark = dev.feature("batterywatermarklevel").unwrap();
        assert_eq!(
            watermark.handler(&key).unwrap().kind,
            HandlerKind::HiddenDoorSensorDataReply {
                field: SensorField::BatteryWatermarkLevel
            }
        );
        let battery = dev.feature("batterylevel").unwrap();
        assert_eq!(
            battery.handler(&key).unwrap().kind,
            HandlerKind::HiddenDoorSensorDataReply {
                field: SensorField::BatteryLevel
            }
        );
    }

    #[test]
    fn test_unknown_product_key() {
        let catalog = Catalog::builtin().unwrap();
        let err = catalog
            .make_device(
                InsteonAddress::new(1, 2, 3).into(),
                "F00.FF.FF",
                DeviceConfig::default(),
            )
            .unwrap_err();
        assert!(matches!(err, InsteonError::UnknownProductKey(_)));
    }

    #[test]
    fn test_bad_handler_name_rejected_at_load() {
        let features = r#"
            [[feature]]
            type = "Broken"
            default = "NoSuchHandler"
            poll = "NoPollHandler"
        "#;
        assert!(matches!(
            Catalog::from_toml(features, ""),
            Err(InsteonError::UnknownHandler(_))
        ));
    }

    #[test]
    fn test_unknown_feature_type_rejected() {
        let features = r#"
            [[feature]]
            type = "Plain"
            default = "NoOpMsgHandler"
            poll = "NoPollHandler"
        "#;
        let devices = r#"
            [[device]]
            product_key = "F00.00.99"
            model = "test"
            features = [ { name = "x", type = "Missing" } ]
        "#;
        assert!(matches!(
            Catalog::from_toml(features, devices),
            Err(InsteonError::UnknownFeature(_))
        ));
    }

    #[test]
    fn test_ack_reply_key_parsed() {
        let catalog = Catalog::builtin().unwrap();
        let f = catalog.make_feature("watts", "PowerMeter").unwrap();
        assert_eq!(
            f.handler(&DispatchKey::new(0x80, ReplyKind::AckOfDirect))
                .unwrap()
                .name(),
            "PowerMeterResetHandler"
        );
        assert!(f.handler(&DispatchKey::any(0x80)).is_none());
    }
}
