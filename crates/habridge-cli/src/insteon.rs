//! Offline Insteon tools: frame decoding, capture replay, device table

use anyhow::{bail, Context, Result};
use colored::Colorize;
use habridge_insteon::schema::FieldType;
use habridge_insteon::{Catalog, Msg, Network, NetworkConfig};
use std::path::Path;
use std::time::Instant;

/// Parse hex with optional spaces, colons or a 0x prefix
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let cleaned: String = text
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    hex::decode(&cleaned).with_context(|| format!("Invalid hex: {}", text.trim()))
}

/// One line per field, `name = value`
pub fn describe(msg: &Msg) -> Vec<String> {
    msg.definition()
        .fields
        .iter()
        .filter_map(|field| {
            let value = match field.ty {
                FieldType::Address => msg.get_address(field.name).ok()?.to_string(),
                FieldType::Byte => format!("0x{:02X}", msg.get_byte(field.name).ok()?),
                FieldType::Bits { .. } => msg.get_bits(field.name).ok()?.to_string(),
            };
            Some(format!("{} = {}", field.name, value))
        })
        .collect()
}

pub fn decode(frames: &[String]) -> Result<()> {
    for text in frames {
        let bytes = parse_hex(text)?;
        let msg = Msg::from_frame(&bytes).with_context(|| format!("Cannot decode {}", text))?;
        println!("{} ({} bytes)", msg.name().cyan().bold(), msg.len());
        for line in describe(&msg) {
            println!("  {}", line);
        }
    }
    Ok(())
}

/// Feed a capture file of hex frames through the configured devices
pub fn replay(catalog: &Catalog, config: &NetworkConfig, file: &Path) -> Result<()> {
    if config.devices.is_empty() {
        bail!("No devices configured; add [[network.devices]] to the config file");
    }
    let mut network = Network::from_config(catalog, config).context("Failed to build network")?;
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read capture {}", file.display()))?;

    let mut updates = 0;
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let bytes = parse_hex(line).with_context(|| format!("Line {}", lineno + 1))?;
        let now = Instant::now();
        for event in network.feed(&bytes, now) {
            updates += 1;
            println!(
                "{} {} {} {}",
                event.address.to_string().yellow(),
                event.feature.green(),
                "->".dimmed(),
                event.state
            );
        }
        for msg in network.poll_due(now) {
            println!("{} {}", "write".blue(), msg);
        }
    }
    println!("{} state updates", updates);
    Ok(())
}

pub fn devices(catalog: &Catalog) {
    for key in catalog.product_keys() {
        let Some(device) = catalog.device_type(key) else {
            continue;
        };
        println!(
            "{} {} {}",
            key.cyan().bold(),
            device.model.green(),
            device.description
        );
        for feature in &device.features {
            println!("  {} ({})", feature.name, feature.feature_type);
        }
    }
}
