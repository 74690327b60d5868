//! Wireshark JSON export loader (`tshark -T json -e usb.src -e usb.capdata`).

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use fx_core::capture::{CaptureRecord, Direction};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct Packet {
    #[serde(rename = "_source")]
    source: Source,
}

#[derive(Debug, Deserialize)]
struct Source {
    #[serde(default)]
    layers: HashMap<String, Value>,
}

/// `-e` fields export as one-element arrays, `-T json` without `-e` as
/// plain strings. Accept both.
fn first_str(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Array(items) => items.first().and_then(Value::as_str),
        _ => None,
    }
}

/// Parse a Wireshark JSON export into capture records.
///
/// Packets without `usb.capdata` are skipped.
pub fn parse_capture(text: &str) -> Result<Vec<CaptureRecord>> {
    let packets: Vec<Packet> =
        serde_json::from_str(text).context("Capture is not a Wireshark JSON export")?;

    let mut records = Vec::new();
    for (index, packet) in packets.iter().enumerate() {
        let layers = &packet.source.layers;
        let Some(capdata) = layers.get("usb.capdata").and_then(first_str) else {
            continue;
        };
        let src = layers.get("usb.src").and_then(first_str).unwrap_or("");
        let record = CaptureRecord::from_hex(Direction::from_usb_src(src), capdata)
            .with_context(|| format!("Packet {}", index))?;
        records.push(record);
    }

    debug!(packets = packets.len(), records = records.len(), "Capture loaded");
    Ok(records)
}

pub fn load_capture(path: &Path) -> Result<Vec<CaptureRecord>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read capture {}", path.display()))?;
    parse_capture(&text)
}
