// src/gps/gpsd.rs
//! GPSD client implementation

use super::fix::LocationFix;
use crate::error::{RecorderError, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::TcpStream,
};

#[derive(Debug, Deserialize)]
struct GpsdMessage {
    class: String,
    #[serde(flatten)]
    data: HashMap<String, serde_json::Value>,
}

/// Connect to a gpsd daemon and return a stream reader
pub async fn connect_gpsd(host: &str, port: u16) -> Result<BufReader<TcpStream>> {
    let mut stream = TcpStream::connect(format!("{}:{}", host, port))
        .await
        .map_err(|e| {
            RecorderError::Connection(format!(
                "Failed to connect to gpsd at {}:{}: {}",
                host, port, e
            ))
        })?;

    // Send WATCH command to start receiving JSON reports
    let watch_cmd = "?WATCH={\"enable\":true,\"json\":true}\n";
    stream
        .write_all(watch_cmd.as_bytes())
        .await
        .map_err(|e| RecorderError::Connection(format!("Failed to send WATCH command: {}", e)))?;

    Ok(BufReader::new(stream))
}

/// Parse a single line of gpsd JSON.
///
/// Returns `Ok(Some(fix))` for a TPV report carrying a 2D or 3D position,
/// `Ok(None)` for every other report class.
pub fn parse_gpsd_json(line: &str) -> Result<Option<LocationFix>> {
    let msg: GpsdMessage = serde_json::from_str(line)
        .map_err(|e| RecorderError::Parse(format!("Failed to parse gpsd JSON: {}", e)))?;

    match msg.class.as_str() {
        "TPV" => Ok(parse_tpv_message(&msg.data)),
        "VERSION" => {
            if let Some(version) = msg.data.get("release").and_then(|v| v.as_str()) {
                tracing::info!(version, "Connected to gpsd");
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

/// Parse TPV (Time Position Velocity) message
fn parse_tpv_message(msg_data: &HashMap<String, serde_json::Value>) -> Option<LocationFix> {
    // mode: 0 = unknown, 1 = no fix, 2 = 2D, 3 = 3D
    let mode = msg_data.get("mode").and_then(|v| v.as_u64()).unwrap_or(0);
    if mode < 2 {
        return None;
    }

    let latitude = msg_data.get("lat").and_then(|v| v.as_f64())?;
    let longitude = msg_data.get("lon").and_then(|v| v.as_f64())?;

    // gpsd already reports speed in m/s
    let speed_mps = msg_data.get("speed").and_then(|v| v.as_f64());

    let timestamp = msg_data
        .get("time")
        .and_then(|v| v.as_str())
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Some(LocationFix {
        latitude,
        longitude,
        speed_mps,
        timestamp,
    })
}
