// src/config.rs
//! Configuration management

use crate::error::{RecorderError, Result};
use crate::gps::{FixSource, SubscriptionOptions};
use crate::recording::filter::{FixFilter, DEFAULT_JUMP_CAP_M, DEFAULT_NOISE_THRESHOLD_M};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub source_type: String, // "gpsd", "serial", "replay"
    pub serial_port: Option<String>,
    pub serial_baudrate: Option<u32>,
    pub gpsd_host: Option<String>,
    pub gpsd_port: Option<u16>,
    pub replay_path: Option<String>,
    pub replay_pace_ms: u64,
    pub noise_threshold_meters: f64,
    pub jump_cap_meters: f64,
    pub min_interval_ms: u64,
    pub min_distance_meters: f64,
    pub data_dir: Option<String>,
    pub user_id: String,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            source_type: "gpsd".to_string(),
            serial_port: None,
            serial_baudrate: Some(9600),
            gpsd_host: Some("localhost".to_string()),
            gpsd_port: Some(2947),
            replay_path: None,
            replay_pace_ms: 1000,
            noise_threshold_meters: DEFAULT_NOISE_THRESHOLD_M,
            jump_cap_meters: DEFAULT_JUMP_CAP_M,
            min_interval_ms: 1000,
            min_distance_meters: 0.0,
            data_dir: None,
            user_id: "local".to_string(),
        }
    }
}

impl RecorderConfig {
    /// Load from a specific file; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| RecorderError::Config(format!("Failed to read config file: {}", e)))?;

        serde_json::from_str(&contents)
            .map_err(|e| RecorderError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RecorderError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| RecorderError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)
            .map_err(|e| RecorderError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    fn home_dir() -> Result<PathBuf> {
        std::env::var("HOME")
            .map(PathBuf::from)
            .map_err(|_| RecorderError::Config("HOME environment variable not set".to_string()))
    }

    /// Get config file path
    pub fn get_config_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?
            .join(".config")
            .join("activity-recorder")
            .join("config.json"))
    }

    /// Directory holding the snapshot and activity history
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => Ok(Self::home_dir()?
                .join(".local")
                .join("share")
                .join("activity-recorder")),
        }
    }

    pub fn filter(&self) -> Result<FixFilter> {
        FixFilter::new(self.noise_threshold_meters, self.jump_cap_meters)
    }

    pub fn subscription_options(&self) -> SubscriptionOptions {
        SubscriptionOptions {
            min_interval: Duration::from_millis(self.min_interval_ms),
            min_distance_meters: self.min_distance_meters.max(0.0),
        }
    }

    /// Build the fix source selected by `source_type`
    pub fn fix_source(&self) -> Result<FixSource> {
        match self.source_type.as_str() {
            "serial" => {
                let port = self.serial_port.clone().ok_or_else(|| {
                    RecorderError::Config("serial source requires a serial_port".to_string())
                })?;
                Ok(FixSource::Serial {
                    port,
                    baudrate: self.serial_baudrate.unwrap_or(9600),
                })
            }
            "gpsd" => Ok(FixSource::Gpsd {
                host: self
                    .gpsd_host
                    .clone()
                    .unwrap_or_else(|| "localhost".to_string()),
                port: self.gpsd_port.unwrap_or(2947),
            }),
            "replay" => {
                let path = self.replay_path.clone().ok_or_else(|| {
                    RecorderError::Config("replay source requires a replay_path".to_string())
                })?;
                Ok(FixSource::Replay {
                    path: PathBuf::from(path),
                    pace: Duration::from_millis(self.replay_pace_ms),
                })
            }
            other => Err(RecorderError::Config(format!(
                "Unknown source type '{}'",
                other
            ))),
        }
    }

    /// Update configuration with new source settings
    pub fn update_source(&mut self, source_type: &str) {
        self.source_type = source_type.to_string();
    }

    /// Update serial port settings
    pub fn update_serial(&mut self, port: String, baudrate: u32) {
        self.source_type = "serial".to_string();
        self.serial_port = Some(port);
        self.serial_baudrate = Some(baudrate);
    }

    /// Update gpsd settings
    pub fn update_gpsd(&mut self, host: String, port: u16) {
        self.source_type = "gpsd".to_string();
        self.gpsd_host = Some(host);
        self.gpsd_port = Some(port);
    }

    /// Update replay settings
    pub fn update_replay(&mut self, path: String, pace_ms: u64) {
        self.source_type = "replay".to_string();
        self.replay_path = Some(path);
        self.replay_pace_ms = pace_ms;
    }
}
