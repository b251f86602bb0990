// src/gps/source.rs
//! Location fix sources and subscriptions

use super::{fix::LocationFix, gpsd, nmea};
use crate::error::{RecorderError, Result};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tokio_serial::SerialPortBuilderExt;

/// Capacity of the channel between a source task and its subscriber
const EVENT_BUFFER: usize = 64;

/// Where location fixes come from
#[derive(Debug, Clone)]
pub enum FixSource {
    Serial { port: String, baudrate: u32 },
    Gpsd { host: String, port: u16 },
    /// Replay a recorded file of NMEA sentences or JSON fixes, one per line
    Replay { path: PathBuf, pace: Duration },
}

/// Delivery constraints requested by a subscriber
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionOptions {
    pub min_interval: Duration,
    pub min_distance_meters: f64,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(1000),
            min_distance_meters: 0.0,
        }
    }
}

/// Something a fix source reports to its subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Fix(LocationFix),
    /// Signal lost, provider failure, unreadable device. Never fatal.
    Error(String),
}

/// A live stream of source events
pub struct Subscription {
    events: mpsc::Receiver<SourceEvent>,
    running: Arc<AtomicBool>,
}

impl Subscription {
    /// Wrap an existing channel, e.g. one fed by a platform location service
    pub fn from_channel(events: mpsc::Receiver<SourceEvent>) -> Self {
        Self {
            events,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Wait for the next event; `None` once the source has gone away
    pub async fn next(&mut self) -> Option<SourceEvent> {
        if !self.is_active() {
            return None;
        }
        self.events.recv().await
    }

    /// Stop the source task; no further events are delivered
    pub fn unsubscribe(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.events.close();
    }

    pub fn is_active(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// Applies the minimum interval / minimum distance of a subscription
#[derive(Debug)]
pub struct Throttle {
    options: SubscriptionOptions,
    last: Option<LocationFix>,
}

impl Throttle {
    pub fn new(options: SubscriptionOptions) -> Self {
        Self {
            options,
            last: None,
        }
    }

    /// Decide whether `fix` should be delivered, remembering it if so.
    ///
    /// A fix stamped earlier than the last delivered one means the earlier
    /// stamp was wrong (receiver clock skew, GGA date rollover); the throttle
    /// re-anchors on the new fix instead of waiting for the bad stamp to pass.
    pub fn admit(&mut self, fix: &LocationFix) -> bool {
        if let Some(last) = &self.last {
            match fix.timestamp.signed_duration_since(last.timestamp).to_std() {
                Ok(elapsed) => {
                    if elapsed < self.options.min_interval {
                        return false;
                    }
                    if last.coordinate().distance_to(&fix.coordinate())
                        < self.options.min_distance_meters
                    {
                        return false;
                    }
                }
                Err(_) => {
                    tracing::debug!(
                        previous = %last.timestamp,
                        current = %fix.timestamp,
                        "Fix timestamp went backwards, re-anchoring throttle"
                    );
                }
            }
        }
        self.last = Some(fix.clone());
        true
    }
}

impl FixSource {
    /// Start delivering fixes that satisfy `options`
    pub async fn subscribe(&self, options: SubscriptionOptions) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let running = Arc::new(AtomicBool::new(true));
        let throttle = Throttle::new(options);

        match self {
            FixSource::Serial { port, baudrate } => {
                tracing::info!(port = %port, baudrate, "Connecting to GPS on serial port");
                let serial = tokio_serial::new(port, *baudrate)
                    .timeout(Duration::from_millis(1000))
                    .open_native_async()
                    .map_err(|e| {
                        RecorderError::Connection(format!(
                            "Failed to open serial port {}: {}",
                            port, e
                        ))
                    })?;
                let reader = BufReader::new(serial);
                tokio::spawn(pump_lines(
                    reader,
                    tx,
                    Arc::clone(&running),
                    throttle,
                    parse_nmea_line,
                    None,
                ));
            }
            FixSource::Gpsd { host, port } => {
                tracing::info!(host = %host, port, "Connecting to gpsd");
                let reader = gpsd::connect_gpsd(host, *port).await?;
                tokio::spawn(pump_lines(
                    reader,
                    tx,
                    Arc::clone(&running),
                    throttle,
                    gpsd::parse_gpsd_json,
                    None,
                ));
            }
            FixSource::Replay { path, pace } => {
                tracing::info!(path = %path.display(), "Replaying recorded fixes");
                let file = tokio::fs::File::open(path).await.map_err(|e| {
                    RecorderError::Connection(format!(
                        "Failed to open replay file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                tokio::spawn(pump_lines(
                    BufReader::new(file),
                    tx,
                    Arc::clone(&running),
                    throttle,
                    parse_replay_line,
                    Some(*pace),
                ));
            }
        }

        Ok(Subscription {
            events: rx,
            running,
        })
    }

    pub fn describe(&self) -> String {
        match self {
            FixSource::Serial { port, baudrate } => format!("serial {} @ {} baud", port, baudrate),
            FixSource::Gpsd { host, port } => format!("gpsd {}:{}", host, port),
            FixSource::Replay { path, .. } => format!("replay {}", path.display()),
        }
    }
}

fn parse_nmea_line(line: &str) -> Result<Option<LocationFix>> {
    Ok(nmea::parse_nmea_sentence(line))
}

/// Replay files may mix NMEA sentences and JSON-encoded fixes
pub fn parse_replay_line(line: &str) -> Result<Option<LocationFix>> {
    if line.starts_with('$') {
        Ok(nmea::parse_nmea_sentence(line))
    } else {
        Ok(Some(serde_json::from_str(line)?))
    }
}

/// Read lines from a source, parse them and forward admitted fixes
async fn pump_lines<R, F>(
    mut reader: R,
    tx: mpsc::Sender<SourceEvent>,
    running: Arc<AtomicBool>,
    mut throttle: Throttle,
    parse: F,
    pace: Option<Duration>,
) where
    R: AsyncBufRead + Unpin,
    F: Fn(&str) -> Result<Option<LocationFix>>,
{
    let mut line = String::new();

    while running.load(Ordering::Relaxed) {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break, // EOF
            Ok(_) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match parse(line) {
                    Ok(Some(fix)) => {
                        if !throttle.admit(&fix) {
                            continue;
                        }
                        if tx.send(SourceEvent::Fix(fix)).await.is_err() {
                            break; // subscriber gone
                        }
                        if let Some(pace) = pace {
                            tokio::time::sleep(pace).await;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "Skipping unparseable line"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Location source read failed");
                let _ = tx.send(SourceEvent::Error(e.to_string())).await;
                break;
            }
        }
    }

    tracing::debug!("Location source task finished");
}
