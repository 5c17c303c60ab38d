//! Transport abstraction for Libre transmitters.
//!
//! A transport relays connection state changes, transmitter status messages
//! and raw sensor memory blocks. The reader only consumes these events; it
//! never drives the transport.

use crate::sensor::crypto::SensorType;
use crate::sensor::uid::{PatchInfo, SensorUid, parse_hex};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::mpsc;

/// Channel buffer size for transport events.
pub const EVENT_CHANNEL_BUFFER_SIZE: usize = 100;

/// Error type for transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to read {path}: {reason}")]
    Io { path: PathBuf, reason: String },
    #[error("Line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Unassigned,
    Scanning,
    Connecting,
    Connected,
    Disconnected,
    PoweredOff,
    Unknown,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionState::Unassigned => "Unassigned",
            ConnectionState::Scanning => "Scanning",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::PoweredOff => "Powered off",
            ConnectionState::Unknown => "Unknown",
        };
        f.write_str(text)
    }
}

/// Status messages sent by the transmitter outside of data packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitterMessage {
    NewSensor,
    NoSensor,
    /// Readout interval changed, in minutes
    FrequencyChanged(u8),
}

/// Transmitter description sent along with every sensor block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransmitterMetadata {
    pub name: String,
    /// Percent, 0..=100
    pub battery: u8,
    pub firmware: String,
    pub hardware: String,
    pub mac: Option<String>,
    pub uid: Option<SensorUid>,
    pub patch_info: Option<PatchInfo>,
}

impl TransmitterMetadata {
    /// Battery charge as a fraction between 0 and 1.
    pub fn battery_level(&self) -> f64 {
        f64::from(self.battery.min(100)) / 100.0
    }

    pub fn battery_string(&self) -> String {
        format!("{}%", self.battery)
    }

    pub fn sensor_type(&self) -> Option<SensorType> {
        self.patch_info.as_ref().map(SensorType::from_patch_info)
    }
}

impl fmt::Display for TransmitterMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} hardware {} firmware {} battery {}",
            self.name,
            self.hardware,
            self.firmware,
            self.battery_string()
        )?;
        if let Some(mac) = &self.mac {
            write!(f, " mac {mac}")?;
        }
        if let Some(uid) = &self.uid {
            write!(f, " uid {uid}")?;
        }
        if let Some(info) = &self.patch_info {
            write!(f, " patch info {info}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StateChanged(ConnectionState),
    Message(TransmitterMessage),
    SensorData {
        bytes: Vec<u8>,
        metadata: TransmitterMetadata,
        received_at: SystemTime,
    },
}

/// Transport abstraction, so the reader can be driven without hardware.
pub trait Transport: Send + Sync {
    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<TransportEvent>, TransportError>> + Send + '_>>;
}

/// One line of a sensor dump: `[unix_seconds ]hex`.
///
/// Returns `Ok(None)` for blank lines and `#` comments.
pub fn parse_dump_line(line: &str) -> Result<Option<(Option<SystemTime>, Vec<u8>)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (timestamp, hex) = match line.split_once(char::is_whitespace) {
        Some((secs, hex)) => {
            let secs: u64 = secs
                .parse()
                .map_err(|_| format!("invalid timestamp: {secs}"))?;
            (Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs)), hex.trim())
        }
        None => (None, line),
    };

    let bytes = parse_hex(hex).map_err(|e| e.to_string())?;
    Ok(Some((timestamp, bytes)))
}

/// Replays sensor blocks recorded in a dump file as if a transmitter had
/// relayed them, bracketed by connect and disconnect events.
///
/// Lines without a timestamp are stamped with the time they are replayed.
#[derive(Debug, Clone)]
pub struct ReplayTransport {
    path: PathBuf,
    metadata: TransmitterMetadata,
}

impl ReplayTransport {
    pub fn new(path: impl Into<PathBuf>, metadata: TransmitterMetadata) -> Self {
        Self {
            path: path.into(),
            metadata,
        }
    }

    fn load(&self) -> Result<Vec<(Option<SystemTime>, Vec<u8>)>, TransportError> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| TransportError::Io {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let mut blocks = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let parsed = parse_dump_line(line).map_err(|reason| TransportError::Parse {
                line: index + 1,
                reason,
            })?;
            blocks.extend(parsed);
        }
        log::debug!("loaded {} sensor blocks from {}", blocks.len(), self.path.display());
        Ok(blocks)
    }
}

impl Transport for ReplayTransport {
    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<TransportEvent>, TransportError>> + Send + '_>>
    {
        Box::pin(async move {
            let blocks = self.load()?;
            let metadata = self.metadata.clone();
            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE);

            tokio::spawn(async move {
                let mut events = vec![TransportEvent::StateChanged(ConnectionState::Connected)];
                events.extend(blocks.into_iter().map(|(timestamp, bytes)| {
                    TransportEvent::SensorData {
                        bytes,
                        metadata: metadata.clone(),
                        received_at: timestamp.unwrap_or_else(SystemTime::now),
                    }
                }));
                events.push(TransportEvent::StateChanged(ConnectionState::Disconnected));

                for event in events {
                    if tx.send(event).await.is_err() {
                        // receiver dropped
                        break;
                    }
                }
            });

            Ok(rx)
        })
    }
}
