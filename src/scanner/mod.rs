//! BLE scan backends.
//!
//! A backend scans for one cycle (`--wait`), then hands everything it heard
//! during that window to the consumer as a [`ScanBatch`]. Backends only
//! translate what the radio reports into [`PeerAdvertisement`]s; deciding
//! which peers are meters happens in [`crate::device`].

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::advertisement::{PeerAdvertisement, RawAdvertisementField};
use crate::mac_address::MacAddress;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
}

/// Channel buffer size for scan batches.
pub const BATCH_CHANNEL_BUFFER_SIZE: usize = 4;

/// Default length of one scan cycle.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// Tail shared by all UUIDs derived from the Bluetooth base UUID.
const BLUETOOTH_BASE_UUID_TAIL: [u8; 12] = [
    0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0x80, 0x5f, 0x9b, 0x34, 0xfb,
];

/// Peers heard during one scan cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanBatch {
    /// When the cycle ended; used as the capture time of every reading in it
    pub captured_at: SystemTime,
    pub peers: Vec<PeerAdvertisement>,
}

/// Parameters shared by all backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    /// HCI device index (`0` for `hci0`)
    pub device: u16,
    /// Length of one scan cycle
    pub wait: Duration,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            device: 0,
            wait: DEFAULT_WAIT,
        }
    }
}

impl ScanSettings {
    /// BlueZ adapter name for the configured device.
    pub fn adapter_name(&self) -> String {
        format!("hci{}", self.device)
    }
}

/// Collects the reports of one cycle, one entry per peer.
///
/// Peers keep the order in which they were first heard.
#[derive(Debug, Default)]
pub struct CycleBuffer {
    index: HashMap<MacAddress, usize>,
    peers: Vec<PeerAdvertisement>,
}

impl CycleBuffer {
    /// Add one report; repeated reports of a peer are merged.
    pub fn record(&mut self, address: MacAddress, fields: Vec<RawAdvertisementField>) {
        match self.index.get(&address) {
            Some(&slot) => self.peers[slot].merge_report(fields),
            None => {
                self.index.insert(address, self.peers.len());
                self.peers.push(PeerAdvertisement::new(address, fields));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Close the cycle, leaving the buffer empty for the next one.
    pub fn finish(&mut self, captured_at: SystemTime) -> ScanBatch {
        self.index.clear();
        ScanBatch {
            captured_at,
            peers: std::mem::take(&mut self.peers),
        }
    }
}

/// The 16-bit alias of a UUID built on the Bluetooth base UUID.
pub fn short_uuid(uuid: &Uuid) -> Option<u16> {
    let bytes = uuid.as_bytes();
    (bytes[..2] == [0, 0] && bytes[4..] == BLUETOOTH_BASE_UUID_TAIL)
        .then(|| u16::from_be_bytes([bytes[2], bytes[3]]))
}

/// Service data in scan wire form: the 16-bit UUID, little-endian, then the data.
pub fn service_data_16b(uuid: u16, data: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(2 + data.len());
    bytes.extend_from_slice(&uuid.to_le_bytes());
    bytes.extend_from_slice(data);
    bytes
}

/// Parse a scan cycle length from a human-readable string.
///
/// Accepts `ms`, `s` and `m` suffixes; a bare number is seconds.
///
/// # Examples
/// ```
/// use switchbot_meter_listener::scanner::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("5").unwrap(), Duration::from_secs(5));
/// assert_eq!(parse_duration("1500ms").unwrap(), Duration::from_millis(1500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    let (number, unit_millis) = if let Some(num) = src.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = src.strip_suffix('m') {
        (num, 60_000)
    } else if let Some(num) = src.strip_suffix('s') {
        (num, 1_000)
    } else {
        (src, 1_000)
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: '{src}'"))?;
    let millis = value
        .checked_mul(unit_millis)
        .ok_or_else(|| format!("duration too long: '{src}'"))?;

    if millis == 0 {
        return Err("scan duration must be greater than zero".to_string());
    }
    Ok(Duration::from_millis(millis))
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            #[cfg(feature = "bluer")]
            "bluer" | "bluez" => Ok(Backend::Bluer),
            #[cfg(feature = "hci")]
            "hci" | "raw" => Ok(Backend::Hci),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Start scanning with the given backend.
///
/// Returns a receiver yielding one [`ScanBatch`] per cycle until the backend
/// fails or the receiver is dropped.
pub async fn start_scan(
    backend: Backend,
    settings: ScanSettings,
) -> Result<mpsc::Receiver<ScanBatch>, ScanError> {
    log::info!(
        "scanning with {backend} backend on {} in {:?} cycles",
        settings.adapter_name(),
        settings.wait
    );
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan(settings).await,
        #[cfg(feature = "hci")]
        Backend::Hci => hci::start_scan(settings).await,
    }
}
