//! `switchbot-meter-listener` library.
//!
//! Recognizes SwitchBot Meter advertisements in BLE scan results and decodes
//! their temperature and humidity. The pipeline for one scan cycle is:
//!
//! 1. a [`scanner`] backend reports every peer it heard as a [`PeerAdvertisement`],
//! 2. [`classifier::classify`] decides whether a peer is a meter,
//! 3. [`decoder::decode`] turns its service data into a [`SensorReading`],
//! 4. [`DeviceRecord::assemble`] combines both; matches go to an [`OutputFormatter`].
//!
//! The binary (`src/main.rs`) only handles CLI parsing, logging setup and
//! process exit codes; the run loop lives in [`crate::app`].

pub mod advertisement;
pub mod allow_list;
pub mod app;
pub mod classifier;
pub mod decoder;
pub mod device;
pub mod mac_address;
pub mod output;
pub mod reading;
pub mod scanner;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::{FieldKind, FieldValue, PeerAdvertisement, RawAdvertisementField};
pub use allow_list::AllowList;
pub use classifier::{SERVICE_UUID, classify};
pub use decoder::{DecodeError, decode, normalize};
pub use device::{DeviceRecord, RecordError, RecordResult, matches, process_batch};
pub use mac_address::MacAddress;
pub use output::OutputFormatter;
pub use output::influxdb::InfluxDbFormatter;
pub use output::text::TextFormatter;
pub use reading::SensorReading;
pub use scanner::{Backend, ScanBatch, ScanError, ScanSettings};
