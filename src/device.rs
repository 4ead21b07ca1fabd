//! Device records: identity plus decoded reading for one peer.

use crate::advertisement::PeerAdvertisement;
use crate::allow_list::AllowList;
use crate::classifier::classify;
use crate::decoder::{DecodeError, decode, normalize};
use crate::mac_address::MacAddress;
use crate::reading::SensorReading;
use std::fmt;
use std::time::SystemTime;
use thiserror::Error;

/// A decode error tied to the peer that produced it.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{address}: {source}")]
pub struct RecordError {
    pub address: MacAddress,
    #[source]
    pub source: DecodeError,
}

/// Convenience alias for assembled records or per-peer errors.
pub type RecordResult = Result<DeviceRecord, RecordError>;

/// What one scan pass revealed about one peer.
///
/// `mac` is set when the peer was recognized as a meter (see
/// [`classify`]); `reading` is set when its service data decoded. The two are
/// determined independently and only a record with both is a match.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceRecord {
    pub mac: Option<MacAddress>,
    pub reading: Option<SensorReading>,
}

impl DeviceRecord {
    /// Build the record for `peer`.
    ///
    /// # Errors
    /// Returns a [`RecordError`] when the peer's service data is payload-length
    /// text that is not valid hex. A missing or wrong-length payload is not an error; it
    /// leaves `reading` empty.
    pub fn assemble(
        peer: &PeerAdvertisement,
        allow_list: &AllowList,
        captured_at: SystemTime,
    ) -> Result<Self, RecordError> {
        let mac = classify(&peer.fields, peer.address, allow_list);

        let payload = match peer.service_data() {
            Some(value) => normalize(value).map_err(|source| RecordError {
                address: peer.address,
                source,
            })?,
            None => None,
        };
        let reading = payload.and_then(|payload| decode(&payload, captured_at));

        Ok(Self { mac, reading })
    }

    /// Whether this record is a meter with a reading.
    pub fn is_match(&self) -> bool {
        self.mac.is_some() && self.reading.is_some()
    }

    /// Address and reading of a matching record.
    pub fn matched(&self) -> Option<(MacAddress, &SensorReading)> {
        Some((self.mac?, self.reading.as_ref()?))
    }
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reading {
            Some(reading) => {
                write!(f, "{reading}")?;
                match self.mac {
                    Some(mac) => write!(f, " ({mac})"),
                    None => write!(f, " (unidentified)"),
                }
            }
            None => write!(f, "Unknown device"),
        }
    }
}

/// Assemble every peer of one scan cycle.
///
/// Each peer is handled on its own: an error for one peer is reported in its
/// slot and the remaining peers are still processed.
pub fn process_batch<'a, I>(
    peers: I,
    allow_list: &AllowList,
    captured_at: SystemTime,
) -> Vec<RecordResult>
where
    I: IntoIterator<Item = &'a PeerAdvertisement>,
{
    peers
        .into_iter()
        .map(|peer| DeviceRecord::assemble(peer, allow_list, captured_at))
        .collect()
}

/// Keep only matching records, dropping errors and non-meters.
pub fn matches(results: Vec<RecordResult>) -> Vec<DeviceRecord> {
    results
        .into_iter()
        .filter_map(Result::ok)
        .filter(DeviceRecord::is_match)
        .collect()
}
