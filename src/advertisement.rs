//! Raw advertisement data as reported by a BLE scan.
//!
//! A scan reports each peer as a list of `(kind, value)` fields. Only three
//! kinds matter for meters; every other kind is kept as [`FieldKind::Other`]
//! and ignored downstream.

use crate::mac_address::MacAddress;
use std::fmt;

/// Advertisement field kinds, named after the scan vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// `"Local name"` (shortened or complete device name).
    LocalName,
    /// `"Complete 128b Services"`, one field per advertised service UUID.
    Complete128bServices,
    /// `"16b Service Data"`, the 16-bit service UUID (little-endian) followed by its data.
    ServiceData16b,
    /// Any other kind; carried for diagnostics only.
    Other(String),
}

impl FieldKind {
    pub const LOCAL_NAME: &'static str = "Local name";
    pub const COMPLETE_128B_SERVICES: &'static str = "Complete 128b Services";
    pub const SERVICE_DATA_16B: &'static str = "16b Service Data";

    pub fn as_str(&self) -> &str {
        match self {
            FieldKind::LocalName => Self::LOCAL_NAME,
            FieldKind::Complete128bServices => Self::COMPLETE_128B_SERVICES,
            FieldKind::ServiceData16b => Self::SERVICE_DATA_16B,
            FieldKind::Other(kind) => kind,
        }
    }
}

impl From<&str> for FieldKind {
    fn from(kind: &str) -> Self {
        match kind {
            Self::LOCAL_NAME => FieldKind::LocalName,
            Self::COMPLETE_128B_SERVICES => FieldKind::Complete128bServices,
            Self::SERVICE_DATA_16B => FieldKind::ServiceData16b,
            other => FieldKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The value of an advertisement field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Textual form. Service data in this form is hex encoded (`"000d5410e4079345"`).
    Text(String),
    /// Binary form, exactly as it appeared on air.
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// The value as text, if it is text or valid UTF-8 bytes.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            FieldValue::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(text: &str) -> Self {
        FieldValue::Text(text.to_string())
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(bytes: Vec<u8>) -> Self {
        FieldValue::Bytes(bytes)
    }
}

/// One reported attribute of a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAdvertisementField {
    pub kind: FieldKind,
    pub value: FieldValue,
}

impl RawAdvertisementField {
    pub fn new(kind: FieldKind, value: FieldValue) -> Self {
        Self { kind, value }
    }
}

/// Everything one peer advertised during a single scan pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAdvertisement {
    pub address: MacAddress,
    pub fields: Vec<RawAdvertisementField>,
}

impl PeerAdvertisement {
    pub fn new(address: MacAddress, fields: Vec<RawAdvertisementField>) -> Self {
        Self { address, fields }
    }

    /// Build a peer from `(kind, value)` pairs using the scan vocabulary.
    pub fn from_pairs<'a, I>(address: MacAddress, pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, FieldValue)>,
    {
        let fields = pairs
            .into_iter()
            .map(|(kind, value)| RawAdvertisementField::new(FieldKind::from(kind), value))
            .collect();
        Self::new(address, fields)
    }

    /// The first `16b Service Data` field, if any was reported.
    pub fn service_data(&self) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|field| field.kind == FieldKind::ServiceData16b)
            .map(|field| &field.value)
    }

    /// Fold a later report of the same peer into this one.
    ///
    /// Every kind present in `fields` replaces all earlier fields of that kind;
    /// kinds absent from the new report are kept (a scan response carries
    /// different fields than the advertisement preceding it).
    pub fn merge_report(&mut self, fields: Vec<RawAdvertisementField>) {
        self.fields
            .retain(|old| !fields.iter().any(|new| new.kind == old.kind));
        self.fields.extend(fields);
    }
}
