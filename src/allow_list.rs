//! Forced inclusion of devices by address.
//!
//! Some meters never advertise a name or the service UUID, not even in scan
//! responses. Listing their addresses on the command line makes them
//! count as meters anyway; once any address is listed, the list is the only
//! thing deciding which peers are meters.

use crate::mac_address::{MacAddress, ParseMacError};
use std::collections::HashSet;

/// A set of addresses that overrides marker-based recognition.
///
/// An empty list means "no override"; see [`crate::classifier::classify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    addresses: HashSet<MacAddress>,
}

impl AllowList {
    /// An empty list, leaving recognition to advertised markers.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn contains(&self, address: &MacAddress) -> bool {
        self.addresses.contains(address)
    }

    pub fn insert(&mut self, address: MacAddress) -> bool {
        self.addresses.insert(address)
    }
}

impl FromIterator<MacAddress> for AllowList {
    fn from_iter<I: IntoIterator<Item = MacAddress>>(iter: I) -> Self {
        Self {
            addresses: iter.into_iter().collect(),
        }
    }
}

impl From<&[MacAddress]> for AllowList {
    fn from(addresses: &[MacAddress]) -> Self {
        addresses.iter().copied().collect()
    }
}

/// Parse a single `--mac` argument.
///
/// # Example
/// ```
/// use switchbot_meter_listener::allow_list::parse_mac;
///
/// let mac = parse_mac("c4:7c:8d:6a:1b:2e").unwrap();
/// assert_eq!(mac.to_string(), "C4:7C:8D:6A:1B:2E");
/// ```
pub fn parse_mac(src: &str) -> Result<MacAddress, ParseMacError> {
    src.parse()
}
