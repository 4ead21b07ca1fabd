//! Bluetooth device addresses.
//!
//! Scan backends report the link-layer address of every peer; the allow-list
//! on the command line uses the same colon-separated notation. Both end up as
//! a [`MacAddress`] so comparisons never depend on the letter case a user or a
//! backend happened to use.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A 6-byte Bluetooth MAC address, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Errors returned when parsing a MAC address string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseMacError {
    #[error("invalid MAC address '{0}': expected six colon-separated octets")]
    WrongOctetCount(String),
    #[error("invalid MAC address '{address}': octet {index} is not two hex digits")]
    InvalidOctet { address: String, index: usize },
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    /// Parses `XX:XX:XX:XX:XX:XX`, accepting upper- and lowercase hex.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut bytes = [0u8; 6];
        let mut octets = s.split(':');

        for (index, byte) in bytes.iter_mut().enumerate() {
            let octet = octets
                .next()
                .ok_or_else(|| ParseMacError::WrongOctetCount(s.to_string()))?;
            if octet.len() != 2 || !octet.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ParseMacError::InvalidOctet {
                    address: s.to_string(),
                    index,
                });
            }
            // Both digits were checked above.
            *byte = u8::from_str_radix(octet, 16).map_err(|_| ParseMacError::InvalidOctet {
                address: s.to_string(),
                index,
            })?;
        }

        if octets.next().is_some() {
            return Err(ParseMacError::WrongOctetCount(s.to_string()));
        }

        Ok(MacAddress(bytes))
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}
