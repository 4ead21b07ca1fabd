//! Meter service-data decoding.
//!
//! Meters put their reading in the `16b Service Data` field. The canonical
//! payload is 8 bytes, the first two being the 16-bit service UUID:
//!
//! ```text
//! 0  1  2      3     4  5          6              7
//! uuid  model  mode  -  temp frac  temp int|sign  humidity|flag
//! ```
//!
//! Scanners that report service data as text (`"000d5410e4079345"`) must go
//! through [`normalize`] first.

use crate::advertisement::FieldValue;
use crate::reading::SensorReading;
use std::time::SystemTime;
use thiserror::Error;

/// Length of a meter payload in canonical binary form.
pub const PAYLOAD_LEN: usize = 8;
/// Length of a meter payload in hex text form.
pub const PAYLOAD_HEX_LEN: usize = 2 * PAYLOAD_LEN;

const MODEL: usize = 2;
const MODE: usize = 3;
const TEMPERATURE_FRACTION: usize = 5;
const TEMPERATURE_INTEGER: usize = 6;
const HUMIDITY: usize = 7;

/// Set in the temperature integer byte for readings at or above zero.
const NON_NEGATIVE_FLAG: u8 = 0x80;
/// Humidity shares its byte with an unrelated status bit.
const HUMIDITY_MASK: u8 = 0x7F;
/// The upper nibble of the fraction byte holds alert flags.
const FRACTION_MASK: u8 = 0x0F;

/// Errors for service data that could not be brought into binary form.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// The value claimed to be hex encoded but is not.
    #[error("Malformed payload: {0}")]
    MalformedPayload(#[from] hex::FromHexError),
}

/// Bring a service-data value into canonical binary form.
///
/// Binary values pass through untouched and [`decode`] checks their length.
/// Text values are only hex decoded when they have the length of a meter
/// payload; any other text belongs to some other device and gives `None`.
///
/// # Errors
/// Returns [`DecodeError::MalformedPayload`] for payload-length text that is
/// not valid hex.
pub fn normalize(value: &FieldValue) -> Result<Option<Vec<u8>>, DecodeError> {
    match value {
        FieldValue::Bytes(bytes) => Ok(Some(bytes.clone())),
        FieldValue::Text(text) => {
            let text = text.trim();
            if text.len() != PAYLOAD_HEX_LEN {
                return Ok(None);
            }
            Ok(Some(hex::decode(text)?))
        }
    }
}

/// Decode the temperature from its fraction and integer bytes.
///
/// The integer byte is not two's complement: with the top bit clear the
/// reading is negative and both parts are negated. The parts are then added,
/// so `(0x03, 0x0A)` gives `-10 + -0.3`.
fn temperature(fraction_byte: u8, integer_byte: u8) -> f64 {
    let fraction = f64::from(fraction_byte & FRACTION_MASK) / 10.0;
    if integer_byte & NON_NEGATIVE_FLAG == 0 {
        -f64::from(integer_byte) - fraction
    } else {
        f64::from(integer_byte - NON_NEGATIVE_FLAG) + fraction
    }
}

/// Decode a canonical payload into a reading.
///
/// Returns `None` for anything that is not a meter payload: the wrong length
/// (many unrelated peers advertise 16-bit service data) or a model byte that
/// is not a printable ASCII character. `observed_at` is set to `captured_at`
/// as-is.
pub fn decode(service_data: &[u8], captured_at: SystemTime) -> Option<SensorReading> {
    let payload: &[u8; PAYLOAD_LEN] = service_data.try_into().ok()?;

    let model = payload[MODEL];
    if !model.is_ascii_graphic() {
        return None;
    }

    Some(SensorReading {
        model: char::from(model),
        mode: format!("{:02x}", payload[MODE]),
        observed_at: captured_at,
        temperature: temperature(payload[TEMPERATURE_FRACTION], payload[TEMPERATURE_INTEGER]),
        humidity: payload[HUMIDITY] & HUMIDITY_MASK,
    })
}
