//! Decoded meter reading.

use std::fmt;
use std::time::SystemTime;

/// One reading decoded from a meter's service data.
///
/// Units:
/// - Temperature in Celsius, 0.1 degree resolution
/// - Humidity in percent (0-100; the wire field can carry up to 127)
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    /// Device model code, e.g. `'T'` for the thermo-hygrometer
    pub model: char,
    /// Mode byte as two lowercase hex digits
    pub mode: String,
    /// When the advertisement was captured; meters do not send a clock
    pub observed_at: SystemTime,
    /// Temperature in Celsius
    pub temperature: f64,
    /// Relative humidity in percent
    pub humidity: u8,
}

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{} ({}) temp: {:.2} humidity: {}%>",
            self.model, self.mode, self.temperature, self.humidity
        )
    }
}
