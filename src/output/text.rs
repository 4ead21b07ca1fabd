//! Human-readable output.

use crate::mac_address::MacAddress;
use crate::output::OutputFormatter;
use crate::reading::SensorReading;

/// Formats a record as `<model (mode) temp: 19.70 humidity: 69%> (MAC)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextFormatter;

impl OutputFormatter for TextFormatter {
    fn format(&self, mac: MacAddress, reading: &SensorReading) -> String {
        format!("{reading} ({mac})")
    }
}
