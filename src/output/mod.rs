//! Output formatters for matched meter records.
//!
//! Each formatter turns one matched record (address plus reading) into a
//! single output line. The human-readable form is the default; InfluxDB line
//! protocol is there for feeding Telegraf's `execd` input.

pub mod influxdb;
pub mod text;

use crate::mac_address::MacAddress;
use crate::reading::SensorReading;

/// Trait for formatting matched records into output lines.
pub trait OutputFormatter: Send + Sync {
    /// Format the reading of the meter at `mac`. The result carries no trailing newline.
    fn format(&self, mac: MacAddress, reading: &SensorReading) -> String;
}

/// Output formats selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// `<T (10) temp: 19.70 humidity: 69%> (11:22:33:44:55:66)`
    #[default]
    Text,
    /// InfluxDB line protocol
    Influxdb,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Influxdb => write!(f, "influxdb"),
        }
    }
}

impl OutputFormat {
    /// Build the formatter for this format.
    ///
    /// `measurement_name` is only used by the InfluxDB format.
    pub fn formatter(self, measurement_name: &str) -> Box<dyn OutputFormatter> {
        match self {
            OutputFormat::Text => Box::new(text::TextFormatter),
            OutputFormat::Influxdb => {
                Box::new(influxdb::InfluxDbFormatter::new(measurement_name.to_string()))
            }
        }
    }
}
