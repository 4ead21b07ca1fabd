//! Core application runner for `switchbot-meter-listener`.
//!
//! This module is decoupled from CLI parsing and process exit codes so the
//! scan-cycle loop can be tested with an injected scanner and output streams.

use crate::allow_list::{AllowList, parse_mac};
use crate::device::process_batch;
use crate::mac_address::MacAddress;
use crate::output::OutputFormat;
use crate::scanner::{Backend, ScanBatch, ScanError, ScanSettings, parse_duration};
use clap::Parser;
use log::debug;
use std::future::Future;
use std::io;
use std::io::Write;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Configuration for the core run loop.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// HCI device index to scan on (0 for hci0)
    #[arg(long, default_value_t = 0)]
    pub device: u16,

    /// How long each scan cycle listens before reporting.
    /// Accepts duration with suffix: 500ms, 5s, 1m.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, default_value = "5", value_parser = parse_duration)]
    pub wait: Duration,

    /// Only report these devices, whether or not they advertise as meters.
    /// Format: --mac C4:7C:8D:6A:1B:2E (repeatable)
    #[arg(long = "mac", value_parser = parse_mac, value_name = "MAC")]
    pub macs: Vec<MacAddress>,

    /// Output format
    #[arg(long, default_value_t, value_enum)]
    pub format: OutputFormat,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "switchbot_meter")]
    pub influxdb_measurement: String,

    /// Stop after this many scan cycles instead of running until interrupted
    #[arg(long)]
    pub cycles: Option<u64>,

    /// Verbose output, print malformed payloads and debug logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Options {
    fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            device: self.device,
            wait: self.wait,
        }
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Future returned by [`Scanner::start_scan`].
pub type ScanFuture<'a> =
    Pin<Box<dyn Future<Output = Result<mpsc::Receiver<ScanBatch>, ScanError>> + Send + 'a>>;

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(&self, backend: Backend, settings: ScanSettings) -> ScanFuture<'_>;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(&self, backend: Backend, settings: ScanSettings) -> ScanFuture<'_> {
        Box::pin(async move { crate::scanner::start_scan(backend, settings).await })
    }
}

/// Run the scan-cycle loop, writing matched meters to `out` and verbose errors to `err`.
///
/// - Every batch is assembled peer by peer; a malformed payload only affects its own peer.
/// - Matches are formatted and written to `out`, which is flushed after each cycle.
/// - Malformed payloads are written to `err` only when `options.verbose` is true.
pub async fn run_with_io(
    options: Options,
    scanner: &dyn Scanner,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<(), RunError> {
    let allow_list: AllowList = options.macs.iter().copied().collect();
    let formatter = options.format.formatter(&options.influxdb_measurement);

    let mut batches = scanner
        .start_scan(options.backend, options.scan_settings())
        .await?;
    let mut cycles = 0u64;

    while let Some(batch) = batches.recv().await {
        let results = process_batch(&batch.peers, &allow_list, batch.captured_at);
        let mut matched = 0usize;

        for result in results {
            match result {
                Ok(record) => {
                    if let Some((mac, reading)) = record.matched() {
                        writeln!(out, "{}", formatter.format(mac, reading))?;
                        matched += 1;
                    }
                }
                Err(error) => {
                    debug!("dropping peer: {error}");
                    if options.verbose {
                        writeln!(err, "{error}")?;
                    }
                }
            }
        }
        out.flush()?;

        cycles += 1;
        debug!(
            "cycle {cycles}: {} peers, {matched} meters",
            batch.peers.len()
        );
        if options.cycles.is_some_and(|limit| cycles >= limit) {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertisement::{FieldKind, PeerAdvertisement};
    use crate::test_utils::{TEST_MAC, captured_at, meter_peer, text_field};
    use std::sync::Mutex;
    use std::time::SystemTime;

    #[derive(Debug)]
    struct FakeScanner {
        batches: Vec<ScanBatch>,
        started_with: Mutex<Option<ScanSettings>>,
    }

    impl FakeScanner {
        fn new(batches: Vec<ScanBatch>) -> Self {
            Self {
                batches,
                started_with: Mutex::new(None),
            }
        }
    }

    impl Scanner for FakeScanner {
        fn start_scan(&self, _backend: Backend, settings: ScanSettings) -> ScanFuture<'_> {
            *self.started_with.lock().unwrap() = Some(settings);
            let batches = self.batches.clone();
            Box::pin(async move {
                let (tx, rx) = mpsc::channel::<ScanBatch>(batches.len().max(1));
                tokio::spawn(async move {
                    for batch in batches {
                        let _ = tx.send(batch).await;
                    }
                    // drop tx to close channel
                });
                Ok(rx)
            })
        }
    }

    struct FailingScanner;

    impl Scanner for FailingScanner {
        fn start_scan(&self, _backend: Backend, _settings: ScanSettings) -> ScanFuture<'_> {
            Box::pin(async { Err(ScanError::Bluetooth("no adapter".to_string())) })
        }
    }

    fn options() -> Options {
        Options::parse_from(["switchbot-meter-listener"])
    }

    fn batch(peers: Vec<PeerAdvertisement>) -> ScanBatch {
        ScanBatch {
            captured_at: captured_at(),
            peers,
        }
    }

    fn foreign_peer() -> PeerAdvertisement {
        PeerAdvertisement::new(
            MacAddress([0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]),
            vec![text_field(FieldKind::ServiceData16b, "2cfe0011")],
        )
    }

    fn malformed_peer() -> PeerAdvertisement {
        PeerAdvertisement::new(
            MacAddress([0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x02]),
            vec![
                text_field(FieldKind::LocalName, "WoMeter"),
                text_field(FieldKind::ServiceData16b, "zz0d5410e4079345"),
            ],
        )
    }

    async fn run(options: Options, scanner: &dyn Scanner) -> (String, String) {
        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();
        run_with_io(options, scanner, &mut out, &mut err)
            .await
            .unwrap();
        (String::from_utf8(out).unwrap(), String::from_utf8(err).unwrap())
    }

    #[test]
    fn options_defaults() {
        let options = options();
        assert_eq!(options.device, 0);
        assert_eq!(options.wait, Duration::from_secs(5));
        assert!(options.macs.is_empty());
        assert_eq!(options.format, OutputFormat::Text);
        assert_eq!(options.influxdb_measurement, "switchbot_meter");
        assert_eq!(options.cycles, None);
        assert!(!options.verbose);
    }

    #[test]
    fn options_parse_allow_list_and_wait() {
        let options = Options::parse_from([
            "switchbot-meter-listener",
            "--mac",
            "11:22:33:44:55:66",
            "--mac",
            "aa:bb:cc:dd:ee:ff",
            "--wait",
            "10s",
            "--device",
            "1",
            "--format",
            "influxdb",
        ]);
        assert_eq!(options.macs.len(), 2);
        assert_eq!(options.macs[0], TEST_MAC);
        assert_eq!(options.wait, Duration::from_secs(10));
        assert_eq!(options.scan_settings().adapter_name(), "hci1");
        assert_eq!(options.format, OutputFormat::Influxdb);
    }

    #[test]
    fn options_reject_bad_mac() {
        let result = Options::try_parse_from(["switchbot-meter-listener", "--mac", "11:22"]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn run_writes_matches_only() {
        let scanner = FakeScanner::new(vec![batch(vec![foreign_peer(), meter_peer(TEST_MAC)])]);

        let (out, err) = run(options(), &scanner).await;

        assert!(err.is_empty());
        assert_eq!(
            out,
            "<T (10) temp: 19.70 humidity: 69%> (11:22:33:44:55:66)\n"
        );
        assert_eq!(
            *scanner.started_with.lock().unwrap(),
            Some(ScanSettings::default())
        );
    }

    #[tokio::test]
    async fn run_influxdb_format() {
        let scanner = FakeScanner::new(vec![batch(vec![meter_peer(TEST_MAC)])]);
        let mut options = options();
        options.format = OutputFormat::Influxdb;

        let (out, _) = run(options, &scanner).await;

        assert!(out.starts_with("switchbot_meter,mac=11:22:33:44:55:66,mode=10,model=T "));
        assert!(out.contains("humidity=69i"));
        assert!(out.contains("temperature=19.7"));
        assert!(out.ends_with(" 1700000000000000000\n"));
    }

    #[tokio::test]
    async fn run_applies_allow_list() {
        let unmarked = PeerAdvertisement::new(
            MacAddress([0xC4, 0x7C, 0x8D, 0x6A, 0x1B, 0x2E]),
            vec![text_field(FieldKind::ServiceData16b, "000d5410e4079345")],
        );
        let scanner = FakeScanner::new(vec![batch(vec![meter_peer(TEST_MAC), unmarked])]);
        let mut options = options();
        options.macs = vec!["c4:7c:8d:6a:1b:2e".parse().unwrap()];

        let (out, _) = run(options, &scanner).await;

        assert_eq!(out.lines().count(), 1);
        assert!(out.contains("(C4:7C:8D:6A:1B:2E)"));
    }

    #[tokio::test]
    async fn run_reports_malformed_payloads_only_when_verbose() {
        let batches = vec![batch(vec![malformed_peer(), meter_peer(TEST_MAC)])];

        let scanner = FakeScanner::new(batches.clone());
        let (out, err) = run(options(), &scanner).await;
        assert_eq!(out.lines().count(), 1);
        assert!(err.is_empty());

        let scanner = FakeScanner::new(batches);
        let mut verbose = options();
        verbose.verbose = true;
        let (out, err) = run(verbose, &scanner).await;

        // The malformed peer does not stop the rest of the batch
        assert_eq!(out.lines().count(), 1);
        assert!(err.starts_with("DE:AD:BE:EF:00:02: Malformed payload"));
    }

    #[tokio::test]
    async fn run_stops_after_cycle_limit() {
        let scanner = FakeScanner::new(vec![
            batch(vec![meter_peer(TEST_MAC)]),
            batch(vec![meter_peer(TEST_MAC)]),
            batch(vec![meter_peer(TEST_MAC)]),
        ]);
        let mut options = options();
        options.cycles = Some(2);

        let (out, _) = run(options, &scanner).await;

        assert_eq!(out.lines().count(), 2);
    }

    #[tokio::test]
    async fn run_uses_batch_capture_time() {
        let later = SystemTime::UNIX_EPOCH + Duration::from_secs(1_800_000_000);
        let scanner = FakeScanner::new(vec![ScanBatch {
            captured_at: later,
            peers: vec![meter_peer(TEST_MAC)],
        }]);
        let mut options = options();
        options.format = OutputFormat::Influxdb;

        let (out, _) = run(options, &scanner).await;

        assert!(out.ends_with(" 1800000000000000000\n"));
    }

    #[test]
    fn run_propagates_scan_errors() {
        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();
        let result =
            tokio_test::block_on(run_with_io(options(), &FailingScanner, &mut out, &mut err));

        assert!(matches!(result, Err(RunError::Scan(ScanError::Bluetooth(_)))));
        assert_eq!(
            result.unwrap_err().to_string(),
            "Bluetooth error: no adapter"
        );
    }
}
