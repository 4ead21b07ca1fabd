//! Raw HCI socket backend.
//!
//! This backend drives an active LE scan over raw Linux HCI sockets, without
//! the BlueZ daemon. It requires CAP_NET_RAW and CAP_NET_ADMIN capabilities
//! or root privileges.

use super::{BATCH_CHANNEL_BUFFER_SIZE, CycleBuffer, ScanBatch, ScanError, ScanSettings};
use crate::advertisement::{FieldKind, FieldValue, RawAdvertisementField};
use crate::mac_address::MacAddress;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use log::{debug, warn};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::SystemTime;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use uuid::Uuid;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const HCI_FILTER: c_int = 2;
const SOL_HCI: c_int = 0;
const HCI_CHANNEL_RAW: u16 = 0;

// HCI packet types
const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Active scanning asks for scan responses, which is where meters put their name
const LE_SCAN_ACTIVE: u8 = 0x01;
const LE_PUBLIC_ADDRESS: u8 = 0x00;
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

// AD types
const AD_TYPE_INCOMPLETE_128B_SERVICES: u8 = 0x06;
const AD_TYPE_COMPLETE_128B_SERVICES: u8 = 0x07;
const AD_TYPE_SHORT_LOCAL_NAME: u8 = 0x08;
const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;
const AD_TYPE_SERVICE_DATA_16B: u8 = 0x16;

/// Max HCI event size: header plus 255 bytes of parameters
const HCI_MAX_EVENT_SIZE: usize = 260;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn new() -> Self {
        Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        }
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (ptype as u32);
    }

    fn set_event(&mut self, event: u8) {
        let bit = event as usize;
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

/// Create an HCI command packet
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// Parameters of LE Set Scan Parameters, little-endian on the wire
fn scan_parameters(interval: u16, window: u16) -> Vec<u8> {
    let mut params = Vec::with_capacity(7);
    params.push(LE_SCAN_ACTIVE);
    params.extend_from_slice(&interval.to_le_bytes());
    params.extend_from_slice(&window.to_le_bytes());
    params.push(LE_PUBLIC_ADDRESS);
    params.push(FILTER_POLICY_ACCEPT_ALL);
    params
}

fn os_error(what: &str) -> ScanError {
    ScanError::Bluetooth(format!("{what}: {}", io::Error::last_os_error()))
}

/// Open a raw HCI socket
fn open_hci_socket() -> Result<OwnedFd, ScanError> {
    // SOCK_NONBLOCK is required for AsyncFd
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };

    if fd < 0 {
        return Err(os_error("Failed to create HCI socket"));
    }

    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Bind HCI socket to a device
fn bind_hci_socket(fd: &OwnedFd, dev_id: u16) -> Result<(), ScanError> {
    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: HCI_CHANNEL_RAW,
    };

    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(os_error(&format!("Failed to bind HCI socket to hci{dev_id}")));
    }

    Ok(())
}

/// Only let LE meta events through
fn set_hci_filter(fd: &OwnedFd) -> Result<(), ScanError> {
    let mut filter = HciFilter::new();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_event(EVT_LE_META_EVENT);

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            SOL_HCI,
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(os_error("Failed to set HCI filter"));
    }

    Ok(())
}

fn send_hci_command(fd: &OwnedFd, packet: &[u8]) -> Result<(), ScanError> {
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };

    if ret < 0 {
        return Err(os_error("Failed to send HCI command"));
    }

    Ok(())
}

fn configure_le_scan(fd: &OwnedFd) -> Result<(), ScanError> {
    // 10ms interval and window, in 0.625ms units
    let params = scan_parameters(0x0010, 0x0010);
    send_hci_command(
        fd,
        &hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, &params),
    )?;

    // Enable, without duplicate filtering so readings keep coming
    send_hci_command(
        fd,
        &hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[0x01, 0x00]),
    )
}

/// Translate one AD structure into an advertisement field.
///
/// 128-bit service lists yield one field per UUID.
fn ad_fields(ad_type: u8, data: &[u8]) -> Vec<RawAdvertisementField> {
    let field = |kind, value| RawAdvertisementField::new(kind, value);

    match ad_type {
        AD_TYPE_SHORT_LOCAL_NAME | AD_TYPE_COMPLETE_LOCAL_NAME => vec![field(
            FieldKind::LocalName,
            FieldValue::Text(String::from_utf8_lossy(data).into_owned()),
        )],
        AD_TYPE_COMPLETE_128B_SERVICES | AD_TYPE_INCOMPLETE_128B_SERVICES => {
            let kind = if ad_type == AD_TYPE_COMPLETE_128B_SERVICES {
                FieldKind::Complete128bServices
            } else {
                FieldKind::Other("Incomplete 128b Services".to_string())
            };
            data.chunks_exact(16)
                .map(|chunk| {
                    // UUIDs are little-endian on air
                    let mut bytes = [0u8; 16];
                    bytes.copy_from_slice(chunk);
                    bytes.reverse();
                    field(
                        kind.clone(),
                        FieldValue::Text(Uuid::from_bytes(bytes).to_string()),
                    )
                })
                .collect()
        }
        AD_TYPE_SERVICE_DATA_16B => vec![field(
            FieldKind::ServiceData16b,
            FieldValue::Bytes(data.to_vec()),
        )],
        other => vec![field(
            FieldKind::Other(format!("AD type 0x{other:02x}")),
            FieldValue::Bytes(data.to_vec()),
        )],
    }
}

/// Split advertising data into its AD structures.
fn parse_ad_structures(ad_data: &[u8]) -> Vec<RawAdvertisementField> {
    let mut fields = Vec::new();
    let mut offset = 0;

    while offset < ad_data.len() {
        let len = ad_data[offset] as usize;
        if len == 0 || offset + 1 + len > ad_data.len() {
            break;
        }

        let ad_type = ad_data[offset + 1];
        fields.extend(ad_fields(ad_type, &ad_data[offset + 2..offset + 1 + len]));

        offset += 1 + len;
    }

    fields
}

/// Parse an LE advertising report event into `(address, fields)` per report.
///
/// `event` starts at the HCI packet type byte. Truncated reports end parsing.
fn parse_advertising_event(event: &[u8]) -> Vec<(MacAddress, Vec<RawAdvertisementField>)> {
    let mut reports = Vec::new();

    // Packet type, event code, parameter length, sub-event
    let Some(params) = event.get(4..) else {
        return reports;
    };
    let Some((&num_reports, mut rest)) = params.split_first() else {
        return reports;
    };

    for _ in 0..num_reports {
        // Event type(1) + address type(1) + address(6) + data length(1)
        if rest.len() < 9 {
            break;
        }

        let mut addr = [0u8; 6];
        addr.copy_from_slice(&rest[2..8]);
        addr.reverse(); // HCI uses little-endian addresses

        let data_len = rest[8] as usize;
        // Data plus trailing RSSI byte
        if rest.len() < 9 + data_len + 1 {
            break;
        }

        let fields = parse_ad_structures(&rest[9..9 + data_len]);
        reports.push((MacAddress(addr), fields));

        rest = &rest[9 + data_len + 1..];
    }

    reports
}

fn is_advertising_report(event: &[u8]) -> bool {
    event.len() >= 4
        && event[0] == HCI_EVENT_PKT
        && event[1] == EVT_LE_META_EVENT
        && event[3] == EVT_LE_ADVERTISING_REPORT
}

/// Whether a failed read is worth retrying. Anything else ends the scan.
fn is_transient(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Interrupted
}

/// Start cycle-based scanning over raw HCI sockets.
///
/// # Requirements
/// - CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges
/// - The HCI device selected by `settings.device`
///
/// A socket error after setup ends the scan and closes the channel.
pub async fn start_scan(settings: ScanSettings) -> Result<mpsc::Receiver<ScanBatch>, ScanError> {
    let fd = open_hci_socket()?;
    bind_hci_socket(&fd, settings.device)?;
    set_hci_filter(&fd)?;

    // Commands go through a second socket so the event filter stays untouched
    let cmd_fd = open_hci_socket()?;
    bind_hci_socket(&cmd_fd, settings.device)?;
    configure_le_scan(&cmd_fd)?;

    let (tx, rx) = mpsc::channel(BATCH_CHANNEL_BUFFER_SIZE);

    let async_fd = AsyncFd::new(fd)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {}", e)))?;

    tokio::spawn(async move {
        let _cmd_fd = cmd_fd;
        let mut buf = [0u8; HCI_MAX_EVENT_SIZE];
        let mut cycle = CycleBuffer::default();
        let mut deadline = Instant::now() + settings.wait;

        'scan: loop {
            tokio::select! {
                _ = sleep_until(deadline) => {
                    let batch = cycle.finish(SystemTime::now());
                    debug!("scan cycle finished with {} peers", batch.peers.len());
                    if tx.send(batch).await.is_err() {
                        break;
                    }
                    deadline = Instant::now() + settings.wait;
                }
                ready = async_fd.readable() => {
                    let mut guard = match ready {
                        Ok(guard) => guard,
                        Err(e) => {
                            warn!("HCI socket failed: {e}");
                            break;
                        }
                    };

                    // Drain all available packets before waiting again
                    loop {
                        let n = match guard.try_io(|inner| {
                            let ret = unsafe {
                                libc::read(
                                    inner.as_raw_fd(),
                                    buf.as_mut_ptr() as *mut c_void,
                                    buf.len(),
                                )
                            };
                            if ret < 0 {
                                Err(io::Error::last_os_error())
                            } else {
                                Ok(ret as usize)
                            }
                        }) {
                            Ok(Ok(n)) if n > 0 => n,
                            Ok(Ok(_)) => {
                                warn!("HCI socket closed");
                                break 'scan;
                            }
                            Ok(Err(e)) if is_transient(&e) => continue,
                            Ok(Err(e)) => {
                                warn!("HCI read failed: {e}");
                                break 'scan;
                            }
                            Err(_would_block) => break,
                        };

                        if is_advertising_report(&buf[..n]) {
                            for (address, fields) in parse_advertising_event(&buf[..n]) {
                                cycle.record(address, fields);
                            }
                        }
                    }
                }
            }
        }
    });

    Ok(rx)
}
