//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to run LE discovery through the BlueZ
//! daemon. At the end of each cycle it reads the name, service UUIDs and
//! service data BlueZ has cached for every device heard in the window.

use super::{
    BATCH_CHANNEL_BUFFER_SIZE, CycleBuffer, ScanBatch, ScanError, ScanSettings, service_data_16b,
    short_uuid,
};
use crate::advertisement::{FieldKind, FieldValue, RawAdvertisementField};
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
use futures::StreamExt;
use log::{debug, warn};
use std::collections::HashSet;
use std::pin::pin;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Start cycle-based discovery on the configured adapter.
///
/// Adapter setup errors are returned directly; errors in later cycles end
/// the scan and close the channel.
pub async fn start_scan(settings: ScanSettings) -> Result<mpsc::Receiver<ScanBatch>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.adapter(&settings.adapter_name())?;
    adapter.set_powered(true).await?;
    adapter
        .set_discovery_filter(DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..Default::default()
        })
        .await?;

    let (tx, rx) = mpsc::channel(BATCH_CHANNEL_BUFFER_SIZE);

    tokio::spawn(async move {
        // Keep the D-Bus connection alive for as long as we scan
        let _session = session;

        loop {
            let batch = match scan_cycle(&adapter, settings.wait).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!("scan cycle on {} failed: {e}", adapter.name());
                    break;
                }
            };
            debug!("scan cycle finished with {} peers", batch.peers.len());
            if tx.send(batch).await.is_err() {
                break;
            }
        }
    });

    Ok(rx)
}

/// Devices heard during one discovery window.
///
/// Discovery starts by replaying every device BlueZ already knows as
/// `DeviceAdded`, including devices that are out of range. A replay is not a
/// sighting; a device counts once it is newly discovered or one of its
/// properties changes within the window.
#[derive(Debug)]
struct Sightings {
    replay: HashSet<Address>,
    heard: HashSet<Address>,
}

impl Sightings {
    fn new(known: impl IntoIterator<Item = Address>) -> Self {
        Self {
            replay: known.into_iter().collect(),
            heard: HashSet::new(),
        }
    }

    fn observe(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::DeviceAdded(address) => {
                if !self.replay.remove(&address) {
                    self.heard.insert(address);
                }
            }
            AdapterEvent::DeviceRemoved(address) => {
                self.replay.remove(&address);
                self.heard.remove(&address);
            }
            AdapterEvent::PropertyChanged(_) => {}
        }
    }

    fn into_heard(self) -> HashSet<Address> {
        self.heard
    }
}

/// Discover for `wait`, then collect the advertisement data of every device heard.
async fn scan_cycle(adapter: &Adapter, wait: Duration) -> Result<ScanBatch, ScanError> {
    let mut sightings = Sightings::new(adapter.device_addresses().await?);
    {
        // Discovery stops when the stream is dropped
        let mut events = pin!(adapter.discover_devices_with_changes().await?);
        let deadline = Instant::now() + wait;

        while let Ok(Some(event)) = timeout_at(deadline, events.next()).await {
            sightings.observe(event);
        }
    }

    let mut cycle = CycleBuffer::default();
    for address in sightings.into_heard() {
        match peer_fields(adapter, address).await {
            Ok(fields) => cycle.record(address.into(), fields),
            // Devices can vanish between discovery and the property read
            Err(e) => debug!("skipping {address}: {e}"),
        }
    }

    Ok(cycle.finish(SystemTime::now()))
}

/// Translate the cached BlueZ properties of a device into advertisement fields.
async fn peer_fields(
    adapter: &Adapter,
    address: Address,
) -> Result<Vec<RawAdvertisementField>, ScanError> {
    let device = adapter.device(address)?;
    let mut fields = Vec::new();

    if let Some(name) = device.name().await? {
        fields.push(RawAdvertisementField::new(
            FieldKind::LocalName,
            FieldValue::Text(name),
        ));
    }

    if let Some(uuids) = device.uuids().await? {
        fields.extend(uuids.into_iter().filter(|uuid| short_uuid(uuid).is_none()).map(
            |uuid| {
                RawAdvertisementField::new(
                    FieldKind::Complete128bServices,
                    FieldValue::Text(uuid.to_string()),
                )
            },
        ));
    }

    if let Some(service_data) = device.service_data().await? {
        for (uuid, data) in service_data {
            // BlueZ expands 16-bit UUIDs; put the short form back in front of the data
            if let Some(short) = short_uuid(&uuid) {
                fields.push(RawAdvertisementField::new(
                    FieldKind::ServiceData16b,
                    FieldValue::Bytes(service_data_16b(short, &data)),
                ));
            }
        }
    }

    Ok(fields)
}
