use crate::advertisement::{FieldKind, FieldValue, PeerAdvertisement, RawAdvertisementField};
use crate::mac_address::MacAddress;
use std::time::{Duration, SystemTime};

/// The address used by the reference advertisement.
pub const TEST_MAC: MacAddress = MacAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

/// Service data of a meter reporting 19.7 °C and 69 %, in the hex wire form.
pub const METER_SERVICE_DATA_HEX: &str = "000d5410e4079345";

/// The same payload in canonical binary form.
pub const METER_PAYLOAD: [u8; 8] = [0x00, 0x0D, 0x54, 0x10, 0xE4, 0x07, 0x93, 0x45];

/// A fixed capture time so readings compare equal across calls.
pub fn captured_at() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

pub fn text_field(kind: FieldKind, value: &str) -> RawAdvertisementField {
    RawAdvertisementField::new(kind, FieldValue::Text(value.to_string()))
}

/// A meter advertising `Local name = WoHand` and the reference payload.
pub fn meter_peer(address: MacAddress) -> PeerAdvertisement {
    PeerAdvertisement::new(
        address,
        vec![
            text_field(FieldKind::LocalName, "WoHand"),
            text_field(FieldKind::Complete128bServices, "WoMeter"),
            text_field(FieldKind::ServiceData16b, METER_SERVICE_DATA_HEX),
        ],
    )
}
