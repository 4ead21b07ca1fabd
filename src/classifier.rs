//! Recognizing meters from their advertised markers.

use crate::advertisement::{FieldKind, RawAdvertisementField};
use crate::allow_list::AllowList;
use crate::mac_address::MacAddress;

/// Service UUID advertised by SwitchBot devices.
pub const SERVICE_UUID: &str = "cba20d00-224d-11e6-9fb8-0002a5d5c51b";

/// Names and service identifiers that mark a peer as a meter.
pub const MARKERS: [&str; 3] = ["WoHand", "WoMeter", SERVICE_UUID];

fn is_marker(field: &RawAdvertisementField) -> bool {
    match field.kind {
        FieldKind::LocalName | FieldKind::Complete128bServices => field
            .value
            .as_text()
            .is_some_and(|value| MARKERS.contains(&value)),
        FieldKind::ServiceData16b | FieldKind::Other(_) => false,
    }
}

/// Decide whether `address` belongs to a meter.
///
/// A name or service field equal to one of [`MARKERS`] (exact, case-sensitive)
/// identifies the peer. A non-empty `allow_list` replaces that decision
/// entirely: the peer is a meter iff its address is listed.
///
/// Never fails; unknown field kinds are skipped.
pub fn classify(
    fields: &[RawAdvertisementField],
    address: MacAddress,
    allow_list: &AllowList,
) -> Option<MacAddress> {
    if !allow_list.is_empty() {
        return allow_list.contains(&address).then_some(address);
    }

    fields.iter().any(is_marker).then_some(address)
}
