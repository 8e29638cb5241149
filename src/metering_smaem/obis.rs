use super::structs::{ObisIdentifier, ValueKind};
use log::warn;

pub const OBIS_TYPE_ACTUAL: u8 = 4;
pub const OBIS_TYPE_COUNTER: u8 = 8;
pub const OBIS_TYPE_VERSION: u8 = 0;
/* Channels 128..199 are vendor specific, SMA uses 144 for the firmware version */
pub const OBIS_CHANNEL_VERSION: u8 = 144;

/*
    Layout of the identifier:

    | byte 0  | byte 1 | byte 2 | byte 3 |
    | channel | index  | type   | tariff |

    The tariff is always zero and ignored.
*/
pub fn decode_obis(obis: &[u8; 4]) -> ObisIdentifier {
    let channel = obis[0];
    let index = obis[1];
    let obis_type = obis[2];

    let kind = match (obis_type, channel) {
        (OBIS_TYPE_ACTUAL, _) => ValueKind::Actual,
        (OBIS_TYPE_COUNTER, _) => ValueKind::Counter,
        (OBIS_TYPE_VERSION, OBIS_CHANNEL_VERSION) => ValueKind::Version,
        _ => {
            warn!("OBIS: unknown datatype, channel: {channel} index: {index} type: {obis_type}");
            ValueKind::Unknown
        }
    };

    ObisIdentifier { channel, index, obis_type, kind }
}
