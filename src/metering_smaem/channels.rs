use lazy_static::lazy_static;
use std::collections::HashMap;
use super::structs::ChannelDescriptor;

/*
    The meter sends its values in fixed point:

    power            0.1 W
    energy           1 Ws
    current          1 mA
    voltage          1 mV
    frequency        0.001 Hz
    power factor     0.001

    Units below are the ones published, get_scale() converts into them.
*/
const CHANNEL_TABLE: &[ChannelDescriptor] = &[
    // totals
    ChannelDescriptor::new(1, "p_consume", "W", Some("kWh")),
    ChannelDescriptor::new(2, "p_supply", "W", Some("kWh")),
    ChannelDescriptor::new(3, "q_consume", "VAr", Some("kVArh")),
    ChannelDescriptor::new(4, "q_supply", "VAr", Some("kVArh")),
    ChannelDescriptor::new(9, "s_consume", "VA", Some("kVAh")),
    ChannelDescriptor::new(10, "s_supply", "VA", Some("kVAh")),
    ChannelDescriptor::new(13, "cosphi", "", None),
    ChannelDescriptor::new(14, "freq", "Hz", None), // firmware 2.x and newer
    // phase 1
    ChannelDescriptor::new(21, "p1_consume", "W", Some("kWh")),
    ChannelDescriptor::new(22, "p1_supply", "W", Some("kWh")),
    ChannelDescriptor::new(23, "q1_consume", "VAr", Some("kVArh")),
    ChannelDescriptor::new(24, "q1_supply", "VAr", Some("kVArh")),
    ChannelDescriptor::new(29, "s1_consume", "VA", Some("kVAh")),
    ChannelDescriptor::new(30, "s1_supply", "VA", Some("kVAh")),
    ChannelDescriptor::new(31, "i1", "A", None),
    ChannelDescriptor::new(32, "u1", "V", None),
    ChannelDescriptor::new(33, "cosphi1", "", None),
    // phase 2
    ChannelDescriptor::new(41, "p2_consume", "W", Some("kWh")),
    ChannelDescriptor::new(42, "p2_supply", "W", Some("kWh")),
    ChannelDescriptor::new(43, "q2_consume", "VAr", Some("kVArh")),
    ChannelDescriptor::new(44, "q2_supply", "VAr", Some("kVArh")),
    ChannelDescriptor::new(49, "s2_consume", "VA", Some("kVAh")),
    ChannelDescriptor::new(50, "s2_supply", "VA", Some("kVAh")),
    ChannelDescriptor::new(51, "i2", "A", None),
    ChannelDescriptor::new(52, "u2", "V", None),
    ChannelDescriptor::new(53, "cosphi2", "", None),
    // phase 3
    ChannelDescriptor::new(61, "p3_consume", "W", Some("kWh")),
    ChannelDescriptor::new(62, "p3_supply", "W", Some("kWh")),
    ChannelDescriptor::new(63, "q3_consume", "VAr", Some("kVArh")),
    ChannelDescriptor::new(64, "q3_supply", "VAr", Some("kVArh")),
    ChannelDescriptor::new(69, "s3_consume", "VA", Some("kVAh")),
    ChannelDescriptor::new(70, "s3_supply", "VA", Some("kVAh")),
    ChannelDescriptor::new(71, "i3", "A", None),
    ChannelDescriptor::new(72, "u3", "V", None),
    ChannelDescriptor::new(73, "cosphi3", "", None),
    // firmware of the meter, sent with OBIS channel 144
    ChannelDescriptor::new(0, "speedwire_version", "", None),
];

lazy_static! {
    static ref CHANNELS: HashMap<u8, &'static ChannelDescriptor> =
        CHANNEL_TABLE.iter().map(|c| (c.index, c)).collect();
}

pub fn get_channel(index: u8) -> Option<&'static ChannelDescriptor> {
    CHANNELS.get(&index).copied()
}

pub fn get_channel_by_name(name: &str) -> Option<&'static ChannelDescriptor> {
    CHANNEL_TABLE.iter().find(|c| c.name == name)
}

pub fn all_channels() -> &'static [ChannelDescriptor] {
    CHANNEL_TABLE
}

/// Divisor turning a raw fixed point value into `unit`.
pub fn get_scale(unit: &str) -> Option<u64> {
    match unit {
        "W" | "VA" | "VAr" => Some(10),
        "kWh" | "kVAh" | "kVArh" => Some(3_600_000),
        "A" | "V" | "Hz" | "" => Some(1000),
        _ => None,
    }
}

pub fn scale_value(raw: u64, unit: &str) -> Option<f64> {
    get_scale(unit).map(|divisor| raw as f64 / divisor as f64)
}
