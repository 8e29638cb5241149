use super::channels::{all_channels, get_channel_by_name};
use super::structs::DecodedMeasurements;
use crate::models::DeviceProtocol;
use crate::mqtt::ha_interface::{HaComponent, HaDiscover};
use crate::mqtt::{MeteringData, MqttTopics};
use crate::{get_id, get_unix_ts};
use serde_json::Value;

pub const MANUFACTURER: &str = "SMA Solar Technology AG";
pub const MODEL: &str = "Energy Meter";
pub const GRID_CONSUME_TOTAL: &str = "grid_consume_total";
pub const GRID_SUPPLY_TOTAL: &str = "grid_supply_total";

pub fn meter_name(serial: u32) -> String {
    format!("SMA-EM-{serial}")
}

/// `1900123456` becomes `SMA-19001EM23456`.
pub fn unique_id(serial: u32) -> String {
    let serial = serial.to_string();
    let split = serial.len().min(5);
    format!("SMA-{}EM{}", &serial[..split], &serial[split..])
}

pub fn get_serial(values: &DecodedMeasurements) -> Option<u32> {
    values.get("serial")
        .and_then(Value::as_u64)
        .and_then(|s| u32::try_from(s).ok())
}

/// Wraps a decoded telegram for the MQTT manager.
pub fn build_metering_data(serial: u32, mut values: DecodedMeasurements) -> MeteringData {
    if let Some(v) = values.get("p_consume_counter").cloned() {
        values.insert(GRID_CONSUME_TOTAL.to_string(), v);
    }
    if let Some(v) = values.get("p_supply_counter").cloned() {
        values.insert(GRID_SUPPLY_TOTAL.to_string(), v);
    }
    let reported_at = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%:z").to_string();
    values.insert("reported_at".to_string(), Value::from(reported_at));

    let now = get_unix_ts();
    let mut mr = MeteringData::new();
    mr.meter_name = meter_name(serial);
    mr.id = get_id("smaem", &mr.meter_name);
    mr.protocol = DeviceProtocol::SmaEm;
    mr.transmission_time = now;
    mr.metered_time = now;
    mr.metered_values = values;
    mr
}

/*
    Components are derived from the keys of a decoded telegram, so only values
    this meter actually sends are announced. Older firmware has no frequency.
*/
pub fn build_discovery(serial: u32, values: &DecodedMeasurements, topics: &MqttTopics) -> HaDiscover {
    let uid = unique_id(serial);
    let device = uid.to_lowercase();
    let sw_version = values.get("speedwire_version").and_then(Value::as_str).map(|s| s.to_string());

    let mut disc = HaDiscover::new(&uid, &meter_name(serial), MANUFACTURER, MODEL, sw_version, topics);

    for channel in all_channels() {
        if channel.name == "speedwire_version" {
            continue;
        }

        /* a version block may land on any known channel, only numbers are sensors */
        if values.get(channel.name).is_some_and(Value::is_number) {
            if let Some(cmp) = HaComponent::for_unit(&device, channel.unit, channel.name, channel.name) {
                disc.add_component(channel.name, cmp);
            }
        }

        let counter_key = channel.counter_key();
        if let (Some(unit), true) = (channel.counter_unit, values.contains_key(&counter_key)) {
            if let Some(cmp) = HaComponent::for_unit(&device, unit, &counter_key, &counter_key) {
                disc.add_component(&counter_key, cmp);
            }
        }
    }

    for (total, source) in [(GRID_CONSUME_TOTAL, "p_consume"), (GRID_SUPPLY_TOTAL, "p_supply")] {
        let has_counter = get_channel_by_name(source)
            .map(|c| values.contains_key(&c.counter_key()))
            .unwrap_or(false);
        if has_counter {
            disc.add_component(total, HaComponent::new_energy(&device, "kWh", total, total));
        }
    }

    disc
}
