//! Bridge between SMA Energy Meters and MQTT
//!
//! The meters broadcast their readings as speedwire telegrams to a multicast
//! group. This library decodes those telegrams and publishes the values,
//! including Home Assistant auto-discovery, to an MQTT broker.

pub mod config;
pub mod models;
pub mod mqtt;
pub mod metering_smaem;

// Re-export common types for easier access
pub use models::{DeviceProtocol, DeviceStatus};
pub use mqtt::{MeteringData, MqttManager, Transmission};
pub use config::Config;
pub use metering_smaem::{decode_telegram, DecodedMeasurements, SmaEmManager, SmaEmParseError};

pub fn get_unix_ts() -> u64 {
    return std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
}

pub fn get_id(protocol: &str, meter_name: &str) -> String {
    return format!("{}-{}-{:?}", protocol, meter_name, get_unix_ts());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_id() {
        let id = get_id("smaem", "SMA-EM-1");
        assert!(id.starts_with("smaem-SMA-EM-1-"));
        assert!(id.rsplit('-').next().unwrap().parse::<u64>().is_ok());
    }
}
