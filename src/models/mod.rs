use serde::{Deserialize, Serialize};

/// Availability of the bridge as seen by MQTT subscribers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl DeviceStatus {
    /// Payload published on the availability topic.
    pub fn payload(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceProtocol {
    Unknown,
    SmaEm,
}

impl DeviceProtocol {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceProtocol::SmaEm => "SMA-EM",
            DeviceProtocol::Unknown => "Unknown",
        }
    }
}
