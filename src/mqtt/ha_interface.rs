use serde::Serialize;
use super::MqttTopics;


#[derive(Serialize)]
pub struct HaDevice {
    ids: String,
    name: String,
    manufacturer: String,
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sw_version: Option<String>,
}
#[derive(Serialize)]
pub struct HaOrigin {
    pub name: String,
    pub sw_version: String,
}

fn is_none_str(value: &String) -> bool {
    if value.is_empty() || value == "NONE" {
        return true;
    }
    return false;
}

#[derive(Serialize, PartialEq, Clone, Copy, Debug, Default)]
pub enum HAPlatform {
    #[default]
    Sensor,
}

impl HAPlatform {
    pub fn name(&self) -> &'static str {
        match self {
            HAPlatform::Sensor => "sensor",
        }
    }
}

#[derive(Serialize, Debug, PartialEq)]
pub struct HaComponent {
    pub p: String,
    pub name: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub device_class: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub unit_of_measurement: String,
    pub value_template: String,
    pub unique_id: String,
    pub object_id: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub state_class: String,
}

impl HaComponent {
    pub fn new(device: &str, dclass: &str, uof: &str, name: &str, json_key: &str, state_class: &str) -> Self {
        let safe_name = name.replace(" ", "_");

        return HaComponent {
            p: HAPlatform::Sensor.name().to_string(),
            name: name.to_string(),
            device_class: dclass.to_string(),
            unit_of_measurement: uof.to_string(),
            value_template: format!("{{{{ value_json.{json_key} }}}}"),
            unique_id: format!("{device}_{safe_name}").to_lowercase(),
            object_id: format!("{device}_{safe_name}").to_lowercase(),
            state_class: state_class.to_string(),
         }
    }

    pub fn new_energy(device: &str, uof: &str, name: &str, json_key: &str) -> Self {
        return HaComponent::new(device, "energy", uof, name, json_key, "total_increasing");
    }

    pub fn new_freq(device: &str, name: &str, json_key: &str) -> Self {
        return HaComponent::new(device, "frequency", "Hz", name, json_key, "measurement");
    }

    pub fn new_current(device: &str, name: &str, json_key: &str) -> Self {
        return HaComponent::new(device, "current", "A", name, json_key, "measurement");
    }

    pub fn new_power(device: &str, name: &str, json_key: &str) -> Self {
        return HaComponent::new(device, "power", "W", name, json_key, "measurement");
    }

    pub fn new_voltage(device: &str, name: &str, json_key: &str) -> Self {
        return HaComponent::new(device, "voltage", "V", name, json_key, "measurement");
    }

    /* cos(phi) is sent as a plain ratio, HA shows it without unit */
    pub fn new_power_factor(device: &str, name: &str, json_key: &str) -> Self {
        return HaComponent::new(device, "power_factor", "", name, json_key, "measurement");
    }

    /// Picks the sensor flavour from the unit the value is published in.
    pub fn for_unit(device: &str, unit: &str, name: &str, json_key: &str) -> Option<Self> {
        let cmp = match unit {
            "W" => HaComponent::new_power(device, name, json_key),
            "VA" => HaComponent::new(device, "apparent_power", "VA", name, json_key, "measurement"),
            "VAr" => HaComponent::new(device, "reactive_power", "var", name, json_key, "measurement"),
            "A" => HaComponent::new_current(device, name, json_key),
            "V" => HaComponent::new_voltage(device, name, json_key),
            "Hz" => HaComponent::new_freq(device, name, json_key),
            "" => HaComponent::new_power_factor(device, name, json_key),
            "kWh" => HaComponent::new_energy(device, "kWh", name, json_key),
            /* HA has no device class for apparent and reactive energy */
            "kVAh" | "kVArh" => HaComponent::new(device, "NONE", unit, name, json_key, "total_increasing"),
            _ => return None,
        };
        return Some(cmp);
    }
}

#[derive(Serialize)]
pub struct HaDiscover {
    pub dev: HaDevice,
    pub o: HaOrigin,
    pub cmps: serde_json::Map<String, serde_json::Value>,
    pub state_topic: String,
    pub availability_topic: String,
    pub qos: u32,
    #[serde(skip_serializing)]
    pub discover_topic: String,
}

impl HaDiscover {
    pub fn new(unique_id: &str, name: &str, manu: &str, model: &str, sw_version: Option<String>, topics: &MqttTopics) -> Self {
        return HaDiscover {
            discover_topic: topics.discovery(unique_id),
            dev: HaDevice {
                ids: unique_id.to_string(),
                name: name.to_string(),
                manufacturer: manu.to_string(),
                model: model.to_string(),
                sw_version,
            },
            o: HaOrigin {
                name: env!("CARGO_PKG_NAME").to_string(),
                sw_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            cmps: serde_json::Map::new(),
            state_topic: topics.state(name),
            availability_topic: topics.status(),
            qos: 1
        }
    }

    pub fn add_component(&mut self, key: &str, cmp: HaComponent) {
        if let Ok(v) = serde_json::to_value(cmp) {
            self.cmps.insert(key.to_string(), v);
        }
    }

    pub fn get_dev_id(&self) -> String {
        return self.dev.ids.clone();
    }
}
