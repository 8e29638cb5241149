use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_yml;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "smaem2mqtt.yaml";
pub const MIN_INTERVAL_IN_SECONDS: u64 = 20;
pub const MAX_INTERVAL_IN_SECONDS: u64 = 300;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No configuration file found, tried {0}")]
    NotFound(String),
    #[error("Unable to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unable to parse config file: {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn mqtt_host_default() -> String { return "localhost".to_string() }
fn mqtt_port_default() -> u16 { return 1883 }
fn mqtt_user_default() -> String { return "".to_string() }
fn mqtt_ha_enabled_default() -> bool { return true }
fn mqtt_client_name_default() -> String { return "smaem2mqtt".to_string() }
fn mqtt_keepalive_default() -> u64 { return 60 }
fn mqtt_base_topic_default() -> String { return "home/nodes".to_string() }
fn mqtt_sensor_name_default() -> String { return "smaem".to_string() }
fn mqtt_discovery_prefix_default() -> String { return "homeassistant".to_string() }

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct MqttConfig {
    #[serde(default="mqtt_host_default")]
    pub host: String,
    #[serde(default="mqtt_port_default")]
    pub port: u16,
    #[serde(default="mqtt_user_default")]
    pub user: String,
    #[serde(default="mqtt_user_default")]
    pub pass: String,
    #[serde(default="mqtt_ha_enabled_default")]
    pub ha_enabled: bool,
    #[serde(default="mqtt_client_name_default")]
    pub client_name: String,
    #[serde(default="mqtt_keepalive_default")]
    pub keepalive: u64,
    #[serde(default="mqtt_base_topic_default")]
    pub base_topic: String,
    #[serde(default="mqtt_sensor_name_default")]
    pub sensor_name: String,
    #[serde(default="mqtt_discovery_prefix_default")]
    pub discovery_prefix: String,
    #[serde(default)]
    pub tls: bool,
    /* PEM files, without a CA the platform certificates are used */
    #[serde(default)]
    pub tls_ca_cert: Option<String>,
    #[serde(default)]
    pub tls_certfile: Option<String>,
    #[serde(default)]
    pub tls_keyfile: Option<String>,
}

fn smaem_multicast_group_default() -> String { return "239.12.255.254".to_string() }
fn smaem_port_default() -> u16 { return 9522 }
fn smaem_interface_default() -> String { return "0.0.0.0".to_string() }
fn smaem_interval_default() -> u64 { return 60 }
fn smaem_receive_timeout_default() -> u64 { return 10 }
fn smaem_serials_default() -> Vec<u32> { return Vec::new() }

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct SmaEmConfig {
    #[serde(default="smaem_multicast_group_default")]
    pub multicast_group: String,
    #[serde(default="smaem_port_default")]
    pub port: u16,
    /* Address of the local interface joining the group */
    #[serde(default="smaem_interface_default")]
    pub interface: String,
    #[serde(default="smaem_interval_default")]
    pub interval_in_seconds: u64,
    #[serde(default="smaem_receive_timeout_default")]
    pub receive_timeout: u64,
    /* Only report these meters, empty means all */
    #[serde(default="smaem_serials_default")]
    pub serials: Vec<u32>,
}

impl Default for SmaEmConfig {
    fn default() -> Self {
        return SmaEmConfig {
            multicast_group: smaem_multicast_group_default(),
            port: smaem_port_default(),
            interface: smaem_interface_default(),
            interval_in_seconds: smaem_interval_default(),
            receive_timeout: smaem_receive_timeout_default(),
            serials: smaem_serials_default(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Config {
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub smaem: SmaEmConfig,
}

impl Config {
    /// Reads `smaem2mqtt.yaml` from `config_dir`, or from `config/` and the
    /// working directory if no directory is given.
    pub fn load(config_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let candidates: Vec<PathBuf> = match config_dir {
            Some(dir) => vec![dir.join(CONFIG_FILE_NAME)],
            None => vec![Path::new("config").join(CONFIG_FILE_NAME), PathBuf::from(CONFIG_FILE_NAME)],
        };

        let path = match candidates.iter().find(|p| p.is_file()) {
            Some(p) => p,
            None => {
                let tried: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
                return Err(ConfigError::NotFound(tried.join(", ")));
            }
        };

        info!("Loading configuration from {}", path.display());
        let contents = fs::read_to_string(path)?;
        let mut config = Config::from_yaml(&contents)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        return Ok(config);
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let c: Config = serde_yml::from_str(contents)?;
        return Ok(c);
    }

    /// Connection settings may come from the environment, e.g. for containers.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
        where F: Fn(&str) -> Option<String>
    {
        if let Some(host) = lookup("MQTT_HOSTNAME") {
            debug!("MQTT host taken from environment");
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.mqtt.port = port.parse()
                .map_err(|_| ConfigError::Invalid(format!("MQTT_PORT is not a port: {port}")))?;
        }
        if let Some(user) = lookup("MQTT_USERNAME") {
            self.mqtt.user = user;
        }
        if let Some(pass) = lookup("MQTT_PASSWORD") {
            self.mqtt.pass = pass;
        }
        return Ok(());
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.host.is_empty() {
            return Err(ConfigError::Invalid("mqtt.host must not be empty".to_string()));
        }

        if self.mqtt.tls_certfile.is_some() != self.mqtt.tls_keyfile.is_some() {
            return Err(ConfigError::Invalid("mqtt.tls_certfile and mqtt.tls_keyfile must be given together".to_string()));
        }
        if self.mqtt.tls && self.mqtt.tls_certfile.is_some() && self.mqtt.tls_ca_cert.is_none() {
            return Err(ConfigError::Invalid("mqtt.tls_ca_cert is required for client certificates".to_string()));
        }

        let interval = self.smaem.interval_in_seconds;
        if interval < MIN_INTERVAL_IN_SECONDS || interval > MAX_INTERVAL_IN_SECONDS {
            return Err(ConfigError::Invalid(format!(
                "smaem.interval_in_seconds must be between {MIN_INTERVAL_IN_SECONDS} and {MAX_INTERVAL_IN_SECONDS}, got {interval}")));
        }

        if self.smaem.receive_timeout == 0 {
            return Err(ConfigError::Invalid("smaem.receive_timeout must be at least one second".to_string()));
        }
        if self.smaem.receive_timeout >= interval {
            return Err(ConfigError::Invalid(format!(
                "smaem.receive_timeout ({}) must be shorter than smaem.interval_in_seconds ({interval})",
                self.smaem.receive_timeout)));
        }

        match self.smaem.multicast_group.parse::<Ipv4Addr>() {
            Ok(group) if group.is_multicast() => {},
            _ => return Err(ConfigError::Invalid(format!("{} is not an IPv4 multicast group", self.smaem.multicast_group))),
        }

        if self.smaem.interface.parse::<Ipv4Addr>().is_err() {
            return Err(ConfigError::Invalid(format!("{} is not an IPv4 interface address", self.smaem.interface)));
        }

        return Ok(());
    }
}
