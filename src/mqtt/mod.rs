pub mod ha_interface;

use crate::config::MqttConfig;
use crate::models::{DeviceProtocol, DeviceStatus};
use crate::mqtt::ha_interface::HaDiscover;
use log::{debug, error, info};
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use serde::{Deserialize, Serialize};
use serde_json;
use std::fs;
use std::io;
use std::time::Duration;
use tokio::sync::mpsc::{Receiver, Sender};

pub const ALIVE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MeteringData {
    pub id: String,
    pub meter_name: String,
    pub protocol: DeviceProtocol,
    pub transmission_time: u64,
    pub metered_time: u64,
    pub metered_values: serde_json::Map<String, serde_json::Value>
}

impl MeteringData {
    pub fn new() -> Self {
        return MeteringData {
            id: "".to_string(),
            meter_name: "".to_string(),
            protocol: DeviceProtocol::Unknown,
            transmission_time: 0,
            metered_time: 0,
            metered_values: serde_json::Map::new()
        };
    }
}

pub struct PublishData {
    pub topic: String,
    pub payload: String,
    pub qos: u8,
    pub retain: bool,
}

pub enum Transmission {
    Metering(MeteringData),
    AutoDiscovery(HaDiscover),
    Publish(PublishData)
}

/// Topic layout, `<base_topic>/sensor/<sensor_name>/...`
#[derive(Clone, Debug, PartialEq)]
pub struct MqttTopics {
    base: String,
    discovery_prefix: String,
}

impl MqttTopics {
    pub fn new(config: &MqttConfig) -> Self {
        return MqttTopics {
            base: format!("{}/sensor/{}", config.base_topic, config.sensor_name).to_lowercase(),
            discovery_prefix: config.discovery_prefix.to_lowercase(),
        }
    }

    pub fn base(&self) -> &str {
        return &self.base;
    }

    pub fn status(&self) -> String {
        return format!("{}/status", self.base);
    }

    pub fn state(&self, meter_name: &str) -> String {
        return format!("{}/{}", self.base, meter_name.to_lowercase());
    }

    pub fn raw(&self) -> String {
        return format!("{}/raw", self.base);
    }

    pub fn discovery(&self, unique_id: &str) -> String {
        return format!("{}/device/{}/config", self.discovery_prefix, unique_id.to_lowercase());
    }
}

fn to_qos(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

fn read_pem(path: &str) -> io::Result<Vec<u8>> {
    fs::read(path).map_err(|e| io::Error::new(e.kind(), format!("{path}: {e}")))
}

pub fn build_transport(config: &MqttConfig) -> io::Result<Transport> {
    if !config.tls {
        return Ok(Transport::tcp());
    }

    let Some(ca_path) = &config.tls_ca_cert else {
        info!("MQTT over TLS, trusting the platform certificates");
        return Ok(Transport::tls_with_default_config());
    };

    let ca = read_pem(ca_path)?;
    let client_auth = match (&config.tls_certfile, &config.tls_keyfile) {
        (Some(cert), Some(key)) => Some((read_pem(cert)?, read_pem(key)?)),
        _ => None,
    };
    info!("MQTT over TLS with CA {ca_path}");
    Ok(Transport::tls_with_config(TlsConfiguration::Simple { ca, alpn: None, client_auth }))
}

pub struct MqttManager {
    rx: Receiver<Transmission>,
    exit_thread: bool,
    client: AsyncClient,
    topics: MqttTopics,
}

impl MqttManager {
    pub fn new(config: &MqttConfig) -> io::Result<(Self, Sender<Transmission>)> {
        let (mtx, mrx) = tokio::sync::mpsc::channel(100);
        let topics = MqttTopics::new(config);

        info!("MQTT connection to {}:{} starting up", config.host, config.port);
        let mut mqttoptions = MqttOptions::new(config.client_name.clone(), config.host.clone(), config.port);
        mqttoptions.set_keep_alive(Duration::from_secs(config.keepalive));
        if !config.user.is_empty() {
            mqttoptions.set_credentials(config.user.clone(), config.pass.clone());
        }
        mqttoptions.set_transport(build_transport(config)?);
        mqttoptions.set_last_will(LastWill::new(topics.status(), DeviceStatus::Offline.payload(), QoS::AtLeastOnce, true));

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

        let online_c = client.clone();
        let status_topic = topics.status();
        tokio::spawn(async move {
            info!("MQTT Eventloop started");
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT connection established");
                        let client = online_c.clone();
                        let topic = status_topic.clone();
                        tokio::spawn(async move {
                            if let Err(e) = client.publish(topic, QoS::AtLeastOnce, false, DeviceStatus::Online.payload()).await {
                                error!("Unable to publish online status: {e}");
                            }
                        });
                    },
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("Data successfully published");
                    },
                    Ok(_) => {},
                    Err(e) => {
                        error!("Error in MQTT {:?}, reconnecting ", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        return Ok((MqttManager {
            client: client,
            rx: mrx,
            exit_thread: false,
            topics,
        }, mtx));
    }

    pub async fn start_thread(&mut self) {
        while !self.exit_thread {
            let option = self.rx.recv().await;

            let Some(transmission) = option else {
                debug!("Reading returned none, we exit now");
                self.exit_thread = true;
                continue;
            };

            match transmission {
                Transmission::Metering(data) => {
                    info!("{} metering data received: {}", data.protocol.name(), data.id);
                    self.publish_json(self.topics.raw(), QoS::AtLeastOnce, false, &data).await;
                    self.publish_json(self.topics.state(&data.meter_name), QoS::AtLeastOnce, false, &data.metered_values).await;
                },
                Transmission::AutoDiscovery(disc) => {
                    info!("Announcing {} to Home Assistant", disc.get_dev_id());
                    self.publish_json(disc.discover_topic.clone(), QoS::AtLeastOnce, true, &disc).await;
                },
                Transmission::Publish(publish_data) => {
                    match self.client.publish(
                        publish_data.topic,
                        to_qos(publish_data.qos),
                        publish_data.retain,
                        publish_data.payload
                    ).await {
                        Err(e) => { error!("Error publishing: {}", e); },
                        Ok(_) => { debug!("Published successfully"); }
                    }
                },
            };
        }

        info!("MQTT thread exit");
    }

    async fn publish_json<T: Serialize>(&self, topic: String, qos: QoS, retain: bool, data: &T) {
        let payload = match serde_json::to_string(data) {
            Ok(p) => p,
            Err(e) => {
                error!("Unable to serialize payload for {topic}: {e}");
                return;
            }
        };

        debug!("Publishing to {topic}: {payload}");
        if let Err(e) = self.client.publish(topic, qos, retain, payload).await {
            error!("Error sending: {}", e);
        }
    }
}

/// Republishes the online status so subscribers see the bridge is alive.
pub async fn publish_alive(mqtt_sender: &Sender<Transmission>, topics: &MqttTopics) {
    debug!("SEND: yes, still alive");
    let alive = PublishData {
        topic: topics.status(),
        payload: DeviceStatus::Online.payload().to_string(),
        qos: 1,
        retain: false,
    };
    let _ = mqtt_sender.send(Transmission::Publish(alive)).await;
}
