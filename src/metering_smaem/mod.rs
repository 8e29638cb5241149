use crate::config::SmaEmConfig;
use crate::mqtt::{MqttTopics, Transmission};
use log::{debug, error, info, log_enabled, trace, warn, Level};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::Sender;
use tokio::time::{Instant, MissedTickBehavior};

pub mod structs;
pub mod channels;
pub mod obis;
pub mod parser;
pub mod receiver;
pub mod utils;

pub use structs::{DecodedMeasurements, FrameHeader, ValueKind};
use receiver::{ReceiverError, SmaEmReceiver};

/// Custom error types for SMA-EM telegram parsing
#[derive(Error, Debug)]
pub enum SmaEmParseError {
    #[error("Not an SMA telegram")]
    InvalidSignature,
    #[error("telegram truncated: need {needed} bytes, got {actual}")]
    TruncatedFrame { needed: usize, actual: usize },
}

/// Decodes one datagram into its measurements.
///
/// Datagrams without the SMA signature give an empty map, only a frame that
/// is shorter than its own length field claims is an error.
pub fn decode_telegram(datagram: &[u8]) -> Result<DecodedMeasurements, SmaEmParseError> {
    match parser::TelegramParser::new(datagram).decode() {
        Err(SmaEmParseError::InvalidSignature) => {
            debug!("Datagram without SMA signature ignored");
            Ok(DecodedMeasurements::new())
        }
        res => res,
    }
}

pub fn parse_header(datagram: &[u8]) -> Result<FrameHeader, SmaEmParseError> {
    parser::TelegramParser::new(datagram).parse_header()
}

/// Returns the serial and values of a datagram worth reporting.
pub fn accept_telegram(datagram: &[u8], serials: &[u32]) -> Option<(u32, DecodedMeasurements)> {
    let values = match decode_telegram(datagram) {
        Ok(v) => v,
        Err(e) => {
            warn!("SMA-EM telegram can not be parsed: {e}");
            return None;
        }
    };

    let Some(serial) = utils::get_serial(&values) else {
        debug!("Telegram without measurements skipped");
        return None;
    };

    if !serials.is_empty() && !serials.contains(&serial) {
        debug!("Telegram of meter {serial} is not configured, skipped");
        return None;
    }

    Some((serial, values))
}

pub struct SmaEmManager {
    sender: Sender<Transmission>,
    config: SmaEmConfig,
    topics: MqttTopics,
    ha_enabled: bool,
    announced: HashSet<u32>,
}

impl SmaEmManager {
    pub fn new(sender: Sender<Transmission>, config: SmaEmConfig, topics: MqttTopics, ha_enabled: bool) -> Self {
        return SmaEmManager {
            sender,
            config,
            topics,
            ha_enabled,
            announced: HashSet::new(),
        }
    }

    pub async fn start_thread(&mut self) {
        info!("Starting SMA-EM thread, reporting every {} seconds", self.config.interval_in_seconds);

        let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_in_seconds));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            debug!("Time to report");

            match self.poll().await {
                Ok(Some((serial, values))) => {
                    if self.handle_telegram(serial, values).await.is_err() {
                        error!("MQTT manager is gone, stopping SMA-EM thread");
                        return;
                    }
                }
                Ok(None) => {
                    warn!("No SMA-EM telegram within {} seconds", self.config.receive_timeout);
                }
                Err(e) => {
                    error!("Unable to receive SMA-EM telegram: {e}");
                }
            }
        }
    }

    /* A fresh socket per poll, otherwise we would read what queued up since the last one */
    async fn poll(&self) -> Result<Option<(u32, DecodedMeasurements)>, ReceiverError> {
        let receiver = SmaEmReceiver::open(&self.config)?;
        let deadline = Instant::now() + Duration::from_secs(self.config.receive_timeout);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let datagram = match receiver.receive(remaining).await {
                Ok((datagram, from)) => {
                    debug!("Datagram of {} bytes from {from}", datagram.len());
                    datagram
                }
                Err(ReceiverError::ReceiveTimeout(_)) => return Ok(None),
                Err(e) => return Err(e),
            };

            if log_enabled!(Level::Trace) {
                trace!("Datagram: {}", hex::encode(&datagram));
            }

            if let Some(accepted) = accept_telegram(&datagram, &self.config.serials) {
                return Ok(Some(accepted));
            }
        }
    }

    async fn handle_telegram(&mut self, serial: u32, values: DecodedMeasurements) -> Result<(), ()> {
        if self.ha_enabled && self.announced.insert(serial) {
            info!("Announcing SMA Energy Meter {serial} to MQTT broker for auto-discovery");
            let discover = utils::build_discovery(serial, &values, &self.topics);
            self.sender.send(Transmission::AutoDiscovery(discover)).await.map_err(|_| ())?;
        }

        let mr = utils::build_metering_data(serial, values);
        self.sender.send(Transmission::Metering(mr)).await.map_err(|_| ())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::parser::{HEADER_LEN, LENGTH_OFFSET, LENGTH_RANGE};

    /// Assembles telegrams the way the meter lays them out.
    pub(crate) struct TelegramBuilder {
        serial: u32,
        timestamp: u32,
        blocks: Vec<u8>,
    }

    impl TelegramBuilder {
        pub(crate) fn new(serial: u32, timestamp: u32) -> Self {
            Self { serial, timestamp, blocks: Vec::new() }
        }

        pub(crate) fn block(mut self, id: [u8; 4], value: &[u8]) -> Self {
            self.blocks.extend_from_slice(&id);
            self.blocks.extend_from_slice(value);
            self
        }

        pub(crate) fn actual(self, index: u8, raw: u32) -> Self {
            self.block([0x00, index, 0x04, 0x00], &raw.to_be_bytes())
        }

        pub(crate) fn counter(self, index: u8, raw: u64) -> Self {
            self.block([0x00, index, 0x08, 0x00], &raw.to_be_bytes())
        }

        pub(crate) fn version(self, raw: [u8; 4]) -> Self {
            self.block([0x90, 0x00, 0x00, 0x00], &raw)
        }

        pub(crate) fn build(self) -> Vec<u8> {
            let frame_length = HEADER_LEN + self.blocks.len();
            let mut data = Vec::with_capacity(frame_length + 4);
            data.extend_from_slice(b"SMA\0");
            data.extend_from_slice(&[0x00, 0x04, 0x02, 0xA0, 0x00, 0x00, 0x00, 0x01]);
            data.extend_from_slice(&[0x00, 0x00]);
            data.extend_from_slice(&[0x00, 0x10, 0x60, 0x69, 0x01, 0x74]);
            data.extend_from_slice(&self.serial.to_be_bytes());
            data.extend_from_slice(&self.timestamp.to_be_bytes());
            data.extend_from_slice(&self.blocks);
            data[LENGTH_RANGE].copy_from_slice(&((frame_length - LENGTH_OFFSET) as u16).to_be_bytes());
            // end of data marker
            data.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
            data
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::parser::{LENGTH_RANGE, SKIPPED_FRAME_LENGTH};
    use super::test_support::TelegramBuilder;
    use serde_json::Value;

    fn full_telegram() -> Vec<u8> {
        TelegramBuilder::new(1900123456, 0x0123_4567)
            .actual(1, 15000)
            .counter(1, 3_600_000)
            .actual(2, 0)
            .counter(2, 18_000_000)
            .actual(13, 987)
            .actual(14, 49_987)
            .actual(31, 6_543)
            .actual(32, 230_512)
            .counter(33, 12)
            .version([0x03, 0x04, 0x05, 0x41])
            .build()
    }

    #[test]
    fn test_decode_full_telegram() {
        let values = decode_telegram(&full_telegram()).unwrap();

        assert_eq!(values["serial"], 1900123456u32);
        assert_eq!(values["timestamp"], 0x0123_4567u32);
        assert_eq!(values["p_consume"], 1500.0);
        assert_eq!(values["p_consume_unit"], "W");
        assert_eq!(values["p_consume_counter"], 1.0);
        assert_eq!(values["p_consume_counterunit"], "kWh");
        assert_eq!(values["p_supply"], 0.0);
        assert_eq!(values["p_supply_counter"], 5.0);
        assert_eq!(values["cosphi"], 0.987);
        assert_eq!(values["cosphi_unit"], "");
        assert_eq!(values["freq"], 49.987);
        assert_eq!(values["freq_unit"], "Hz");
        assert_eq!(values["i1"], 6.543);
        assert_eq!(values["u1"], 230.512);
        assert_eq!(values["speedwire_version"], "3.04.05.A");
        // cosphi1 has no counter unit, the counter is dropped
        assert!(values.get("cosphi1_counter").is_none());
        assert!(values.get("cosphi1").is_none());
    }

    #[test]
    fn test_keys_follow_block_order() {
        let values = decode_telegram(&full_telegram()).unwrap();
        let keys: Vec<&str> = values.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec![
            "serial", "timestamp",
            "p_consume", "p_consume_unit", "p_consume_counter", "p_consume_counterunit",
            "p_supply", "p_supply_unit", "p_supply_counter", "p_supply_counterunit",
            "cosphi", "cosphi_unit", "freq", "freq_unit",
            "i1", "i1_unit", "u1", "u1_unit",
            "speedwire_version",
        ]);
    }

    #[test]
    fn test_decode_is_repeatable() {
        let data = full_telegram();
        assert_eq!(decode_telegram(&data).unwrap(), decode_telegram(&data).unwrap());
    }

    #[test]
    fn test_serial_and_timestamp_match_header() {
        for (serial, ts) in [(0u32, 0u32), (1, u32::MAX), (u32::MAX, 7), (3004906580, 123456789)] {
            let data = TelegramBuilder::new(serial, ts).actual(2, 1).build();
            let values = decode_telegram(&data).unwrap();
            let header = parse_header(&data).unwrap();
            assert_eq!(values["serial"], serial);
            assert_eq!(values["timestamp"], ts);
            assert_eq!(header.serial, serial);
            assert_eq!(header.timestamp, ts);
        }
    }

    #[test]
    fn test_unknown_channels_are_dropped() {
        let data = TelegramBuilder::new(1, 2)
            .actual(5, 1000)
            .counter(74, 1000)
            .actual(200, 1000)
            .actual(2, 20)
            .build();
        let values = decode_telegram(&data).unwrap();
        let keys: Vec<&String> = values.keys().collect();
        assert_eq!(keys, vec!["serial", "timestamp", "p_supply", "p_supply_unit"]);
        assert_eq!(values["p_supply"], 2.0);
    }

    #[test]
    fn test_unknown_type_advances_eight_bytes() {
        let data = TelegramBuilder::new(1, 2)
            .block([0x00, 0x01, 0x07, 0x00], &[0xFF, 0xFF, 0xFF, 0xFF])
            .block([0x00, 0x00, 0x00, 0x00], &[0x00, 0x00, 0x00, 0x08])
            .counter(2, 36_000_000)
            .build();
        let values = decode_telegram(&data).unwrap();
        assert!(values.get("p_consume").is_none());
        assert!(values.get("speedwire_version").is_none());
        assert_eq!(values["p_supply_counter"], 10.0);
        assert_eq!(values.len(), 4);
    }

    #[test]
    fn test_version_on_unknown_index_is_skipped() {
        let data = TelegramBuilder::new(1, 2)
            .block([0x90, 0x05, 0x00, 0x00], &[0x03, 0x04, 0x05, 0x41])
            .actual(2, 20)
            .build();
        let values = decode_telegram(&data).unwrap();
        let keys: Vec<&String> = values.keys().collect();
        assert_eq!(keys, vec!["serial", "timestamp", "p_supply", "p_supply_unit"]);
    }

    #[test]
    fn test_version_on_known_index_uses_channel_name() {
        let data = TelegramBuilder::new(1, 2)
            .block([0x90, 0x01, 0x00, 0x00], &[0x03, 0x04, 0x05, 0x41])
            .build();
        let values = decode_telegram(&data).unwrap();
        assert_eq!(values["p_consume"], "3.04.05.A");
        assert!(values.get("p_consume_unit").is_none());
        assert!(values.get("speedwire_version").is_none());
    }

    #[test]
    fn test_large_counters() {
        // beyond u32, energy accumulated over a meter lifetime
        let raw: u64 = 5_000_000 * 3_600_000;
        let data = TelegramBuilder::new(1, 2).counter(1, raw).build();
        let values = decode_telegram(&data).unwrap();
        assert_eq!(values["p_consume_counter"], 5_000_000.0);
    }

    #[test]
    fn test_fractional_scaling() {
        let data = TelegramBuilder::new(1, 2).actual(1, 15).counter(3, 1_800_000).build();
        let values = decode_telegram(&data).unwrap();
        assert_eq!(values["p_consume"], 1.5);
        assert_eq!(values["q_consume_counter"], 0.5);
        assert_eq!(values["q_consume_counterunit"], "kVArh");
    }

    #[test]
    fn test_repeated_block_overwrites() {
        let data = TelegramBuilder::new(1, 2).actual(1, 10).actual(2, 20).actual(1, 30).build();
        let values = decode_telegram(&data).unwrap();
        let keys: Vec<&String> = values.keys().collect();
        assert_eq!(keys, vec!["serial", "timestamp", "p_consume", "p_consume_unit", "p_supply", "p_supply_unit"]);
        assert_eq!(values["p_consume"], 3.0);
    }

    #[test]
    fn test_invalid_signature_gives_empty_result() {
        let mut data = full_telegram();
        data[..3].copy_from_slice(b"XYZ");
        assert!(decode_telegram(&data).unwrap().is_empty());
        assert!(decode_telegram(&[]).unwrap().is_empty());
        assert!(decode_telegram(b"SM").unwrap().is_empty());
        assert!(matches!(parse_header(&data), Err(SmaEmParseError::InvalidSignature)));
    }

    #[test]
    fn test_skipped_frame_length() {
        let mut data = vec![0u8; SKIPPED_FRAME_LENGTH];
        data[..3].copy_from_slice(b"SMA");
        data[LENGTH_RANGE].copy_from_slice(&((SKIPPED_FRAME_LENGTH - 16) as u16).to_be_bytes());
        data[20..24].copy_from_slice(&42u32.to_be_bytes());
        assert!(decode_telegram(&data).unwrap().is_empty());

        // the skip happens before the frame is checked against the buffer
        assert!(decode_telegram(&data[..14]).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_frame() {
        let data = full_telegram();
        let cut = &data[..data.len() - 20];
        match decode_telegram(cut) {
            Err(SmaEmParseError::TruncatedFrame { needed, actual }) => {
                assert_eq!(actual, cut.len());
                assert!(needed > actual);
            }
            res => panic!("expected truncation, got {res:?}"),
        }

        assert!(matches!(decode_telegram(b"SMA\0\0\0\0\0\0\0"), Err(SmaEmParseError::TruncatedFrame { .. })));
    }

    #[test]
    fn test_declared_length_beyond_buffer() {
        let mut data = full_telegram();
        data[LENGTH_RANGE].copy_from_slice(&0xFFF0u16.to_be_bytes());
        assert!(matches!(decode_telegram(&data), Err(SmaEmParseError::TruncatedFrame { needed, .. }) if needed == 0xFFF0 + 16));
    }

    #[test]
    fn test_accept_telegram() {
        let data = full_telegram();
        let (serial, values) = accept_telegram(&data, &[]).unwrap();
        assert_eq!(serial, 1900123456);
        assert_eq!(values.get("serial").and_then(Value::as_u64), Some(1900123456));

        assert!(accept_telegram(&data, &[1900123456, 5]).is_some());
        assert!(accept_telegram(&data, &[5]).is_none());
        assert!(accept_telegram(b"NOT SMA AT ALL", &[]).is_none());
        assert!(accept_telegram(&data[..40], &[]).is_none());
    }

    fn manager(tx: Sender<Transmission>, ha_enabled: bool) -> SmaEmManager {
        let config = crate::config::Config::from_yaml("mqtt:\n  host: localhost\n").unwrap();
        SmaEmManager::new(tx, config.smaem, MqttTopics::new(&config.mqtt), ha_enabled)
    }

    #[tokio::test]
    async fn test_first_telegram_is_announced_once() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(10);
        let mut m = manager(tx, true);
        let (serial, values) = accept_telegram(&full_telegram(), &[]).unwrap();

        m.handle_telegram(serial, values.clone()).await.unwrap();
        m.handle_telegram(serial, values).await.unwrap();

        assert!(matches!(rx.recv().await, Some(Transmission::AutoDiscovery(d)) if d.get_dev_id() == "SMA-19001EM23456"));
        assert!(matches!(rx.recv().await, Some(Transmission::Metering(mr)) if mr.meter_name == "SMA-EM-1900123456"));
        assert!(matches!(rx.recv().await, Some(Transmission::Metering(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_discovery_when_disabled() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(10);
        let mut m = manager(tx, false);
        let (serial, values) = accept_telegram(&full_telegram(), &[]).unwrap();

        m.handle_telegram(serial, values).await.unwrap();
        assert!(matches!(rx.recv().await, Some(Transmission::Metering(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_channel_is_reported() {
        let (tx, rx) = tokio::sync::mpsc::channel(10);
        drop(rx);
        let mut m = manager(tx, true);
        let (serial, values) = accept_telegram(&full_telegram(), &[]).unwrap();
        assert!(m.handle_telegram(serial, values).await.is_err());
    }
}
