use super::channels::{get_channel, scale_value};
use super::obis::decode_obis;
use super::structs::*;
use super::SmaEmParseError;
use log::{debug, warn};
use serde_json::Value;
use std::ops::Range;

pub const SMA_SIGNATURE: &[u8; 3] = b"SMA";
pub const SIGNATURE_RANGE: Range<usize> = 0..3;
pub const LENGTH_RANGE: Range<usize> = 12..14;
pub const SERIAL_RANGE: Range<usize> = 20..24;
pub const TIMESTAMP_RANGE: Range<usize> = 24..28;
pub const HEADER_LEN: usize = 28;
/* The length field does not count the first 16 bytes */
pub const LENGTH_OFFSET: usize = 16;
/*
    Frames with exactly this length carry no measurements and are skipped
    without reading the header. Their meaning is undocumented; keep the skip
    and do not build on it.
*/
pub const SKIPPED_FRAME_LENGTH: usize = 54;

pub struct TelegramParser<'a> {
    data: &'a [u8],
}

impl<'a> TelegramParser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn require_len(&self, needed: usize) -> Result<(), SmaEmParseError> {
        if self.data.len() < needed {
            return Err(SmaEmParseError::TruncatedFrame {
                needed,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    fn read_slice(&self, range: Range<usize>) -> Result<&'a [u8], SmaEmParseError> {
        self.data
            .get(range.clone())
            .ok_or(SmaEmParseError::TruncatedFrame {
                needed: range.end,
                actual: self.data.len(),
            })
    }

    fn read_array<const N: usize>(&self, offset: usize) -> Result<[u8; N], SmaEmParseError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_slice(offset..offset + N)?);
        Ok(out)
    }

    fn read_u16_be(&self, offset: usize) -> Result<u16, SmaEmParseError> {
        Ok(u16::from_be_bytes(self.read_array(offset)?))
    }

    fn read_u32_be(&self, offset: usize) -> Result<u32, SmaEmParseError> {
        Ok(u32::from_be_bytes(self.read_array(offset)?))
    }

    /* Values are big endian, 4 or 8 bytes wide */
    fn read_uint_be(&self, offset: usize, len: usize) -> Result<u64, SmaEmParseError> {
        let bytes = self.read_slice(offset..offset + len)?;
        Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }

    /// Checks the signature and returns the frame length.
    pub fn validate_frame(&self) -> Result<usize, SmaEmParseError> {
        match self.data.get(SIGNATURE_RANGE) {
            Some(sig) if sig == SMA_SIGNATURE => {}
            _ => return Err(SmaEmParseError::InvalidSignature),
        }

        let declared = self.read_u16_be(LENGTH_RANGE.start)?;
        Ok(declared as usize + LENGTH_OFFSET)
    }

    pub fn parse_header(&self) -> Result<FrameHeader, SmaEmParseError> {
        let frame_length = self.validate_frame()?;
        self.require_len(frame_length.max(HEADER_LEN))?;

        Ok(FrameHeader {
            declared_length: (frame_length - LENGTH_OFFSET) as u16,
            frame_length,
            serial: self.read_u32_be(SERIAL_RANGE.start)?,
            timestamp: self.read_u32_be(TIMESTAMP_RANGE.start)?,
        })
    }

    pub fn decode(&self) -> Result<DecodedMeasurements, SmaEmParseError> {
        let mut em_data = DecodedMeasurements::new();

        let frame_length = self.validate_frame()?;
        debug!("length of telegram: {frame_length}");

        if frame_length == SKIPPED_FRAME_LENGTH {
            debug!("Telegram with length {SKIPPED_FRAME_LENGTH} skipped");
            return Ok(em_data);
        }

        let header = self.parse_header()?;
        debug!("serial number: {} timestamp: {}", header.serial, header.timestamp);
        em_data.insert("serial".to_string(), Value::from(header.serial));
        em_data.insert("timestamp".to_string(), Value::from(header.timestamp));

        let mut position = HEADER_LEN;
        while position < frame_length {
            let obis = decode_obis(&self.read_array(position)?);
            debug!("SMA channel: {} - datatype: {:?}", obis.index, obis.kind);
            self.decode_block(&obis, position + 4, &mut em_data)?;
            position += obis.kind.block_len();
        }

        Ok(em_data)
    }

    fn decode_block(&self, obis: &ObisIdentifier, value_pos: usize, em_data: &mut DecodedMeasurements) -> Result<(), SmaEmParseError> {
        let value_len = obis.kind.value_len();
        match obis.kind {
            ValueKind::Actual => {
                let raw = self.read_uint_be(value_pos, value_len)?;
                let Some(channel) = get_channel(obis.index) else { return Ok(()) };
                if let Some(value) = scale_value(raw, channel.unit) {
                    em_data.insert(channel.name.to_string(), Value::from(value));
                    em_data.insert(channel.unit_key(), Value::from(channel.unit));
                }
            }
            ValueKind::Counter => {
                let raw = self.read_uint_be(value_pos, value_len)?;
                let Some(channel) = get_channel(obis.index) else { return Ok(()) };
                let Some(counter_unit) = channel.counter_unit else {
                    debug!("Channel {} has no counter unit, counter dropped", channel.name);
                    return Ok(());
                };
                if let Some(value) = scale_value(raw, counter_unit) {
                    em_data.insert(channel.counter_key(), Value::from(value));
                    em_data.insert(channel.counter_unit_key(), Value::from(counter_unit));
                }
            }
            ValueKind::Version => {
                let raw: [u8; 4] = self.read_array(value_pos)?;
                if let Some(channel) = get_channel(obis.index) {
                    em_data.insert(channel.name.to_string(), Value::from(format_version(&raw)));
                } else {
                    warn!("Version sent on unknown index {}", obis.index);
                }
            }
            ValueKind::Unknown => {}
        }
        Ok(())
    }
}

/// `03 04 05 41` becomes `3.04.05.A`.
pub fn format_version(raw: &[u8; 4]) -> String {
    format!("{}.{:02}.{:02}.{}", raw[0], raw[1], raw[2], raw[3] as char)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metering_smaem::test_support::TelegramBuilder;

    #[test]
    fn test_format_version() {
        assert_eq!(format_version(&[0x03, 0x04, 0x05, 0x41]), "3.04.05.A");
        assert_eq!(format_version(&[2, 0, 18, b'R']), "2.00.18.R");
        assert_eq!(format_version(&[1, 123, 4, b'S']), "1.123.04.S");
    }

    #[test]
    fn test_parse_header() {
        let data = TelegramBuilder::new(1_900_123_456, 42).actual(1, 15000).build();
        let header = TelegramParser::new(&data).parse_header().unwrap();
        assert_eq!(header.serial, 1_900_123_456);
        assert_eq!(header.timestamp, 42);
        assert_eq!(header.frame_length, 36);
        assert_eq!(header.declared_length, 20);
    }

    #[test]
    fn test_invalid_signature() {
        let mut data = TelegramBuilder::new(1, 2).actual(1, 10).build();
        data[0] = b'X';
        let err = TelegramParser::new(&data).validate_frame().unwrap_err();
        assert!(matches!(err, SmaEmParseError::InvalidSignature));

        assert!(matches!(TelegramParser::new(b"SM").validate_frame(), Err(SmaEmParseError::InvalidSignature)));
        assert!(matches!(TelegramParser::new(&[]).validate_frame(), Err(SmaEmParseError::InvalidSignature)));
    }

    #[test]
    fn test_missing_length_field() {
        let err = TelegramParser::new(b"SMA\0\0\0\0").validate_frame().unwrap_err();
        match err {
            SmaEmParseError::TruncatedFrame { needed, actual } => {
                assert_eq!(needed, 14);
                assert_eq!(actual, 7);
            }
            e => panic!("unexpected error {e:?}"),
        }
    }

    #[test]
    fn test_block_reads_stay_in_buffer() {
        // last block is an actual value whose 4 value bytes are cut off
        let mut data = TelegramBuilder::new(1, 2).actual(1, 10).actual(2, 20).build();
        data.truncate(HEADER_LEN + 8 + 4);
        let declared = ((data.len() - LENGTH_OFFSET) as u16).to_be_bytes();
        data[LENGTH_RANGE].copy_from_slice(&declared);

        let err = TelegramParser::new(&data).decode().unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_counter_reads_eight_bytes() {
        let data = TelegramBuilder::new(1, 2).counter(1, 0x0000_0001_0000_0000).build();
        let values = TelegramParser::new(&data).decode().unwrap();
        assert_eq!(values["p_consume_counter"], 0x0000_0001_0000_0000u64 as f64 / 3_600_000.0);
    }

    #[test]
    fn test_header_without_blocks() {
        let data = TelegramBuilder::new(7, 8).build();
        let values = TelegramParser::new(&data).decode().unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values["serial"], 7);
        assert_eq!(values["timestamp"], 8);
    }
}
