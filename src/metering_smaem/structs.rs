/// Ordered key/value result of one decoded telegram.
///
/// Backed by `serde_json::Map` with `preserve_order`, so keys keep the order in
/// which the blocks appeared in the telegram.
pub type DecodedMeasurements = serde_json::Map<String, serde_json::Value>;

/// Fixed part of a telegram, bytes 0..28.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Raw value of the length field at offset 12.
    pub declared_length: u16,
    /// Number of meaningful bytes, `declared_length + 16`.
    pub frame_length: usize,
    pub serial: u32,
    /// Device relative millisecond counter, not a wall clock time.
    pub timestamp: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Actual,
    Counter,
    Version,
    Unknown,
}

impl ValueKind {
    /// Width of the value following the identifier.
    pub fn value_len(&self) -> usize {
        match self {
            ValueKind::Counter => 8,
            ValueKind::Actual | ValueKind::Version => 4,
            ValueKind::Unknown => 0,
        }
    }

    /// Distance from this identifier to the next one.
    pub fn block_len(&self) -> usize {
        match self {
            ValueKind::Counter => 12,
            _ => 8,
        }
    }
}

/// Decoded form of the 4 byte OBIS tag in front of every value block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObisIdentifier {
    pub channel: u8,
    pub index: u8,
    pub obis_type: u8,
    pub kind: ValueKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDescriptor {
    pub index: u8,
    pub name: &'static str,
    pub unit: &'static str,
    pub counter_unit: Option<&'static str>,
}

impl ChannelDescriptor {
    pub const fn new(index: u8, name: &'static str, unit: &'static str, counter_unit: Option<&'static str>) -> Self {
        ChannelDescriptor { index, name, unit, counter_unit }
    }

    pub fn unit_key(&self) -> String {
        format!("{}_unit", self.name)
    }

    pub fn counter_key(&self) -> String {
        format!("{}_counter", self.name)
    }

    pub fn counter_unit_key(&self) -> String {
        format!("{}_counterunit", self.name)
    }
}
