//! Datafeed packets delivered by capture sources

use std::fmt;

/// Packet type tag, used for output module affinity and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Header,
    End,
    Trigger,
    MetaLogic,
    Logic,
    MetaAnalog,
    Analog,
    FrameBegin,
    FrameEnd,
    Unknown,
}

/// Logic sample payload as captured
///
/// `unit_size` is the source sample size in bytes: bit N of a sample holds
/// probe N. The payload length is `data.len()`; a trailing partial sample
/// is never counted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogicPayload {
    pub data: Vec<u8>,
    pub unit_size: usize,
}

impl LogicPayload {
    /// Create a new logic payload
    pub fn new(data: Vec<u8>, unit_size: usize) -> Self {
        Self { data, unit_size }
    }

    /// Payload length in bytes
    #[inline]
    pub fn length(&self) -> usize {
        self.data.len()
    }

    /// Number of whole samples in the payload
    #[inline]
    pub fn num_samples(&self) -> u64 {
        if self.unit_size == 0 {
            0
        } else {
            (self.data.len() / self.unit_size) as u64
        }
    }

    /// O(1) bit lookup: value of `probe` in sample `sample`.
    #[inline]
    pub fn get_bit(&self, sample: usize, probe: usize) -> bool {
        let byte_index = sample * self.unit_size + probe / 8;
        let bit_offset = probe % 8;
        byte_index < self.data.len() && (self.data[byte_index] >> bit_offset) & 1 == 1
    }
}

/// Analog payload: `num_samples` rows of interleaved per-probe floats
#[derive(Clone, Debug, PartialEq)]
pub struct AnalogPayload {
    pub data: Vec<f32>,
    pub num_samples: usize,
}

impl AnalogPayload {
    /// Create a new analog payload
    pub fn new(data: Vec<f32>, num_samples: usize) -> Self {
        Self { data, num_samples }
    }
}

/// One unit of the datafeed, in arrival order
///
/// Packets are transient: the feed borrows each one for the duration of a
/// single delivery and copies whatever it keeps.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Header,
    End,
    Trigger,
    MetaLogic { probe_count: usize, sample_rate: u64 },
    Logic(LogicPayload),
    MetaAnalog { probe_count: usize },
    Analog(AnalogPayload),
    FrameBegin,
    FrameEnd,
    /// Packet kind this version does not know about; carries the raw tag
    Unknown(u16),
}

impl Packet {
    /// Convenience constructor for a logic packet
    pub fn logic(data: Vec<u8>, unit_size: usize) -> Self {
        Packet::Logic(LogicPayload::new(data, unit_size))
    }

    /// Convenience constructor for an analog packet
    pub fn analog(data: Vec<f32>, num_samples: usize) -> Self {
        Packet::Analog(AnalogPayload::new(data, num_samples))
    }

    /// The type tag of this packet
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Header => PacketKind::Header,
            Packet::End => PacketKind::End,
            Packet::Trigger => PacketKind::Trigger,
            Packet::MetaLogic { .. } => PacketKind::MetaLogic,
            Packet::Logic(_) => PacketKind::Logic,
            Packet::MetaAnalog { .. } => PacketKind::MetaAnalog,
            Packet::Analog(_) => PacketKind::Analog,
            Packet::FrameBegin => PacketKind::FrameBegin,
            Packet::FrameEnd => PacketKind::FrameEnd,
            Packet::Unknown(_) => PacketKind::Unknown,
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Packet::MetaLogic {
                probe_count,
                sample_rate,
            } => write!(f, "MetaLogic[probes={}, rate={}]", probe_count, sample_rate),
            Packet::Logic(logic) => write!(
                f,
                "Logic[bytes={}, unit_size={}]",
                logic.length(),
                logic.unit_size
            ),
            Packet::MetaAnalog { probe_count } => write!(f, "MetaAnalog[probes={}]", probe_count),
            Packet::Analog(analog) => write!(f, "Analog[samples={}]", analog.num_samples),
            Packet::Unknown(tag) => write!(f, "Unknown[{}]", tag),
            other => write!(f, "{:?}", other.kind()),
        }
    }
}
