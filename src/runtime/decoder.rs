//! Protocol decoder plugin contract
//!
//! A decoder is described by a static [`DecoderDescriptor`] (probes, options,
//! annotation classes, factory) and instantiated once per directive. Bottom
//! decoders consume packed logic samples; stacked decoders consume the
//! protocol data produced by the decoder below them.

use super::errors::{DecodeError, DecodeResult};
use crate::{FeedError, Result};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::str::FromStr;

/// Acquisition parameters passed to every decoder when a stream starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    /// Number of enabled (packed) lanes
    pub lane_count: usize,
    /// Bytes per packed sample
    pub unit_size: usize,
    pub sample_rate: u64,
}

/// What flows into or out of a decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    /// Packed logic samples
    Logic,
    /// Decoded words (`ProtoData::Word`)
    Word,
}

/// Protocol data passed up a stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtoData {
    Word { value: u64, bits: u8 },
}

impl ProtoData {
    pub fn kind(&self) -> DataKind {
        match self {
            ProtoData::Word { .. } => DataKind::Word,
        }
    }
}

/// Protocol data over an inclusive sample range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoPacket {
    pub start: u64,
    pub end: u64,
    pub data: ProtoData,
}

/// Human-readable description of a decoded event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub start: u64,
    pub end: u64,
    /// Index into the decoder's annotation classes
    pub class: usize,
    pub texts: Vec<String>,
}

/// Everything a decoder can produce, in production order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderOutput {
    Annotation(Annotation),
    Proto(ProtoPacket),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSpec {
    pub id: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    pub id: &'static str,
    pub default: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotationClass {
    pub id: &'static str,
    pub description: &'static str,
}

/// Resolved per-instance configuration: probe lanes plus every declared
/// option (defaults filled in)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoderConfig {
    pub probes: BTreeMap<String, usize>,
    pub options: BTreeMap<String, String>,
}

impl DecoderConfig {
    /// Packed lane assigned to `probe`
    pub fn lane(&self, probe: &str) -> Option<usize> {
        self.probes.get(probe).copied()
    }

    pub fn required_lane(&self, probe: &str) -> DecodeResult<usize> {
        self.lane(probe)
            .ok_or_else(|| DecodeError::MissingProbe(probe.to_string()))
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Parse option `key` into `T`
    pub fn parse_option<T: FromStr>(&self, key: &str) -> DecodeResult<T> {
        let value = self.option(key).unwrap_or_default();
        value.parse().map_err(|_| DecodeError::InvalidOption {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

/// A protocol decoder instance
pub trait ProtocolDecoder: Send {
    /// Called once per stream, before any data
    fn start(&mut self, params: &SessionParams) -> DecodeResult;

    /// Decode packed logic samples; `offset` is the absolute number of the
    /// first sample in `packed`.
    fn decode(
        &mut self,
        offset: u64,
        packed: &[u8],
        unit_size: usize,
        out: &mut Vec<DecoderOutput>,
    ) -> DecodeResult;

    /// Decode protocol data from the decoder below
    fn decode_upstream(&mut self, _proto: &ProtoPacket, _out: &mut Vec<DecoderOutput>) -> DecodeResult {
        Ok(())
    }
}

/// Static description of a decoder
#[derive(Clone, Copy)]
pub struct DecoderDescriptor {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub required_probes: &'static [ProbeSpec],
    pub optional_probes: &'static [ProbeSpec],
    pub options: &'static [OptionSpec],
    pub annotations: &'static [AnnotationClass],
    pub input: DataKind,
    pub output: Option<DataKind>,
    pub factory: fn(&DecoderConfig) -> DecodeResult<Box<dyn ProtocolDecoder>>,
}

impl DecoderDescriptor {
    /// Whether `key` names one of this decoder's probes
    pub fn has_probe(&self, key: &str) -> bool {
        self.required_probes
            .iter()
            .chain(self.optional_probes)
            .any(|p| p.id == key)
    }

    pub fn option_spec(&self, key: &str) -> Option<&OptionSpec> {
        self.options.iter().find(|o| o.id == key)
    }

    /// Index of the annotation class named `id`
    pub fn annotation_index(&self, id: &str) -> Option<usize> {
        self.annotations.iter().position(|a| a.id == id)
    }

    /// Multi-line description: identity, annotation classes, probes and options
    pub fn details(&self) -> String {
        let mut text = String::new();
        let _ = writeln!(text, "ID: {}", self.id);
        let _ = writeln!(text, "Name: {}", self.name);
        let _ = writeln!(text, "Description: {}", self.description);

        let _ = writeln!(text, "Annotations:");
        if self.annotations.is_empty() {
            let _ = writeln!(text, "None.");
        }
        for class in self.annotations {
            let _ = writeln!(text, "- {}\n  {}", class.id, class.description);
        }

        for (title, probes) in [
            ("Required probes", self.required_probes),
            ("Optional probes", self.optional_probes),
        ] {
            let _ = writeln!(text, "{}:", title);
            if probes.is_empty() {
                let _ = writeln!(text, "None.");
            }
            for probe in probes {
                let _ = writeln!(text, "- {}: {}", probe.id, probe.description);
            }
        }

        let _ = writeln!(text, "Options:");
        if self.options.is_empty() {
            let _ = writeln!(text, "None.");
        }
        for option in self.options {
            let _ = writeln!(
                text,
                "- {}: {} (default {})",
                option.id, option.description, option.default
            );
        }
        text
    }
}

impl fmt::Debug for DecoderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderDescriptor")
            .field("id", &self.id)
            .field("input", &self.input)
            .field("output", &self.output)
            .finish()
    }
}

/// Decoders available to a session
#[derive(Clone, Debug, Default)]
pub struct DecoderRegistry {
    decoders: Vec<DecoderDescriptor>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decoder, replacing any earlier one with the same id
    pub fn register(&mut self, descriptor: DecoderDescriptor) {
        self.decoders.retain(|d| d.id != descriptor.id);
        self.decoders.push(descriptor);
    }

    pub fn get(&self, id: &str) -> Result<&DecoderDescriptor> {
        self.decoders
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| FeedError::DecoderNotFound(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &DecoderDescriptor> {
        self.decoders.iter()
    }

    /// Details of every decoder named in `directives`, in order.
    ///
    /// Only the id before the first `:` of each directive is used.
    pub fn details(&self, directives: &str) -> Result<String> {
        directives
            .split(',')
            .map(|directive| {
                let id = directive.split(':').next().unwrap_or_default().trim();
                self.get(id).map(DecoderDescriptor::details)
            })
            .collect::<Result<Vec<_>>>()
            .map(|sections| sections.join("\n"))
    }
}

/// Value of packed lane `lane` in one sample
#[inline]
pub fn lane_bit(sample: &[u8], lane: usize) -> bool {
    sample
        .get(lane / 8)
        .is_some_and(|byte| (byte >> (lane % 8)) & 1 == 1)
}
