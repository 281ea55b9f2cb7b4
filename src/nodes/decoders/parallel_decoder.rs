//! Parallel bus decoder
//!
//! Samples the data lines `d0..d7` on the selected clock edge and emits one
//! word per edge. Unassigned data lines read as zero; the word width is the
//! highest assigned line plus one.

use super::types::StrobeMode;
use crate::runtime::decoder::{
    lane_bit, Annotation, AnnotationClass, DataKind, DecoderConfig, DecoderDescriptor, DecoderOutput,
    OptionSpec, ProbeSpec, ProtoData, ProtoPacket, ProtocolDecoder, SessionParams,
};
use crate::runtime::errors::{DecodeError, DecodeResult};
use tracing::{debug, trace};

const DATA_LINES: [&str; 8] = ["d0", "d1", "d2", "d3", "d4", "d5", "d6", "d7"];

const PROBES: &[ProbeSpec] = &[
    ProbeSpec {
        id: "clk",
        description: "Clock",
    },
    ProbeSpec {
        id: "d0",
        description: "Data line 0",
    },
];

const OPTIONAL_PROBES: &[ProbeSpec] = &[
    ProbeSpec {
        id: "d1",
        description: "Data line 1",
    },
    ProbeSpec {
        id: "d2",
        description: "Data line 2",
    },
    ProbeSpec {
        id: "d3",
        description: "Data line 3",
    },
    ProbeSpec {
        id: "d4",
        description: "Data line 4",
    },
    ProbeSpec {
        id: "d5",
        description: "Data line 5",
    },
    ProbeSpec {
        id: "d6",
        description: "Data line 6",
    },
    ProbeSpec {
        id: "d7",
        description: "Data line 7",
    },
];

const OPTIONS: &[OptionSpec] = &[OptionSpec {
    id: "edge",
    default: "rising",
    description: "Clock edge to sample on (rising, falling or either)",
}];

const ANNOTATIONS: &[AnnotationClass] = &[AnnotationClass {
    id: "word",
    description: "Data words",
}];

pub const DESCRIPTOR: DecoderDescriptor = DecoderDescriptor {
    id: "parallel",
    name: "Parallel",
    description: "Clocked parallel bus",
    required_probes: PROBES,
    optional_probes: OPTIONAL_PROBES,
    options: OPTIONS,
    annotations: ANNOTATIONS,
    input: DataKind::Logic,
    output: Some(DataKind::Word),
    factory: create,
};

fn create(config: &DecoderConfig) -> DecodeResult<Box<dyn ProtocolDecoder>> {
    Ok(Box::new(ParallelDecoder::from_config(config)?))
}

pub struct ParallelDecoder {
    clk: usize,
    /// `(bit position, packed lane)` of every assigned data line
    data: Vec<(usize, usize)>,
    width: usize,
    mode: StrobeMode,
    last_clk: Option<bool>,
}

impl ParallelDecoder {
    pub fn from_config(config: &DecoderConfig) -> DecodeResult<Self> {
        let data: Vec<(usize, usize)> = DATA_LINES
            .iter()
            .enumerate()
            .filter_map(|(bit, line)| config.lane(line).map(|lane| (bit, lane)))
            .collect();
        let width = data.iter().map(|(bit, _)| bit + 1).max().unwrap_or(0);
        if width == 0 {
            return Err(DecodeError::MissingProbe("d0".to_string()));
        }

        Ok(Self {
            clk: config.required_lane("clk")?,
            data,
            width,
            mode: config.parse_option("edge")?,
            last_clk: None,
        })
    }

    fn word(&self, sample: &[u8]) -> u64 {
        self.data
            .iter()
            .filter(|(_, lane)| lane_bit(sample, *lane))
            .fold(0u64, |value, (bit, _)| value | (1u64 << *bit))
    }
}

impl ProtocolDecoder for ParallelDecoder {
    fn start(&mut self, _params: &SessionParams) -> DecodeResult {
        self.last_clk = None;
        debug!(
            "Parallel bus: {} bit words on {} clock edges, clk={}",
            self.width, self.mode, self.clk
        );
        Ok(())
    }

    fn decode(
        &mut self,
        offset: u64,
        packed: &[u8],
        unit_size: usize,
        out: &mut Vec<DecoderOutput>,
    ) -> DecodeResult {
        if unit_size == 0 {
            return Err(DecodeError::Failed("zero sample size".to_string()));
        }

        let digits = self.width.div_ceil(4).max(2);
        for (i, sample) in packed.chunks_exact(unit_size).enumerate() {
            let clk = lane_bit(sample, self.clk);
            let Some(last) = self.last_clk.replace(clk) else {
                continue;
            };
            if !self.mode.triggers(last, clk) {
                continue;
            }

            let at = offset + i as u64;
            let value = self.word(sample);
            trace!("Decoded word 0x{:02X} at sample {}", value, at);
            out.push(DecoderOutput::Annotation(Annotation {
                start: at,
                end: at,
                class: 0,
                texts: vec![format!("0x{:0width$X}", value, width = digits)],
            }));
            out.push(DecoderOutput::Proto(ProtoPacket {
                start: at,
                end: at,
                data: ProtoData::Word {
                    value,
                    bits: self.width as u8,
                },
            }));
        }
        Ok(())
    }
}
