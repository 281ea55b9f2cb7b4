//! SPI decoder: one data line sampled on the clock edge the mode selects
//!
//! Works sample by sample over packed logic. Clock level and any partial
//! word carry over between `decode` calls, so words may span packets.
//! When a `cs` probe is assigned, bits are only collected while chip select
//! is active and a partial word is dropped when it goes inactive.

use super::types::{BitOrder, CsPolarity, SpiMode};
use crate::runtime::decoder::{
    lane_bit, Annotation, AnnotationClass, DataKind, DecoderConfig, DecoderDescriptor, DecoderOutput,
    OptionSpec, ProbeSpec, ProtoData, ProtoPacket, ProtocolDecoder, SessionParams,
};
use crate::runtime::errors::{DecodeError, DecodeResult};
use tracing::{debug, trace};

const PROBES: &[ProbeSpec] = &[
    ProbeSpec {
        id: "sck",
        description: "Clock",
    },
    ProbeSpec {
        id: "sdata",
        description: "Data line",
    },
];

const OPTIONAL_PROBES: &[ProbeSpec] = &[ProbeSpec {
    id: "cs",
    description: "Chip select",
}];

const OPTIONS: &[OptionSpec] = &[
    OptionSpec {
        id: "cpol",
        default: "0",
        description: "Clock polarity (0 or 1)",
    },
    OptionSpec {
        id: "cpha",
        default: "0",
        description: "Clock phase (0 or 1)",
    },
    OptionSpec {
        id: "wordsize",
        default: "8",
        description: "Bits per word (1-64)",
    },
    OptionSpec {
        id: "bitorder",
        default: "msb",
        description: "Bit order (msb or lsb)",
    },
    OptionSpec {
        id: "cs_polarity",
        default: "active-low",
        description: "Chip select polarity (active-low or active-high)",
    },
];

const ANNOTATIONS: &[AnnotationClass] = &[
    AnnotationClass {
        id: "hex",
        description: "Words in hexadecimal",
    },
    AnnotationClass {
        id: "dec",
        description: "Words in decimal",
    },
];

const ANN_HEX: usize = 0;
const ANN_DEC: usize = 1;

pub const DESCRIPTOR: DecoderDescriptor = DecoderDescriptor {
    id: "spi",
    name: "SPI",
    description: "Serial Peripheral Interface, single data line",
    required_probes: PROBES,
    optional_probes: OPTIONAL_PROBES,
    options: OPTIONS,
    annotations: ANNOTATIONS,
    input: DataKind::Logic,
    output: Some(DataKind::Word),
    factory: create,
};

fn create(config: &DecoderConfig) -> DecodeResult<Box<dyn ProtocolDecoder>> {
    Ok(Box::new(SpiDecoder::from_config(config)?))
}

fn invalid(config: &DecoderConfig, key: &str) -> DecodeError {
    DecodeError::InvalidOption {
        key: key.to_string(),
        value: config.option(key).unwrap_or_default().to_string(),
    }
}

/// Word being assembled
#[derive(Debug, Clone, Copy, Default)]
struct PartialWord {
    value: u64,
    bits: usize,
    start: u64,
}

pub struct SpiDecoder {
    sck: usize,
    sdata: usize,
    cs: Option<usize>,
    mode: SpiMode,
    bits_per_word: usize,
    bit_order: BitOrder,
    cs_polarity: CsPolarity,

    /// Clock level of the previous sample, across `decode` calls
    prev_clk: Option<bool>,
    word: PartialWord,
    words: u64,
}

impl SpiDecoder {
    pub fn from_config(config: &DecoderConfig) -> DecodeResult<Self> {
        let cpol: u8 = config.parse_option("cpol")?;
        let cpha: u8 = config.parse_option("cpha")?;
        let mode = SpiMode::from_bits(cpol, cpha).ok_or_else(|| {
            if cpol > 1 {
                invalid(config, "cpol")
            } else {
                invalid(config, "cpha")
            }
        })?;

        let bits_per_word: usize = config.parse_option("wordsize")?;
        if !(1..=64).contains(&bits_per_word) {
            return Err(invalid(config, "wordsize"));
        }

        Ok(Self {
            sck: config.required_lane("sck")?,
            sdata: config.required_lane("sdata")?,
            cs: config.lane("cs"),
            mode,
            bits_per_word,
            bit_order: config.parse_option("bitorder")?,
            cs_polarity: config.parse_option("cs_polarity")?,
            prev_clk: None,
            word: PartialWord::default(),
            words: 0,
        })
    }

    fn push_bit(&mut self, at: u64, bit: bool, out: &mut Vec<DecoderOutput>) {
        if self.word.bits == 0 {
            self.word.start = at;
        }
        match self.bit_order {
            BitOrder::MsbFirst => self.word.value = (self.word.value << 1) | bit as u64,
            BitOrder::LsbFirst => self.word.value |= (bit as u64) << self.word.bits,
        }
        self.word.bits += 1;
        trace!("bit {} at sample {}: {}", self.word.bits, at, bit as u8);

        if self.word.bits == self.bits_per_word {
            let word = std::mem::take(&mut self.word);
            self.words += 1;
            self.emit(word, at, out);
        }
    }

    fn emit(&self, word: PartialWord, end: u64, out: &mut Vec<DecoderOutput>) {
        let digits = self.bits_per_word.div_ceil(4).max(2);
        let hex = format!("0x{:0width$X}", word.value, width = digits);
        debug!("#{}: {} over samples {}-{}", self.words, hex, word.start, end);

        out.push(DecoderOutput::Annotation(Annotation {
            start: word.start,
            end,
            class: ANN_HEX,
            texts: vec![format!("Data: {}", hex), hex],
        }));
        out.push(DecoderOutput::Annotation(Annotation {
            start: word.start,
            end,
            class: ANN_DEC,
            texts: vec![word.value.to_string()],
        }));
        out.push(DecoderOutput::Proto(ProtoPacket {
            start: word.start,
            end,
            data: ProtoData::Word {
                value: word.value,
                bits: self.bits_per_word as u8,
            },
        }));
    }
}

impl ProtocolDecoder for SpiDecoder {
    fn start(&mut self, params: &SessionParams) -> DecodeResult {
        self.prev_clk = None;
        self.word = PartialWord::default();
        self.words = 0;
        debug!(
            "SPI {:?}, {} bit words, {:?}, sck={} sdata={} cs={:?} at {} Hz",
            self.mode, self.bits_per_word, self.bit_order, self.sck, self.sdata, self.cs, params.sample_rate
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

        let sample_on_rising = self.mode.samples_on_rising();
        for (i, sample) in packed.chunks_exact(unit_size).enumerate() {
            let at = offset + i as u64;
            let clk = lane_bit(sample, self.sck);
            let prev = self.prev_clk.replace(clk);

            if let Some(cs) = self.cs {
                if !self.cs_polarity.is_active(lane_bit(sample, cs)) {
                    if self.word.bits > 0 {
                        debug!(
                            "Chip select released at sample {}: dropping {}/{} bits",
                            at, self.word.bits, self.bits_per_word
                        );
                        self.word = PartialWord::default();
                    }
                    continue;
                }
            }

            let Some(prev) = prev else { continue };
            let sampling_edge = if sample_on_rising {
                !prev && clk
            } else {
                prev && !clk
            };
            if sampling_edge {
                let bit = lane_bit(sample, self.sdata);
                self.push_bit(at, bit, out);
            }
        }
        Ok(())
    }
}
