//! Built-in protocol decoders
//!
//! Bottom decoders (`spi`, `parallel`) read packed logic samples and emit
//! words; `ascii` sits on top of either and renders those words as text.

pub mod ascii_decoder;
pub mod parallel_decoder;
pub mod spi_decoder;
pub mod types;

pub use types::{BitOrder, CsPolarity, SpiMode, StrobeMode};

pub use ascii_decoder::AsciiDecoder;
pub use parallel_decoder::ParallelDecoder;
pub use spi_decoder::SpiDecoder;

use crate::runtime::decoder::{DecoderDescriptor, DecoderRegistry};

lazy_static::lazy_static! {
    static ref BUILTIN_DECODERS: Vec<DecoderDescriptor> = vec![
        spi_decoder::DESCRIPTOR,
        parallel_decoder::DESCRIPTOR,
        ascii_decoder::DESCRIPTOR,
    ];
}

impl DecoderRegistry {
    /// Registry holding every built-in decoder
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for descriptor in BUILTIN_DECODERS.iter() {
            registry.register(*descriptor);
        }
        registry
    }
}
