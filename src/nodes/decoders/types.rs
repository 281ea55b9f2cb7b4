//! Option values shared by the built-in decoders

use std::fmt;
use std::str::FromStr;

/// SPI clock polarity and phase modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiMode {
    /// CPOL=0, CPHA=0: Clock idle low, sample on rising edge
    Mode0,
    /// CPOL=0, CPHA=1: Clock idle low, sample on falling edge
    Mode1,
    /// CPOL=1, CPHA=0: Clock idle high, sample on falling edge
    Mode2,
    /// CPOL=1, CPHA=1: Clock idle high, sample on rising edge
    Mode3,
}

impl SpiMode {
    /// Mode for the given polarity and phase bits
    pub fn from_bits(cpol: u8, cpha: u8) -> Option<Self> {
        match (cpol, cpha) {
            (0, 0) => Some(SpiMode::Mode0),
            (0, 1) => Some(SpiMode::Mode1),
            (1, 0) => Some(SpiMode::Mode2),
            (1, 1) => Some(SpiMode::Mode3),
            _ => None,
        }
    }

    pub fn samples_on_rising(self) -> bool {
        matches!(self, SpiMode::Mode0 | SpiMode::Mode3)
    }
}

/// Order in which SPI bits assemble into a word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOrder {
    MsbFirst,
    LsbFirst,
}

impl FromStr for BitOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "msb" | "msb-first" => Ok(BitOrder::MsbFirst),
            "lsb" | "lsb-first" => Ok(BitOrder::LsbFirst),
            other => Err(format!("unknown bit order '{}'", other)),
        }
    }
}

/// Chip select polarity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsPolarity {
    /// LOW = active, HIGH = inactive
    ActiveLow,
    /// HIGH = active, LOW = inactive
    ActiveHigh,
}

impl CsPolarity {
    pub fn is_active(self, level: bool) -> bool {
        match self {
            CsPolarity::ActiveLow => !level,
            CsPolarity::ActiveHigh => level,
        }
    }
}

impl FromStr for CsPolarity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active-low" | "low" => Ok(CsPolarity::ActiveLow),
            "active-high" | "high" => Ok(CsPolarity::ActiveHigh),
            other => Err(format!("unknown chip select polarity '{}'", other)),
        }
    }
}

/// Clock edge the parallel decoder samples on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrobeMode {
    RisingEdge,
    FallingEdge,
    AnyEdge,
}

impl StrobeMode {
    /// Whether a `previous -> current` clock transition triggers a sample
    pub fn triggers(self, previous: bool, current: bool) -> bool {
        match self {
            StrobeMode::RisingEdge => !previous && current,
            StrobeMode::FallingEdge => previous && !current,
            StrobeMode::AnyEdge => previous != current,
        }
    }
}

impl FromStr for StrobeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rising" => Ok(StrobeMode::RisingEdge),
            "falling" => Ok(StrobeMode::FallingEdge),
            "either" | "any" => Ok(StrobeMode::AnyEdge),
            other => Err(format!("unknown clock edge '{}'", other)),
        }
    }
}

impl fmt::Display for StrobeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrobeMode::RisingEdge => "rising",
            StrobeMode::FallingEdge => "falling",
            StrobeMode::AnyEdge => "either",
        };
        f.write_str(name)
    }
}
