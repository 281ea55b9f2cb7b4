//! Session configuration
//!
//! A [`SessionConfig`] can be loaded from a TOML file; command-line flags
//! override it field by field.

use crate::runtime::output::FormatOptions;
use crate::{FeedError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Output format used when none is given
pub const DEFAULT_OUTPUT_FORMAT: &str = "bits:width=64";

/// How several decoders are combined when no explicit stack is given
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StackingPolicy {
    /// Chain instances in declaration order; only the top one stays visible
    #[default]
    Chain,
    /// Keep every instance on its own, fed with raw samples
    Independent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Stop after this many samples (0 = unlimited)
    pub limit_samples: u64,
    /// Stop after this many frames (0 = unlimited)
    pub limit_frames: u64,
    /// Stop after this many milliseconds (0 = unlimited)
    pub limit_time_ms: u64,
    /// Sample until stopped
    pub continuous: bool,
    /// Drop logic data until a trigger has been seen
    pub wait_trigger: bool,
    /// Probe selection expression, e.g. `"0-3,CLK"`
    pub probes: Option<String>,
    pub output_file: Option<PathBuf>,
    /// Output format with options, e.g. `"hex:width=32"`
    pub output_format: Option<String>,
    /// Decoder directives, e.g. `"spi:sck=0:sdata=1"`
    pub decoders: Option<String>,
    pub decoder_stack: Option<String>,
    pub decoder_annotations: Option<String>,
    pub stacking: StackingPolicy,
    /// 0 off, 1 error, 2 warn, 3 info, 4 debug, 5 trace
    pub loglevel: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            limit_samples: 0,
            limit_frames: 0,
            limit_time_ms: 0,
            continuous: false,
            wait_trigger: false,
            probes: None,
            output_file: None,
            output_format: None,
            decoders: None,
            decoder_stack: None,
            decoder_annotations: None,
            stacking: StackingPolicy::Chain,
            loglevel: 2,
        }
    }
}

impl SessionConfig {
    /// Load a TOML configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| FeedError::Config(format!("cannot read {:?}: {}", path, e)))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| FeedError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.loglevel > 5 {
            return Err(FeedError::Config(format!(
                "loglevel must be 0-5, got {}",
                self.loglevel
            )));
        }
        if self.decoder_stack.is_some() && self.decoders.is_none() {
            return Err(FeedError::Config(
                "a decoder stack needs decoder directives".to_string(),
            ));
        }
        if self.decoder_annotations.is_some() && self.decoders.is_none() {
            return Err(FeedError::Config(
                "annotation selection needs decoder directives".to_string(),
            ));
        }
        Ok(())
    }

    /// The output format to use, falling back to the default
    pub fn output_spec(&self) -> Result<OutputSpec> {
        OutputSpec::parse(self.output_format.as_deref().unwrap_or(DEFAULT_OUTPUT_FORMAT))
    }

    /// True when samples go to a session file instead of a formatter:
    /// an output file was given without an explicit format.
    pub fn persist_to_store(&self) -> bool {
        self.output_file.is_some() && self.output_format.is_none()
    }

    /// `tracing` filter directive for the configured log level
    pub fn log_filter(&self) -> &'static str {
        match self.loglevel {
            0 => "off",
            1 => "error",
            2 => "warn",
            3 => "info",
            4 => "debug",
            _ => "trace",
        }
    }
}

/// Format id plus options, parsed from `id[:key=value]*`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    pub id: String,
    pub options: FormatOptions,
}

impl OutputSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let mut parts = spec.split(':');
        let id = parts.next().unwrap_or_default().trim();
        if id.is_empty() {
            return Err(FeedError::UnknownOutputFormat(spec.to_string()));
        }

        let mut options = FormatOptions::new();
        for part in parts {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                FeedError::Config(format!("output option '{}' is not key=value", part))
            })?;
            options.insert(key.trim().to_string(), value.trim().to_string());
        }

        Ok(Self {
            id: id.to_string(),
            options,
        })
    }
}

/// Parse a size string: `1000`, `10k`, `2M`, `1G` (decimal multipliers)
pub fn parse_size(text: &str) -> Result<u64> {
    let text = text.trim();
    let (digits, multiplier) = match text.char_indices().last() {
        Some((i, 'k' | 'K')) => (&text[..i], 1_000),
        Some((i, 'm' | 'M')) => (&text[..i], 1_000_000),
        Some((i, 'g' | 'G')) => (&text[..i], 1_000_000_000),
        _ => (text, 1),
    };
    digits
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| FeedError::Config(format!("invalid size '{}'", text)))
}

/// Parse a duration string into milliseconds: `500ms`, `2s`, `1500` (ms)
pub fn parse_time_ms(text: &str) -> Result<u64> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| FeedError::Config(format!("invalid time '{}'", text)))?;

    let ms = match unit.trim() {
        "" | "ms" => Some(value),
        "s" => value.checked_mul(1_000),
        "m" | "min" => value.checked_mul(60_000),
        _ => None,
    };
    ms.ok_or_else(|| FeedError::Config(format!("invalid time '{}'", text)))
}
