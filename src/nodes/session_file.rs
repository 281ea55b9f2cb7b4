//! Session files: a zip container with a text `header` and packed samples
//!
//! ```text
//! header      total probes = 3
//!             samplerate = 1 MHz
//!             total samples = 4096
//!             unit size = 1
//!             probe0 = CLK
//!             ...
//! logic-1     packed samples, `unit size` bytes each
//! ```
//!
//! [`SessionFileSource`] replays such a file as a datafeed.

use crate::runtime::packet::Packet;
use crate::runtime::probes::{ProbeSet, unit_size_for};
use crate::runtime::scheduler::StopHandle;
use crate::runtime::sender::Sender;
use crate::runtime::source::{AcquisitionLimits, CaptureSource, SourceCapabilities};
use crate::{FeedError, Result};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};
use zip::ZipArchive;

/// Name of the header entry inside a session file
pub const HEADER_ENTRY: &str = "header";
/// Name of the sample entry inside a session file
pub const LOGIC_ENTRY: &str = "logic-1";

const DEFAULT_CHUNK_SAMPLES: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHeader {
    pub total_probes: usize,
    /// Sample rate as written, e.g. "50 MHz"
    pub samplerate: String,
    pub samplerate_hz: u64,
    pub total_samples: u64,
    /// Bytes per stored sample
    pub unit_size: usize,
    /// Probe names, index = packed lane
    pub probe_names: Vec<String>,
}

impl SessionHeader {
    pub fn new(probe_names: Vec<String>, samplerate_hz: u64, total_samples: u64) -> Self {
        Self {
            total_probes: probe_names.len(),
            samplerate: format_sample_rate(samplerate_hz),
            samplerate_hz,
            total_samples,
            unit_size: unit_size_for(probe_names.len()),
            probe_names,
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut total_probes: Option<usize> = None;
        let mut samplerate: Option<String> = None;
        let mut total_samples: Option<u64> = None;
        let mut unit_size: Option<usize> = None;
        let mut names: HashMap<usize, String> = HashMap::new();

        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(value) = line.strip_prefix("total probes = ") {
                total_probes = value.parse().ok();
            } else if let Some(value) = line.strip_prefix("samplerate = ") {
                samplerate = Some(value.to_string());
            } else if let Some(value) = line.strip_prefix("total samples = ") {
                total_samples = value.parse().ok();
            } else if let Some(value) = line.strip_prefix("unit size = ") {
                unit_size = value.parse().ok();
            } else if let Some((key, name)) = line.split_once(" = ")
                && let Some(index) = key.strip_prefix("probe")
                && let Ok(index) = index.parse::<usize>()
            {
                names.insert(index, name.to_string());
            }
        }

        let total_probes =
            total_probes.ok_or_else(|| FeedError::MissingField("total probes".to_string()))?;
        let samplerate =
            samplerate.ok_or_else(|| FeedError::MissingField("samplerate".to_string()))?;
        let total_samples =
            total_samples.ok_or_else(|| FeedError::MissingField("total samples".to_string()))?;
        let unit_size = unit_size.unwrap_or_else(|| unit_size_for(total_probes));

        let samplerate_hz = parse_sample_rate(&samplerate)
            .ok_or_else(|| FeedError::ParseHeader(format!("Invalid sample rate: {}", samplerate)))?;
        if total_probes == 0 || unit_size * 8 < total_probes {
            return Err(FeedError::ParseHeader(format!(
                "{} probes do not fit a unit size of {}",
                total_probes, unit_size
            )));
        }

        let probe_names = (0..total_probes)
            .map(|i| names.remove(&i).unwrap_or_else(|| i.to_string()))
            .collect();

        Ok(Self {
            total_probes,
            samplerate,
            samplerate_hz,
            total_samples,
            unit_size,
            probe_names,
        })
    }

    pub fn render(&self) -> String {
        let mut text = String::new();
        let _ = writeln!(text, "total probes = {}", self.total_probes);
        let _ = writeln!(text, "samplerate = {}", self.samplerate);
        let _ = writeln!(text, "total samples = {}", self.total_samples);
        let _ = writeln!(text, "unit size = {}", self.unit_size);
        for (i, name) in self.probe_names.iter().enumerate() {
            let _ = writeln!(text, "probe{} = {}", i, name);
        }
        text
    }
}

/// Parse a sample rate string (e.g., "50 MHz") into Hz
pub fn parse_sample_rate(samplerate: &str) -> Option<u64> {
    let parts: Vec<&str> = samplerate.split_whitespace().collect();
    if parts.len() >= 2
        && let Ok(value) = parts[0].parse::<f64>()
        && value >= 0.0
    {
        let multiplier = match parts[1] {
            "GHz" => 1_000_000_000.0,
            "MHz" => 1_000_000.0,
            "KHz" | "kHz" => 1_000.0,
            "Hz" => 1.0,
            _ => return None,
        };
        return Some((value * multiplier).round() as u64);
    }
    None
}

/// Largest unit that represents `hz` exactly: 50 MHz, 250 kHz, 7 Hz
pub fn format_sample_rate(hz: u64) -> String {
    for (divisor, unit) in [(1_000_000_000, "GHz"), (1_000_000, "MHz"), (1_000, "kHz")] {
        if hz >= divisor && hz % divisor == 0 {
            return format!("{} {}", hz / divisor, unit);
        }
    }
    format!("{} Hz", hz)
}

/// Replays a session file as Header, MetaLogic, Logic chunks and End
pub struct SessionFileSource {
    name: String,
    header: SessionHeader,
    data: Vec<u8>,
    chunk_samples: usize,
    limits: AcquisitionLimits,
}

impl SessionFileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file)?;

        let mut content = String::new();
        archive
            .by_name(HEADER_ENTRY)
            .map_err(|e| FeedError::ParseHeader(format!("Cannot find header file: {}", e)))?
            .read_to_string(&mut content)?;
        let header = SessionHeader::parse(&content)?;

        let mut data = Vec::new();
        archive
            .by_name(LOGIC_ENTRY)
            .map_err(|e| FeedError::ParseHeader(format!("Cannot find sample data: {}", e)))?
            .read_to_end(&mut data)?;

        let stored = (data.len() / header.unit_size) as u64;
        if stored < header.total_samples {
            return Err(FeedError::ParseHeader(format!(
                "header declares {} samples, file holds {}",
                header.total_samples, stored
            )));
        }
        data.truncate(header.total_samples as usize * header.unit_size);

        info!(
            "Loaded {:?}: {} probes, {}, {} samples",
            path, header.total_probes, header.samplerate, header.total_samples
        );

        Ok(Self {
            name: "session_file".to_string(),
            header,
            data,
            chunk_samples: DEFAULT_CHUNK_SAMPLES,
            limits: AcquisitionLimits::default(),
        })
    }

    /// Set custom name (builder pattern)
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Samples per Logic packet
    pub fn with_chunk_samples(mut self, samples: usize) -> Self {
        self.chunk_samples = samples.max(1);
        self
    }

    pub fn header(&self) -> &SessionHeader {
        &self.header
    }
}

impl CaptureSource for SessionFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn probes(&self) -> ProbeSet {
        ProbeSet::new(self.header.probe_names.iter().cloned())
    }

    fn sample_rate(&self) -> u64 {
        self.header.samplerate_hz
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities {
            limit_samples: true,
            ..Default::default()
        }
    }

    fn configure(&mut self, limits: &AcquisitionLimits) -> Result<()> {
        self.limits = *limits;
        Ok(())
    }

    fn run(&mut self, packets: &Sender<Packet>, stop: &StopHandle) -> Result<()> {
        packets.send(Packet::Header)?;
        packets.send(Packet::MetaLogic {
            probe_count: self.header.total_probes,
            sample_rate: self.header.samplerate_hz,
        })?;

        let chunk_bytes = self.chunk_samples * self.header.unit_size;
        let mut sent = 0u64;
        for chunk in self.data.chunks(chunk_bytes) {
            if stop.is_stopped() {
                debug!("[{}] Stop requested after {} samples", self.name, sent);
                break;
            }
            if self.limits.samples > 0 && sent >= self.limits.samples {
                break;
            }
            packets.send(Packet::logic(chunk.to_vec(), self.header.unit_size))?;
            sent += (chunk.len() / self.header.unit_size) as u64;
        }

        packets.send(Packet::End)?;
        debug!("[{}] Replayed {} samples", self.name, sent);
        Ok(())
    }
}
