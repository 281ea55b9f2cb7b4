//! Pattern generator capture source
//!
//! Produces logic samples in fixed-size chunks. A sample limit is honored
//! at chunk granularity, so the last chunk may run past it; the feed
//! truncates the excess.

use crate::runtime::packet::Packet;
use crate::runtime::probes::{ProbeSet, unit_size_for};
use crate::runtime::scheduler::StopHandle;
use crate::runtime::sender::Sender;
use crate::runtime::source::{AcquisitionLimits, CaptureSource, SourceCapabilities};
use crate::{FeedError, Result};
use tracing::debug;

const DEFAULT_CHUNK_SAMPLES: usize = 1024;
const DEFAULT_SAMPLES: u64 = 4096;

/// What the generator puts on the probes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum DemoPattern {
    /// Sample number in binary, probe 0 is the LSB
    #[default]
    Counter,
    /// One probe high at a time, rotating
    Walking,
    /// All probes low
    Low,
    /// All probes high
    High,
}

pub struct DemoSource {
    name: String,
    probe_count: usize,
    sample_rate: u64,
    pattern: DemoPattern,
    chunk_samples: usize,
    default_samples: u64,
    trigger_at: Option<u64>,
    frame_samples: Option<u64>,
    limits: AcquisitionLimits,
}

impl DemoSource {
    pub fn new(probe_count: usize, sample_rate: u64) -> Self {
        Self {
            name: "demo".to_string(),
            probe_count: probe_count.max(1),
            sample_rate,
            pattern: DemoPattern::default(),
            chunk_samples: DEFAULT_CHUNK_SAMPLES,
            default_samples: DEFAULT_SAMPLES,
            trigger_at: None,
            frame_samples: None,
            limits: AcquisitionLimits::default(),
        }
    }

    /// Set custom name (builder pattern)
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_pattern(mut self, pattern: DemoPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Samples per Logic packet
    pub fn with_chunk_samples(mut self, samples: usize) -> Self {
        self.chunk_samples = samples.max(1);
        self
    }

    /// Samples produced when no limit is configured
    pub fn with_default_samples(mut self, samples: u64) -> Self {
        self.default_samples = samples;
        self
    }

    /// Emit a Trigger packet right before sample `position`
    pub fn with_trigger_at(mut self, position: u64) -> Self {
        self.trigger_at = Some(position);
        self
    }

    /// Group samples into frames of `samples` each
    pub fn with_frames(mut self, samples: u64) -> Self {
        self.frame_samples = Some(samples.max(1));
        self
    }

    pub fn unit_size(&self) -> usize {
        unit_size_for(self.probe_count)
    }

    /// Value of `position` on every probe, as a little-endian sample
    fn sample(&self, position: u64) -> u64 {
        let mask = if self.probe_count >= 64 {
            u64::MAX
        } else {
            (1u64 << self.probe_count) - 1
        };
        let value = match self.pattern {
            DemoPattern::Counter => position,
            DemoPattern::Walking => 1u64 << (position % self.probe_count.min(64) as u64),
            DemoPattern::Low => 0,
            DemoPattern::High => u64::MAX,
        };
        value & mask
    }

    fn generate(&self, start: u64, count: u64) -> Vec<u8> {
        let unit = self.unit_size();
        let mut data = Vec::with_capacity(count as usize * unit);
        for position in start..start + count {
            let bytes = self.sample(position).to_le_bytes();
            data.extend((0..unit).map(|i| bytes.get(i).copied().unwrap_or(0)));
        }
        data
    }

    /// Samples to produce, `None` to run until stopped or out of frames
    fn planned_samples(&self) -> Option<u64> {
        let chunk = self.chunk_samples as u64;
        if self.limits.continuous {
            return None;
        }
        if self.limits.samples > 0 {
            return Some(self.limits.samples.div_ceil(chunk) * chunk);
        }
        if self.limits.time_ms > 0 {
            let samples = self.sample_rate.saturating_mul(self.limits.time_ms) / 1000;
            return Some(samples.div_ceil(chunk) * chunk);
        }
        if self.limits.frames > 0 {
            return None;
        }
        Some(self.default_samples)
    }
}

impl CaptureSource for DemoSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn probes(&self) -> ProbeSet {
        ProbeSet::numbered(self.probe_count)
    }

    fn sample_rate(&self) -> u64 {
        self.sample_rate
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities {
            limit_samples: true,
            limit_time: true,
            limit_frames: true,
            continuous: true,
        }
    }

    fn configure(&mut self, limits: &AcquisitionLimits) -> Result<()> {
        if limits.time_ms > 0 && self.sample_rate == 0 {
            return Err(FeedError::LimitMisconfiguration(
                "a time limit needs a sample rate".to_string(),
            ));
        }
        self.limits = *limits;
        Ok(())
    }

    fn run(&mut self, packets: &Sender<Packet>, stop: &StopHandle) -> Result<()> {
        let total = self.planned_samples();
        let frame_samples = self
            .frame_samples
            .or((self.limits.frames > 0).then_some(self.chunk_samples as u64));
        debug!(
            "[{}] Generating {:?} samples on {} probes ({:?})",
            self.name, total, self.probe_count, self.pattern
        );

        packets.send(Packet::Header)?;
        packets.send(Packet::MetaLogic {
            probe_count: self.probe_count,
            sample_rate: self.sample_rate,
        })?;

        let mut position = 0u64;
        let mut frame_position = 0u64;
        let mut frames = 0u64;
        let mut in_frame = false;
        let mut triggered = false;

        loop {
            if stop.is_stopped() {
                debug!("[{}] Stop requested at sample {}", self.name, position);
                break;
            }
            if total.is_some_and(|t| position >= t) {
                break;
            }
            if self.limits.frames > 0 && frames >= self.limits.frames {
                break;
            }

            if frame_samples.is_some() && !in_frame {
                packets.send(Packet::FrameBegin)?;
                in_frame = true;
                frame_position = 0;
            }
            if !triggered && self.trigger_at.is_some_and(|t| t <= position) {
                packets.send(Packet::Trigger)?;
                triggered = true;
            }

            let mut count = self.chunk_samples as u64;
            if let Some(frame) = frame_samples {
                count = count.min(frame - frame_position);
            }
            if let Some(t) = total {
                count = count.min(t - position);
            }
            if !triggered && let Some(t) = self.trigger_at {
                count = count.min(t - position);
            }

            packets.send(Packet::logic(self.generate(position, count), self.unit_size()))?;
            position += count;
            frame_position += count;

            if frame_samples.is_some_and(|frame| frame_position >= frame) {
                packets.send(Packet::FrameEnd)?;
                in_frame = false;
                frames += 1;
            }
        }

        if in_frame {
            packets.send(Packet::FrameEnd)?;
        }
        packets.send(Packet::End)?;
        debug!("[{}] Generated {} samples", self.name, position);
        Ok(())
    }
}
