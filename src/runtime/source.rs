//! Capture source contract and acquisition limit negotiation

use super::packet::Packet;
use super::probes::ProbeSet;
use super::scheduler::StopHandle;
use super::sender::Sender;
use crate::config::SessionConfig;
use crate::{FeedError, Result};
use tracing::info;

/// Limits a source can enforce by itself
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceCapabilities {
    pub limit_samples: bool,
    pub limit_time: bool,
    pub limit_frames: bool,
    pub continuous: bool,
}

/// Limits handed to a source before it runs. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionLimits {
    pub samples: u64,
    pub frames: u64,
    pub time_ms: u64,
    pub continuous: bool,
}

/// A producer of datafeed packets (hardware stand-in or file replay)
///
/// `run` is called once on the source's own thread. It must begin the
/// stream with `Header`, end it with `End`, and check `stop` between
/// packets.
pub trait CaptureSource: Send {
    fn name(&self) -> &str;

    /// Probes as the source reports them, all enabled
    fn probes(&self) -> ProbeSet;

    /// Current sample rate in Hz (0 if unknown)
    fn sample_rate(&self) -> u64;

    fn capabilities(&self) -> SourceCapabilities;

    fn configure(&mut self, limits: &AcquisitionLimits) -> Result<()>;

    fn run(&mut self, packets: &Sender<Packet>, stop: &StopHandle) -> Result<()>;
}

impl<S: CaptureSource + ?Sized> CaptureSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn probes(&self) -> ProbeSet {
        (**self).probes()
    }

    fn sample_rate(&self) -> u64 {
        (**self).sample_rate()
    }

    fn capabilities(&self) -> SourceCapabilities {
        (**self).capabilities()
    }

    fn configure(&mut self, limits: &AcquisitionLimits) -> Result<()> {
        (**self).configure(limits)
    }

    fn run(&mut self, packets: &Sender<Packet>, stop: &StopHandle) -> Result<()> {
        (**self).run(packets, stop)
    }
}

/// Work out which limits the source will enforce.
///
/// A time limit the source cannot honor is converted into a sample limit
/// at the source's sample rate.
pub fn resolve_limits(
    config: &SessionConfig,
    capabilities: SourceCapabilities,
    sample_rate: u64,
) -> Result<AcquisitionLimits> {
    let mut limits = AcquisitionLimits {
        samples: config.limit_samples,
        frames: config.limit_frames,
        time_ms: 0,
        continuous: config.continuous,
    };

    if config.continuous && !capabilities.continuous {
        return Err(FeedError::LimitMisconfiguration(
            "this source does not support continuous sampling".to_string(),
        ));
    }

    if config.limit_time_ms > 0 {
        if capabilities.limit_time {
            limits.time_ms = config.limit_time_ms;
        } else {
            let samples = sample_rate.saturating_mul(config.limit_time_ms) / 1000;
            if samples == 0 {
                return Err(FeedError::LimitMisconfiguration(format!(
                    "not enough time ({} ms) at this sample rate ({} Hz)",
                    config.limit_time_ms, sample_rate
                )));
            }
            if !capabilities.limit_samples {
                return Err(FeedError::LimitMisconfiguration(
                    "this source cannot take a time-based sample limit".to_string(),
                ));
            }
            info!(
                "Time limit of {} ms converted to {} samples",
                config.limit_time_ms, samples
            );
            limits.samples = samples;
        }
    }

    if config.limit_samples > 0 && !capabilities.limit_samples {
        return Err(FeedError::LimitMisconfiguration(
            "this source does not support a sample limit".to_string(),
        ));
    }
    if config.limit_frames > 0 && !capabilities.limit_frames {
        return Err(FeedError::LimitMisconfiguration(
            "this source does not support a frame limit".to_string(),
        ));
    }

    Ok(limits)
}

/// Resolve limits, write the effective sample limit back into `config`
/// and configure the source with them.
pub fn prepare_source(
    config: &mut SessionConfig,
    source: &mut dyn CaptureSource,
) -> Result<AcquisitionLimits> {
    let limits = resolve_limits(config, source.capabilities(), source.sample_rate())?;
    config.limit_samples = limits.samples;
    source.configure(&limits)?;
    Ok(limits)
}
