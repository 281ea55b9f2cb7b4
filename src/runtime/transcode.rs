//! Bit-packing transcoder
//!
//! Extracts the enabled lanes of every source sample and packs them from
//! bit 0 upward into `unit_size` bytes per output sample.

use super::packet::LogicPayload;
use super::probes::EnabledLanes;
use crate::{FeedError, Result};
use tracing::{debug, trace, warn};

/// Packed output of one logic payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcoded {
    /// Packed samples, `samples * unit_size` bytes
    pub data: Vec<u8>,
    /// Whole source samples consumed
    pub samples: u64,
    /// Whole source samples discarded because of the sample budget
    pub dropped: u64,
}

/// Repacks logic payloads for one fixed lane layout
#[derive(Debug, Clone)]
pub struct Transcoder {
    lanes: EnabledLanes,
    unit_size: usize,
}

impl Transcoder {
    pub fn new(lanes: EnabledLanes) -> Self {
        let unit_size = lanes.unit_size();
        Self { lanes, unit_size }
    }

    pub fn lanes(&self) -> &EnabledLanes {
        &self.lanes
    }

    /// Byte width of one packed sample
    pub fn unit_size(&self) -> usize {
        self.unit_size
    }

    /// Pack `payload`, consuming at most `budget` samples when given.
    ///
    /// Sample boundaries come from the payload's own unit size. A trailing
    /// partial sample is discarded. Over-delivery beyond `budget` is
    /// truncated, never an error. Lanes past the end of a source sample
    /// read as 0.
    pub fn transcode(&self, payload: &LogicPayload, budget: Option<u64>) -> Result<Transcoded> {
        let stride = payload.unit_size;
        if stride == 0 {
            warn!("Logic payload with a zero unit size ignored");
            return Ok(Transcoded {
                data: Vec::new(),
                samples: 0,
                dropped: 0,
            });
        }
        if let Some(max_lane) = self.lanes.max_lane()
            && max_lane >= stride * 8
        {
            debug!(
                "Logic payload of {} byte(s) per sample lacks probe {}, reading it as 0",
                stride, max_lane
            );
        }

        let available = (payload.data.len() / stride) as u64;
        let samples = budget.map_or(available, |b| available.min(b));
        let dropped = available - samples;
        let count = samples as usize;

        let out_len = count * self.unit_size;
        let mut data = Vec::new();
        data.try_reserve_exact(out_len)
            .map_err(|_| FeedError::Allocation { bytes: out_len })?;

        if self.lanes.is_identity_for(stride) {
            data.extend_from_slice(&payload.data[..count * stride]);
        } else {
            data.resize(out_len, 0);
            for (sample, src) in payload.data.chunks_exact(stride).take(count).enumerate() {
                let dst = &mut data[sample * self.unit_size..(sample + 1) * self.unit_size];
                for (bit, &lane) in self.lanes.as_slice().iter().enumerate() {
                    if src.get(lane / 8).is_some_and(|byte| byte & (1 << (lane % 8)) != 0) {
                        dst[bit / 8] |= 1 << (bit % 8);
                    }
                }
            }
        }

        trace!(
            "Packed {} samples ({} -> {} bytes/sample, {} dropped)",
            samples, stride, self.unit_size, dropped
        );

        Ok(Transcoded {
            data,
            samples,
            dropped,
        })
    }
}
