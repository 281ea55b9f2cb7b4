//! In-memory capture store, saved as a session file at the end of a stream

use super::session_file::{HEADER_ENTRY, LOGIC_ENTRY, SessionHeader};
use crate::runtime::probes::EnabledLanes;
use crate::{FeedError, Result};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::debug;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Packed samples accumulated for a later save
#[derive(Debug, Clone)]
pub struct CaptureStore {
    unit_size: usize,
    lane_count: usize,
    samples: u64,
    data: Vec<u8>,
}

impl CaptureStore {
    pub fn create(unit_size: usize) -> Result<Self> {
        if unit_size == 0 {
            return Err(FeedError::StoreCreate(
                "unit size must be at least one byte".to_string(),
            ));
        }
        debug!("Capture store created, unit size {}", unit_size);
        Ok(Self {
            unit_size,
            lane_count: 0,
            samples: 0,
            data: Vec::new(),
        })
    }

    pub fn unit_size(&self) -> usize {
        self.unit_size
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }

    /// Append `sample_count` packed samples laid out as `lanes`
    pub fn append(&mut self, bytes: &[u8], sample_count: u64, lanes: &EnabledLanes) -> Result<()> {
        if lanes.unit_size() != self.unit_size {
            return Err(FeedError::ProtocolViolation(format!(
                "store holds {}-byte samples, got a layout of {} lanes",
                self.unit_size,
                lanes.len()
            )));
        }
        let expected = sample_count as usize * self.unit_size;
        if bytes.len() != expected {
            return Err(FeedError::ProtocolViolation(format!(
                "{} samples need {} bytes, got {}",
                sample_count,
                expected,
                bytes.len()
            )));
        }

        self.data
            .try_reserve(bytes.len())
            .map_err(|_| FeedError::Allocation { bytes: bytes.len() })?;
        self.data.extend_from_slice(bytes);
        self.samples += sample_count;
        self.lane_count = lanes.len();
        Ok(())
    }

    /// Write the store as a session file.
    ///
    /// `probe_names` are the names of the stored lanes, in lane order.
    pub fn save<P: AsRef<Path>>(&self, path: P, probe_names: &[String], sample_rate: u64) -> Result<()> {
        let path = path.as_ref();
        let fail = |reason: String| FeedError::StoreSave {
            path: path.to_path_buf(),
            reason,
        };

        if self.lane_count > 0 && probe_names.len() != self.lane_count {
            return Err(fail(format!(
                "{} probe names for {} stored lanes",
                probe_names.len(),
                self.lane_count
            )));
        }

        let mut header = SessionHeader::new(probe_names.to_vec(), sample_rate, self.samples);
        header.unit_size = self.unit_size;

        let file = File::create(path).map_err(|e| fail(e.to_string()))?;
        let mut zip = ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        zip.start_file(HEADER_ENTRY, options)
            .map_err(|e| fail(e.to_string()))?;
        zip.write_all(header.render().as_bytes())
            .map_err(|e| fail(e.to_string()))?;
        zip.start_file(LOGIC_ENTRY, options)
            .map_err(|e| fail(e.to_string()))?;
        zip.write_all(&self.data).map_err(|e| fail(e.to_string()))?;
        zip.finish().map_err(|e| fail(e.to_string()))?;

        debug!("Wrote {} samples to {:?}", self.samples, path);
        Ok(())
    }
}
