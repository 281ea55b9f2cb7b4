//! Output destination: standard output, a file, or an in-memory buffer
//!
//! Every write is flushed immediately so the output can be tailed live.

use crate::{FeedError, Result};
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Cloneable in-memory byte sink, shared between a feed and its observer
#[derive(Clone, Debug, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far
    pub fn contents(&self) -> Vec<u8> {
        match self.inner.lock() {
            Ok(buf) => buf.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Contents decoded as UTF-8, lossily
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    pub fn len(&self) -> usize {
        self.contents().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("shared buffer lock poisoned"))?;
        inner.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Where formatted output goes
#[derive(Clone, Debug, Default)]
pub enum OutputTarget {
    #[default]
    Stdout,
    File(PathBuf),
    Buffer(SharedBuffer),
    /// Output is discarded (the capture store is the sink)
    Discard,
}

/// Open-on-demand writer for one output target
///
/// Bytes written before `open` are held and emitted once the target opens.
pub struct Destination {
    target: OutputTarget,
    writer: Option<Box<dyn Write + Send>>,
    pending: Vec<u8>,
    bytes_written: u64,
}

impl Destination {
    pub fn new(target: OutputTarget) -> Self {
        Self {
            target,
            writer: None,
            pending: Vec::new(),
            bytes_written: 0,
        }
    }

    pub fn target(&self) -> &OutputTarget {
        &self.target
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Total bytes that reached the underlying writer
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Open the target. Files are created (truncated) on every open.
    pub fn open(&mut self) -> Result<()> {
        if self.writer.is_some() {
            return Ok(());
        }

        let writer: Box<dyn Write + Send> = match &self.target {
            OutputTarget::Stdout => Box::new(io::stdout()),
            OutputTarget::File(path) => {
                debug!("Opening output file {:?}", path);
                Box::new(File::create(path).map_err(FeedError::SinkWrite)?)
            }
            OutputTarget::Buffer(buffer) => Box::new(buffer.clone()),
            OutputTarget::Discard => Box::new(io::sink()),
        };
        self.writer = Some(writer);

        if !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            self.write(&pending)?;
        }
        Ok(())
    }

    /// Write and flush `bytes`, or hold them until the target opens
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        match self.writer.as_mut() {
            Some(writer) => {
                writer.write_all(bytes).map_err(FeedError::SinkWrite)?;
                writer.flush().map_err(FeedError::SinkWrite)?;
                self.bytes_written += bytes.len() as u64;
            }
            None => {
                if !matches!(self.target, OutputTarget::Discard) {
                    self.pending.extend_from_slice(bytes);
                }
            }
        }
        Ok(())
    }

    /// Flush and release the writer. A later `open` starts over, and bytes
    /// still held for a target that never opened are dropped.
    pub fn close(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            debug!("Dropping {} bytes never written", self.pending.len());
            self.pending.clear();
        }
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(FeedError::SinkWrite)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Destination")
            .field("target", &self.target)
            .field("open", &self.writer.is_some())
            .field("pending", &self.pending.len())
            .field("bytes_written", &self.bytes_written)
            .finish()
    }
}
