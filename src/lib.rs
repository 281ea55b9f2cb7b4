//! Streaming data-feed pipeline for logic-analyzer style acquisitions
//!
//! Turns the packet stream produced by a capture source (live generator or a
//! replayed session file) into formatted output, protocol decoder annotations,
//! or a persisted capture store.
//!
//! # Architecture
//!
//! - **ProbeSet**: probe selection and the enabled-lane layout
//! - **Transcoder**: packs only the enabled lanes of every sample
//! - **OutputAdapter**: lifecycle of the single output formatter of a stream
//! - **DecoderStack**: linear chains of protocol decoder instances
//! - **AnnotationEmitter**: visibility filtering and rendering of annotations
//! - **CaptureStore**: packed samples kept for a later session save
//! - **DataFeed**: the packet state machine that routes everything above
//! - **Runner**: runs a `CaptureSource` on its own thread and serializes its
//!   packets into a `DataFeed`
//!
//! # Example
//!
//! ```no_run
//! use datafeed::{CaptureSource, DataFeed, DecoderRegistry, DemoSource, OutputRegistry, Runner, SessionConfig};
//!
//! let config = SessionConfig { limit_samples: 1000, ..Default::default() };
//! let source = DemoSource::new(8, 1_000_000);
//! let mut feed = DataFeed::new(
//!     &config,
//!     source.probes(),
//!     &OutputRegistry::builtin(),
//!     &DecoderRegistry::builtin(),
//! )?;
//! Runner::new().run(source, &mut feed)?;
//! # Ok::<(), datafeed::FeedError>(())
//! ```

use std::path::PathBuf;
use thiserror::Error;

pub mod config;
pub mod nodes;
pub mod runtime;

pub use config::{OutputSpec, SessionConfig, StackingPolicy};

pub use runtime::{
    AnnotationEmitter, AnnotationVisibility, CaptureSource, DataFeed, DecoderRegistry, DecoderStack,
    EnabledLanes, FeedWarning, OutputAdapter, OutputRegistry, OutputTarget, Packet, PacketKind,
    PacketSink, Probe, ProbeSet, Runner, SessionCounters, SharedBuffer, StopHandle,
};

pub use nodes::{CaptureStore, DemoPattern, DemoSource, SessionFileSource};

use runtime::errors::{DecodeError, DeliveryError};

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Invalid probe selection: {0}")]
    InvalidSelection(String),

    #[error("Protocol decoder '{0}' not found")]
    DecoderNotFound(String),

    #[error("Protocol decoder instance '{0}' not found")]
    InstanceNotFound(String),

    #[error("Invalid protocol decoder directive: {0}")]
    InvalidDirective(String),

    #[error("Invalid protocol decoder stack: {0}")]
    InvalidStack(String),

    #[error("Annotation '{annotation}' not found for protocol decoder '{instance}'")]
    AnnotationNotFound { instance: String, annotation: String },

    #[error("Failed to allocate {bytes} bytes for sample data")]
    Allocation { bytes: usize },

    #[error("Failed to write output: {0}")]
    SinkWrite(#[source] std::io::Error),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Limit misconfiguration: {0}")]
    LimitMisconfiguration(String),

    #[error("Invalid output format '{0}'")]
    UnknownOutputFormat(String),

    #[error("Output format '{format}' initialization failed: {reason}")]
    OutputInit { format: String, reason: String },

    #[error("Protocol decoder '{instance}' failed to start: {source}")]
    DecoderStart {
        instance: String,
        #[source]
        source: DecodeError,
    },

    #[error("Protocol decoder '{instance}' failed: {source}")]
    DecoderFeed {
        instance: String,
        #[source]
        source: DecodeError,
    },

    #[error("Failed to create capture store: {0}")]
    StoreCreate(String),

    #[error("Failed to save session to {path:?}: {reason}")]
    StoreSave { path: PathBuf, reason: String },

    #[error("Header parsing error: {0}")]
    ParseHeader(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capture source error: {0}")]
    Source(String),

    #[error("Packet delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

pub type Result<T> = std::result::Result<T, FeedError>;
