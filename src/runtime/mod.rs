//! Runtime support for the acquisition data feed

pub mod annotations;
pub mod decoder;
pub mod errors;
pub mod feed;
pub mod output;
pub mod packet;
pub mod probes;
pub mod receiver;
pub mod scheduler;
pub mod sender;
pub mod sink;
pub mod source;
pub mod stack;
pub mod transcode;
pub mod watchdog;

pub use annotations::{AnnotationEmitter, AnnotationEvent, AnnotationVisibility};
pub use decoder::{DecoderDescriptor, DecoderRegistry, ProtocolDecoder};
pub use errors::{DecodeError, DeliveryError};
pub use feed::{DataFeed, FeedWarning, PacketSink, SessionCounters};
pub use output::{OutputAdapter, OutputDescriptor, OutputFormat, OutputRegistry};
pub use packet::{AnalogPayload, LogicPayload, Packet, PacketKind};
pub use probes::{EnabledLanes, Probe, ProbeSet};
pub use receiver::Receiver;
pub use scheduler::{RunSummary, Runner, StopHandle};
pub use sender::Sender;
pub use sink::{OutputTarget, SharedBuffer};
pub use source::{AcquisitionLimits, CaptureSource, SourceCapabilities};
pub use stack::DecoderStack;
pub use transcode::Transcoder;
pub use watchdog::Watchdog;
