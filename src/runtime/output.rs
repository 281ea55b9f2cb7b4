//! Output formatter contract and the adapter that owns one formatter per stream
//!
//! An [`OutputAdapter`] moves through `Uninitialized -> Active -> Finalized`:
//!
//! - `begin` (Header) builds and initializes a fresh formatter
//! - `data` / `event` / `offer` forward payloads while Active
//! - `finish` (End) emits trailing bytes, runs cleanup and releases the formatter
//!
//! Every byte a formatter returns is written to the [`Destination`] at once.

use super::packet::{Packet, PacketKind};
use super::sink::Destination;
use crate::{FeedError, Result};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

/// Key/value options given to a formatter (`bits:width=64` -> `width=64`)
pub type FormatOptions = BTreeMap<String, String>;

/// Sample payload handed to a formatter's data hook
#[derive(Debug, Clone, Copy)]
pub enum DataPayload<'a> {
    /// Packed logic samples (enabled lanes only)
    Logic { data: &'a [u8], unit_size: usize },
    /// Analog rows, `probe_count` floats per sample
    Analog { data: &'a [f32], num_samples: usize },
}

impl DataPayload<'_> {
    pub fn kind(&self) -> PacketKind {
        match self {
            DataPayload::Logic { .. } => PacketKind::Logic,
            DataPayload::Analog { .. } => PacketKind::Analog,
        }
    }
}

/// Structural events handed to a formatter's event hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEvent {
    Trigger,
    FrameBegin,
    FrameEnd,
    End,
}

/// What a formatter learns when the stream starts
#[derive(Debug, Clone, Default)]
pub struct OutputContext {
    /// Enabled probes as `(probe index, name)`, in probe order
    pub probes: Vec<(usize, String)>,
    pub options: FormatOptions,
}

impl OutputContext {
    /// Parse option `key` as an unsigned integer, falling back to `default`
    pub fn option_usize(&self, key: &str, default: usize) -> std::result::Result<usize, String> {
        match self.options.get(key) {
            None => Ok(default),
            Some(value) => value
                .parse()
                .map_err(|_| format!("option '{}' expects a number, got '{}'", key, value)),
        }
    }
}

/// An output format implementation
///
/// All hooks except `init` have empty defaults, so a format only implements
/// what it needs. Hooks return the bytes to append to the destination.
pub trait OutputFormat: Send {
    /// Prepare the preamble state. An error aborts the run.
    fn init(&mut self, ctx: &OutputContext) -> std::result::Result<(), String>;

    /// Packet kind the data hook accepts, if any
    fn accepts(&self) -> Option<PacketKind> {
        None
    }

    fn convert_data(&mut self, _payload: DataPayload<'_>) -> Vec<u8> {
        Vec::new()
    }

    fn handle_event(&mut self, _event: FeedEvent) -> Vec<u8> {
        Vec::new()
    }

    /// Whether every packet is also offered to [`OutputFormat::receive`]
    fn receives_packets(&self) -> bool {
        false
    }

    fn receive(&mut self, _packet: &Packet) -> Vec<u8> {
        Vec::new()
    }

    fn cleanup(&mut self) {}
}

/// Registry entry for an output format
#[derive(Clone, Copy)]
pub struct OutputDescriptor {
    pub id: &'static str,
    pub description: &'static str,
    pub factory: fn() -> Box<dyn OutputFormat>,
}

impl fmt::Debug for OutputDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputDescriptor")
            .field("id", &self.id)
            .finish()
    }
}

/// Output formats available to a session, in registration order
#[derive(Clone, Debug, Default)]
pub struct OutputRegistry {
    formats: Vec<OutputDescriptor>,
}

impl OutputRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a format, replacing any earlier one with the same id
    pub fn register(&mut self, descriptor: OutputDescriptor) {
        self.formats.retain(|d| d.id != descriptor.id);
        self.formats.push(descriptor);
    }

    pub fn get(&self, id: &str) -> Result<&OutputDescriptor> {
        self.formats
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| FeedError::UnknownOutputFormat(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutputDescriptor> {
        self.formats.iter()
    }
}

/// Lifecycle state of an [`OutputAdapter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Uninitialized,
    Active,
    Finalized,
}

/// Owns the single live formatter of a stream
pub struct OutputAdapter {
    descriptor: OutputDescriptor,
    options: FormatOptions,
    state: AdapterState,
    module: Option<Box<dyn OutputFormat>>,
}

impl OutputAdapter {
    pub fn new(descriptor: OutputDescriptor, options: FormatOptions) -> Self {
        Self {
            descriptor,
            options,
            state: AdapterState::Uninitialized,
            module: None,
        }
    }

    pub fn format_id(&self) -> &'static str {
        self.descriptor.id
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == AdapterState::Active
    }

    /// Header: construct and initialize the formatter
    ///
    /// A Header while a formatter is alive is a protocol violation; the live
    /// formatter is left untouched.
    pub fn begin(&mut self, probes: Vec<(usize, String)>) -> Result<()> {
        if self.state == AdapterState::Active {
            return Err(FeedError::ProtocolViolation(format!(
                "Header received while output module '{}' is still active",
                self.descriptor.id
            )));
        }

        let ctx = OutputContext {
            probes,
            options: self.options.clone(),
        };
        let mut module = (self.descriptor.factory)();
        module.init(&ctx).map_err(|reason| FeedError::OutputInit {
            format: self.descriptor.id.to_string(),
            reason,
        })?;

        debug!("Output module '{}' initialized", self.descriptor.id);
        self.module = Some(module);
        self.state = AdapterState::Active;
        Ok(())
    }

    /// Data hook, only when the payload matches the formatter's affinity
    pub fn data(&mut self, payload: DataPayload<'_>, dest: &mut Destination) -> Result<()> {
        if let Some(module) = self.module.as_mut()
            && module.accepts() == Some(payload.kind())
        {
            let bytes = module.convert_data(payload);
            dest.write(&bytes)?;
        }
        Ok(())
    }

    /// Event hook for a structural packet
    pub fn event(&mut self, event: FeedEvent, dest: &mut Destination) -> Result<()> {
        if let Some(module) = self.module.as_mut() {
            let bytes = module.handle_event(event);
            dest.write(&bytes)?;
        }
        Ok(())
    }

    /// Generic per-packet hook, for formatters that declare one
    pub fn offer(&mut self, packet: &Packet, dest: &mut Destination) -> Result<()> {
        if let Some(module) = self.module.as_mut()
            && module.receives_packets()
        {
            let bytes = module.receive(packet);
            dest.write(&bytes)?;
        }
        Ok(())
    }

    /// End: trailing bytes, cleanup, release
    ///
    /// Returns `false` when there was no live formatter (a duplicate End).
    pub fn finish(&mut self, dest: &mut Destination) -> Result<bool> {
        let Some(mut module) = self.module.take() else {
            debug!("No live output module to finalize");
            return Ok(false);
        };
        self.state = AdapterState::Finalized;

        let trailing = module.handle_event(FeedEvent::End);
        let written = dest.write(&trailing);
        module.cleanup();
        info!("Output module '{}' finalized", self.descriptor.id);
        written.map(|_| true)
    }
}

impl fmt::Debug for OutputAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputAdapter")
            .field("format", &self.descriptor.id)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::sink::{OutputTarget, SharedBuffer};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static CLEANUPS: AtomicUsize = AtomicUsize::new(0);

    struct Tagger;

    impl OutputFormat for Tagger {
        fn init(&mut self, ctx: &OutputContext) -> std::result::Result<(), String> {
            if ctx.options.contains_key("fail") {
                return Err("refused".to_string());
            }
            Ok(())
        }

        fn accepts(&self) -> Option<PacketKind> {
            Some(PacketKind::Logic)
        }

        fn convert_data(&mut self, payload: DataPayload<'_>) -> Vec<u8> {
            match payload {
                DataPayload::Logic { data, .. } => format!("L{} ", data.len()).into_bytes(),
                DataPayload::Analog { .. } => b"A ".to_vec(),
            }
        }

        fn handle_event(&mut self, event: FeedEvent) -> Vec<u8> {
            format!("{:?} ", event).into_bytes()
        }

        fn cleanup(&mut self) {
            CLEANUPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tagger() -> OutputDescriptor {
        OutputDescriptor {
            id: "tagger",
            description: "test formatter",
            factory: || Box::new(Tagger),
        }
    }

    fn open_buffer() -> (Destination, SharedBuffer) {
        let buffer = SharedBuffer::new();
        let mut dest = Destination::new(OutputTarget::Buffer(buffer.clone()));
        dest.open().unwrap();
        (dest, buffer)
    }

    #[test]
    fn test_lifecycle() {
        let (mut dest, buffer) = open_buffer();
        let mut adapter = OutputAdapter::new(tagger(), FormatOptions::new());
        assert_eq!(adapter.state(), AdapterState::Uninitialized);

        adapter.begin(vec![(0, "A".into())]).unwrap();
        assert!(adapter.is_active());

        adapter.event(FeedEvent::Trigger, &mut dest).unwrap();
        adapter
            .data(DataPayload::Logic { data: &[1, 2, 3], unit_size: 1 }, &mut dest)
            .unwrap();
        adapter
            .data(DataPayload::Analog { data: &[0.5], num_samples: 1 }, &mut dest)
            .unwrap();

        let before = CLEANUPS.load(Ordering::SeqCst);
        assert!(adapter.finish(&mut dest).unwrap());
        assert!(CLEANUPS.load(Ordering::SeqCst) > before);
        assert_eq!(adapter.state(), AdapterState::Finalized);

        assert_eq!(buffer.to_string_lossy(), "Trigger L3 End ");
    }

    #[test]
    fn test_duplicate_finish_is_ignored() {
        let (mut dest, buffer) = open_buffer();
        let mut adapter = OutputAdapter::new(tagger(), FormatOptions::new());
        adapter.begin(Vec::new()).unwrap();
        assert!(adapter.finish(&mut dest).unwrap());
        let len = buffer.len();

        assert!(!adapter.finish(&mut dest).unwrap());
        assert_eq!(buffer.len(), len);
        assert_eq!(adapter.state(), AdapterState::Finalized);
    }

    #[test]
    fn test_begin_while_active_is_violation() {
        let mut adapter = OutputAdapter::new(tagger(), FormatOptions::new());
        adapter.begin(Vec::new()).unwrap();
        assert!(matches!(
            adapter.begin(Vec::new()),
            Err(FeedError::ProtocolViolation(_))
        ));
        assert!(adapter.is_active());
    }

    #[test]
    fn test_init_failure() {
        let mut options = FormatOptions::new();
        options.insert("fail".into(), "1".into());
        let mut adapter = OutputAdapter::new(tagger(), options);
        assert!(matches!(
            adapter.begin(Vec::new()),
            Err(FeedError::OutputInit { .. })
        ));
        assert_eq!(adapter.state(), AdapterState::Uninitialized);
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = OutputRegistry::new();
        registry.register(tagger());
        assert_eq!(registry.get("tagger").unwrap().id, "tagger");
        assert!(matches!(
            registry.get("nope"),
            Err(FeedError::UnknownOutputFormat(_))
        ));
    }
}
