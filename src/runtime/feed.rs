//! The datafeed: a packet state machine routing one acquisition
//!
//! Every packet from a capture source passes through [`DataFeed::deliver`]:
//!
//! ```text
//! Header ─> MetaLogic ─> Logic* ─> End
//!              │            │
//!              │            ├─> CaptureStore   (persisting to a session file)
//!              │            ├─> DecoderStack   (decoders configured)
//!              │            └─> OutputAdapter  (otherwise)
//!              └─> lane layout, destination, decoder session
//! ```
//!
//! Counters survive across streams; the lane layout, the formatter and the
//! capture store are per stream.

use super::annotations::AnnotationEmitter;
use super::decoder::{DecoderRegistry, SessionParams};
use super::output::{AdapterState, DataPayload, FeedEvent, OutputAdapter, OutputRegistry};
use super::packet::{AnalogPayload, LogicPayload, Packet};
use super::probes::{EnabledLanes, ProbeSet};
use super::sink::{Destination, OutputTarget};
use super::stack::DecoderStack;
use super::transcode::Transcoder;
use crate::config::SessionConfig;
use crate::nodes::store::CaptureStore;
use crate::{FeedError, Result};
use std::borrow::Cow;
use std::path::PathBuf;
use tracing::{debug, info, trace, warn};

/// Receiver of a packet stream, one packet at a time
pub trait PacketSink {
    fn deliver(&mut self, packet: &Packet) -> Result<()>;
}

/// Session-wide counters. Zero limits mean unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub received_samples: u64,
    pub triggered: bool,
    pub limit_samples: u64,
    pub limit_frames: u64,
}

impl SessionCounters {
    pub fn new(limit_samples: u64, limit_frames: u64) -> Self {
        Self {
            limit_samples,
            limit_frames,
            ..Default::default()
        }
    }

    pub fn limit_reached(&self) -> bool {
        self.limit_samples > 0 && self.received_samples >= self.limit_samples
    }

    /// Samples still accepted, `None` when unlimited
    pub fn remaining(&self) -> Option<u64> {
        (self.limit_samples > 0).then(|| self.limit_samples.saturating_sub(self.received_samples))
    }

    pub fn add(&mut self, samples: u64) {
        self.received_samples = self.received_samples.saturating_add(samples);
    }
}

/// Non-fatal conditions reported at the end of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedWarning {
    /// The source delivered fewer samples than the limit asked for
    ShortCount { received: u64, requested: u64 },
    /// A continuous acquisition was stopped
    ContinuousStopped { received: u64 },
    /// Analog samples were discarded because session files hold logic only
    AnalogNotStored,
}

pub struct DataFeed {
    probes: ProbeSet,
    counters: SessionCounters,
    wait_trigger: bool,
    continuous: bool,
    output: OutputAdapter,
    destination: Destination,
    decoders: Option<DecoderStack>,
    emitter: AnnotationEmitter,
    store_path: Option<PathBuf>,
    store: Option<CaptureStore>,
    transcoder: Option<Transcoder>,
    source_unit_size: Option<usize>,
    sample_rate: u64,
    warnings: Vec<FeedWarning>,
}

impl DataFeed {
    /// Apply the probe selection and build the formatter and decoders.
    ///
    /// The destination follows the configuration: the output file, stdout,
    /// or nothing when samples are persisted to a session file.
    pub fn new(
        config: &SessionConfig,
        mut probes: ProbeSet,
        outputs: &OutputRegistry,
        decoders: &DecoderRegistry,
    ) -> Result<Self> {
        let enabled = probes.select(config.probes.as_deref())?;
        debug!("{} of {} probes enabled", enabled, probes.len());

        let spec = config.output_spec()?;
        let descriptor = *outputs.get(&spec.id)?;
        let output = OutputAdapter::new(descriptor, spec.options);

        let decoders = match config.decoders.as_deref() {
            Some(directives) => Some(DecoderStack::build(
                decoders,
                directives,
                config.decoder_stack.as_deref(),
                config.decoder_annotations.as_deref(),
                config.stacking,
            )?),
            None => None,
        };
        let visibility = decoders
            .as_ref()
            .map(|stack| stack.visibility().clone())
            .unwrap_or_default();

        let (target, store_path) = if config.persist_to_store() {
            (OutputTarget::Discard, config.output_file.clone())
        } else {
            match &config.output_file {
                Some(path) => (OutputTarget::File(path.clone()), None),
                None => (OutputTarget::Stdout, None),
            }
        };

        Ok(Self {
            probes,
            counters: SessionCounters::new(config.limit_samples, config.limit_frames),
            wait_trigger: config.wait_trigger,
            continuous: config.continuous,
            output,
            destination: Destination::new(target),
            decoders,
            emitter: AnnotationEmitter::new(visibility, config.loglevel),
            store_path,
            store: None,
            transcoder: None,
            source_unit_size: None,
            sample_rate: 0,
            warnings: Vec::new(),
        })
    }

    /// Send formatted output and annotations to `target` instead
    pub fn with_target(mut self, target: OutputTarget) -> Self {
        self.destination = Destination::new(target);
        self
    }

    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    pub fn warnings(&self) -> &[FeedWarning] {
        &self.warnings
    }

    pub fn output_state(&self) -> AdapterState {
        self.output.state()
    }

    pub fn probes(&self) -> &ProbeSet {
        &self.probes
    }

    /// Lane layout of the current stream, once MetaLogic was seen
    pub fn lanes(&self) -> Option<&EnabledLanes> {
        self.transcoder.as_ref().map(Transcoder::lanes)
    }

    pub fn decoders(&self) -> Option<&DecoderStack> {
        self.decoders.as_ref()
    }

    pub fn emitter(&self) -> &AnnotationEmitter {
        &self.emitter
    }

    /// Capture store of the current stream while persisting
    pub fn store(&self) -> Option<&CaptureStore> {
        self.store.as_ref()
    }

    fn enabled_probes(&self) -> Vec<(usize, String)> {
        self.probes
            .iter()
            .filter(|p| p.enabled)
            .map(|p| (p.index, p.name.clone()))
            .collect()
    }

    /// Names of the packed lanes, in packed order
    fn lane_names(&self, lanes: &EnabledLanes) -> Vec<String> {
        lanes
            .as_slice()
            .iter()
            .filter_map(|&index| self.probes.get(index))
            .map(|probe| probe.name.clone())
            .collect()
    }

    fn on_header(&mut self) -> Result<()> {
        self.output.begin(self.enabled_probes())?;
        self.transcoder = None;
        self.source_unit_size = None;
        self.store = None;
        info!("Stream started, output format '{}'", self.output.format_id());
        Ok(())
    }

    fn on_end(&mut self) -> Result<()> {
        self.output.finish(&mut self.destination)?;

        if let Some(store) = self.store.take()
            && let Some(path) = &self.store_path
        {
            let names = self.lanes().map(|lanes| self.lane_names(lanes)).unwrap_or_default();
            store.save(path, &names, self.sample_rate)?;
            info!("Saved {} samples to {:?}", store.samples(), path);
        }
        self.destination.close()?;

        let counters = self.counters;
        if counters.limit_samples > 0 && counters.received_samples < counters.limit_samples {
            warn!(
                "Source only sent {} of {} requested samples",
                counters.received_samples, counters.limit_samples
            );
            self.warnings.push(FeedWarning::ShortCount {
                received: counters.received_samples,
                requested: counters.limit_samples,
            });
        }
        if self.continuous {
            warn!("Source stopped after {} samples", counters.received_samples);
            self.warnings.push(FeedWarning::ContinuousStopped {
                received: counters.received_samples,
            });
        }
        info!("Stream ended after {} samples", counters.received_samples);
        Ok(())
    }

    fn on_meta_logic(&mut self, probe_count: usize, sample_rate: u64) -> Result<()> {
        self.sample_rate = sample_rate;
        if self.transcoder.is_some() {
            debug!("Lane layout already set for this stream");
            return self.destination.open();
        }

        let lanes = self.probes.enabled_lanes(probe_count);
        if lanes.is_empty() {
            return Err(FeedError::InvalidSelection(format!(
                "none of the enabled probes exist in a stream of {} probes",
                probe_count
            )));
        }
        let unit_size = lanes.unit_size();
        info!(
            "Logic stream: {} probes at {} Hz, enabled lanes {}, unit size {}",
            probe_count, sample_rate, lanes, unit_size
        );

        self.destination.open()?;
        if self.store_path.is_some() {
            self.store = Some(CaptureStore::create(unit_size)?);
        }
        if let Some(decoders) = self.decoders.as_mut() {
            decoders.start_session(SessionParams {
                lane_count: lanes.len(),
                unit_size,
                sample_rate,
            })?;
        }
        self.transcoder = Some(Transcoder::new(lanes));
        Ok(())
    }

    /// Returns the part of `payload` that was consumed, if any
    fn on_logic<'p>(&mut self, payload: &'p LogicPayload) -> Result<Option<Cow<'p, LogicPayload>>> {
        if payload.length() == 0 {
            return Ok(None);
        }
        if self.wait_trigger && !self.counters.triggered {
            trace!("Logic packet before trigger dropped");
            return Ok(None);
        }
        if self.counters.limit_reached() {
            trace!("Sample limit reached, logic packet dropped");
            return Ok(None);
        }
        let Some(transcoder) = self.transcoder.as_ref() else {
            warn!("Logic packet before logic header ignored");
            return Ok(None);
        };

        match self.source_unit_size {
            Some(unit_size) if unit_size != payload.unit_size => {
                return Err(FeedError::ProtocolViolation(format!(
                    "logic unit size changed from {} to {} within a stream",
                    unit_size, payload.unit_size
                )));
            }
            Some(_) => {}
            None => self.source_unit_size = Some(payload.unit_size),
        }

        let packed = transcoder.transcode(payload, self.counters.remaining())?;
        if packed.samples == 0 {
            return Ok(None);
        }
        if packed.dropped > 0 {
            debug!(
                "Sample limit of {} reached, {} samples dropped",
                self.counters.limit_samples, packed.dropped
            );
        }

        let offset = self.counters.received_samples;
        if let Some(store) = self.store.as_mut() {
            store.append(&packed.data, packed.samples, transcoder.lanes())?;
        } else if let Some(decoders) = self.decoders.as_mut() {
            let emitter = &mut self.emitter;
            let destination = &mut self.destination;
            decoders.feed_samples(offset, &packed.data, &mut |event| {
                emitter.emit(event, destination).map(|_| ())
            })?;
        } else {
            self.output.data(
                DataPayload::Logic {
                    data: &packed.data,
                    unit_size: transcoder.unit_size(),
                },
                &mut self.destination,
            )?;
        }
        self.counters.add(packed.samples);

        if packed.dropped == 0 {
            Ok(Some(Cow::Borrowed(payload)))
        } else {
            let consumed = packed.samples as usize * payload.unit_size;
            Ok(Some(Cow::Owned(LogicPayload::new(
                payload.data[..consumed].to_vec(),
                payload.unit_size,
            ))))
        }
    }

    fn on_analog(&mut self, payload: &AnalogPayload) -> Result<bool> {
        if payload.num_samples == 0 || self.counters.limit_reached() {
            return Ok(false);
        }
        self.output.data(
            DataPayload::Analog {
                data: &payload.data,
                num_samples: payload.num_samples,
            },
            &mut self.destination,
        )?;
        self.counters.add(payload.num_samples as u64);
        Ok(true)
    }
}

impl PacketSink for DataFeed {
    fn deliver(&mut self, packet: &Packet) -> Result<()> {
        trace!("Received {}", packet);

        if !self.output.is_active() && !matches!(packet, Packet::Header) {
            if matches!(packet, Packet::End) && self.output.state() == AdapterState::Finalized {
                warn!("Duplicate end of stream ignored");
            } else {
                debug!("Ignoring {} outside of a stream", packet);
            }
            return Ok(());
        }

        let offered: Option<Cow<'_, Packet>> = match packet {
            Packet::Header => {
                self.on_header()?;
                Some(Cow::Borrowed(packet))
            }
            Packet::End => {
                self.on_end()?;
                None
            }
            Packet::Trigger => {
                self.counters.triggered = true;
                debug!("Trigger at sample {}", self.counters.received_samples);
                self.output.event(FeedEvent::Trigger, &mut self.destination)?;
                Some(Cow::Borrowed(packet))
            }
            Packet::MetaLogic {
                probe_count,
                sample_rate,
            } => {
                self.on_meta_logic(*probe_count, *sample_rate)?;
                Some(Cow::Borrowed(packet))
            }
            Packet::Logic(payload) => match self.on_logic(payload)? {
                Some(Cow::Borrowed(_)) => Some(Cow::Borrowed(packet)),
                Some(Cow::Owned(truncated)) => Some(Cow::Owned(Packet::Logic(truncated))),
                None => None,
            },
            Packet::MetaAnalog { probe_count } => {
                info!("Analog stream: {} probes", probe_count);
                if self.store_path.is_some() && !self.warnings.contains(&FeedWarning::AnalogNotStored) {
                    warn!("Session files hold logic samples only, analog samples are discarded");
                    self.warnings.push(FeedWarning::AnalogNotStored);
                }
                self.destination.open()?;
                Some(Cow::Borrowed(packet))
            }
            Packet::Analog(payload) => self.on_analog(payload)?.then_some(Cow::Borrowed(packet)),
            Packet::FrameBegin => {
                self.output.event(FeedEvent::FrameBegin, &mut self.destination)?;
                Some(Cow::Borrowed(packet))
            }
            Packet::FrameEnd => {
                self.output.event(FeedEvent::FrameEnd, &mut self.destination)?;
                Some(Cow::Borrowed(packet))
            }
            Packet::Unknown(tag) => {
                warn!("Ignoring unknown packet type {}", tag);
                Some(Cow::Borrowed(packet))
            }
        };

        if let Some(packet) = offered {
            self.output.offer(&packet, &mut self.destination)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for DataFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFeed")
            .field("counters", &self.counters)
            .field("output", &self.output)
            .field("destination", &self.destination)
            .field("decoders", &self.decoders)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::SessionFileSource;
    use crate::runtime::decoder::{
        AnnotationClass, DataKind, DecoderConfig, DecoderDescriptor, DecoderOutput, ProbeSpec,
        ProtocolDecoder,
    };
    use crate::runtime::errors::{DecodeError, DecodeResult};
    use crate::runtime::output::{OutputContext, OutputDescriptor, OutputFormat};
    use crate::runtime::packet::PacketKind;
    use crate::runtime::sink::SharedBuffer;

    /// Writes packed logic bytes verbatim and tags events
    struct Raw;

    impl OutputFormat for Raw {
        fn init(&mut self, _ctx: &OutputContext) -> std::result::Result<(), String> {
            Ok(())
        }

        fn accepts(&self) -> Option<PacketKind> {
            Some(PacketKind::Logic)
        }

        fn convert_data(&mut self, payload: DataPayload<'_>) -> Vec<u8> {
            match payload {
                DataPayload::Logic { data, .. } => data.to_vec(),
                DataPayload::Analog { .. } => Vec::new(),
            }
        }

        fn handle_event(&mut self, event: FeedEvent) -> Vec<u8> {
            match event {
                FeedEvent::Trigger => b"T".to_vec(),
                FeedEvent::FrameBegin => b"<".to_vec(),
                FeedEvent::FrameEnd => b">".to_vec(),
                _ => Vec::new(),
            }
        }
    }

    /// Only sees packets through the generic hook
    struct Lengths;

    impl OutputFormat for Lengths {
        fn init(&mut self, _ctx: &OutputContext) -> std::result::Result<(), String> {
            Ok(())
        }

        fn receives_packets(&self) -> bool {
            true
        }

        fn receive(&mut self, packet: &Packet) -> Vec<u8> {
            match packet {
                Packet::Logic(payload) => format!("[{}]", payload.length()).into_bytes(),
                Packet::Unknown(tag) => format!("?{}", tag).into_bytes(),
                _ => Vec::new(),
            }
        }
    }

    fn registry() -> OutputRegistry {
        let mut registry = OutputRegistry::new();
        registry.register(OutputDescriptor {
            id: "raw",
            description: "packed bytes",
            factory: || Box::new(Raw),
        });
        registry.register(OutputDescriptor {
            id: "lengths",
            description: "payload lengths",
            factory: || Box::new(Lengths),
        });
        registry
    }

    fn feed(config: SessionConfig, probes: ProbeSet) -> (DataFeed, SharedBuffer) {
        let buffer = SharedBuffer::new();
        let feed = DataFeed::new(&config, probes, &registry(), &DecoderRegistry::new())
            .unwrap()
            .with_target(OutputTarget::Buffer(buffer.clone()));
        (feed, buffer)
    }

    fn raw_config() -> SessionConfig {
        SessionConfig {
            output_format: Some("raw".into()),
            ..Default::default()
        }
    }

    fn meta(probe_count: usize) -> Packet {
        Packet::MetaLogic {
            probe_count,
            sample_rate: 1_000_000,
        }
    }

    #[test]
    fn test_selected_lanes_are_packed() {
        let config = SessionConfig {
            probes: Some("A,C".into()),
            ..raw_config()
        };
        let (mut feed, buffer) = feed(config, ProbeSet::new(["A", "B", "C"]));

        feed.deliver(&Packet::Header).unwrap();
        feed.deliver(&meta(3)).unwrap();
        assert_eq!(feed.lanes().unwrap().as_slice(), &[0, 2]);
        feed.deliver(&Packet::logic(vec![0b101; 4], 1)).unwrap();
        feed.deliver(&Packet::End).unwrap();

        assert_eq!(buffer.contents(), vec![3, 3, 3, 3]);
        assert_eq!(feed.counters().received_samples, 4);
    }

    #[test]
    fn test_limit_truncates_and_drops() {
        let config = SessionConfig {
            limit_samples: 10,
            ..raw_config()
        };
        let (mut feed, buffer) = feed(config, ProbeSet::numbered(8));

        feed.deliver(&Packet::Header).unwrap();
        feed.deliver(&meta(8)).unwrap();
        feed.deliver(&Packet::logic((0..15).collect(), 1)).unwrap();
        assert_eq!(feed.counters().received_samples, 10);
        assert!(feed.counters().limit_reached());

        feed.deliver(&Packet::logic(vec![0xff; 4], 1)).unwrap();
        feed.deliver(&Packet::End).unwrap();

        assert_eq!(buffer.contents(), (0..10).collect::<Vec<u8>>());
        assert_eq!(feed.counters().received_samples, 10);
        assert!(feed.warnings().is_empty());
    }

    #[test]
    fn test_generic_hook_sees_consumed_part_only() {
        let config = SessionConfig {
            limit_samples: 6,
            output_format: Some("lengths".into()),
            ..Default::default()
        };
        let (mut feed, buffer) = feed(config, ProbeSet::numbered(16));

        feed.deliver(&Packet::Header).unwrap();
        feed.deliver(&meta(16)).unwrap();
        feed.deliver(&Packet::logic(vec![0; 8], 2)).unwrap();
        feed.deliver(&Packet::logic(vec![0; 8], 2)).unwrap();
        feed.deliver(&Packet::logic(vec![0; 8], 2)).unwrap();
        feed.deliver(&Packet::End).unwrap();

        assert_eq!(buffer.to_string_lossy(), "[8][4]");
    }

    #[test]
    fn test_packets_before_header_are_ignored() {
        let (mut feed, buffer) = feed(raw_config(), ProbeSet::numbered(8));

        feed.deliver(&meta(8)).unwrap();
        feed.deliver(&Packet::logic(vec![1, 2, 3], 1)).unwrap();
        feed.deliver(&Packet::End).unwrap();

        assert_eq!(feed.output_state(), AdapterState::Uninitialized);
        assert_eq!(feed.counters().received_samples, 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_duplicate_end_is_idempotent() {
        let (mut feed, buffer) = feed(raw_config(), ProbeSet::numbered(8));

        feed.deliver(&Packet::Header).unwrap();
        feed.deliver(&meta(8)).unwrap();
        feed.deliver(&Packet::logic(vec![7; 2], 1)).unwrap();
        feed.deliver(&Packet::End).unwrap();
        let written = buffer.len();

        feed.deliver(&Packet::End).unwrap();
        assert_eq!(buffer.len(), written);
        assert_eq!(feed.output_state(), AdapterState::Finalized);
    }

    #[test]
    fn test_second_header_is_violation() {
        let (mut feed, _buffer) = feed(raw_config(), ProbeSet::numbered(8));

        feed.deliver(&Packet::Header).unwrap();
        assert!(matches!(
            feed.deliver(&Packet::Header),
            Err(FeedError::ProtocolViolation(_))
        ));
        assert_eq!(feed.output_state(), AdapterState::Active);
    }

    #[test]
    fn test_new_stream_after_end() {
        let (mut feed, buffer) = feed(raw_config(), ProbeSet::numbered(8));

        for value in [1u8, 2] {
            feed.deliver(&Packet::Header).unwrap();
            feed.deliver(&meta(8)).unwrap();
            feed.deliver(&Packet::logic(vec![value], 1)).unwrap();
            feed.deliver(&Packet::End).unwrap();
        }

        assert_eq!(buffer.contents(), vec![1, 2]);
        assert_eq!(feed.counters().received_samples, 2);
    }

    #[test]
    fn test_wait_for_trigger() {
        let config = SessionConfig {
            wait_trigger: true,
            ..raw_config()
        };
        let (mut feed, buffer) = feed(config, ProbeSet::numbered(8));

        feed.deliver(&Packet::Header).unwrap();
        feed.deliver(&meta(8)).unwrap();
        feed.deliver(&Packet::logic(vec![9, 9], 1)).unwrap();
        assert_eq!(feed.counters().received_samples, 0);

        feed.deliver(&Packet::Trigger).unwrap();
        feed.deliver(&Packet::logic(vec![5], 1)).unwrap();
        feed.deliver(&Packet::End).unwrap();

        assert_eq!(buffer.contents(), b"T\x05".to_vec());
        assert!(feed.counters().triggered);
    }

    #[test]
    fn test_short_count_and_continuous_warnings() {
        let config = SessionConfig {
            limit_samples: 100,
            continuous: true,
            ..raw_config()
        };
        let (mut feed, _buffer) = feed(config, ProbeSet::numbered(8));

        feed.deliver(&Packet::Header).unwrap();
        feed.deliver(&meta(8)).unwrap();
        feed.deliver(&Packet::logic(vec![0; 40], 1)).unwrap();
        feed.deliver(&Packet::End).unwrap();

        assert_eq!(
            feed.warnings(),
            &[
                FeedWarning::ShortCount {
                    received: 40,
                    requested: 100
                },
                FeedWarning::ContinuousStopped { received: 40 },
            ]
        );
    }

    #[test]
    fn test_unit_size_change_is_violation() {
        let (mut feed, _buffer) = feed(raw_config(), ProbeSet::numbered(8));

        feed.deliver(&Packet::Header).unwrap();
        feed.deliver(&meta(8)).unwrap();
        feed.deliver(&Packet::logic(vec![0; 4], 1)).unwrap();
        assert!(matches!(
            feed.deliver(&Packet::logic(vec![0; 4], 2)),
            Err(FeedError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_logic_before_meta_and_partial_tail() {
        let (mut feed, buffer) = feed(raw_config(), ProbeSet::numbered(12));

        feed.deliver(&Packet::Header).unwrap();
        feed.deliver(&Packet::logic(vec![1, 1], 2)).unwrap();
        assert_eq!(feed.counters().received_samples, 0);

        feed.deliver(&meta(12)).unwrap();
        // One whole 2-byte sample plus a dangling byte
        feed.deliver(&Packet::logic(vec![0x34, 0x02, 0xff], 2)).unwrap();
        feed.deliver(&Packet::End).unwrap();

        assert_eq!(buffer.contents(), vec![0x34, 0x02]);
        assert_eq!(feed.counters().received_samples, 1);
    }

    #[test]
    fn test_analog_counts_samples() {
        let (mut feed, _buffer) = feed(raw_config(), ProbeSet::numbered(2));

        feed.deliver(&Packet::Header).unwrap();
        feed.deliver(&Packet::MetaAnalog { probe_count: 2 }).unwrap();
        feed.deliver(&Packet::analog(vec![0.0, 1.0, 0.5, 0.25], 2)).unwrap();
        feed.deliver(&Packet::analog(Vec::new(), 0)).unwrap();
        feed.deliver(&Packet::End).unwrap();

        assert_eq!(feed.counters().received_samples, 2);
    }

    #[test]
    fn test_unknown_output_format() {
        let config = SessionConfig {
            output_format: Some("nope".into()),
            ..Default::default()
        };
        let result = DataFeed::new(
            &config,
            ProbeSet::numbered(4),
            &registry(),
            &DecoderRegistry::new(),
        );
        assert!(matches!(result, Err(FeedError::UnknownOutputFormat(_))));
    }

    /// Fails on every block of samples
    struct Broken;

    impl ProtocolDecoder for Broken {
        fn start(&mut self, _params: &SessionParams) -> DecodeResult {
            Ok(())
        }

        fn decode(
            &mut self,
            _offset: u64,
            _packed: &[u8],
            _unit_size: usize,
            _out: &mut Vec<DecoderOutput>,
        ) -> DecodeResult {
            Err(DecodeError::Failed("framing error".into()))
        }
    }

    const BROKEN: DecoderDescriptor = DecoderDescriptor {
        id: "broken",
        name: "Broken",
        description: "always fails",
        required_probes: &[ProbeSpec {
            id: "d",
            description: "data",
        }],
        optional_probes: &[],
        options: &[],
        annotations: &[AnnotationClass {
            id: "x",
            description: "unused",
        }],
        input: DataKind::Logic,
        output: None,
        factory: broken,
    };

    fn broken(_config: &DecoderConfig) -> DecodeResult<Box<dyn ProtocolDecoder>> {
        Ok(Box::new(Broken))
    }

    fn persisting_feed(path: &std::path::Path, probes: ProbeSet) -> DataFeed {
        let config = SessionConfig {
            output_file: Some(path.to_path_buf()),
            ..Default::default()
        };
        DataFeed::new(
            &config,
            probes,
            &OutputRegistry::builtin(),
            &DecoderRegistry::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_frames_forwarded_without_counting() {
        let (mut feed, buffer) = feed(raw_config(), ProbeSet::numbered(8));

        feed.deliver(&Packet::Header).unwrap();
        feed.deliver(&meta(8)).unwrap();
        feed.deliver(&Packet::FrameBegin).unwrap();
        assert_eq!(feed.counters().received_samples, 0);
        feed.deliver(&Packet::logic(vec![1, 2], 1)).unwrap();
        feed.deliver(&Packet::FrameEnd).unwrap();
        feed.deliver(&Packet::End).unwrap();

        assert_eq!(buffer.contents(), b"<\x01\x02>".to_vec());
        assert_eq!(feed.counters().received_samples, 2);
        assert!(!feed.counters().triggered);
    }

    #[test]
    fn test_unknown_packet_offered_to_generic_hook() {
        let config = SessionConfig {
            output_format: Some("lengths".into()),
            ..Default::default()
        };
        let (mut feed, buffer) = feed(config, ProbeSet::numbered(8));

        feed.deliver(&Packet::Header).unwrap();
        feed.deliver(&meta(8)).unwrap();
        feed.deliver(&Packet::Unknown(42)).unwrap();
        feed.deliver(&Packet::logic(vec![0; 3], 1)).unwrap();
        feed.deliver(&Packet::End).unwrap();

        assert_eq!(buffer.to_string_lossy(), "?42[3]");
        assert_eq!(feed.counters().received_samples, 3);
        assert_eq!(feed.output_state(), AdapterState::Finalized);
    }

    #[test]
    fn test_decoder_failure_aborts_delivery() {
        let mut decoders = DecoderRegistry::new();
        decoders.register(BROKEN);
        let config = SessionConfig {
            decoders: Some("broken:d=0".into()),
            ..raw_config()
        };
        let mut feed = DataFeed::new(&config, ProbeSet::numbered(8), &registry(), &decoders)
            .unwrap()
            .with_target(OutputTarget::Buffer(SharedBuffer::new()));

        feed.deliver(&Packet::Header).unwrap();
        feed.deliver(&meta(8)).unwrap();
        let result = feed.deliver(&Packet::logic(vec![0xff; 4], 1));
        match result {
            Err(FeedError::DecoderFeed { instance, source }) => {
                assert_eq!(instance, "broken");
                assert_eq!(source, DecodeError::Failed("framing error".into()));
            }
            other => panic!("expected a decoder failure, got {:?}", other),
        }
        assert_eq!(feed.counters().received_samples, 0);
    }

    #[test]
    fn test_narrow_source_sample_reads_missing_lanes_as_zero() {
        let (mut feed, buffer) = feed(raw_config(), ProbeSet::numbered(16));

        feed.deliver(&Packet::Header).unwrap();
        feed.deliver(&meta(16)).unwrap();
        feed.deliver(&Packet::logic(vec![0xff; 4], 1)).unwrap();
        feed.deliver(&Packet::End).unwrap();

        assert_eq!(buffer.contents(), vec![0xff, 0x00, 0xff, 0x00, 0xff, 0x00, 0xff, 0x00]);
        assert_eq!(feed.counters().received_samples, 4);
    }

    #[test]
    fn test_store_names_follow_announced_probes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.sr");
        let mut feed = persisting_feed(&path, ProbeSet::numbered(16));

        feed.deliver(&Packet::Header).unwrap();
        feed.deliver(&meta(8)).unwrap();
        feed.deliver(&Packet::logic(vec![1, 2, 3], 1)).unwrap();
        feed.deliver(&Packet::End).unwrap();

        let source = SessionFileSource::open(&path).unwrap();
        let names: Vec<String> = (0..8).map(|i| i.to_string()).collect();
        assert_eq!(source.header().probe_names, names);
        assert_eq!(source.header().total_samples, 3);
    }

    #[test]
    fn test_analog_while_persisting_warns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.sr");
        let mut feed = persisting_feed(&path, ProbeSet::numbered(2));

        feed.deliver(&Packet::Header).unwrap();
        feed.deliver(&Packet::MetaAnalog { probe_count: 2 }).unwrap();
        feed.deliver(&Packet::analog(vec![0.5, 1.5], 2)).unwrap();
        feed.deliver(&Packet::End).unwrap();

        assert_eq!(feed.warnings(), &[FeedWarning::AnalogNotStored]);
        assert!(!path.exists());
    }

    #[test]
    fn test_held_bytes_do_not_leak_into_next_stream() {
        let (mut feed, buffer) = feed(raw_config(), ProbeSet::numbered(8));

        // Trigger output is held while no logic header has opened the target
        feed.deliver(&Packet::Header).unwrap();
        feed.deliver(&Packet::Trigger).unwrap();
        feed.deliver(&Packet::End).unwrap();

        feed.deliver(&Packet::Header).unwrap();
        feed.deliver(&meta(8)).unwrap();
        feed.deliver(&Packet::logic(vec![5], 1)).unwrap();
        feed.deliver(&Packet::End).unwrap();

        assert_eq!(buffer.contents(), vec![5]);
    }

    #[test]
    fn test_counters() {
        let mut counters = SessionCounters::new(10, 0);
        assert_eq!(counters.remaining(), Some(10));
        counters.add(4);
        assert_eq!(counters.remaining(), Some(6));
        counters.add(6);
        assert!(counters.limit_reached());

        let unlimited = SessionCounters::default();
        assert_eq!(unlimited.remaining(), None);
        assert!(!unlimited.limit_reached());
    }
}
