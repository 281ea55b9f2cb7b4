//! End-to-end scenarios through the built-in formats, decoders and sources

use datafeed::nodes::{DemoSource, SessionFileSource};
use datafeed::runtime::source::prepare_source;
use datafeed::{
    CaptureSource, DataFeed, DecoderRegistry, FeedError, FeedWarning, OutputRegistry, OutputTarget,
    Packet, PacketSink, ProbeSet, Runner, SessionConfig, SharedBuffer, StackingPolicy,
};
use proptest::prelude::*;

fn feed(config: &SessionConfig, probes: ProbeSet) -> (DataFeed, SharedBuffer) {
    let buffer = SharedBuffer::new();
    let feed = DataFeed::new(
        config,
        probes,
        &OutputRegistry::builtin(),
        &DecoderRegistry::builtin(),
    )
    .unwrap()
    .with_target(OutputTarget::Buffer(buffer.clone()));
    (feed, buffer)
}

fn meta(probe_count: usize) -> Packet {
    Packet::MetaLogic {
        probe_count,
        sample_rate: 1_000_000,
    }
}

fn deliver_all(feed: &mut DataFeed, packets: &[Packet]) {
    for packet in packets {
        feed.deliver(packet).unwrap();
    }
}

fn format(id: &str) -> SessionConfig {
    SessionConfig {
        output_format: Some(id.into()),
        ..Default::default()
    }
}

/// Two SPI words clocked together: sck on probe 3, `first` on probe 4 and
/// `second` on probe 5, MSB first, two samples per bit
fn spi_pair(first: &[u8], second: &[u8]) -> Vec<u8> {
    let mut samples = Vec::new();
    for (a, b) in first.iter().zip(second) {
        for bit in (0..8).rev() {
            let data = (((a >> bit) & 1) << 4) | (((b >> bit) & 1) << 5);
            samples.push(data);
            samples.push(data | (1 << 3));
        }
    }
    samples
}

#[test]
fn test_selected_probes_are_packed() {
    let config = SessionConfig {
        probes: Some("A,C".into()),
        ..format("binary")
    };
    let (mut feed, buffer) = feed(&config, ProbeSet::new(["A", "B", "C"]));

    deliver_all(
        &mut feed,
        &[
            Packet::Header,
            meta(3),
            Packet::logic(vec![0b101; 4], 1),
            Packet::End,
        ],
    );

    assert_eq!(buffer.contents(), vec![0b11; 4]);
    assert_eq!(feed.counters().received_samples, 4);
}

#[test]
fn test_bits_rows_for_selected_probes() {
    let config = SessionConfig {
        probes: Some("A,C".into()),
        ..format("bits")
    };
    let (mut feed, buffer) = feed(&config, ProbeSet::new(["A", "B", "C"]));

    deliver_all(
        &mut feed,
        &[
            Packet::Header,
            meta(3),
            Packet::logic(vec![0b001, 0b100, 0b101, 0b010], 1),
            Packet::End,
        ],
    );

    assert_eq!(buffer.to_string_lossy(), "A:1010\nC:0110\n");
}

#[test]
fn test_limit_truncates_over_delivery() {
    let config = SessionConfig {
        limit_samples: 10,
        ..format("binary")
    };
    let (mut feed, buffer) = feed(&config, ProbeSet::numbered(8));

    deliver_all(
        &mut feed,
        &[
            Packet::Header,
            meta(8),
            Packet::logic((0..15).collect(), 1),
            Packet::logic(vec![0xEE; 8], 1),
            Packet::End,
        ],
    );

    assert_eq!(buffer.contents(), (0..10).collect::<Vec<u8>>());
    assert_eq!(feed.counters().received_samples, 10);
}

#[test]
fn test_duplicate_end_is_ignored() {
    let (mut feed, buffer) = feed(&format("binary"), ProbeSet::numbered(8));

    deliver_all(
        &mut feed,
        &[
            Packet::Header,
            meta(8),
            Packet::logic(vec![1, 2, 3], 1),
            Packet::End,
        ],
    );
    let after_first_end = buffer.contents();

    feed.deliver(&Packet::End).unwrap();
    assert_eq!(buffer.contents(), after_first_end);
}

#[test]
fn test_header_while_active_is_a_violation() {
    let (mut feed, _buffer) = feed(&format("binary"), ProbeSet::numbered(8));

    feed.deliver(&Packet::Header).unwrap();
    let err = feed.deliver(&Packet::Header).unwrap_err();
    assert!(matches!(err, FeedError::ProtocolViolation(_)));
}

#[test]
fn test_two_spi_decoders_chained_by_default() {
    let config = SessionConfig {
        decoders: Some("spi:sck=3:sdata=4,spi:sck=3:sdata=5".into()),
        ..Default::default()
    };
    let (mut feed, buffer) = feed(&config, ProbeSet::numbered(8));

    let stack = feed.decoders().unwrap();
    assert_eq!(stack.instance_ids(), vec!["spi", "spi.2"]);
    let spi = stack.find("spi").unwrap();
    assert_eq!(stack.feeds(spi), stack.find("spi.2"));
    assert!(!stack.visibility().contains("spi"));
    assert!(stack.visibility().contains("spi.2"));

    deliver_all(
        &mut feed,
        &[
            Packet::Header,
            meta(8),
            Packet::logic(spi_pair(b"A", b"B"), 1),
            Packet::End,
        ],
    );

    // spi.2 only sees words from below and renders nothing for them
    assert_eq!(buffer.to_string_lossy(), "");
}

#[test]
fn test_two_spi_decoders_independent() {
    let config = SessionConfig {
        decoders: Some("spi:sck=3:sdata=4,spi:sck=3:sdata=5".into()),
        stacking: StackingPolicy::Independent,
        ..Default::default()
    };
    let (mut feed, buffer) = feed(&config, ProbeSet::numbered(8));

    let stack = feed.decoders().unwrap();
    assert!(stack.visibility().contains("spi"));
    assert!(stack.visibility().contains("spi.2"));

    deliver_all(
        &mut feed,
        &[
            Packet::Header,
            meta(8),
            Packet::logic(spi_pair(b"A", b"B"), 1),
            Packet::End,
        ],
    );

    assert_eq!(
        buffer.to_string_lossy(),
        "spi: \"Data: 0x41\" \"0x41\"\n\
         spi: \"65\"\n\
         spi: \"Data: 0x42\" \"0x42\"\n\
         spi: \"66\"\n"
    );
}

#[test]
fn test_stacked_annotations_keep_production_order() {
    let config = SessionConfig {
        decoders: Some("spi:sck=3:sdata=4,ascii".into()),
        decoder_annotations: Some("spi=hex,ascii".into()),
        ..Default::default()
    };
    let (mut feed, buffer) = feed(&config, ProbeSet::numbered(8));

    deliver_all(
        &mut feed,
        &[
            Packet::Header,
            meta(8),
            Packet::logic(spi_pair(b"Hi", b"\0\0"), 1),
            Packet::End,
        ],
    );

    assert_eq!(
        buffer.to_string_lossy(),
        "spi: \"Data: 0x48\" \"0x48\"\n\
         ascii: \"H\"\n\
         spi: \"Data: 0x69\" \"0x69\"\n\
         ascii: \"i\"\n"
    );
}

#[test]
fn test_annotation_ranges_with_verbose_loglevel() {
    let config = SessionConfig {
        decoders: Some("spi:sck=3:sdata=4".into()),
        decoder_annotations: Some("spi=dec".into()),
        loglevel: 3,
        ..Default::default()
    };
    let (mut feed, buffer) = feed(&config, ProbeSet::numbered(8));

    deliver_all(
        &mut feed,
        &[
            Packet::Header,
            meta(8),
            Packet::logic(spi_pair(b"A", b"\0"), 1),
            Packet::End,
        ],
    );

    assert_eq!(buffer.to_string_lossy(), "1-15 spi: \"65\"\n");
}

#[test]
fn test_unknown_decoder_and_instance() {
    let registries = (OutputRegistry::builtin(), DecoderRegistry::builtin());

    let config = SessionConfig {
        decoders: Some("uart:rx=0".into()),
        ..Default::default()
    };
    let err = DataFeed::new(&config, ProbeSet::numbered(8), &registries.0, &registries.1).unwrap_err();
    assert!(matches!(err, FeedError::DecoderNotFound(id) if id == "uart"));

    let config = SessionConfig {
        decoders: Some("spi:sck=0:sdata=1".into()),
        decoder_annotations: Some("i2c".into()),
        ..Default::default()
    };
    let err = DataFeed::new(&config, ProbeSet::numbered(8), &registries.0, &registries.1).unwrap_err();
    assert!(matches!(err, FeedError::InstanceNotFound(_)));
}

#[test]
fn test_store_save_and_replay() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.sr");

    let config = SessionConfig {
        probes: Some("0,2".into()),
        output_file: Some(path.clone()),
        ..Default::default()
    };
    let (mut feed, buffer) = feed(&config, ProbeSet::numbered(8));
    let samples: Vec<u8> = (0..16).collect();
    deliver_all(
        &mut feed,
        &[
            Packet::Header,
            meta(8),
            Packet::logic(samples[..10].to_vec(), 1),
            Packet::logic(samples[10..].to_vec(), 1),
            Packet::End,
        ],
    );
    assert!(buffer.is_empty());

    let source = SessionFileSource::open(&path).unwrap();
    assert_eq!(source.header().total_samples, 16);
    assert_eq!(source.header().probe_names, vec!["0", "2"]);
    assert_eq!(source.sample_rate(), 1_000_000);

    let (mut replay, replayed) = feed_for_replay(&source);
    Runner::new().run(source, &mut replay).unwrap();

    let expected: Vec<u8> = samples.iter().map(|&v| (v & 1) | (((v >> 2) & 1) << 1)).collect();
    assert_eq!(replayed.contents(), expected);
}

fn feed_for_replay(source: &SessionFileSource) -> (DataFeed, SharedBuffer) {
    feed(&format("binary"), source.probes())
}

#[test]
fn test_demo_over_delivery_is_cut_at_the_limit() {
    let mut config = SessionConfig {
        limit_samples: 20,
        ..format("binary")
    };
    let mut source = DemoSource::new(8, 1_000_000).with_chunk_samples(16);
    prepare_source(&mut config, &mut source).unwrap();

    let (mut feed, buffer) = feed(&config, source.probes());
    let summary = Runner::new().run(source, &mut feed).unwrap();

    assert!(!summary.stopped);
    assert_eq!(buffer.contents(), (0..20).collect::<Vec<u8>>());
    assert_eq!(feed.counters().received_samples, 20);
    assert!(feed.warnings().is_empty());
}

#[test]
fn test_demo_time_limit_becomes_samples() {
    let mut config = SessionConfig {
        limit_time_ms: 2,
        ..format("binary")
    };
    let mut source = DemoSource::new(4, 10_000).with_chunk_samples(8);
    prepare_source(&mut config, &mut source).unwrap();

    let (mut feed, buffer) = feed(&config, source.probes());
    Runner::new().run(source, &mut feed).unwrap();

    // 10 kHz for 2 ms, generated in whole chunks of 8
    assert_eq!(buffer.len(), 24);
}

#[test]
fn test_demo_wait_trigger() {
    let mut config = SessionConfig {
        limit_samples: 16,
        wait_trigger: true,
        ..format("binary")
    };
    let mut source = DemoSource::new(8, 1_000_000)
        .with_chunk_samples(4)
        .with_trigger_at(8);
    prepare_source(&mut config, &mut source).unwrap();

    let (mut feed, buffer) = feed(&config, source.probes());
    Runner::new().run(source, &mut feed).unwrap();

    assert_eq!(buffer.contents(), (8..16).collect::<Vec<u8>>());
    assert_eq!(
        feed.warnings(),
        &[FeedWarning::ShortCount {
            received: 8,
            requested: 16
        }]
    );
}

#[test]
fn test_demo_to_vcd() {
    let mut config = SessionConfig {
        limit_samples: 8,
        probes: Some("0-1".into()),
        ..format("vcd")
    };
    let mut source = DemoSource::new(4, 1_000_000).with_chunk_samples(8);
    prepare_source(&mut config, &mut source).unwrap();

    let (mut feed, buffer) = feed(&config, source.probes());
    Runner::new().run(source, &mut feed).unwrap();

    let vcd = buffer.to_string_lossy();
    assert!(vcd.contains("$timescale 1 us $end"));
    assert!(vcd.contains("$var wire 1 ! 0 $end"));
    assert!(vcd.contains("$var wire 1 \" 1 $end"));
    assert!(!vcd.contains("$var wire 1 # 2 $end"));
    // Probe 0 toggles every sample
    assert!(vcd.contains("#7\n1!\n"));
    assert!(vcd.ends_with("#8\n"));
}

proptest! {
    #[test]
    fn prop_packed_size_follows_selection(
        probe_count in 1usize..=24,
        mask in any::<u32>(),
        samples in 1usize..32,
    ) {
        let selected: Vec<String> = (0..probe_count)
            .filter(|i| mask & (1 << i) != 0)
            .map(|i| i.to_string())
            .collect();
        prop_assume!(!selected.is_empty());

        let config = SessionConfig {
            probes: Some(selected.join(",")),
            ..format("binary")
        };
        let (mut feed, buffer) = feed(&config, ProbeSet::numbered(probe_count));
        let source_unit = probe_count.div_ceil(8);
        let packed_unit = selected.len().div_ceil(8);

        feed.deliver(&Packet::Header).unwrap();
        feed.deliver(&meta(probe_count)).unwrap();
        feed.deliver(&Packet::logic(vec![0xA5; samples * source_unit], source_unit)).unwrap();
        feed.deliver(&Packet::End).unwrap();

        prop_assert_eq!(feed.lanes().unwrap().unit_size(), packed_unit);
        prop_assert_eq!(buffer.len(), samples * packed_unit);
        prop_assert_eq!(feed.counters().received_samples, samples as u64);
    }

    #[test]
    fn prop_all_probes_selected_is_identity(
        data in proptest::collection::vec(any::<u8>(), 2..64),
    ) {
        let data = data[..data.len() / 2 * 2].to_vec();
        let (mut feed, buffer) = feed(&format("binary"), ProbeSet::numbered(16));

        feed.deliver(&Packet::Header).unwrap();
        feed.deliver(&meta(16)).unwrap();
        feed.deliver(&Packet::logic(data.clone(), 2)).unwrap();
        feed.deliver(&Packet::End).unwrap();

        prop_assert_eq!(buffer.contents(), data);
    }
}
