//! Command-line front end: acquire from the demo generator or replay a
//! session file, and feed the packets through the data-feed pipeline.
//!
//! Usage:
//!   datafeed --samples 1k -O hex
//!   datafeed --demo-probes 4 --samples 256 -a spi:sck=0:sdata=1,ascii
//!   datafeed -i capture.sr -p 0-3 -O vcd -o capture.vcd
//!   datafeed --samples 10k -o capture.sr          (saves a session file)
//!   datafeed -a spi,ascii --show

use clap::Parser;
use datafeed::config::{parse_size, parse_time_ms};
use datafeed::nodes::{DemoPattern, DemoSource, SessionFileSource};
use datafeed::runtime::source::prepare_source;
use datafeed::{
    CaptureSource, DataFeed, DecoderRegistry, OutputRegistry, Result, Runner, SessionConfig,
    StackingPolicy, StopHandle,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML session configuration; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Replay a stored session file instead of the demo generator
    #[arg(short = 'i', long)]
    input_file: Option<PathBuf>,

    /// Number of demo generator probes
    #[arg(long, default_value_t = 8)]
    demo_probes: usize,

    /// Demo generator sample rate (`1M`, `200k`, ...)
    #[arg(long, default_value = "1M")]
    samplerate: String,

    /// Demo generator pattern
    #[arg(long, value_enum, default_value_t = DemoPattern::Counter)]
    pattern: DemoPattern,

    /// Probe selection by index, range or name, e.g. `0-3,CLK`
    #[arg(short, long)]
    probes: Option<String>,

    /// Number of samples to acquire (`1000`, `10k`, `2M`)
    #[arg(long)]
    samples: Option<String>,

    /// Acquisition time (`500ms`, `2s`)
    #[arg(long)]
    time: Option<String>,

    /// Number of frames to acquire
    #[arg(long)]
    frames: Option<u64>,

    /// Sample until Enter is pressed
    #[arg(long)]
    continuous: bool,

    /// Drop samples until the trigger fires
    #[arg(long)]
    wait_trigger: bool,

    /// Output file; without -O the capture is saved as a session file
    #[arg(short = 'o', long)]
    output_file: Option<PathBuf>,

    /// Output format with options, e.g. `bits:width=32`
    #[arg(short = 'O', long)]
    output_format: Option<String>,

    /// Protocol decoder directives, e.g. `spi:sck=0:sdata=1`
    #[arg(short = 'a', long)]
    decoders: Option<String>,

    /// Explicit decoder stack, e.g. `spi,ascii`
    #[arg(short = 's', long)]
    decoder_stack: Option<String>,

    /// Annotations to show, e.g. `spi=hex,ascii`
    #[arg(short = 'A', long)]
    annotations: Option<String>,

    /// How several decoders combine without an explicit stack
    #[arg(long, value_enum)]
    stacking: Option<StackingPolicy>,

    /// Log level 0-5 (off, error, warn, info, debug, trace)
    #[arg(short = 'l', long)]
    loglevel: Option<u8>,

    /// List output formats and protocol decoders, then exit
    #[arg(long)]
    list_formats: bool,

    /// Show details of the decoders given with -a, then exit
    #[arg(long, requires = "decoders")]
    show: bool,
}

/// File configuration overlaid with the command-line flags
fn session_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };

    if let Some(samples) = &args.samples {
        config.limit_samples = parse_size(samples)?;
    }
    if let Some(time) = &args.time {
        config.limit_time_ms = parse_time_ms(time)?;
    }
    if let Some(frames) = args.frames {
        config.limit_frames = frames;
    }
    config.continuous |= args.continuous;
    config.wait_trigger |= args.wait_trigger;

    if args.probes.is_some() {
        config.probes = args.probes.clone();
    }
    if args.output_file.is_some() {
        config.output_file = args.output_file.clone();
    }
    if args.output_format.is_some() {
        config.output_format = args.output_format.clone();
    }
    if args.decoders.is_some() {
        config.decoders = args.decoders.clone();
    }
    if args.decoder_stack.is_some() {
        config.decoder_stack = args.decoder_stack.clone();
    }
    if args.annotations.is_some() {
        config.decoder_annotations = args.annotations.clone();
    }
    if let Some(stacking) = args.stacking {
        config.stacking = stacking;
    }
    if let Some(loglevel) = args.loglevel {
        config.loglevel = loglevel;
    }

    config.validate()?;
    Ok(config)
}

/// Log to stderr; `RUST_LOG` wins over the configured level
fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn list_formats() {
    println!("Supported output formats:");
    for format in OutputRegistry::builtin().iter() {
        println!("  {:<10} {}", format.id, format.description);
    }
    println!();
    println!("Supported protocol decoders:");
    for decoder in DecoderRegistry::builtin().iter() {
        println!("  {:<10} {}", decoder.id, decoder.description);
    }
}

/// Raise `stop` once a line arrives on stdin
fn stop_on_enter(stop: StopHandle) {
    let spawned = thread::Builder::new()
        .name("stdin-stop".to_string())
        .spawn(move || {
            let mut line = String::new();
            if matches!(std::io::stdin().read_line(&mut line), Ok(n) if n > 0) {
                info!("Stop requested");
                stop.stop();
            }
        });
    if let Err(e) = spawned {
        warn!("Cannot watch stdin for a stop request: {}", e);
    }
}

fn acquire<S: CaptureSource + 'static>(mut source: S, mut config: SessionConfig) -> Result<()> {
    let limits = prepare_source(&mut config, &mut source)?;
    info!("Acquiring from '{}' with {:?}", source.name(), limits);

    let mut feed = DataFeed::new(
        &config,
        source.probes(),
        &OutputRegistry::builtin(),
        &DecoderRegistry::builtin(),
    )?;

    let runner = Runner::new();
    if config.continuous {
        eprintln!("Press Enter to stop the acquisition.");
        stop_on_enter(runner.stop_handle());
    }

    let summary = runner.run(source, &mut feed)?;
    info!(
        "{} packets, {} samples{}",
        summary.packets,
        feed.counters().received_samples,
        if summary.stopped { " (stopped)" } else { "" }
    );
    Ok(())
}

fn run(args: &Args, config: SessionConfig) -> Result<()> {
    match &args.input_file {
        Some(path) => acquire(SessionFileSource::open(path)?, config),
        None => {
            let sample_rate = parse_size(&args.samplerate)?;
            let source = DemoSource::new(args.demo_probes, sample_rate).with_pattern(args.pattern);
            acquire(source, config)
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let config = session_config(&args);

    let filter = config
        .as_ref()
        .map(SessionConfig::log_filter)
        .unwrap_or("warn");
    init_logging(filter);

    if args.list_formats {
        list_formats();
        return ExitCode::SUCCESS;
    }
    if args.show
        && let Some(directives) = &args.decoders
    {
        return match DecoderRegistry::builtin().details(directives) {
            Ok(details) => {
                print!("{}", details);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    match config.and_then(|config| run(&args, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
