//! Runs a capture source on its own thread and serializes its packets
//!
//! The source thread pushes packets into a bounded channel; the calling
//! thread pulls them one at a time and hands them to a [`PacketSink`], so
//! the sink never sees two packets concurrently.

use super::feed::PacketSink;
use super::packet::Packet;
use super::receiver::Receiver;
use super::sender::Sender;
use super::source::CaptureSource;
use super::watchdog::Watchdog;
use crate::{FeedError, Result};
use crossbeam_channel::bounded;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, error, info};

/// Default depth of the source-to-feed channel, in packets
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Cooperative stop request shared between the runner, the source and
/// whoever wants to end an acquisition early
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Packets handed to the sink
    pub packets: u64,
    /// Whether the run ended because of a stop request
    pub stopped: bool,
}

pub struct Runner {
    capacity: usize,
    stop: StopHandle,
    watchdog: Watchdog,
}

impl Runner {
    pub fn new() -> Self {
        Self {
            capacity: DEFAULT_CHANNEL_CAPACITY,
            stop: StopHandle::new(),
            watchdog: Watchdog::new(),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Handle that ends the acquisition when stopped
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Run `source` to completion, delivering every packet to `sink`.
    ///
    /// A sink error stops the source and is returned; a source error is
    /// returned once all of its packets were delivered.
    pub fn run<S>(&self, mut source: S, sink: &mut dyn PacketSink) -> Result<RunSummary>
    where
        S: CaptureSource + 'static,
    {
        let name = source.name().to_string();
        let (tx, rx) = bounded(self.capacity);
        let sender = Sender::new(tx).with_watchdog(self.watchdog.register(&name, "send", "packets"));
        let mut receiver =
            Receiver::new(rx).with_watchdog(self.watchdog.register("feed", "recv", "packets"));

        let monitor = self.watchdog.start_monitoring_thread();
        debug!("Watchdog enabled - will report channel operations blocked >5 seconds");

        let stop = self.stop.clone();
        let handle = thread::Builder::new()
            .name(format!("source-{}", name))
            .spawn(move || {
                let result = source.run(&sender, &stop);
                sender.close();
                result
            })
            .map_err(|e| FeedError::Source(format!("cannot start '{}': {}", name, e)))?;

        let mut packets = 0u64;
        let mut outcome = Ok(());
        while let Ok(packet) = receiver.recv() {
            packets += 1;
            if let Err(e) = sink.deliver(&packet) {
                error!("[{}] Delivery failed: {}", name, e);
                self.stop.stop();
                outcome = Err(e);
                break;
            }
        }
        // Unblocks a source still waiting on a full channel
        drop(receiver);

        let joined = handle.join();
        monitor.stop();
        outcome?;

        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(FeedError::Source(format!("'{}' panicked", name))),
        }

        let stopped = self.stop.is_stopped();
        info!("[{}] Finished. Delivered {} packets.", name, packets);
        Ok(RunSummary { packets, stopped })
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}
