//! Channel operation watchdog for detecting stalls
//!
//! Each sender/receiver stores the start time of its current blocking
//! operation in an atomic; a monitor thread scans these timestamps.

use crossbeam_channel::{RecvTimeoutError, Sender as CrossbeamSender, bounded};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Operations blocked longer than this are reported
pub const BLOCKED_THRESHOLD: Duration = Duration::from_secs(5);

const SCAN_INTERVAL: Duration = Duration::from_secs(1);

#[inline(always)]
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

struct ChannelState {
    /// ms since epoch when the current operation started, 0 if idle
    last_op_start: AtomicU64,
    has_warned: AtomicBool,
    component: String,
    channel: String,
    operation: String,
}

/// Per-endpoint handle held by `Sender` / `Receiver`
#[derive(Clone)]
pub struct WatchdogHandle {
    state: Arc<ChannelState>,
}

impl WatchdogHandle {
    #[inline(always)]
    pub fn start_operation(&self) {
        self.state.last_op_start.store(now_millis(), Ordering::Relaxed);
        self.state.has_warned.store(false, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn finish_operation(&self) {
        if self.state.has_warned.swap(false, Ordering::Relaxed) {
            info!(
                "UNBLOCKED: [{}] {} on '{}'",
                self.state.component, self.state.operation, self.state.channel
            );
        }
        self.state.last_op_start.store(0, Ordering::Relaxed);
    }

    /// Whether an operation is in progress
    pub fn is_busy(&self) -> bool {
        self.state.last_op_start.load(Ordering::Relaxed) != 0
    }
}

/// Running monitor thread; stops when dropped or via [`Monitor::stop`]
pub struct Monitor {
    stop_tx: Option<CrossbeamSender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Monitor {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender disconnects the monitor's stop channel
        self.stop_tx.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Clone, Default)]
pub struct Watchdog {
    channels: Arc<Mutex<Vec<Weak<ChannelState>>>>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel endpoint for monitoring
    pub fn register(&self, component: &str, operation: &str, channel: &str) -> WatchdogHandle {
        let state = Arc::new(ChannelState {
            last_op_start: AtomicU64::new(0),
            has_warned: AtomicBool::new(false),
            component: component.to_string(),
            channel: channel.to_string(),
            operation: operation.to_string(),
        });

        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(&state));

        WatchdogHandle { state }
    }

    /// Warn once about every operation blocked longer than `threshold`.
    /// Returns the number of blocked operations.
    pub fn check_for_blocked(&self, threshold: Duration) -> usize {
        let now = now_millis();
        let threshold_ms = threshold.as_millis() as u64;
        let mut blocked = 0;

        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.retain(|weak| {
            let Some(state) = weak.upgrade() else {
                return false;
            };
            let start = state.last_op_start.load(Ordering::Relaxed);
            if start > 0 {
                let duration_ms = now.saturating_sub(start);
                if duration_ms > threshold_ms {
                    blocked += 1;
                    if !state.has_warned.swap(true, Ordering::Relaxed) {
                        warn!(
                            "BLOCKED: [{}] {} on '{}' for {:.1}s",
                            state.component,
                            state.operation,
                            state.channel,
                            duration_ms as f64 / 1000.0
                        );
                    }
                }
            }
            true
        });
        blocked
    }

    /// Number of live registered endpoints
    pub fn registered(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Start the monitoring thread
    pub fn start_monitoring_thread(&self) -> Monitor {
        let watchdog = self.clone();
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let thread = std::thread::spawn(move || {
            loop {
                match stop_rx.recv_timeout(SCAN_INTERVAL) {
                    Err(RecvTimeoutError::Timeout) => {
                        watchdog.check_for_blocked(BLOCKED_THRESHOLD);
                    }
                    _ => break,
                }
            }
        });
        Monitor {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        }
    }
}

/// RAII guard marking one blocking operation
pub struct OperationGuard<'a> {
    handle: &'a WatchdogHandle,
}

impl<'a> OperationGuard<'a> {
    #[inline(always)]
    pub fn new(handle: &'a WatchdogHandle) -> Self {
        handle.start_operation();
        Self { handle }
    }
}

impl Drop for OperationGuard<'_> {
    #[inline(always)]
    fn drop(&mut self) {
        self.handle.finish_operation();
    }
}
