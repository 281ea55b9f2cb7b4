//! Packet sender with watchdog monitoring for blocked sends

use crossbeam_channel::Sender as CrossbeamSender;

use super::errors::{DeliveryError, DeliveryResult};
use super::watchdog::{OperationGuard, WatchdogHandle};

/// Channel message wrapper for end-of-stream signaling
///
/// Sources never see this enum directly: `Sender::send()` wraps values in
/// `Data(T)` and `Receiver::recv()` unwraps them.
#[derive(Clone, Debug)]
pub enum ChannelMessage<T> {
    Data(T),
    /// No more data will be sent
    EndOfStream,
}

/// Sending half of the source-to-feed channel
pub struct Sender<T> {
    inner: CrossbeamSender<ChannelMessage<T>>,
    watchdog_handle: Option<WatchdogHandle>,
}

impl<T> Sender<T> {
    pub fn new(inner: CrossbeamSender<ChannelMessage<T>>) -> Self {
        Self {
            inner,
            watchdog_handle: None,
        }
    }

    /// Attach a watchdog handle to monitor send operations
    pub fn with_watchdog(mut self, watchdog_handle: WatchdogHandle) -> Self {
        self.watchdog_handle = Some(watchdog_handle);
        self
    }

    /// Blocking send. Fails once the receiving side is gone.
    pub fn send(&self, value: T) -> DeliveryResult {
        let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);
        self.inner
            .send(ChannelMessage::Data(value))
            .map_err(DeliveryError::from)
    }

    /// Signal end-of-stream. Subsequent `recv()` calls on the other side
    /// return `DeliveryError::Shutdown`.
    pub fn close(&self) {
        let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);
        let _ = self.inner.send(ChannelMessage::EndOfStream);
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            watchdog_handle: self.watchdog_handle.clone(),
        }
    }
}
