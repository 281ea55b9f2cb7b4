//! Receiving half of the source-to-feed channel
//!
//! Transparently unwraps `ChannelMessage` and caches end-of-stream state so
//! every call after it returns `Shutdown`.

use crossbeam_channel::Receiver as CrossbeamReceiver;

use super::errors::{DeliveryError, DeliveryResult};
use super::sender::ChannelMessage;
use super::watchdog::{OperationGuard, WatchdogHandle};

pub struct Receiver<T> {
    inner: CrossbeamReceiver<ChannelMessage<T>>,
    watchdog_handle: Option<WatchdogHandle>,
    eos: bool,
}

impl<T> Receiver<T> {
    pub fn new(inner: CrossbeamReceiver<ChannelMessage<T>>) -> Self {
        Self {
            inner,
            watchdog_handle: None,
            eos: false,
        }
    }

    /// Attach a watchdog handle to monitor receive operations
    pub fn with_watchdog(mut self, watchdog_handle: WatchdogHandle) -> Self {
        self.watchdog_handle = Some(watchdog_handle);
        self
    }

    /// Blocking receive.
    ///
    /// Returns `Err(DeliveryError::Shutdown)` once end-of-stream was seen or
    /// every sender is gone.
    pub fn recv(&mut self) -> DeliveryResult<T> {
        if self.eos {
            return Err(DeliveryError::Shutdown);
        }

        let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);
        match self.inner.recv() {
            Ok(ChannelMessage::Data(item)) => Ok(item),
            Ok(ChannelMessage::EndOfStream) => {
                self.eos = true;
                tracing::debug!("Receiver::recv() - EndOfStream received");
                Err(DeliveryError::Shutdown)
            }
            Err(_) => {
                self.eos = true;
                tracing::debug!("Receiver::recv() - channel disconnected");
                Err(DeliveryError::Shutdown)
            }
        }
    }
}
