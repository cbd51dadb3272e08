//! Transport abstraction.
//!
//! The session only needs a single write path. Link setup, pairing and
//! characteristic discovery happen before a transport is handed over;
//! notifications are fed back through [`Session::handle_notification`] or
//! [`Session::run`].
//!
//! [`Session::handle_notification`]: crate::Session::handle_notification
//! [`Session::run`]: crate::Session::run

use bytes::Bytes;
use std::future::Future;
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The link is gone; the session must be torn down.
    #[error("transport disconnected")]
    Disconnected,

    /// A single write failed; the link is still up.
    #[error("write failed: {0}")]
    Write(String),
}

impl TransportError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Disconnected)
    }
}

/// Write side of a device link.
pub trait Transport: Send + Sync + 'static {
    /// Writes one wire frame to the device.
    fn send_bytes(&self, data: Bytes) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Transport that hands every write to a channel.
///
/// Useful to bridge to a BLE stack running on its own task.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    async fn send_bytes(&self, data: Bytes) -> Result<(), TransportError> {
        self.tx
            .send(data)
            .map_err(|_| TransportError::Disconnected)
    }
}
