//! Event channel factories and handles.

use super::types::DeferredEvent;
use tokio::sync::mpsc;

/// Default buffer size for event channels.
///
/// This provides enough buffer to handle bursts while keeping memory bounded.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Sender handle for DeferredEvent events.
pub type DeferredEventSender = mpsc::Sender<DeferredEvent>;
/// Receiver handle for DeferredEvent events.
pub type DeferredEventReceiver = mpsc::Receiver<DeferredEvent>;

/// Create a new DeferredEvent channel.
///
/// The intake holds the sender; its retry worker owns the receiver.
pub fn deferred_event_channel() -> (DeferredEventSender, DeferredEventReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}
