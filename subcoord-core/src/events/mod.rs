//! Events flowing through the coordinator.
//!
//! # Event Flow
//!
//! 1. Callbacks, the poller, the sweeper and the initiate path build a
//!    `PaymentEvent` and hand it to `EventIntake::submit`
//! 2. `EventIntake` serializes per transaction and calls `TransitionEngine`
//! 3. `TransitionEngine` commits and emits `StateCommitted` to `NotificationHub`
//! 4. Events whose commit kept conflicting come back as `DeferredEvent`
//!    through the intake retry worker

pub mod channels;
pub mod types;

pub use channels::{
    deferred_event_channel, DeferredEventReceiver, DeferredEventSender, DEFAULT_CHANNEL_BUFFER,
};

pub use types::{DeferredEvent, EventSource, PaymentEvent, StateCommitted, TransitionEvent};
