//! Event type definitions.
//!
//! Events carry identifiers and the minimum of data; the transition engine
//! always re-reads current state from the store before acting on one.

use crate::entities::TransactionId;
use subcoord_sdk::objects::StatusSnapshot;
use time::OffsetDateTime;

/// Where an event came from. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSource {
    /// Verified gateway webhook
    Callback,
    /// Gateway status poll
    Poller,
    /// Expiry sweep
    Sweeper,
    /// Outcome of the initiating charge request
    Initiate,
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EventSource::Callback => "callback",
            EventSource::Poller => "poller",
            EventSource::Sweeper => "sweeper",
            EventSource::Initiate => "initiate",
        })
    }
}

/// An input to the transition engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionEvent {
    /// The processor captured the payment.
    ConfirmSuccess { gateway_reference: Option<String> },
    /// The processor declined or errored.
    ConfirmFailure { reason: String },
    /// Expire the subscription if its term ended at or before `now`.
    ExpiryTick { now: OffsetDateTime },
    /// The charge request was sent but its outcome is unknown.
    AwaitConfirmation,
}

impl TransitionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TransitionEvent::ConfirmSuccess { .. } => "confirm_success",
            TransitionEvent::ConfirmFailure { .. } => "confirm_failure",
            TransitionEvent::ExpiryTick { .. } => "expiry_tick",
            TransitionEvent::AwaitConfirmation => "await_confirmation",
        }
    }
}

/// A transition event addressed to one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEvent {
    pub transaction_id: TransactionId,
    pub event: TransitionEvent,
    pub source: EventSource,
}

impl PaymentEvent {
    pub fn new(transaction_id: TransactionId, event: TransitionEvent, source: EventSource) -> Self {
        Self {
            transaction_id,
            event,
            source,
        }
    }
}

/// Emitted by the transition engine after a commit that changed state.
///
/// This is the only input to the notification hub's publish path.
#[derive(Debug, Clone)]
pub struct StateCommitted {
    pub transaction_id: TransactionId,
    pub snapshot: StatusSnapshot,
}

/// An event whose commit kept conflicting, waiting to be delivered again.
#[derive(Debug, Clone)]
pub struct DeferredEvent {
    pub event: PaymentEvent,
    /// Re-deliveries already made; zero when first deferred.
    pub attempts: u32,
}
