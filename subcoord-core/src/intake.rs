//! Event intake: the single entry point for state-changing events.
//!
//! Every event for a transaction is applied while holding that
//! transaction's [`KeyedMutex`] entry, so events for one transaction are
//! applied one at a time in arrival order while different transactions run
//! in parallel. Live-channel joins take the same lock.
//!
//! Events whose commit keeps failing are handed to the [`IntakeRetryWorker`],
//! which re-delivers them with exponential backoff and moves them to the
//! dead-letter list once the retry budget is spent. The list keeps the most
//! recent [`DEAD_LETTER_CAPACITY`] entries.

use crate::engine::{TransitionEngine, TransitionError, TransitionOutcome};
use crate::entities::TransactionId;
use crate::events::{
    deferred_event_channel, DeferredEvent, DeferredEventReceiver, DeferredEventSender,
    PaymentEvent,
};
use crate::hub::{HubError, NotificationHub, Observer};
use crate::store::StoreError;
use crate::utils::{KeyedMutex, RetryPolicy};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Dead letters kept in memory before the oldest are evicted.
pub const DEAD_LETTER_CAPACITY: usize = 1000;

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("transaction {0} not found")]
    UnknownTransaction(TransactionId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The retry worker is gone; the event was dead-lettered instead.
    #[error("retry queue closed")]
    QueueClosed,
}

impl From<HubError> for IntakeError {
    fn from(value: HubError) -> Self {
        match value {
            HubError::UnknownTransaction(id) => IntakeError::UnknownTransaction(id),
            HubError::Store(e) => IntakeError::Store(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The engine ran; `changed` tells whether anything was committed.
    Applied(TransitionOutcome),
    /// The commit kept failing; the event is queued for re-delivery.
    Deferred,
}

/// An event that exhausted its re-delivery budget.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub event: PaymentEvent,
    pub attempts: u32,
    pub error: String,
    pub recorded_at: OffsetDateTime,
}

/// Bounded, oldest-first record of exhausted events.
struct DeadLetterLog {
    capacity: usize,
    letters: Mutex<VecDeque<DeadLetter>>,
}

impl DeadLetterLog {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            letters: Mutex::new(VecDeque::new()),
        }
    }

    fn push(&self, letter: DeadLetter) {
        let mut letters = self.letters.lock().unwrap_or_else(PoisonError::into_inner);
        if letters.len() >= self.capacity
            && let Some(evicted) = letters.pop_front()
        {
            warn!(
                target: "subcoord::alert",
                transaction_id = %evicted.event.transaction_id,
                "Dead-letter list full, evicting oldest entry"
            );
        }
        letters.push_back(letter);
    }

    fn snapshot(&self) -> Vec<DeadLetter> {
        self.letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

struct IntakeInner {
    engine: TransitionEngine,
    hub: NotificationHub,
    locks: KeyedMutex<TransactionId>,
    deferred_tx: DeferredEventSender,
    requeue: RetryPolicy,
    dead_letters: DeadLetterLog,
}

#[derive(Clone)]
pub struct EventIntake {
    inner: Arc<IntakeInner>,
}

impl EventIntake {
    /// Build the intake and its retry worker. The worker must be spawned.
    pub fn new(
        engine: TransitionEngine,
        hub: NotificationHub,
        requeue: RetryPolicy,
    ) -> (Self, IntakeRetryWorker) {
        let (deferred_tx, deferred_rx) = deferred_event_channel();
        let intake = Self {
            inner: Arc::new(IntakeInner {
                engine,
                hub,
                locks: KeyedMutex::new(),
                deferred_tx,
                requeue,
                dead_letters: DeadLetterLog::new(DEAD_LETTER_CAPACITY),
            }),
        };
        let worker = IntakeRetryWorker {
            intake: intake.clone(),
            deferred_rx,
        };
        (intake, worker)
    }

    /// Apply an event under its transaction's lock.
    pub async fn submit(&self, event: PaymentEvent) -> Result<SubmitOutcome, IntakeError> {
        debug!(
            transaction_id = %event.transaction_id,
            event = event.event.kind(),
            source = %event.source,
            "Event submitted"
        );
        match self.deliver(&event).await {
            Ok(outcome) => Ok(SubmitOutcome::Applied(outcome)),
            Err(TransitionError::UnknownTransaction(id)) => Err(IntakeError::UnknownTransaction(id)),
            Err(e) => {
                warn!(
                    transaction_id = %event.transaction_id,
                    error = %e,
                    "Event deferred for re-delivery"
                );
                self.defer(DeferredEvent { event, attempts: 0 }, e).await?;
                Ok(SubmitOutcome::Deferred)
            }
        }
    }

    /// Subscribe a live observer without interleaving with a commit.
    pub async fn join(&self, transaction_id: &TransactionId) -> Result<Observer, IntakeError> {
        let _guard = self.inner.locks.lock(transaction_id).await;
        Ok(self.inner.hub.subscribe(transaction_id).await?)
    }

    /// Events that exhausted their retries, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dead_letters.snapshot()
    }

    async fn deliver(&self, event: &PaymentEvent) -> Result<TransitionOutcome, TransitionError> {
        let _guard = self.inner.locks.lock(&event.transaction_id).await;
        self.inner
            .engine
            .apply(&event.transaction_id, &event.event)
            .await
    }

    async fn redeliver(&self, deferred: DeferredEvent) {
        let attempts = deferred.attempts + 1;
        match self.deliver(&deferred.event).await {
            Ok(outcome) => {
                info!(
                    transaction_id = %deferred.event.transaction_id,
                    attempts,
                    changed = outcome.changed,
                    "Deferred event applied"
                );
            }
            Err(TransitionError::UnknownTransaction(id)) => {
                // Nothing will ever make this event applicable.
                self.dead_letter(deferred.event, attempts, format!("transaction {id} not found"));
            }
            Err(e) => {
                let next = DeferredEvent {
                    event: deferred.event,
                    attempts,
                };
                // Already dead-lettered if this fails.
                let _ = self.defer(next, e).await;
            }
        }
    }

    async fn defer(&self, deferred: DeferredEvent, cause: TransitionError) -> Result<(), IntakeError> {
        if !self.inner.requeue.allows(deferred.attempts) {
            self.dead_letter(deferred.event, deferred.attempts, cause.to_string());
            return Ok(());
        }
        if let Err(returned) = self.inner.deferred_tx.send(deferred).await {
            let DeferredEvent { event, attempts } = returned.0;
            self.dead_letter(event, attempts, format!("retry queue closed: {cause}"));
            return Err(IntakeError::QueueClosed);
        }
        Ok(())
    }

    fn dead_letter(&self, event: PaymentEvent, attempts: u32, error: String) {
        error!(
            target: "subcoord::alert",
            transaction_id = %event.transaction_id,
            event = event.event.kind(),
            source = %event.source,
            attempts,
            error = %error,
            "Event exhausted retries; manual reconciliation required"
        );
        let letter = DeadLetter {
            event,
            attempts,
            error,
            recorded_at: self.inner.engine.clock().now(),
        };
        self.inner.dead_letters.push(letter);
    }
}

/// Re-delivers deferred events after their backoff delay.
pub struct IntakeRetryWorker {
    intake: EventIntake,
    deferred_rx: DeferredEventReceiver,
}

impl IntakeRetryWorker {
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("IntakeRetryWorker started");
        let mut pending = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("IntakeRetryWorker received shutdown signal");
                        break;
                    }
                }

                Some(deferred) = self.deferred_rx.recv() => {
                    let delay = self.intake.inner.requeue.delay_for(deferred.attempts);
                    debug!(
                        transaction_id = %deferred.event.transaction_id,
                        attempts = deferred.attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Scheduling re-delivery"
                    );
                    let intake = self.intake.clone();
                    pending.spawn(async move {
                        tokio::time::sleep(delay).await;
                        intake.redeliver(deferred).await;
                    });
                }

                // Reap finished re-deliveries.
                Some(_) = pending.join_next(), if !pending.is_empty() => {}

                else => {
                    info!("Deferred event channel closed");
                    break;
                }
            }
        }

        if !pending.is_empty() {
            warn!(
                target: "subcoord::alert",
                count = pending.len(),
                "Shutting down with deferred events still waiting"
            );
        }
        pending.shutdown().await;
        info!("IntakeRetryWorker shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{
        BillingCycle, Payment, PaymentStatus, Subscription, SubscriptionStatus,
    };
    use crate::events::{EventSource, TransitionEvent};
    use crate::store::{MemoryStateStore, NewTransaction, StateStore, SubscriptionSlot};
    use crate::utils::{Clock, ManualClock};
    use rust_decimal::Decimal;
    use std::time::Duration;
    use uuid::Uuid;

    async fn setup(requeue: RetryPolicy) -> (Arc<MemoryStateStore>, EventIntake, IntakeRetryWorker) {
        let store = Arc::new(MemoryStateStore::new());
        let clock = ManualClock::new(OffsetDateTime::from_unix_timestamp(1_750_000_000).unwrap());
        let hub = NotificationHub::new(store.clone());
        let engine = TransitionEngine::new(
            store.clone(),
            hub.clone(),
            Arc::new(clock.clone()),
            RetryPolicy::commit(),
        );
        let now = clock.now();
        let subscription_id = Uuid::now_v7();
        store
            .create(NewTransaction {
                payment: Payment {
                    transaction_id: "t1".into(),
                    subscription_id,
                    status: PaymentStatus::Initiated,
                    amount: Decimal::ONE,
                    customer_id: "c".into(),
                    order_id: "o".into(),
                    gateway_reference: None,
                    failure_reason: None,
                    created_at: now,
                    last_updated_at: now,
                    version: 0,
                },
                subscription: SubscriptionSlot::Create(Subscription {
                    subscription_id,
                    user_id: "c".into(),
                    transaction_id: "t1".into(),
                    plan_title: "Pro".into(),
                    billing_cycle: BillingCycle::Yearly,
                    status: SubscriptionStatus::Pending,
                    activated_at: None,
                    expiry_date: None,
                    updated_at: now,
                    version: 0,
                }),
            })
            .await
            .unwrap();
        let (intake, worker) = EventIntake::new(engine, hub, requeue);
        (store, intake, worker)
    }

    fn success() -> PaymentEvent {
        PaymentEvent::new(
            "t1".into(),
            TransitionEvent::ConfirmSuccess {
                gateway_reference: Some("gw".into()),
            },
            EventSource::Callback,
        )
    }

    #[tokio::test]
    async fn concurrent_duplicates_activate_once() {
        let (_store, intake, _worker) = setup(RetryPolicy::intake()).await;
        let mut handles = Vec::new();
        for _ in 0..8 {
            let intake = intake.clone();
            handles.push(tokio::spawn(async move { intake.submit(success()).await }));
        }
        let mut changed = 0;
        for handle in handles {
            if let SubmitOutcome::Applied(outcome) = handle.await.unwrap().unwrap() {
                changed += usize::from(outcome.changed);
                assert_eq!(outcome.payment_status, PaymentStatus::Success);
            }
        }
        assert_eq!(changed, 1);
    }

    #[tokio::test]
    async fn unknown_transaction_is_reported() {
        let (_store, intake, _worker) = setup(RetryPolicy::intake()).await;
        let mut event = success();
        event.transaction_id = "ghost".into();
        assert!(matches!(
            intake.submit(event).await,
            Err(IntakeError::UnknownTransaction(_))
        ));
        assert!(matches!(
            intake.join(&"ghost".into()).await,
            Err(IntakeError::UnknownTransaction(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_event_is_redelivered() {
        let (store, intake, worker) = setup(RetryPolicy::intake()).await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(shutdown_rx));

        // Five commit attempts, all conflicting.
        store.inject_conflicts(5);
        assert_eq!(intake.submit(success()).await.unwrap(), SubmitOutcome::Deferred);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let state = store.load(&"t1".into()).await.unwrap().unwrap();
        assert_eq!(state.payment.status, PaymentStatus::Success);
        assert!(intake.dead_letters().is_empty());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_event_is_dead_lettered() {
        let policy = RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::intake()
        };
        let (store, intake, worker) = setup(policy).await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(shutdown_rx));

        // First delivery plus two re-deliveries, five commits each.
        store.inject_conflicts(15);
        assert_eq!(intake.submit(success()).await.unwrap(), SubmitOutcome::Deferred);
        tokio::time::sleep(Duration::from_secs(10)).await;

        let letters = intake.dead_letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].attempts, 2);
        assert_eq!(letters[0].event, success());
        let state = store.load(&"t1".into()).await.unwrap().unwrap();
        assert_eq!(state.payment.status, PaymentStatus::Initiated);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn dead_letter_log_evicts_oldest_at_capacity() {
        let log = DeadLetterLog::new(2);
        let recorded_at = OffsetDateTime::from_unix_timestamp(1_750_000_000).unwrap();
        for attempts in 1..=3 {
            log.push(DeadLetter {
                event: success(),
                attempts,
                error: "conflict".into(),
                recorded_at,
            });
        }
        let kept: Vec<u32> = log.snapshot().iter().map(|l| l.attempts).collect();
        assert_eq!(kept, vec![2, 3]);
    }

    #[tokio::test]
    async fn join_sees_committed_state() {
        let (_store, intake, _worker) = setup(RetryPolicy::intake()).await;
        intake.submit(success()).await.unwrap();
        let mut observer = intake.join(&"t1".into()).await.unwrap();
        let snapshot = observer.try_recv().unwrap();
        assert_eq!(
            snapshot.status,
            subcoord_sdk::objects::PaymentStatus::Success
        );
    }
}
