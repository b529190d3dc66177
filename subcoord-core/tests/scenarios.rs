//! End-to-end flows through the coordinator, on the in-memory store with a
//! scripted gateway and a manual clock.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use subcoord_core::Coordinator;
use subcoord_core::config::{
    ConfigStore, GatewayConfig, IntakeConfig, PollerConfig, ServerConfig, SharedConfig,
    SweeperConfig,
};
use subcoord_core::entities::{PaymentStatus, SubscriptionStatus, TransactionId};
use subcoord_core::events::{EventSource, PaymentEvent, TransitionEvent};
use subcoord_core::gateway::{
    CallbackError, CallbackResult, GatewayStatus, InitiateError, SandboxCharge, SandboxGateway,
    ValidationError, VerificationError,
};
use subcoord_core::intake::SubmitOutcome;
use subcoord_core::processors::{ExpirySweeper, PaymentPoller};
use subcoord_core::store::{MemoryStateStore, StateStore};
use subcoord_core::utils::{Clock, ManualClock};
use subcoord_sdk::objects::{
    BillingCycle, CallbackStatus, GatewayCallbackPayload, InitiatePaymentRequest,
};
use subcoord_sdk::signature::sign_raw;
use time::OffsetDateTime;
use uuid::Uuid;

const SECRET: &[u8] = b"whsec_scenarios";
const DAY: time::Duration = time::Duration::days(1);

struct Harness {
    store: Arc<MemoryStateStore>,
    gateway: SandboxGateway,
    clock: ManualClock,
    config: SharedConfig,
    coordinator: Coordinator,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryStateStore::new());
        let gateway = SandboxGateway::new();
        let clock = ManualClock::new(OffsetDateTime::from_unix_timestamp(1_760_000_000).unwrap());
        let config = SharedConfig {
            server: ConfigStore::new(ServerConfig {
                listen: "127.0.0.1:0".parse().unwrap(),
            }),
            gateway: ConfigStore::new(GatewayConfig::new(None, String::new(), SECRET)),
            sweeper: ConfigStore::new(SweeperConfig {
                interval: Duration::from_secs(3600),
                batch_size: 2,
            }),
            poller: ConfigStore::new(PollerConfig::default()),
            intake: IntakeConfig::default(),
        };
        let (coordinator, _tasks) = Coordinator::new(
            store.clone(),
            Arc::new(gateway.clone()),
            config.clone(),
            Arc::new(clock.clone()),
        );
        Self {
            store,
            gateway,
            clock,
            config,
            coordinator,
        }
    }

    fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(
            self.store.clone(),
            self.coordinator.intake.clone(),
            self.config.sweeper.clone(),
            Arc::new(self.clock.clone()),
        )
    }

    fn poller(&self) -> PaymentPoller {
        PaymentPoller::new(
            self.store.clone(),
            self.coordinator.intake.clone(),
            Arc::new(self.gateway.clone()),
            self.config.poller.clone(),
            Arc::new(self.clock.clone()),
        )
    }

    async fn initiate(&self, transaction_id: &str) -> Uuid {
        self.coordinator
            .adapter
            .initiate(request(transaction_id, None))
            .await
            .unwrap()
            .subscription_id
    }

    /// Sign a callback the way the processor would, at the current time.
    fn callback(&self, transaction_id: &str, status: CallbackStatus) -> (String, Vec<u8>) {
        let body = serde_json::to_vec(&GatewayCallbackPayload {
            transaction_id: transaction_id.to_owned(),
            status,
            gateway_reference: Some(format!("ch_{transaction_id}")),
            failure_reason: None,
        })
        .unwrap();
        let header = sign_raw(self.clock.now().unix_timestamp(), &body, SECRET);
        (header, body)
    }

    async fn deliver(&self, transaction_id: &str, status: CallbackStatus) -> CallbackResult {
        let (header, body) = self.callback(transaction_id, status);
        self.coordinator
            .adapter
            .handle_callback(Some(&header), &body)
            .await
            .unwrap()
            .result
    }

    async fn submit(&self, transaction_id: &str, event: TransitionEvent) -> SubmitOutcome {
        self.coordinator
            .intake
            .submit(PaymentEvent::new(
                TransactionId::from(transaction_id),
                event,
                EventSource::Callback,
            ))
            .await
            .unwrap()
    }

    async fn statuses(&self, transaction_id: &str) -> (PaymentStatus, SubscriptionStatus) {
        let state = self
            .store
            .load(&TransactionId::from(transaction_id))
            .await
            .unwrap()
            .unwrap();
        (state.payment.status, state.subscription.status)
    }
}

fn request(transaction_id: &str, renew: Option<Uuid>) -> InitiatePaymentRequest {
    InitiatePaymentRequest {
        customer_id: "cust_1".into(),
        amount: Decimal::new(999, 2),
        order_id: format!("ord_{transaction_id}"),
        plan_title: "Pro".into(),
        billing_cycle: BillingCycle::Monthly,
        transaction_id: Some(transaction_id.into()),
        renew_subscription_id: renew,
    }
}

fn success() -> TransitionEvent {
    TransitionEvent::ConfirmSuccess {
        gateway_reference: None,
    }
}

fn failure() -> TransitionEvent {
    TransitionEvent::ConfirmFailure {
        reason: "card declined".into(),
    }
}

fn changed(outcome: SubmitOutcome) -> bool {
    match outcome {
        SubmitOutcome::Applied(outcome) => outcome.changed,
        SubmitOutcome::Deferred => unreachable!("no conflicts are injected"),
    }
}

#[tokio::test]
async fn duplicate_success_activates_once() {
    let h = Harness::new();
    h.initiate("t1").await;

    let (a, b) = tokio::join!(h.submit("t1", success()), h.submit("t1", success()));
    let changes = [changed(a), changed(b)].iter().filter(|c| **c).count();
    assert_eq!(changes, 1);

    let state = h.store.load(&"t1".into()).await.unwrap().unwrap();
    assert_eq!(state.payment.status, PaymentStatus::Success);
    assert_eq!(state.subscription.status, SubscriptionStatus::Active);
    assert_eq!(state.subscription.expiry_date, Some(h.clock.now() + 30 * DAY));
    assert_eq!(state.payment.version, 2);
}

#[tokio::test]
async fn terminal_status_is_never_left() {
    let h = Harness::new();
    h.initiate("ok").await;
    h.initiate("ko").await;

    assert!(changed(h.submit("ok", success()).await));
    assert!(!changed(h.submit("ok", failure()).await));
    assert!(!changed(h.submit("ok", TransitionEvent::AwaitConfirmation).await));
    assert_eq!(
        h.statuses("ok").await,
        (PaymentStatus::Success, SubscriptionStatus::Active)
    );

    assert!(changed(h.submit("ko", failure()).await));
    assert!(!changed(h.submit("ko", success()).await));
    assert_eq!(
        h.statuses("ko").await,
        (PaymentStatus::Failed, SubscriptionStatus::Pending)
    );
}

#[tokio::test]
async fn expired_subscription_reactivates_only_through_a_new_payment() {
    let h = Harness::new();
    let subscription_id = h.initiate("t1").await;
    assert!(changed(h.submit("t1", success()).await));

    h.clock.advance(31 * DAY);
    let report = h.sweeper().sweep().await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(
        h.statuses("t1").await,
        (PaymentStatus::Success, SubscriptionStatus::Expired)
    );

    // A replayed success for the old payment changes nothing.
    assert!(!changed(h.submit("t1", success()).await));
    assert_eq!(h.statuses("t1").await.1, SubscriptionStatus::Expired);

    let renewal = h
        .coordinator
        .adapter
        .initiate(request("t2", Some(subscription_id)))
        .await
        .unwrap();
    assert_eq!(renewal.subscription_id, subscription_id);
    assert!(matches!(
        h.deliver("t2", CallbackStatus::Success).await,
        CallbackResult::Applied(outcome) if outcome.changed
    ));

    let state = h.store.load(&"t2".into()).await.unwrap().unwrap();
    assert_eq!(state.subscription.subscription_id, subscription_id);
    assert_eq!(state.subscription.status, SubscriptionStatus::Active);
    assert_eq!(state.subscription.transaction_id, TransactionId::from("t2"));
    assert_eq!(state.subscription.expiry_date, Some(h.clock.now() + 30 * DAY));
}

#[tokio::test]
async fn late_success_leaves_cancelled_subscription_alone() {
    let h = Harness::new();
    h.initiate("t1").await;
    let mut subscription = h.store.load(&"t1".into()).await.unwrap().unwrap().subscription;
    subscription.status = SubscriptionStatus::Cancelled;
    h.store.put_subscription(subscription).await;

    assert!(changed(h.submit("t1", success()).await));
    assert_eq!(
        h.statuses("t1").await,
        (PaymentStatus::Success, SubscriptionStatus::Cancelled)
    );
}

#[tokio::test]
async fn late_subscriber_sees_committed_state() {
    let h = Harness::new();
    h.initiate("t1").await;
    h.deliver("t1", CallbackStatus::Success).await;

    let mut observer = h.coordinator.intake.join(&"t1".into()).await.unwrap();
    let snapshot = observer.try_recv().unwrap();
    assert_eq!(snapshot.status, subcoord_sdk::objects::PaymentStatus::Success);
    assert_eq!(
        snapshot.subscription_status,
        subcoord_sdk::objects::SubscriptionStatus::Active
    );
    assert!(observer.try_recv().is_none());
}

#[tokio::test]
async fn initiate_callback_and_replay() {
    let h = Harness::new();
    let response = h
        .coordinator
        .adapter
        .initiate(request("t1", None))
        .await
        .unwrap();
    assert_eq!(response.transaction_id, "t1");
    assert_eq!(response.redirect_or_token, "sandbox_token_t1");

    let state = h.store.load(&"t1".into()).await.unwrap().unwrap();
    assert_eq!(state.payment.status, PaymentStatus::Initiated);
    assert_eq!(state.subscription.status, SubscriptionStatus::Pending);
    assert_eq!(state.payment.gateway_reference.as_deref(), Some("sbx_t1"));

    let mut observer = h.coordinator.intake.join(&"t1".into()).await.unwrap();
    assert!(observer.try_recv().is_some());

    let (header, body) = h.callback("t1", CallbackStatus::Success);
    let first = h
        .coordinator
        .adapter
        .handle_callback(Some(&header), &body)
        .await
        .unwrap();
    assert!(matches!(first.result, CallbackResult::Applied(o) if o.changed));

    let replay = h
        .coordinator
        .adapter
        .handle_callback(Some(&header), &body)
        .await
        .unwrap();
    assert!(matches!(replay.result, CallbackResult::Applied(o) if !o.changed));

    let pushed = observer.try_recv().unwrap();
    assert_eq!(pushed.status, subcoord_sdk::objects::PaymentStatus::Success);
    assert_eq!(pushed.data.gateway_reference.as_deref(), Some("ch_t1"));
    assert!(observer.try_recv().is_none(), "replay must not publish");
}

#[tokio::test]
async fn pending_callback_is_acknowledged_without_change() {
    let h = Harness::new();
    h.initiate("t1").await;

    assert_eq!(
        h.deliver("t1", CallbackStatus::Pending).await,
        CallbackResult::Ignored(CallbackStatus::Pending)
    );
    assert_eq!(h.statuses("t1").await.0, PaymentStatus::Initiated);
}

#[tokio::test]
async fn unverifiable_callbacks_mutate_nothing() {
    let h = Harness::new();
    h.initiate("t1").await;
    let (header, body) = h.callback("t1", CallbackStatus::Success);

    let forged = sign_raw(h.clock.now().unix_timestamp(), &body, b"wrong key");
    let err = h
        .coordinator
        .adapter
        .handle_callback(Some(&forged), &body)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CallbackError::Verification(VerificationError::Signature(_))
    ));

    let err = h
        .coordinator
        .adapter
        .handle_callback(None, &body)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CallbackError::Verification(VerificationError::MissingSignature)
    ));

    // Valid signature, stale timestamp.
    h.clock.advance(time::Duration::hours(1));
    let err = h
        .coordinator
        .adapter
        .handle_callback(Some(&header), &body)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CallbackError::Verification(VerificationError::Signature(_))
    ));

    let (header, body) = h.callback("nope", CallbackStatus::Success);
    let err = h
        .coordinator
        .adapter
        .handle_callback(Some(&header), &body)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CallbackError::Verification(VerificationError::UnknownTransaction(_))
    ));

    assert_eq!(h.statuses("t1").await.0, PaymentStatus::Initiated);
}

#[tokio::test]
async fn rejected_charge_fails_the_payment() {
    let h = Harness::new();
    h.gateway.script(SandboxCharge::Reject("insufficient funds".into()));

    let err = h
        .coordinator
        .adapter
        .initiate(request("t1", None))
        .await
        .unwrap_err();
    assert!(matches!(err, InitiateError::Gateway { .. }));

    let state = h.store.load(&"t1".into()).await.unwrap().unwrap();
    assert_eq!(state.payment.status, PaymentStatus::Failed);
    assert!(
        state
            .payment
            .failure_reason
            .unwrap()
            .contains("insufficient funds")
    );
}

#[tokio::test(start_paused = true)]
async fn timed_out_charge_awaits_confirmation() {
    let h = Harness::new();
    h.gateway.script(SandboxCharge::Hang);

    let err = h
        .coordinator
        .adapter
        .initiate(request("t1", None))
        .await
        .unwrap_err();
    assert!(matches!(err, InitiateError::Gateway { ref source, .. } if source.is_timeout()));
    assert_eq!(
        h.statuses("t1").await,
        (PaymentStatus::Pending, SubscriptionStatus::Pending)
    );
}

#[tokio::test]
async fn sweep_pages_through_lapsed_subscriptions_once() {
    let h = Harness::new();
    for i in 0..5 {
        let id = format!("t{i}");
        h.initiate(&id).await;
        h.submit(&id, success()).await;
    }
    h.clock.advance(20 * DAY);
    h.initiate("fresh").await;
    h.submit("fresh", success()).await;

    h.clock.advance(11 * DAY);
    let report = h.sweeper().sweep().await.unwrap();
    assert_eq!(report.scanned, 5);
    assert_eq!(report.expired, 5);
    assert_eq!(report.failed, 0);

    for i in 0..5 {
        assert_eq!(h.statuses(&format!("t{i}")).await.1, SubscriptionStatus::Expired);
    }
    assert_eq!(h.statuses("fresh").await.1, SubscriptionStatus::Active);

    let again = h.sweeper().sweep().await.unwrap();
    assert_eq!(again.scanned, 0);
    assert_eq!(again.expired, 0);
}

#[tokio::test]
async fn concurrent_subscribers_receive_the_same_updates() {
    let h = Harness::new();
    h.initiate("t1").await;

    let (id_a, id_b) = ("t1".into(), "t1".into());
    let (a, b) = tokio::join!(
        h.coordinator.intake.join(&id_a),
        h.coordinator.intake.join(&id_b)
    );
    let (mut a, mut b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.try_recv(), b.try_recv());
    assert_eq!(h.coordinator.hub.observer_count(&"t1".into()), 2);

    h.submit("t1", success()).await;
    let (from_a, from_b) = (a.recv().await.unwrap(), b.recv().await.unwrap());
    assert_eq!(from_a, from_b);
    assert_eq!(from_a.status, subcoord_sdk::objects::PaymentStatus::Success);

    drop(a);
    assert_eq!(h.coordinator.hub.observer_count(&"t1".into()), 1);
}

#[tokio::test]
async fn poller_resolves_payments_the_webhook_missed() {
    let h = Harness::new();
    h.initiate("paid").await;
    h.initiate("waiting").await;
    h.gateway.set_status(
        &"paid".into(),
        GatewayStatus::Succeeded {
            gateway_reference: None,
        },
    );

    // Still inside the webhook grace period.
    let report = h.poller().poll().await.unwrap();
    assert_eq!(report.polled, 0);

    h.clock.advance(time::Duration::minutes(6));
    let report = h.poller().poll().await.unwrap();
    assert_eq!(report.polled, 2);
    assert_eq!(report.resolved, 1);
    assert_eq!(report.still_pending, 1);
    assert_eq!(
        h.statuses("paid").await,
        (PaymentStatus::Success, SubscriptionStatus::Active)
    );
    assert_eq!(h.statuses("waiting").await.0, PaymentStatus::Initiated);
}

#[tokio::test]
async fn poller_reports_payments_past_the_cap() {
    let h = Harness::new();
    h.initiate("stale").await;

    h.clock.advance(time::Duration::hours(24) + time::Duration::seconds(30));
    let report = h.poller().poll().await.unwrap();
    assert_eq!(report.polled, 0);
    assert_eq!(report.abandoned, 1);

    // Reported once, not on every pass.
    h.clock.advance(time::Duration::minutes(5));
    assert_eq!(h.poller().poll().await.unwrap().abandoned, 0);
    assert_eq!(h.statuses("stale").await.0, PaymentStatus::Initiated);
}

#[tokio::test]
async fn cancelled_subscription_cannot_be_renewed() {
    let h = Harness::new();
    let subscription_id = h.initiate("t1").await;
    assert!(changed(h.submit("t1", success()).await));
    let mut subscription = h.store.load(&"t1".into()).await.unwrap().unwrap().subscription;
    subscription.status = SubscriptionStatus::Cancelled;
    h.store.put_subscription(subscription).await;

    let err = h
        .coordinator
        .adapter
        .initiate(request("t2", Some(subscription_id)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        InitiateError::Validation(ValidationError::SubscriptionCancelled(_))
    ));
    assert_eq!(h.gateway.charges().len(), 1);
    assert!(h.store.load(&"t2".into()).await.unwrap().is_none());
    assert_eq!(
        h.statuses("t1").await,
        (PaymentStatus::Success, SubscriptionStatus::Cancelled)
    );
}

#[tokio::test]
async fn renewal_by_another_customer_is_refused() {
    let h = Harness::new();
    let subscription_id = h.initiate("t1").await;
    assert!(changed(h.submit("t1", success()).await));

    let mut foreign = request("t2", Some(subscription_id));
    foreign.customer_id = "cust_2".into();
    foreign.billing_cycle = BillingCycle::Yearly;
    let err = h.coordinator.adapter.initiate(foreign).await.unwrap_err();
    assert!(matches!(
        err,
        InitiateError::Validation(ValidationError::RenewalMismatch {
            field: "customer_id",
            ..
        })
    ));
    assert_eq!(h.gateway.charges().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn join_racing_a_commit_ends_on_the_committed_state() {
    let h = Harness::new();
    for i in 0..32 {
        let id = TransactionId::from(format!("race{i}").as_str());
        h.initiate(id.as_str()).await;

        let intake = h.coordinator.intake.clone();
        let join_id = id.clone();
        let joined = tokio::spawn(async move { intake.join(&join_id).await });
        let intake = h.coordinator.intake.clone();
        let event = PaymentEvent::new(id.clone(), success(), EventSource::Callback);
        let submitted = tokio::spawn(async move { intake.submit(event).await });

        let mut observer = joined.await.unwrap().unwrap();
        assert!(changed(submitted.await.unwrap().unwrap()));

        let mut last = None;
        while let Some(snapshot) = observer.try_recv() {
            last = Some(snapshot);
        }
        let last = last.unwrap();
        assert_eq!(last.status, subcoord_sdk::objects::PaymentStatus::Success, "{id}");
        assert_eq!(
            last.subscription_status,
            subcoord_sdk::objects::SubscriptionStatus::Active,
            "{id}"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn expiry_racing_a_renewal_keeps_the_renewal() {
    for _ in 0..16 {
        let h = Harness::new();
        let subscription_id = h.initiate("t1").await;
        assert!(changed(h.submit("t1", success()).await));
        h.clock.advance(31 * DAY);
        h.coordinator
            .adapter
            .initiate(request("t2", Some(subscription_id)))
            .await
            .unwrap();

        // Different transaction ids, same subscription row: only the
        // version check orders these two commits.
        let now = h.clock.now();
        let intake = h.coordinator.intake.clone();
        let tick = tokio::spawn(async move {
            intake
                .submit(PaymentEvent::new(
                    "t1".into(),
                    TransitionEvent::ExpiryTick { now },
                    EventSource::Sweeper,
                ))
                .await
        });
        let intake = h.coordinator.intake.clone();
        let renewal = tokio::spawn(async move {
            intake
                .submit(PaymentEvent::new("t2".into(), success(), EventSource::Callback))
                .await
        });
        let (tick, renewal) = (tick.await.unwrap().unwrap(), renewal.await.unwrap().unwrap());
        assert!(matches!(tick, SubmitOutcome::Applied(_)));
        assert!(changed(renewal));

        let state = h.store.load(&"t2".into()).await.unwrap().unwrap();
        assert_eq!(state.payment.status, PaymentStatus::Success);
        assert_eq!(state.subscription.subscription_id, subscription_id);
        assert_eq!(state.subscription.status, SubscriptionStatus::Active);
        assert_eq!(state.subscription.expiry_date, Some(now + 30 * DAY));
    }
}
