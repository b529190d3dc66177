//! The payment/subscription state machine as a pure function.

use crate::entities::{PaymentStatus, SubscriptionStatus, TransactionState};
use crate::entities::{Payment, Subscription};
use crate::events::TransitionEvent;
use time::OffsetDateTime;

/// Records that differ from the state the transition was computed from.
///
/// `None` means the record is untouched. Each `Some` still carries the
/// version it was read at, ready for a conditional commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transition {
    pub payment: Option<Payment>,
    pub subscription: Option<Subscription>,
}

impl Transition {
    pub fn is_noop(&self) -> bool {
        self.payment.is_none() && self.subscription.is_none()
    }
}

/// Compute the next state for `event`.
///
/// Confirmations after SUCCESS or FAILED are absorbed. A CANCELLED
/// subscription is never re-activated.
pub fn next(state: &TransactionState, event: &TransitionEvent, now: OffsetDateTime) -> Transition {
    let payment = &state.payment;
    let subscription = &state.subscription;

    match event {
        TransitionEvent::ConfirmSuccess { gateway_reference } if !payment.status.is_terminal() => {
            let mut next_payment = payment.clone();
            next_payment.status = PaymentStatus::Success;
            if gateway_reference.is_some() {
                next_payment.gateway_reference = gateway_reference.clone();
            }
            next_payment.last_updated_at = now;

            Transition {
                payment: Some(next_payment),
                subscription: activate(subscription, now),
            }
        }
        TransitionEvent::ConfirmFailure { reason } if !payment.status.is_terminal() => {
            let mut next_payment = payment.clone();
            next_payment.status = PaymentStatus::Failed;
            next_payment.failure_reason = Some(reason.clone());
            next_payment.last_updated_at = now;
            Transition {
                payment: Some(next_payment),
                subscription: None,
            }
        }
        TransitionEvent::AwaitConfirmation if payment.status == PaymentStatus::Initiated => {
            let mut next_payment = payment.clone();
            next_payment.status = PaymentStatus::Pending;
            next_payment.last_updated_at = now;
            Transition {
                payment: Some(next_payment),
                subscription: None,
            }
        }
        TransitionEvent::ExpiryTick { now: tick } => {
            let lapsed = subscription.status == SubscriptionStatus::Active
                && subscription.expiry_date.is_some_and(|expiry| expiry <= *tick);
            if !lapsed {
                return Transition::default();
            }
            let mut next_subscription = subscription.clone();
            next_subscription.status = SubscriptionStatus::Expired;
            next_subscription.updated_at = now;
            Transition {
                payment: None,
                subscription: Some(next_subscription),
            }
        }
        _ => Transition::default(),
    }
}

/// Grant one term of access for a successful payment.
fn activate(subscription: &Subscription, now: OffsetDateTime) -> Option<Subscription> {
    let term = subscription.billing_cycle.term();
    let mut next = subscription.clone();
    match subscription.status {
        SubscriptionStatus::Pending | SubscriptionStatus::Expired => {
            next.status = SubscriptionStatus::Active;
            next.activated_at = Some(now);
            next.expiry_date = Some(now + term);
        }
        SubscriptionStatus::Active => {
            let from = subscription.expiry_date.map_or(now, |expiry| expiry.max(now));
            next.expiry_date = Some(from + term);
        }
        SubscriptionStatus::Cancelled => return None,
    }
    next.updated_at = now;
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{BillingCycle, TransactionId};
    use rust_decimal::Decimal;
    use time::Duration;
    use uuid::Uuid;

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_750_000_000).unwrap()
    }

    fn state(payment: PaymentStatus, subscription: SubscriptionStatus) -> TransactionState {
        let id = TransactionId::from("txn_test");
        let subscription_id = Uuid::nil();
        TransactionState {
            payment: Payment {
                transaction_id: id.clone(),
                subscription_id,
                status: payment,
                amount: Decimal::new(1999, 2),
                customer_id: "cus_1".into(),
                order_id: "ord_1".into(),
                gateway_reference: Some("gw_initial".into()),
                failure_reason: None,
                created_at: now() - Duration::hours(1),
                last_updated_at: now() - Duration::hours(1),
                version: 3,
            },
            subscription: Subscription {
                subscription_id,
                user_id: "cus_1".into(),
                transaction_id: id,
                plan_title: "Pro".into(),
                billing_cycle: BillingCycle::Monthly,
                status: subscription,
                activated_at: None,
                expiry_date: None,
                updated_at: now() - Duration::hours(1),
                version: 7,
            },
        }
    }

    fn success(reference: &str) -> TransitionEvent {
        TransitionEvent::ConfirmSuccess {
            gateway_reference: Some(reference.into()),
        }
    }

    #[test]
    fn success_activates_pending_subscription() {
        let s = state(PaymentStatus::Pending, SubscriptionStatus::Pending);
        let t = next(&s, &success("gw_2"), now());
        let payment = t.payment.unwrap();
        let subscription = t.subscription.unwrap();
        assert_eq!(payment.status, PaymentStatus::Success);
        assert_eq!(payment.gateway_reference.as_deref(), Some("gw_2"));
        assert_eq!(payment.version, 3);
        assert_eq!(subscription.status, SubscriptionStatus::Active);
        assert_eq!(subscription.activated_at, Some(now()));
        assert_eq!(subscription.expiry_date, Some(now() + Duration::days(30)));
        assert_eq!(subscription.version, 7);
    }

    #[test]
    fn success_without_reference_keeps_the_stored_one() {
        let s = state(PaymentStatus::Initiated, SubscriptionStatus::Pending);
        let t = next(
            &s,
            &TransitionEvent::ConfirmSuccess {
                gateway_reference: None,
            },
            now(),
        );
        assert_eq!(t.payment.unwrap().gateway_reference.as_deref(), Some("gw_initial"));
    }

    #[test]
    fn renewal_extends_from_the_later_of_expiry_and_now() {
        let mut s = state(PaymentStatus::Initiated, SubscriptionStatus::Active);
        s.subscription.expiry_date = Some(now() + Duration::days(3));
        let t = next(&s, &success("gw"), now());
        assert_eq!(
            t.subscription.unwrap().expiry_date,
            Some(now() + Duration::days(33))
        );

        s.subscription.status = SubscriptionStatus::Expired;
        s.subscription.expiry_date = Some(now() - Duration::days(3));
        let t = next(&s, &success("gw"), now());
        let subscription = t.subscription.unwrap();
        assert_eq!(subscription.status, SubscriptionStatus::Active);
        assert_eq!(subscription.expiry_date, Some(now() + Duration::days(30)));
    }

    #[test]
    fn cancelled_subscription_is_not_reactivated() {
        let s = state(PaymentStatus::Pending, SubscriptionStatus::Cancelled);
        let t = next(&s, &success("gw"), now());
        assert_eq!(t.payment.unwrap().status, PaymentStatus::Success);
        assert!(t.subscription.is_none());
    }

    #[test]
    fn failure_leaves_subscription_pending() {
        let s = state(PaymentStatus::Initiated, SubscriptionStatus::Pending);
        let t = next(
            &s,
            &TransitionEvent::ConfirmFailure {
                reason: "card_declined".into(),
            },
            now(),
        );
        let payment = t.payment.unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(payment.failure_reason.as_deref(), Some("card_declined"));
        assert!(t.subscription.is_none());
    }

    #[test]
    fn confirmations_after_terminal_are_absorbed() {
        for terminal in [PaymentStatus::Success, PaymentStatus::Failed] {
            let s = state(terminal, SubscriptionStatus::Active);
            for event in [
                success("gw_late"),
                TransitionEvent::ConfirmFailure {
                    reason: "late".into(),
                },
                TransitionEvent::AwaitConfirmation,
            ] {
                assert!(next(&s, &event, now()).is_noop(), "{terminal:?} {event:?}");
            }
        }
    }

    #[test]
    fn await_confirmation_only_moves_initiated() {
        let s = state(PaymentStatus::Initiated, SubscriptionStatus::Pending);
        let t = next(&s, &TransitionEvent::AwaitConfirmation, now());
        assert_eq!(t.payment.unwrap().status, PaymentStatus::Pending);

        let s = state(PaymentStatus::Pending, SubscriptionStatus::Pending);
        assert!(next(&s, &TransitionEvent::AwaitConfirmation, now()).is_noop());
    }

    #[test]
    fn expiry_tick_expires_only_lapsed_active_subscriptions() {
        let mut s = state(PaymentStatus::Success, SubscriptionStatus::Active);
        s.subscription.expiry_date = Some(now());
        let t = next(&s, &TransitionEvent::ExpiryTick { now: now() }, now());
        assert!(t.payment.is_none());
        assert_eq!(t.subscription.unwrap().status, SubscriptionStatus::Expired);

        s.subscription.expiry_date = Some(now() + Duration::seconds(1));
        assert!(next(&s, &TransitionEvent::ExpiryTick { now: now() }, now()).is_noop());

        for status in [
            SubscriptionStatus::Pending,
            SubscriptionStatus::Expired,
            SubscriptionStatus::Cancelled,
        ] {
            let mut s = state(PaymentStatus::Success, status);
            s.subscription.expiry_date = Some(now() - Duration::days(1));
            assert!(next(&s, &TransitionEvent::ExpiryTick { now: now() }, now()).is_noop());
        }
    }
}
