//! PaymentPoller processor.
//!
//! Asks the processor about payments that are still INITIATED or PENDING
//! after the webhook grace period, and feeds any settled answer through the
//! event intake. Payments stop being polled once they reach the age cap;
//! those are reported on the alert target and left for manual
//! reconciliation.

use super::scheduler::PeriodicJob;
use crate::config::{ConfigStore, PollerConfig};
use crate::entities::TransactionId;
use crate::events::{EventSource, PaymentEvent, TransitionEvent};
use crate::gateway::{GatewayStatus, PaymentGateway};
use crate::intake::{EventIntake, SubmitOutcome};
use crate::store::{CreatedWindow, StateStore, StoreError};
use crate::utils::Clock;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum PollError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Counters for one polling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub polled: u32,
    /// Payments whose status changed as a result.
    pub resolved: u32,
    pub still_pending: u32,
    pub deferred: u32,
    /// Gateway or intake errors.
    pub failed: u32,
    /// Payments that aged past the cap since the previous pass.
    pub abandoned: u32,
}

pub struct PaymentPoller {
    store: Arc<dyn StateStore>,
    intake: EventIntake,
    gateway: Arc<dyn PaymentGateway>,
    config: ConfigStore<PollerConfig>,
    clock: Arc<dyn Clock>,
}

impl PaymentPoller {
    pub fn new(
        store: Arc<dyn StateStore>,
        intake: EventIntake,
        gateway: Arc<dyn PaymentGateway>,
        config: ConfigStore<PollerConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            intake,
            gateway,
            config,
            clock,
        }
    }

    pub async fn poll(&self) -> Result<PollReport, PollError> {
        let now = self.clock.now();
        let config = *self.config.read().await;
        let batch_size = config.batch_size.max(1);
        let mut report = PollReport::default();

        let window = CreatedWindow {
            created_from: now - config.cap,
            created_until: now - config.grace,
        };
        let mut after: Option<TransactionId> = None;
        loop {
            let page = self
                .store
                .list_awaiting_confirmation(window, after.clone(), batch_size)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.transaction_id.clone());
            let full_page = page.len() as u32 == batch_size;

            for payment in page {
                report.polled += 1;
                let event = match self.gateway.fetch_status(&payment).await {
                    Ok(GatewayStatus::Succeeded { gateway_reference }) => {
                        TransitionEvent::ConfirmSuccess { gateway_reference }
                    }
                    Ok(GatewayStatus::Failed { reason }) => TransitionEvent::ConfirmFailure { reason },
                    Ok(GatewayStatus::Pending) => {
                        report.still_pending += 1;
                        continue;
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(transaction_id = %payment.transaction_id, error = %e, "Status poll failed");
                        continue;
                    }
                };
                let event = PaymentEvent::new(payment.transaction_id.clone(), event, EventSource::Poller);
                match self.intake.submit(event).await {
                    Ok(SubmitOutcome::Applied(outcome)) => {
                        if outcome.changed {
                            report.resolved += 1;
                        }
                        debug!(
                            transaction_id = %payment.transaction_id,
                            changed = outcome.changed,
                            "Poll result applied"
                        );
                    }
                    Ok(SubmitOutcome::Deferred) => report.deferred += 1,
                    Err(e) => {
                        report.failed += 1;
                        warn!(transaction_id = %payment.transaction_id, error = %e, "Failed to submit poll result");
                    }
                }
            }

            if !full_page {
                break;
            }
        }

        report.abandoned = self.report_abandoned(now, &config).await?;
        Ok(report)
    }

    /// Alert on payments that crossed the age cap within the last interval.
    async fn report_abandoned(
        &self,
        now: time::OffsetDateTime,
        config: &PollerConfig,
    ) -> Result<u32, PollError> {
        let window = CreatedWindow {
            created_from: now - config.cap - config.interval,
            created_until: now - config.cap,
        };
        let mut after: Option<TransactionId> = None;
        let mut count = 0;
        loop {
            let page = self
                .store
                .list_awaiting_confirmation(window, after.clone(), config.batch_size.max(1))
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.transaction_id.clone());
            for payment in &page {
                count += 1;
                warn!(
                    target: "subcoord::alert",
                    transaction_id = %payment.transaction_id,
                    status = ?payment.status,
                    created_at = %payment.created_at,
                    "Payment unconfirmed past polling cap; manual reconciliation required"
                );
            }
            if (page.len() as u32) < config.batch_size.max(1) {
                break;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl PeriodicJob for PaymentPoller {
    const NAME: &'static str = "payment_poller";

    async fn run_once(&self) {
        match self.poll().await {
            Ok(report) => info!(
                polled = report.polled,
                resolved = report.resolved,
                still_pending = report.still_pending,
                deferred = report.deferred,
                failed = report.failed,
                abandoned = report.abandoned,
                "Payment poll complete"
            ),
            Err(e) => error!(error = %e, "Payment poll aborted"),
        }
    }
}
