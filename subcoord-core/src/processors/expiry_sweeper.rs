//! ExpirySweeper processor.
//!
//! The ExpirySweeper is responsible for:
//! - Paging through ACTIVE subscriptions whose expiry date has passed
//! - Submitting an `ExpiryTick` for each one through the event intake
//!
//! Pages are keyed on subscription id, so no scan holds more than one page
//! and a crashed run can simply start over: rows already expired drop out
//! of the scan and re-submitted ticks are no-ops.

use super::scheduler::PeriodicJob;
use crate::config::{ConfigStore, SweeperConfig};
use crate::events::{EventSource, PaymentEvent, TransitionEvent};
use crate::intake::{EventIntake, SubmitOutcome};
use crate::store::{StateStore, StoreError};
use crate::utils::Clock;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Counters for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Lapsed ACTIVE subscriptions found.
    pub scanned: u32,
    /// Subscriptions moved to EXPIRED by this run.
    pub expired: u32,
    /// Ticks handed to the intake retry queue.
    pub deferred: u32,
    /// Ticks that could not be submitted.
    pub failed: u32,
}

pub struct ExpirySweeper {
    store: Arc<dyn StateStore>,
    intake: EventIntake,
    config: ConfigStore<SweeperConfig>,
    clock: Arc<dyn Clock>,
}

impl ExpirySweeper {
    pub fn new(
        store: Arc<dyn StateStore>,
        intake: EventIntake,
        config: ConfigStore<SweeperConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            intake,
            config,
            clock,
        }
    }

    /// Expire every ACTIVE subscription whose term ended at or before now.
    pub async fn sweep(&self) -> Result<SweepReport, SweepError> {
        let now = self.clock.now();
        let batch_size = self.config.read().await.batch_size.max(1);
        let mut report = SweepReport::default();
        let mut after = None;

        loop {
            let page = self.store.list_expired_active(now, after, batch_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.subscription_id);
            let full_page = page.len() as u32 == batch_size;
            debug!(count = page.len(), "Sweeping page of lapsed subscriptions");

            for candidate in page {
                report.scanned += 1;
                let event = PaymentEvent::new(
                    candidate.transaction_id.clone(),
                    TransitionEvent::ExpiryTick { now },
                    EventSource::Sweeper,
                );
                match self.intake.submit(event).await {
                    Ok(SubmitOutcome::Applied(outcome)) if outcome.changed => report.expired += 1,
                    Ok(SubmitOutcome::Applied(_)) => {}
                    Ok(SubmitOutcome::Deferred) => report.deferred += 1,
                    Err(e) => {
                        report.failed += 1;
                        warn!(
                            subscription_id = %candidate.subscription_id,
                            transaction_id = %candidate.transaction_id,
                            error = %e,
                            "Failed to submit expiry tick"
                        );
                    }
                }
            }

            if !full_page {
                break;
            }
        }

        Ok(report)
    }
}

#[async_trait]
impl PeriodicJob for ExpirySweeper {
    const NAME: &'static str = "expiry_sweeper";

    async fn run_once(&self) {
        match self.sweep().await {
            Ok(report) => info!(
                scanned = report.scanned,
                expired = report.expired,
                deferred = report.deferred,
                failed = report.failed,
                "Expiry sweep complete"
            ),
            Err(e) => error!(error = %e, "Expiry sweep aborted"),
        }
    }
}
