//! Wiring of the coordinator's components.

use crate::config::SharedConfig;
use crate::engine::TransitionEngine;
use crate::gateway::GatewayAdapter;
use crate::gateway::PaymentGateway;
use crate::hub::NotificationHub;
use crate::intake::{EventIntake, IntakeRetryWorker};
use crate::processors::{ExpirySweeper, PaymentPoller, PeriodicTask};
use crate::store::StateStore;
use crate::utils::{Clock, RetryPolicy};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handles to the request-facing components. Cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    pub store: Arc<dyn StateStore>,
    pub hub: NotificationHub,
    pub intake: EventIntake,
    pub adapter: GatewayAdapter,
    pub config: SharedConfig,
}

/// Long-running tasks that must be spawned for the coordinator to make
/// progress on deferred events, expiries and unconfirmed payments.
pub struct BackgroundTasks {
    retry_worker: IntakeRetryWorker,
    sweeper: PeriodicTask<ExpirySweeper>,
    poller: PeriodicTask<PaymentPoller>,
    config: SharedConfig,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn StateStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: SharedConfig,
        clock: Arc<dyn Clock>,
    ) -> (Self, BackgroundTasks) {
        let hub = NotificationHub::new(store.clone());
        let engine = TransitionEngine::new(
            store.clone(),
            hub.clone(),
            clock.clone(),
            RetryPolicy::commit(),
        );
        let (intake, retry_worker) =
            EventIntake::new(engine, hub.clone(), config.intake.retry_policy());
        let adapter = GatewayAdapter::new(
            store.clone(),
            intake.clone(),
            gateway.clone(),
            config.gateway.clone(),
            clock.clone(),
        );
        let sweeper = PeriodicTask::new(ExpirySweeper::new(
            store.clone(),
            intake.clone(),
            config.sweeper.clone(),
            clock.clone(),
        ));
        let poller = PeriodicTask::new(PaymentPoller::new(
            store.clone(),
            intake.clone(),
            gateway,
            config.poller.clone(),
            clock,
        ));

        let coordinator = Self {
            store,
            hub,
            intake,
            adapter,
            config: config.clone(),
        };
        let tasks = BackgroundTasks {
            retry_worker,
            sweeper,
            poller,
            config,
        };
        (coordinator, tasks)
    }
}

impl BackgroundTasks {
    /// Spawn every task; each stops when `shutdown_rx` flips to `true`.
    pub fn spawn(self, shutdown_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(self.retry_worker.run(shutdown_rx.clone())),
            tokio::spawn(
                self.sweeper
                    .run(shutdown_rx.clone(), self.config.sweeper.clone()),
            ),
            tokio::spawn(self.poller.run(shutdown_rx, self.config.poller.clone())),
        ]
    }
}
