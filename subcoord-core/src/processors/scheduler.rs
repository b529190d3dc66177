//! Fixed-interval background jobs.
//!
//! A [`PeriodicTask`] runs its job once at startup and then every `period`,
//! re-reads the period whenever its [`ConfigStore`] changes, never runs two
//! instances of the job at once, and aborts a run in progress on shutdown.

use crate::config::{ConfigStore, PollerConfig, SweeperConfig};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Config sections that carry a job period.
pub trait Cadence: Send + Sync + 'static {
    fn period(&self) -> Duration;
}

impl Cadence for SweeperConfig {
    fn period(&self) -> Duration {
        self.interval
    }
}

impl Cadence for PollerConfig {
    fn period(&self) -> Duration {
        self.interval
    }
}

/// One run of a background job. Errors are the job's to log.
#[async_trait]
pub trait PeriodicJob: Send + Sync + 'static {
    const NAME: &'static str;

    async fn run_once(&self);
}

pub struct PeriodicTask<J> {
    job: Arc<J>,
}

impl<J: PeriodicJob> PeriodicTask<J> {
    pub fn new(job: J) -> Self {
        Self { job: Arc::new(job) }
    }

    /// Run until shutdown is signaled.
    pub async fn run<C: Cadence>(self, mut shutdown_rx: watch::Receiver<bool>, config: ConfigStore<C>) {
        let mut watcher = config.subscribe();
        let mut period = config.read().await.period().max(MIN_PERIOD);
        let mut ticker = make_ticker(period);
        let mut in_flight: Option<JoinHandle<()>> = None;
        info!(task = J::NAME, period_secs = period.as_secs(), "PeriodicTask started");

        // A restart must not push the next run a whole period out.
        self.fire(&mut in_flight);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(task = J::NAME, "PeriodicTask received shutdown signal");
                        break;
                    }
                }

                Ok(()) = watcher.changed() => {
                    let new_period = config.read().await.period().max(MIN_PERIOD);
                    if new_period != period {
                        info!(
                            task = J::NAME,
                            old_secs = period.as_secs(),
                            new_secs = new_period.as_secs(),
                            "Re-arming with new period"
                        );
                        period = new_period;
                        ticker = make_ticker(period);
                    }
                }

                _ = ticker.tick() => self.fire(&mut in_flight),
            }
        }

        if let Some(handle) = in_flight
            && !handle.is_finished()
        {
            info!(task = J::NAME, "Aborting run in progress");
            handle.abort();
        }
        info!(task = J::NAME, "PeriodicTask shutdown complete");
    }

    fn fire(&self, in_flight: &mut Option<JoinHandle<()>>) {
        if in_flight.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!(task = J::NAME, "Previous run still in progress, skipping");
            return;
        }
        let job = self.job.clone();
        *in_flight = Some(tokio::spawn(async move { job.run_once().await }));
    }
}

/// First tick one period from now; late ticks are skipped, not bunched.
fn make_ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}
