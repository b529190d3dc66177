//! Cadences of the background sweeps.

use std::time::Duration;

/// Expiry sweeper cadence and page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperConfig {
    pub interval: Duration,
    pub batch_size: u32,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            batch_size: 100,
        }
    }
}

/// Payment poller cadence and age window.
///
/// Payments younger than `grace` are left to the webhook; payments older
/// than `cap` are no longer polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub interval: Duration,
    pub grace: Duration,
    pub cap: Duration,
    pub batch_size: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            grace: Duration::from_secs(5 * 60),
            cap: Duration::from_secs(24 * 60 * 60),
            batch_size: 100,
        }
    }
}
