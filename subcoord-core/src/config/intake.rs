use crate::utils::RetryPolicy;
use std::time::Duration;

/// Re-delivery budget for events whose commit kept failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntakeConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        let policy = RetryPolicy::intake();
        Self {
            max_attempts: policy.max_attempts,
            base_delay: policy.base_delay,
            max_delay: policy.max_delay,
        }
    }
}

impl IntakeConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            jitter: false,
        }
    }
}
