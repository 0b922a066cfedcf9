//! Retry budget for incomplete interview passes.

use std::time::Duration;

use zw_domain::config::InterviewConfig;

/// An incomplete pass is retried after a fixed pause until the configured
/// number of passes has run. Each retry resumes where the last pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause before the next pass.
    pub delay: Duration,
    /// Passes per interview, the first one included. Never zero.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&InterviewConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &InterviewConfig) -> Self {
        Self {
            delay: Duration::from_millis(config.retry_delay_ms),
            max_attempts: config.attempts.max(1),
        }
    }

    /// Pause before the next pass after `attempts` passes ended incomplete,
    /// or `None` once the budget is spent.
    pub fn next_delay(&self, attempts: u32) -> Option<Duration> {
        (attempts < self.max_attempts).then_some(self.delay)
    }
}
