use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Send scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound for one transaction on the link, including the response.
    #[serde(default = "d_transaction_timeout_ms")]
    pub transaction_timeout_ms: u64,

    /// Transactions beyond this many pending ones are rejected.
    #[serde(default = "d_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            transaction_timeout_ms: d_transaction_timeout_ms(),
            queue_capacity: d_queue_capacity(),
        }
    }
}

fn d_transaction_timeout_ms() -> u64 {
    10_000
}
fn d_queue_capacity() -> usize {
    1024
}
