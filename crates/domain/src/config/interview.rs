use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interview policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Controls how often an incomplete interview is retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewConfig {
    /// Maximum interview passes per node before giving up until the next
    /// wake-up or a manual re-interview.
    #[serde(default = "d_attempts")]
    pub attempts: u32,

    /// Delay between two passes for nodes that never sleep.
    #[serde(default = "d_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Interview nodes restored from cache with an incomplete stage on startup.
    #[serde(default = "d_true")]
    pub resume_on_startup: bool,
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self {
            attempts: d_attempts(),
            retry_delay_ms: d_retry_delay_ms(),
            resume_on_startup: true,
        }
    }
}

fn d_attempts() -> u32 {
    5
}
fn d_retry_delay_ms() -> u64 {
    5_000
}
fn d_true() -> bool {
    true
}
