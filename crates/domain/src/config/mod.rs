mod interview;
mod observability;
mod profiles;
mod scheduler;
mod security;
mod storage;

pub use interview::*;
pub use observability::*;
pub use profiles::*;
pub use scheduler::*;
pub use security::*;
pub use storage::*;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::node::NodeId;
use crate::security::SECURITY_CLASS_ORDER;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub interview: InterviewConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Static capability corrections per device model.
    #[serde(default)]
    pub device_profiles: Vec<DeviceProfile>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Controller
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Node id of the host's own controller.
    #[serde(default = "d_controller_node_id")]
    pub node_id: NodeId,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            node_id: d_controller_node_id(),
        }
    }
}

fn d_controller_node_id() -> NodeId {
    NodeId(1)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let controller = self.controller.node_id.get();
        if controller == 0 || controller > NodeId::MAX_CLASSIC {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "controller.node_id".into(),
                message: format!("must be between 1 and {}", NodeId::MAX_CLASSIC),
            });
        }

        if self.interview.attempts == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "interview.attempts".into(),
                message: "at least one interview attempt is required".into(),
            });
        }

        if self.scheduler.transaction_timeout_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "scheduler.transaction_timeout_ms".into(),
                message: "timeout must be greater than 0".into(),
            });
        }

        if self.scheduler.queue_capacity == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "scheduler.queue_capacity".into(),
                message: "queue capacity must be greater than 0".into(),
            });
        }

        if self.storage.cache_dir.as_os_str().is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "storage.cache_dir".into(),
                message: "cache_dir must not be empty".into(),
            });
        }

        // Network keys: well-formed and pairwise distinct.
        let mut decoded: Vec<(String, Vec<u8>)> = Vec::new();
        for class in SECURITY_CLASS_ORDER {
            let field = format!("security.{}", SecurityConfig::field_name(class));
            match self.security.decode(class) {
                None => {}
                Some(Err(message)) => errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field,
                    message,
                }),
                Some(Ok(key)) => {
                    if let Some((other, _)) = decoded.iter().find(|(_, k)| *k == key) {
                        errors.push(ConfigError {
                            severity: ConfigSeverity::Error,
                            field: field.clone(),
                            message: format!("same key as {other}"),
                        });
                    }
                    decoded.push((field, key));
                }
            }
        }
        if !self.security.has_s2() && !self.security.has_s0() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "security".into(),
                message: "no network keys configured; secure nodes are interviewed insecurely".into(),
            });
        }

        let rate = self.observability.sample_rate;
        if !(0.0..=1.0).contains(&rate) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "observability.sample_rate".into(),
                message: format!("{rate} is outside 0.0..=1.0 and will be clamped"),
            });
        }

        for (i, profile) in self.device_profiles.iter().enumerate() {
            if let Err(message) = profile.firmware_range() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("device_profiles[{i}]"),
                    message,
                });
            }
        }

        errors
    }
}
