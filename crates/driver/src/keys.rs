use zw_domain::config::SecurityConfig;
use zw_domain::security::{S2_CLASSES, SECURITY_CLASS_ORDER};
use zw_domain::SecurityClass;
use zw_node::SecurityKeys;

/// Network keys from `[security]`. A malformed key counts as missing.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredKeys {
    present: Vec<SecurityClass>,
}

impl ConfiguredKeys {
    pub fn from_config(config: &SecurityConfig) -> Self {
        let mut present = Vec::new();
        for class in SECURITY_CLASS_ORDER {
            match config.decode(class) {
                Some(Ok(_)) => present.push(class),
                Some(Err(e)) => {
                    tracing::warn!(class = %class, error = %e, "ignoring malformed network key")
                }
                None => {}
            }
        }
        Self { present }
    }

    pub fn has(&self, class: SecurityClass) -> bool {
        self.present.contains(&class)
    }
}

impl SecurityKeys for ConfiguredKeys {
    fn has_s2_keys(&self) -> bool {
        S2_CLASSES.iter().any(|c| self.has(*c))
    }

    fn has_s0_key(&self) -> bool {
        self.has(SecurityClass::S0Legacy)
    }
}
