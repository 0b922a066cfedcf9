use serde::{Deserialize, Serialize};

use crate::security::SecurityClass;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Network keys
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Network keys, one per security class, as 32 hex characters (16 bytes).
///
/// Only the presence of a key matters to the interview; the keys themselves
/// are handed to the encapsulation layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub s2_access_control: Option<String>,
    #[serde(default)]
    pub s2_authenticated: Option<String>,
    #[serde(default)]
    pub s2_unauthenticated: Option<String>,
    #[serde(default)]
    pub s0_legacy: Option<String>,
}

impl SecurityConfig {
    pub const KEY_LEN: usize = 16;

    pub fn key_for(&self, class: SecurityClass) -> Option<&str> {
        match class {
            SecurityClass::S2AccessControl => self.s2_access_control.as_deref(),
            SecurityClass::S2Authenticated => self.s2_authenticated.as_deref(),
            SecurityClass::S2Unauthenticated => self.s2_unauthenticated.as_deref(),
            SecurityClass::S0Legacy => self.s0_legacy.as_deref(),
        }
    }

    /// TOML field holding the key for `class`.
    pub fn field_name(class: SecurityClass) -> &'static str {
        match class {
            SecurityClass::S2AccessControl => "s2_access_control",
            SecurityClass::S2Authenticated => "s2_authenticated",
            SecurityClass::S2Unauthenticated => "s2_unauthenticated",
            SecurityClass::S0Legacy => "s0_legacy",
        }
    }

    /// Decode a configured key. `None` when unset, `Err` when malformed.
    pub fn decode(&self, class: SecurityClass) -> Option<Result<Vec<u8>, String>> {
        let raw = self.key_for(class)?;
        Some(
            hex::decode(raw.trim())
                .map_err(|e| format!("not valid hex: {e}"))
                .and_then(|bytes| {
                    if bytes.len() == Self::KEY_LEN {
                        Ok(bytes)
                    } else {
                        Err(format!(
                            "expected {} bytes, got {}",
                            Self::KEY_LEN,
                            bytes.len()
                        ))
                    }
                }),
        )
    }

    /// Whether any S2 key is configured.
    pub fn has_s2(&self) -> bool {
        self.s2_access_control.is_some()
            || self.s2_authenticated.is_some()
            || self.s2_unauthenticated.is_some()
    }

    pub fn has_s0(&self) -> bool {
        self.s0_legacy.is_some()
    }
}
