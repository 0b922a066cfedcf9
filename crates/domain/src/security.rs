use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Security classes a node can be granted at inclusion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SecurityClass {
    #[serde(rename = "S2_AccessControl")]
    S2AccessControl,
    #[serde(rename = "S2_Authenticated")]
    S2Authenticated,
    #[serde(rename = "S2_Unauthenticated")]
    S2Unauthenticated,
    #[serde(rename = "S0_Legacy")]
    S0Legacy,
}

/// Strongest first.
pub const SECURITY_CLASS_ORDER: [SecurityClass; 4] = [
    SecurityClass::S2AccessControl,
    SecurityClass::S2Authenticated,
    SecurityClass::S2Unauthenticated,
    SecurityClass::S0Legacy,
];

/// The S2 family, strongest first.
pub const S2_CLASSES: [SecurityClass; 3] = [
    SecurityClass::S2AccessControl,
    SecurityClass::S2Authenticated,
    SecurityClass::S2Unauthenticated,
];

impl SecurityClass {
    pub fn is_s2(self) -> bool {
        !matches!(self, Self::S0Legacy)
    }

    /// Name used in persisted keys (`securityClasses.<name>`).
    pub fn key(self) -> &'static str {
        match self {
            Self::S2AccessControl => "S2_AccessControl",
            Self::S2Authenticated => "S2_Authenticated",
            Self::S2Unauthenticated => "S2_Unauthenticated",
            Self::S0Legacy => "S0_Legacy",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        SECURITY_CLASS_ORDER.into_iter().find(|c| c.key() == key)
    }
}

impl fmt::Display for SecurityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Result of the "highest granted class" computation.
///
/// `Undetermined` and `None` are different answers: the former means at least
/// one class has not been probed yet, the latter that every class is known and
/// none was granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighestGrant {
    Undetermined,
    None,
    Class(SecurityClass),
}

impl HighestGrant {
    pub fn class(self) -> Option<SecurityClass> {
        match self {
            Self::Class(c) => Some(c),
            _ => None,
        }
    }

    /// Undetermined, or the given family is the highest granted one.
    pub fn may_use_s2(self) -> bool {
        match self {
            Self::Undetermined => true,
            Self::Class(c) => c.is_s2(),
            Self::None => false,
        }
    }

    pub fn may_use_s0(self) -> bool {
        matches!(
            self,
            Self::Undetermined | Self::Class(SecurityClass::S0Legacy)
        )
    }
}

/// Tri-state grant ledger: absent = not yet known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGrants {
    grants: BTreeMap<SecurityClass, bool>,
}

impl SecurityGrants {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Some(true)` granted, `Some(false)` not granted, `None` unknown.
    pub fn get(&self, class: SecurityClass) -> Option<bool> {
        self.grants.get(&class).copied()
    }

    pub fn set(&mut self, class: SecurityClass, granted: bool) {
        self.grants.insert(class, granted);
    }

    pub fn is_known(&self, class: SecurityClass) -> bool {
        self.grants.contains_key(&class)
    }

    pub fn highest(&self) -> HighestGrant {
        if SECURITY_CLASS_ORDER.iter().any(|c| !self.is_known(*c)) {
            return HighestGrant::Undetermined;
        }
        SECURITY_CLASS_ORDER
            .into_iter()
            .find(|c| self.get(*c) == Some(true))
            .map(HighestGrant::Class)
            .unwrap_or(HighestGrant::None)
    }

    /// Turn every unknown class in `classes` into "not granted".
    /// Returns the classes that changed.
    pub fn collapse_unknown(&mut self, classes: &[SecurityClass]) -> Vec<SecurityClass> {
        let mut changed = Vec::new();
        for class in classes {
            if !self.is_known(*class) {
                self.grants.insert(*class, false);
                changed.push(*class);
            }
        }
        changed
    }

    pub fn iter(&self) -> impl Iterator<Item = (SecurityClass, bool)> + '_ {
        self.grants.iter().map(|(c, g)| (*c, *g))
    }

    pub fn clear(&mut self) {
        self.grants.clear();
    }
}
