//! Command class identifiers and the catalog of CCs this driver can interview.
//!
//! The catalog maps a CC identifier to a static [`CcDescriptor`] that tells
//! the interview scheduler which other CCs must be interviewed first and how
//! the CC is classified (application layer, actuator).

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A Z-Wave command class identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandClass(pub u8);

impl CommandClass {
    pub const BASIC: Self = Self(0x20);
    pub const SWITCH_BINARY: Self = Self(0x25);
    pub const SWITCH_MULTILEVEL: Self = Self(0x26);
    pub const SCENE_ACTIVATION: Self = Self(0x2b);
    pub const SENSOR_BINARY: Self = Self(0x30);
    pub const SENSOR_MULTILEVEL: Self = Self(0x31);
    pub const METER: Self = Self(0x32);
    pub const SWITCH_COLOR: Self = Self(0x33);
    pub const THERMOSTAT_MODE: Self = Self(0x40);
    pub const THERMOSTAT_OPERATING_STATE: Self = Self(0x42);
    pub const THERMOSTAT_SETPOINT: Self = Self(0x43);
    pub const THERMOSTAT_FAN_MODE: Self = Self(0x44);
    pub const TRANSPORT_SERVICE: Self = Self(0x55);
    pub const CRC_16_ENCAP: Self = Self(0x56);
    pub const ASSOCIATION_GROUP_INFO: Self = Self(0x59);
    pub const DEVICE_RESET_LOCALLY: Self = Self(0x5a);
    pub const CENTRAL_SCENE: Self = Self(0x5b);
    pub const ZWAVE_PLUS_INFO: Self = Self(0x5e);
    pub const MULTI_CHANNEL: Self = Self(0x60);
    pub const DOOR_LOCK: Self = Self(0x62);
    pub const USER_CODE: Self = Self(0x63);
    pub const BARRIER_OPERATOR: Self = Self(0x66);
    pub const WINDOW_COVERING: Self = Self(0x6a);
    pub const SUPERVISION: Self = Self(0x6c);
    pub const ENTRY_CONTROL: Self = Self(0x6f);
    pub const CONFIGURATION: Self = Self(0x70);
    pub const NOTIFICATION: Self = Self(0x71);
    pub const MANUFACTURER_SPECIFIC: Self = Self(0x72);
    pub const POWERLEVEL: Self = Self(0x73);
    pub const PROTECTION: Self = Self(0x75);
    pub const NODE_NAMING: Self = Self(0x77);
    pub const SOUND_SWITCH: Self = Self(0x79);
    pub const FIRMWARE_UPDATE_MD: Self = Self(0x7a);
    pub const BATTERY: Self = Self(0x80);
    pub const CLOCK: Self = Self(0x81);
    pub const WAKE_UP: Self = Self(0x84);
    pub const ASSOCIATION: Self = Self(0x85);
    pub const VERSION: Self = Self(0x86);
    pub const INDICATOR: Self = Self(0x87);
    pub const MULTI_CHANNEL_ASSOCIATION: Self = Self(0x8e);
    pub const SECURITY: Self = Self(0x98);
    pub const ALARM_SENSOR: Self = Self(0x9c);
    pub const SECURITY_2: Self = Self(0x9f);

    /// Stable identifier used in persisted keys, e.g. `0x86`.
    pub fn key(self) -> String {
        format!("{:#04x}", self.0)
    }

    /// Parse the persisted `0x..` form back into an identifier.
    pub fn from_key(key: &str) -> Option<Self> {
        let hex = key.strip_prefix("0x")?;
        u8::from_str_radix(hex, 16).ok().map(Self)
    }

    /// Whether this is one of the two encapsulation-level security CCs.
    pub fn is_security(self) -> bool {
        self == Self::SECURITY || self == Self::SECURITY_2
    }
}

impl fmt::Display for CommandClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match STANDARD.iter().find(|d| d.0 == *self) {
            Some(entry) => write!(f, "{} ({})", entry.1, self.key()),
            None => write!(f, "Unknown CC ({})", self.key()),
        }
    }
}

/// Static description of a command class the driver knows how to interview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CcDescriptor {
    pub cc: CommandClass,
    pub name: &'static str,
    /// CCs whose interview must complete before this one starts.
    pub requires: Vec<CommandClass>,
    /// Application-layer CC. Deferred on the root endpoint until every other
    /// endpoint has been interviewed.
    pub application: bool,
    /// Actuator CC. Its presence hides the Basic CC.
    pub actuator: bool,
}

impl CcDescriptor {
    /// A descriptor with the default requirement (Version) and no flags.
    pub fn new(cc: CommandClass, name: &'static str) -> Self {
        Self {
            cc,
            name,
            requires: vec![CommandClass::VERSION],
            application: false,
            actuator: false,
        }
    }

    pub fn requires(mut self, ccs: &[CommandClass]) -> Self {
        self.requires = ccs.to_vec();
        self
    }

    pub fn also_requires(mut self, ccs: &[CommandClass]) -> Self {
        for cc in ccs {
            if !self.requires.contains(cc) {
                self.requires.push(*cc);
            }
        }
        self
    }

    pub fn application(mut self) -> Self {
        self.application = true;
        self
    }

    pub fn actuator(mut self) -> Self {
        self.actuator = true;
        self.application = true;
        self
    }
}

#[derive(Clone, Copy)]
enum Layer {
    Application,
    Actuator,
    Infrastructure,
}

const STANDARD: &[(CommandClass, &str, Layer)] = &[
    (CommandClass::BASIC, "Basic", Layer::Application),
    (CommandClass::SWITCH_BINARY, "Binary Switch", Layer::Actuator),
    (CommandClass::SWITCH_MULTILEVEL, "Multilevel Switch", Layer::Actuator),
    (CommandClass::SCENE_ACTIVATION, "Scene Activation", Layer::Application),
    (CommandClass::SENSOR_BINARY, "Binary Sensor", Layer::Application),
    (CommandClass::SENSOR_MULTILEVEL, "Multilevel Sensor", Layer::Application),
    (CommandClass::METER, "Meter", Layer::Application),
    (CommandClass::SWITCH_COLOR, "Color Switch", Layer::Actuator),
    (CommandClass::THERMOSTAT_MODE, "Thermostat Mode", Layer::Actuator),
    (CommandClass::THERMOSTAT_OPERATING_STATE, "Thermostat Operating State", Layer::Application),
    (CommandClass::THERMOSTAT_SETPOINT, "Thermostat Setpoint", Layer::Actuator),
    (CommandClass::THERMOSTAT_FAN_MODE, "Thermostat Fan Mode", Layer::Application),
    (CommandClass::TRANSPORT_SERVICE, "Transport Service", Layer::Infrastructure),
    (CommandClass::CRC_16_ENCAP, "CRC-16 Encapsulation", Layer::Infrastructure),
    (CommandClass::ASSOCIATION_GROUP_INFO, "Association Group Information", Layer::Infrastructure),
    (CommandClass::DEVICE_RESET_LOCALLY, "Device Reset Locally", Layer::Infrastructure),
    (CommandClass::CENTRAL_SCENE, "Central Scene", Layer::Application),
    (CommandClass::ZWAVE_PLUS_INFO, "Z-Wave Plus Info", Layer::Infrastructure),
    (CommandClass::MULTI_CHANNEL, "Multi Channel", Layer::Infrastructure),
    (CommandClass::DOOR_LOCK, "Door Lock", Layer::Actuator),
    (CommandClass::USER_CODE, "User Code", Layer::Infrastructure),
    (CommandClass::BARRIER_OPERATOR, "Barrier Operator", Layer::Actuator),
    (CommandClass::WINDOW_COVERING, "Window Covering", Layer::Actuator),
    (CommandClass::SUPERVISION, "Supervision", Layer::Infrastructure),
    (CommandClass::ENTRY_CONTROL, "Entry Control", Layer::Application),
    (CommandClass::CONFIGURATION, "Configuration", Layer::Infrastructure),
    (CommandClass::NOTIFICATION, "Notification", Layer::Application),
    (CommandClass::MANUFACTURER_SPECIFIC, "Manufacturer Specific", Layer::Infrastructure),
    (CommandClass::POWERLEVEL, "Powerlevel", Layer::Infrastructure),
    (CommandClass::PROTECTION, "Protection", Layer::Application),
    (CommandClass::NODE_NAMING, "Node Naming and Location", Layer::Infrastructure),
    (CommandClass::SOUND_SWITCH, "Sound Switch", Layer::Actuator),
    (CommandClass::FIRMWARE_UPDATE_MD, "Firmware Update Meta Data", Layer::Infrastructure),
    (CommandClass::BATTERY, "Battery", Layer::Infrastructure),
    (CommandClass::CLOCK, "Clock", Layer::Infrastructure),
    (CommandClass::WAKE_UP, "Wake Up", Layer::Infrastructure),
    (CommandClass::ASSOCIATION, "Association", Layer::Infrastructure),
    (CommandClass::VERSION, "Version", Layer::Infrastructure),
    (CommandClass::INDICATOR, "Indicator", Layer::Application),
    (CommandClass::MULTI_CHANNEL_ASSOCIATION, "Multi Channel Association", Layer::Infrastructure),
    (CommandClass::SECURITY, "Security", Layer::Infrastructure),
    (CommandClass::ALARM_SENSOR, "Alarm Sensor", Layer::Application),
    (CommandClass::SECURITY_2, "Security 2", Layer::Infrastructure),
];

/// Lookup table from CC identifier to descriptor, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct CcCatalog {
    by_id: HashMap<CommandClass, CcDescriptor>,
}

impl CcCatalog {
    /// An empty catalog. Mostly useful for tests that register their own CCs.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every CC the driver ships an interview procedure for.
    pub fn standard() -> Self {
        use CommandClass as Cc;

        let mut catalog = Self::empty();
        for &(cc, name, layer) in STANDARD {
            let descriptor = CcDescriptor::new(cc, name);
            catalog.register(match layer {
                Layer::Actuator => descriptor.actuator(),
                Layer::Application => descriptor.application(),
                Layer::Infrastructure => descriptor,
            });
        }

        // Manufacturer Specific goes first, Version right after it.
        catalog.amend(Cc::MANUFACTURER_SPECIFIC, |d| d.requires(&[]));
        catalog.amend(Cc::VERSION, |d| d.requires(&[Cc::MANUFACTURER_SPECIFIC]));
        catalog.amend(Cc::SECURITY, |d| d.requires(&[]));
        catalog.amend(Cc::SECURITY_2, |d| d.requires(&[]));

        // Lifeline setup needs endpoint information and the Z-Wave+ role.
        catalog.amend(Cc::ASSOCIATION, |d| {
            d.also_requires(&[Cc::ZWAVE_PLUS_INFO, Cc::MULTI_CHANNEL])
        });
        catalog.amend(Cc::MULTI_CHANNEL_ASSOCIATION, |d| {
            d.also_requires(&[Cc::ZWAVE_PLUS_INFO, Cc::MULTI_CHANNEL, Cc::ASSOCIATION])
        });
        catalog.amend(Cc::ASSOCIATION_GROUP_INFO, |d| {
            d.also_requires(&[Cc::ASSOCIATION, Cc::MULTI_CHANNEL_ASSOCIATION])
        });
        catalog.amend(Cc::CENTRAL_SCENE, |d| {
            d.also_requires(&[Cc::ASSOCIATION, Cc::MULTI_CHANNEL_ASSOCIATION])
        });
        catalog.amend(Cc::NOTIFICATION, |d| {
            d.also_requires(&[Cc::ASSOCIATION_GROUP_INFO])
        });
        catalog.amend(Cc::THERMOSTAT_SETPOINT, |d| {
            d.also_requires(&[Cc::THERMOSTAT_MODE])
        });
        catalog.amend(Cc::WAKE_UP, |d| d.also_requires(&[Cc::MANUFACTURER_SPECIFIC]));

        catalog
    }

    /// Register or replace a descriptor.
    pub fn register(&mut self, descriptor: CcDescriptor) -> &mut Self {
        self.by_id.insert(descriptor.cc, descriptor);
        self
    }

    fn amend(&mut self, cc: CommandClass, f: impl FnOnce(CcDescriptor) -> CcDescriptor) {
        if let Some(existing) = self.by_id.remove(&cc) {
            self.by_id.insert(cc, f(existing));
        }
    }

    pub fn get(&self, cc: CommandClass) -> Option<&CcDescriptor> {
        self.by_id.get(&cc)
    }

    pub fn is_implemented(&self, cc: CommandClass) -> bool {
        self.by_id.contains_key(&cc)
    }

    pub fn is_application(&self, cc: CommandClass) -> bool {
        self.get(cc).is_some_and(|d| d.application)
    }

    pub fn is_actuator(&self, cc: CommandClass) -> bool {
        self.get(cc).is_some_and(|d| d.actuator)
    }

    /// Declared requirements of `cc`; empty for CCs the catalog doesn't know.
    pub fn requirements(&self, cc: CommandClass) -> &[CommandClass] {
        self.get(cc).map(|d| d.requires.as_slice()).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_roundtrips_through_hex() {
        assert_eq!(CommandClass::VERSION.key(), "0x86");
        assert_eq!(CommandClass::BASIC.key(), "0x20");
        assert_eq!(CommandClass::from_key("0x9f"), Some(CommandClass::SECURITY_2));
        assert_eq!(CommandClass::from_key("9f"), None);
    }

    #[test]
    fn display_uses_catalog_name() {
        assert_eq!(CommandClass::WAKE_UP.to_string(), "Wake Up (0x84)");
        assert_eq!(CommandClass(0xee).to_string(), "Unknown CC (0xee)");
    }

    #[test]
    fn standard_catalog_requirements() {
        let catalog = CcCatalog::standard();
        assert!(catalog.requirements(CommandClass::MANUFACTURER_SPECIFIC).is_empty());
        assert_eq!(
            catalog.requirements(CommandClass::VERSION),
            &[CommandClass::MANUFACTURER_SPECIFIC]
        );
        let mca = catalog.requirements(CommandClass::MULTI_CHANNEL_ASSOCIATION);
        assert!(mca.contains(&CommandClass::ASSOCIATION));
        assert!(mca.contains(&CommandClass::VERSION));
        assert_eq!(
            catalog.requirements(CommandClass::BATTERY),
            &[CommandClass::VERSION]
        );
    }

    #[test]
    fn actuators_are_application_ccs() {
        let catalog = CcCatalog::standard();
        assert!(catalog.is_actuator(CommandClass::SWITCH_BINARY));
        assert!(catalog.is_application(CommandClass::SWITCH_BINARY));
        assert!(catalog.is_application(CommandClass::BASIC));
        assert!(!catalog.is_actuator(CommandClass::BASIC));
        assert!(!catalog.is_application(CommandClass::ASSOCIATION));
        assert!(!catalog.is_implemented(CommandClass(0xee)));
    }

    #[test]
    fn every_standard_entry_keeps_its_layer() {
        let catalog = CcCatalog::standard();
        assert_eq!(catalog.len(), STANDARD.len());
        for &(cc, _, layer) in STANDARD {
            let (application, actuator) = match layer {
                Layer::Application => (true, false),
                Layer::Actuator => (true, true),
                Layer::Infrastructure => (false, false),
            };
            assert_eq!(catalog.is_application(cc), application, "{cc}");
            assert_eq!(catalog.is_actuator(cc), actuator, "{cc}");
        }
    }
}
