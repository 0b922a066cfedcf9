use serde::{Deserialize, Serialize};

use crate::command_class::CommandClass;
use crate::node::FirmwareVersion;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Device profiles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Static corrections for one device model, matched on the manufacturer
/// identity and an optional firmware range.
///
/// ```toml
/// [[device_profiles]]
/// label = "Dimmer 2"
/// manufacturer_id = 0x010f
/// product_type = 0x0102
/// product_id = 0x1000
/// firmware_min = "3.0"
/// treat_basic_set_as_event = true
///
/// [[device_profiles.remove]]
/// endpoint = 0
/// cc = 0x32
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceProfile {
    #[serde(default)]
    pub label: String,
    pub manufacturer_id: u16,
    pub product_type: u16,
    pub product_id: u16,
    /// Inclusive lower bound, `major.minor`.
    #[serde(default)]
    pub firmware_min: Option<String>,
    /// Inclusive upper bound, `major.minor`.
    #[serde(default)]
    pub firmware_max: Option<String>,
    /// Keep the Basic CC even when actuator CCs exist; Basic Set reports are
    /// surfaced as events instead of being mapped onto another CC.
    #[serde(default)]
    pub treat_basic_set_as_event: bool,
    #[serde(default)]
    pub add: Vec<CcAddition>,
    #[serde(default)]
    pub remove: Vec<CcRemoval>,
}

/// A CC the device supports but does not advertise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CcAddition {
    #[serde(default)]
    pub endpoint: u8,
    pub cc: CommandClass,
    #[serde(default)]
    pub version: Option<u8>,
    #[serde(default)]
    pub secure: Option<bool>,
    #[serde(default)]
    pub controlled: bool,
}

/// A CC the device advertises but does not (correctly) support.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CcRemoval {
    #[serde(default)]
    pub endpoint: u8,
    pub cc: CommandClass,
}

impl DeviceProfile {
    pub fn firmware_range(&self) -> Result<(Option<FirmwareVersion>, Option<FirmwareVersion>), String> {
        let min = self.firmware_min.as_deref().map(str::parse).transpose()?;
        let max = self.firmware_max.as_deref().map(str::parse).transpose()?;
        Ok((min, max))
    }

    /// Whether this profile applies to the given identity. A profile with a
    /// firmware range never matches an unknown firmware version.
    pub fn matches(
        &self,
        manufacturer_id: u16,
        product_type: u16,
        product_id: u16,
        firmware: Option<FirmwareVersion>,
    ) -> bool {
        if self.manufacturer_id != manufacturer_id
            || self.product_type != product_type
            || self.product_id != product_id
        {
            return false;
        }
        let Ok((min, max)) = self.firmware_range() else {
            return false;
        };
        if min.is_none() && max.is_none() {
            return true;
        }
        let Some(fw) = firmware else {
            return false;
        };
        min.map_or(true, |m| fw >= m) && max.map_or(true, |m| fw <= m)
    }
}
