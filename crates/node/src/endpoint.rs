//! Per-endpoint capability registry.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use zw_domain::{CommandClass, DeviceClass};

/// What is known about one CC on one endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CcInfo {
    #[serde(default)]
    pub is_supported: bool,
    #[serde(default)]
    pub is_controlled: bool,
    #[serde(default)]
    pub secure: bool,
    /// Negotiated version, 0 while unknown.
    #[serde(default)]
    pub version: u8,
}

impl CcInfo {
    pub fn supported() -> Self {
        Self {
            is_supported: true,
            ..Self::default()
        }
    }

    pub fn controlled() -> Self {
        Self {
            is_controlled: true,
            ..Self::default()
        }
    }
}

/// A functional unit of a node. Index 0 is the root endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoint {
    index: u8,
    device_class: Option<DeviceClass>,
    ccs: BTreeMap<CommandClass, CcInfo>,
    interviewed: BTreeSet<CommandClass>,
    failure: Option<String>,
}

impl Endpoint {
    pub fn new(index: u8) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn is_root(&self) -> bool {
        self.index == 0
    }

    pub fn device_class(&self) -> Option<DeviceClass> {
        self.device_class
    }

    pub fn set_device_class(&mut self, class: Option<DeviceClass>) {
        self.device_class = class;
    }

    /// Endpoints other than the root never carry Multi Channel.
    fn accepts(&self, cc: CommandClass) -> bool {
        self.index == 0 || cc != CommandClass::MULTI_CHANNEL
    }

    /// Register `cc` with the given info, replacing what was there.
    /// Returns `false` if the endpoint refuses the CC.
    pub fn add_cc(&mut self, cc: CommandClass, info: CcInfo) -> bool {
        if !self.accepts(cc) {
            tracing::debug!(endpoint = self.index, cc = %cc, "refusing CC on sub-endpoint");
            return false;
        }
        self.ccs.insert(cc, info);
        true
    }

    /// Modify the entry for `cc`, creating an empty one first if needed.
    pub fn update_cc(&mut self, cc: CommandClass, f: impl FnOnce(&mut CcInfo)) -> bool {
        if !self.accepts(cc) {
            return false;
        }
        f(self.ccs.entry(cc).or_default());
        true
    }

    pub fn remove_cc(&mut self, cc: CommandClass) -> Option<CcInfo> {
        self.interviewed.remove(&cc);
        self.ccs.remove(&cc)
    }

    pub fn cc(&self, cc: CommandClass) -> Option<CcInfo> {
        self.ccs.get(&cc).copied()
    }

    pub fn supports_cc(&self, cc: CommandClass) -> bool {
        self.ccs.get(&cc).is_some_and(|i| i.is_supported)
    }

    pub fn controls_cc(&self, cc: CommandClass) -> bool {
        self.ccs.get(&cc).is_some_and(|i| i.is_controlled)
    }

    pub fn is_cc_secure(&self, cc: CommandClass) -> bool {
        self.ccs.get(&cc).is_some_and(|i| i.secure)
    }

    pub fn cc_version(&self, cc: CommandClass) -> u8 {
        self.ccs.get(&cc).map_or(0, |i| i.version)
    }

    /// Supported CCs in ascending id order.
    pub fn supported_ccs(&self) -> Vec<CommandClass> {
        self.ccs
            .iter()
            .filter(|(_, i)| i.is_supported)
            .map(|(cc, _)| *cc)
            .collect()
    }

    pub fn ccs(&self) -> impl Iterator<Item = (CommandClass, CcInfo)> + '_ {
        self.ccs.iter().map(|(cc, i)| (*cc, *i))
    }

    pub fn is_interviewed(&self, cc: CommandClass) -> bool {
        self.interviewed.contains(&cc)
    }

    pub fn mark_interviewed(&mut self, cc: CommandClass) {
        self.interviewed.insert(cc);
    }

    pub fn interviewed(&self) -> impl Iterator<Item = CommandClass> + '_ {
        self.interviewed.iter().copied()
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.failure = Some(reason.into());
    }

    /// Forget every capability. The index stays.
    pub fn clear(&mut self) {
        self.device_class = None;
        self.ccs.clear();
        self.interviewed.clear();
        self.failure = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_entry_means_unsupported() {
        let ep = Endpoint::new(0);
        assert!(!ep.supports_cc(CommandClass::BASIC));
        assert!(!ep.controls_cc(CommandClass::BASIC));
        assert_eq!(ep.cc_version(CommandClass::BASIC), 0);
        assert!(ep.cc(CommandClass::BASIC).is_none());
    }

    #[test]
    fn sub_endpoint_refuses_multi_channel() {
        let mut root = Endpoint::new(0);
        assert!(root.add_cc(CommandClass::MULTI_CHANNEL, CcInfo::supported()));
        assert!(root.supports_cc(CommandClass::MULTI_CHANNEL));

        let mut ep = Endpoint::new(2);
        assert!(!ep.add_cc(CommandClass::MULTI_CHANNEL, CcInfo::supported()));
        assert!(!ep.update_cc(CommandClass::MULTI_CHANNEL, |i| i.is_supported = true));
        assert!(!ep.supports_cc(CommandClass::MULTI_CHANNEL));
        assert!(ep.add_cc(CommandClass::SWITCH_BINARY, CcInfo::supported()));
    }

    #[test]
    fn update_creates_and_merges() {
        let mut ep = Endpoint::new(0);
        ep.update_cc(CommandClass::SECURITY_2, |i| i.secure = true);
        let info = ep.cc(CommandClass::SECURITY_2).unwrap();
        assert!(info.secure);
        assert!(!info.is_supported);

        ep.update_cc(CommandClass::SECURITY_2, |i| i.is_supported = true);
        let info = ep.cc(CommandClass::SECURITY_2).unwrap();
        assert!(info.secure && info.is_supported);
    }

    #[test]
    fn remove_forgets_interview_flag() {
        let mut ep = Endpoint::new(1);
        ep.add_cc(CommandClass::METER, CcInfo::supported());
        ep.mark_interviewed(CommandClass::METER);
        assert!(ep.is_interviewed(CommandClass::METER));
        ep.remove_cc(CommandClass::METER);
        assert!(!ep.is_interviewed(CommandClass::METER));
        assert!(ep.supported_ccs().is_empty());
    }

    #[test]
    fn cc_info_json_is_camel_case() {
        let json = serde_json::to_value(CcInfo {
            is_supported: true,
            is_controlled: false,
            secure: true,
            version: 3,
        })
        .unwrap();
        assert_eq!(json["isSupported"], true);
        assert_eq!(json["isControlled"], false);
        assert_eq!(json["version"], 3);
    }
}
