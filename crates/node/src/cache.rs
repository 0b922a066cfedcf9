//! Durable node state on top of a [`ValueStore`].
//!
//! Layout, all under `node.<id>.`:
//!
//! | key | value |
//! |-----|-------|
//! | `interviewStage` | stage name |
//! | `deviceClass` | `{basic, generic, specific}` |
//! | `isListening`, `isFrequentListening`, `isRouting` | bool |
//! | `protocolVersion` | number |
//! | `securityClasses.<class>` | bool |
//! | `manufacturer` | `{manufacturer_id, product_type, product_id}` |
//! | `firmwareVersion` | `"major.minor"` |
//! | `endpoints` | indices of the non-root endpoints |
//! | `endpoint.<n>.deviceClass` | `{basic, generic, specific}` |
//! | `endpoint.<n>.commandClass.<0xNN>` | `{isSupported, isControlled, secure, version}` |
//! | `endpoint.<n>.interviewComplete.<0xNN>` | `true` |

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use zw_domain::error::{Error, Result};
use zw_domain::{CommandClass, DeviceClass, FirmwareVersion, InterviewStage, NodeId, SecurityClass};
use zw_protocol::ManufacturerInfo;

use crate::endpoint::{CcInfo, Endpoint};
use crate::node::Node;
use crate::store::ValueStore;

#[derive(Clone)]
pub struct NodeCache {
    store: Arc<dyn ValueStore>,
}

impl NodeCache {
    pub fn new(store: Arc<dyn ValueStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ValueStore> {
        &self.store
    }

    pub fn key(node: NodeId, property: &str) -> String {
        format!("node.{node}.{property}")
    }

    fn endpoint_key(node: NodeId, endpoint: u8, property: &str) -> String {
        Self::key(node, &format!("endpoint.{endpoint}.{property}"))
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.store.set(key, serde_json::to_value(value)?)
    }

    fn write_opt<T: Serialize>(&self, key: &str, value: Option<&T>) -> Result<()> {
        match value {
            Some(v) => self.write(key, v),
            None => self.store.remove(key),
        }
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.store.get(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(key, error = %e, "ignoring malformed cached value");
                None
            }
        }
    }

    // ── Writers ───────────────────────────────────────────────────────

    pub fn save_stage(&self, node: NodeId, stage: InterviewStage) -> Result<()> {
        self.write(&Self::key(node, "interviewStage"), &stage)
    }

    pub fn save_protocol_info(&self, node: &Node) -> Result<()> {
        let id = node.id();
        self.write_opt(&Self::key(id, "deviceClass"), node.device_class().as_ref())?;
        self.write_opt(&Self::key(id, "isListening"), node.is_listening().as_ref())?;
        self.write_opt(
            &Self::key(id, "isFrequentListening"),
            node.is_frequent_listening().as_ref(),
        )?;
        self.write_opt(&Self::key(id, "isRouting"), node.is_routing().as_ref())?;
        self.write_opt(
            &Self::key(id, "protocolVersion"),
            node.protocol_version().as_ref(),
        )
    }

    pub fn save_security_class(&self, node: NodeId, class: SecurityClass, granted: bool) -> Result<()> {
        self.write(
            &Self::key(node, &format!("securityClasses.{}", class.key())),
            &granted,
        )
    }

    pub fn save_security(&self, node: &Node) -> Result<()> {
        for (class, granted) in node.security().iter() {
            self.save_security_class(node.id(), class, granted)?;
        }
        Ok(())
    }

    pub fn save_identity(&self, node: &Node) -> Result<()> {
        let id = node.id();
        self.write_opt(&Self::key(id, "manufacturer"), node.manufacturer().as_ref())?;
        self.write_opt(
            &Self::key(id, "firmwareVersion"),
            node.firmware().map(|f| f.to_string()).as_ref(),
        )
    }

    pub fn save_endpoint_list(&self, node: &Node) -> Result<()> {
        let indices: Vec<u8> = node
            .endpoint_indices()
            .into_iter()
            .filter(|i| *i != 0)
            .collect();
        if indices.is_empty() {
            self.store.remove(&Self::key(node.id(), "endpoints"))
        } else {
            self.write(&Self::key(node.id(), "endpoints"), &indices)
        }
    }

    /// Write one endpoint's registry, dropping entries it no longer has.
    pub fn save_endpoint(&self, node: NodeId, ep: &Endpoint) -> Result<()> {
        let index = ep.index();
        if !ep.is_root() {
            self.write_opt(
                &Self::endpoint_key(node, index, "deviceClass"),
                ep.device_class().as_ref(),
            )?;
        }

        let cc_prefix = Self::endpoint_key(node, index, "commandClass.");
        let mut stale: BTreeSet<String> = self.store.keys_with_prefix(&cc_prefix).into_iter().collect();
        for (cc, info) in ep.ccs() {
            let key = format!("{cc_prefix}{}", cc.key());
            stale.remove(&key);
            self.write(&key, &info)?;
        }

        let done_prefix = Self::endpoint_key(node, index, "interviewComplete.");
        stale.extend(self.store.keys_with_prefix(&done_prefix));
        for cc in ep.interviewed() {
            let key = format!("{done_prefix}{}", cc.key());
            stale.remove(&key);
            self.write(&key, &true)?;
        }

        for key in stale {
            self.store.remove(&key)?;
        }
        Ok(())
    }

    /// Write everything known about `node`.
    pub fn save_node(&self, node: &Node) -> Result<()> {
        self.save_stage(node.id(), node.stage())?;
        self.save_protocol_info(node)?;
        self.save_security(node)?;
        self.save_identity(node)?;
        self.save_endpoint_list(node)?;
        for ep in node.endpoints() {
            self.save_endpoint(node.id(), ep)?;
        }
        Ok(())
    }

    /// Forget capabilities and identity after an interview reset. Protocol
    /// info and security grants stay.
    pub fn clear_capabilities(&self, node: NodeId) -> Result<()> {
        self.store.remove_prefix(&Self::key(node, "endpoint."))?;
        self.store.remove(&Self::key(node, "endpoints"))?;
        self.store.remove(&Self::key(node, "manufacturer"))?;
        self.store.remove(&Self::key(node, "firmwareVersion"))?;
        self.save_stage(node, InterviewStage::None)
    }

    /// Remove every key of `node`.
    pub fn forget(&self, node: NodeId) -> Result<usize> {
        self.store.remove_prefix(&format!("node.{node}."))
    }

    // ── Readers ───────────────────────────────────────────────────────

    /// Ids of every node with a recorded interview stage.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .store
            .keys_with_prefix("node.")
            .iter()
            .filter_map(|key| {
                let rest = key.strip_prefix("node.")?;
                let (id, property) = rest.split_once('.')?;
                (property == "interviewStage").then(|| id.parse().ok().map(NodeId))?
            })
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Rebuild a node from the cache. `None` when nothing was recorded.
    pub fn load(&self, id: NodeId) -> Result<Option<Node>> {
        let Some(stage) = self.read::<InterviewStage>(&Self::key(id, "interviewStage")) else {
            return Ok(None);
        };

        let mut node = Node::new(id);
        node.advance_stage(stage);
        node.set_device_class(self.read::<DeviceClass>(&Self::key(id, "deviceClass")));
        node.set_listening(
            self.read(&Self::key(id, "isListening")),
            self.read(&Self::key(id, "isFrequentListening")),
            self.read(&Self::key(id, "isRouting")),
        );
        node.set_protocol_version(self.read(&Self::key(id, "protocolVersion")));

        for key in self.store.keys_with_prefix(&Self::key(id, "securityClasses.")) {
            let Some(class) = key.rsplit('.').next().and_then(SecurityClass::from_key) else {
                continue;
            };
            if let Some(granted) = self.read::<bool>(&key) {
                node.security_mut().set(class, granted);
            }
        }

        node.set_manufacturer(self.read::<ManufacturerInfo>(&Self::key(id, "manufacturer")));
        let firmware = self
            .read::<String>(&Self::key(id, "firmwareVersion"))
            .map(|raw| raw.parse::<FirmwareVersion>())
            .transpose()
            .map_err(|e| Error::Store(format!("node {id} firmwareVersion: {e}")))?;
        node.set_firmware(firmware);

        let mut indices = vec![0u8];
        indices.extend(self.read::<Vec<u8>>(&Self::key(id, "endpoints")).unwrap_or_default());
        for index in indices {
            let device_class = self.read::<DeviceClass>(&Self::endpoint_key(id, index, "deviceClass"));
            let ccs = self.read_ccs(id, index);
            let done = self.read_interviewed(id, index);
            let ep = node.ensure_endpoint(index);
            if index != 0 {
                ep.set_device_class(device_class);
            }
            for (cc, info) in ccs {
                ep.add_cc(cc, info);
            }
            for cc in done {
                ep.mark_interviewed(cc);
            }
        }

        Ok(Some(node))
    }

    fn read_ccs(&self, id: NodeId, index: u8) -> Vec<(CommandClass, CcInfo)> {
        self.store
            .keys_with_prefix(&Self::endpoint_key(id, index, "commandClass."))
            .into_iter()
            .filter_map(|key| {
                let cc = key.rsplit('.').next().and_then(CommandClass::from_key)?;
                Some((cc, self.read::<CcInfo>(&key)?))
            })
            .collect()
    }

    fn read_interviewed(&self, id: NodeId, index: u8) -> Vec<CommandClass> {
        self.store
            .keys_with_prefix(&Self::endpoint_key(id, index, "interviewComplete."))
            .into_iter()
            .filter(|key| self.store.get(key) == Some(Value::Bool(true)))
            .filter_map(|key| key.rsplit('.').next().and_then(CommandClass::from_key))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn cache() -> (NodeCache, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (NodeCache::new(store.clone()), store)
    }

    #[test]
    fn keys_use_documented_layout() {
        let (cache, store) = cache();
        let mut node = Node::new(NodeId(12));
        node.advance_stage(InterviewStage::NodeInfo);
        node.security_mut().set(SecurityClass::S2Authenticated, true);
        node.root_mut().add_cc(
            CommandClass::VERSION,
            CcInfo {
                is_supported: true,
                version: 3,
                ..CcInfo::default()
            },
        );
        node.root_mut().mark_interviewed(CommandClass::VERSION);
        cache.save_node(&node).unwrap();

        assert_eq!(store.get("node.12.interviewStage"), Some(json!("NodeInfo")));
        assert_eq!(
            store.get("node.12.securityClasses.S2_Authenticated"),
            Some(json!(true))
        );
        assert_eq!(
            store.get("node.12.endpoint.0.commandClass.0x86"),
            Some(json!({"isSupported": true, "isControlled": false, "secure": false, "version": 3}))
        );
        assert_eq!(
            store.get("node.12.endpoint.0.interviewComplete.0x86"),
            Some(json!(true))
        );
    }

    #[test]
    fn load_restores_what_was_saved() {
        let (cache, _) = cache();
        let mut node = Node::new(NodeId(4));
        node.advance_stage(InterviewStage::Complete);
        node.set_listening(Some(false), Some(false), Some(true));
        node.set_firmware(Some(FirmwareVersion::new(2, 11)));
        node.ensure_endpoint(2)
            .add_cc(CommandClass::SWITCH_BINARY, CcInfo::supported());
        cache.save_node(&node).unwrap();

        let loaded = cache.load(NodeId(4)).unwrap().unwrap();
        assert_eq!(loaded.stage(), InterviewStage::Complete);
        assert!(loaded.can_sleep());
        assert_eq!(loaded.firmware(), Some(FirmwareVersion::new(2, 11)));
        assert_eq!(loaded.endpoint_indices(), vec![0, 2]);
        assert!(loaded
            .endpoint(2)
            .unwrap()
            .supports_cc(CommandClass::SWITCH_BINARY));
        assert_eq!(cache.node_ids(), vec![NodeId(4)]);
    }

    #[test]
    fn save_endpoint_drops_removed_entries() {
        let (cache, store) = cache();
        let mut ep = Endpoint::new(0);
        ep.add_cc(CommandClass::BASIC, CcInfo::supported());
        ep.add_cc(CommandClass::METER, CcInfo::supported());
        ep.mark_interviewed(CommandClass::METER);
        cache.save_endpoint(NodeId(3), &ep).unwrap();

        ep.remove_cc(CommandClass::METER);
        cache.save_endpoint(NodeId(3), &ep).unwrap();
        assert!(store.get("node.3.endpoint.0.commandClass.0x32").is_none());
        assert!(store.get("node.3.endpoint.0.interviewComplete.0x32").is_none());
        assert!(store.get("node.3.endpoint.0.commandClass.0x20").is_some());
    }

    #[test]
    fn clear_capabilities_resets_stage() {
        let (cache, store) = cache();
        let mut node = Node::new(NodeId(9));
        node.advance_stage(InterviewStage::Complete);
        node.root_mut().add_cc(CommandClass::BASIC, CcInfo::supported());
        cache.save_node(&node).unwrap();

        cache.clear_capabilities(NodeId(9)).unwrap();
        assert_eq!(store.get("node.9.interviewStage"), Some(json!("None")));
        assert!(store.keys_with_prefix("node.9.endpoint.").is_empty());
    }

    #[test]
    fn unknown_node_loads_as_none() {
        let (cache, _) = cache();
        assert!(cache.load(NodeId(77)).unwrap().is_none());
    }
}
