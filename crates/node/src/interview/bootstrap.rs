//! Security bootstrap and identity probes that run before any dependency
//! graph: S2, S0, Manufacturer Specific, Version, then Basic hiding.

use zw_domain::config::DeviceProfile;
use zw_domain::security::S2_CLASSES;
use zw_domain::{CommandClass, HighestGrant, SecurityClass, TraceEvent};

use super::{Interviewer, Step};
use crate::node::SharedNode;

const S0_CLASSES: [SecurityClass; 1] = [SecurityClass::S0Legacy];

/// Security classes a security CC reports on.
pub(super) fn family(cc: CommandClass) -> &'static [SecurityClass] {
    match cc {
        CommandClass::SECURITY_2 => &S2_CLASSES,
        CommandClass::SECURITY => &S0_CLASSES,
        _ => &[],
    }
}

impl Interviewer {
    /// Root endpoint bootstrap. Returns the device profile found after the
    /// identity probes, if any.
    pub(super) async fn bootstrap_root(&self, node: &SharedNode) -> Step<Option<DeviceProfile>> {
        self.bootstrap_security(node, CommandClass::SECURITY_2)
            .await?;
        self.bootstrap_security(node, CommandClass::SECURITY)
            .await?;
        self.interview_if_supported(node, 0, CommandClass::MANUFACTURER_SPECIFIC)
            .await?;
        self.interview_if_supported(node, 0, CommandClass::VERSION)
            .await?;

        let profile = self.lookup_profile(node).await;
        let treat_basic_as_event = profile
            .as_ref()
            .map(|p| p.treat_basic_set_as_event)
            .unwrap_or(false);
        if !treat_basic_as_event {
            let indices = node.lock().endpoint_indices();
            for index in indices {
                self.hide_basic(node, index)?;
            }
        }
        Ok(profile)
    }

    async fn bootstrap_security(&self, node: &SharedNode, cc: CommandClass) -> Step {
        let s2 = cc == CommandClass::SECURITY_2;
        let (id, supported, highest) = {
            let n = node.lock();
            (n.id(), n.root().supports_cc(cc), n.highest_security_class())
        };

        if !supported {
            return self.collapse_unknown(node, family(cc));
        }
        let eligible = if s2 {
            highest.may_use_s2()
        } else {
            highest.may_use_s0()
        };
        if !eligible {
            tracing::debug!(node_id = %id, cc = %cc, highest = ?highest, "security CC not used");
            return Ok(());
        }

        {
            let mut n = node.lock();
            n.root_mut().update_cc(cc, |info| info.secure = true);
            self.cache.save_endpoint(id, n.root())?;
        }

        let has_keys = if s2 {
            self.keys.has_s2_keys()
        } else {
            self.keys.has_s0_key()
        };
        if has_keys {
            return self.interview_once(node, 0, cc).await;
        }

        if node.lock().warn_missing_keys_once() {
            tracing::warn!(
                node_id = %id,
                cc = %cc,
                "node supports security but no network key is configured, interviewing insecurely"
            );
        }
        self.collapse_unknown(node, family(cc))
    }

    /// Endpoint re-check against the class the root settled on.
    pub(super) async fn bootstrap_endpoint_security(&self, node: &SharedNode, index: u8) -> Step {
        let highest = node.lock().highest_security_class();
        let cc = match highest {
            HighestGrant::Class(class) if class.is_s2() && self.keys.has_s2_keys() => {
                CommandClass::SECURITY_2
            }
            HighestGrant::Class(SecurityClass::S0Legacy) if self.keys.has_s0_key() => {
                CommandClass::SECURITY
            }
            _ => return Ok(()),
        };
        self.interview_if_supported(node, index, cc).await
    }

    fn collapse_unknown(&self, node: &SharedNode, classes: &[SecurityClass]) -> Step {
        let mut n = node.lock();
        let id = n.id();
        let changed = n.security_mut().collapse_unknown(classes);
        if changed.is_empty() {
            return Ok(());
        }
        for class in &changed {
            self.cache.save_security_class(id, *class, false)?;
        }
        tracing::debug!(node_id = %id, classes = ?changed, "unknown security classes set to not granted");
        TraceEvent::SecurityClassesCollapsed {
            node_id: id,
            classes: changed,
        }
        .emit();
        Ok(())
    }

    /// Drop Basic from the supported set of an endpoint that has an actuator
    /// CC. A controlled Basic stays controlled.
    pub(super) fn hide_basic(&self, node: &SharedNode, index: u8) -> Step {
        let mut n = node.lock();
        let id = n.id();
        let Some(ep) = n.endpoint_mut(index) else {
            return Ok(());
        };
        if !ep.supports_cc(CommandClass::BASIC) {
            return Ok(());
        }
        let has_actuator = ep
            .supported_ccs()
            .into_iter()
            .any(|cc| self.catalog.is_actuator(cc));
        if !has_actuator {
            return Ok(());
        }
        if ep.controls_cc(CommandClass::BASIC) {
            ep.update_cc(CommandClass::BASIC, |info| info.is_supported = false);
        } else {
            ep.remove_cc(CommandClass::BASIC);
        }
        tracing::debug!(node_id = %id, endpoint = index, "Basic hidden in favour of actuator CCs");
        if let Some(ep) = n.endpoint(index) {
            self.cache.save_endpoint(id, ep)?;
        }
        Ok(())
    }
}
