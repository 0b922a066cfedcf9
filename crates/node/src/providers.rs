//! Collaborators the interview consults but does not own.

use async_trait::async_trait;

use zw_domain::config::DeviceProfile;
use zw_domain::FirmwareVersion;
use zw_protocol::ManufacturerInfo;

/// Reports which network keys are configured. Only presence matters here.
pub trait SecurityKeys: Send + Sync {
    fn has_s2_keys(&self) -> bool;
    fn has_s0_key(&self) -> bool;
}

/// Fixed answer, handy for tests and tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticKeys {
    pub s2: bool,
    pub s0: bool,
}

impl SecurityKeys for StaticKeys {
    fn has_s2_keys(&self) -> bool {
        self.s2
    }

    fn has_s0_key(&self) -> bool {
        self.s0
    }
}

/// Looks up static capability corrections for a device model.
#[async_trait]
pub trait DeviceProfiles: Send + Sync {
    async fn lookup(
        &self,
        manufacturer: ManufacturerInfo,
        firmware: Option<FirmwareVersion>,
    ) -> Option<DeviceProfile>;
}

/// In-memory profile list; the first matching profile wins.
#[derive(Debug, Clone, Default)]
pub struct ProfileList {
    profiles: Vec<DeviceProfile>,
}

impl ProfileList {
    pub fn new(profiles: Vec<DeviceProfile>) -> Self {
        Self { profiles }
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[async_trait]
impl DeviceProfiles for ProfileList {
    async fn lookup(
        &self,
        manufacturer: ManufacturerInfo,
        firmware: Option<FirmwareVersion>,
    ) -> Option<DeviceProfile> {
        self.profiles
            .iter()
            .find(|p| {
                p.matches(
                    manufacturer.manufacturer_id,
                    manufacturer.product_type,
                    manufacturer.product_id,
                    firmware,
                )
            })
            .cloned()
    }
}
