//! Persisted LoRaWAN provisioning record.
//!
//! Stored postcard-encoded under `lorawan::prov`.  EUIs are kept in
//! LoRaWAN wire order (LSB first), the way the MAC consumes them.

use serde::{Deserialize, Serialize};

use crate::app::ports::{StorageError, StoragePort};

const PROV_NAMESPACE: &str = "lorawan";
const PROV_KEY: &str = "prov";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningRecord {
    pub dev_eui: [u8; 8],
    pub app_eui: [u8; 8],
    /// 0 forces a fresh join.
    pub dev_addr: u32,
}

impl ProvisioningRecord {
    /// Load the record; `None` if absent or unreadable.
    pub fn load(nvs: &(impl StoragePort + ?Sized)) -> Option<Self> {
        let mut buf = [0u8; 64];
        let len = nvs.read(PROV_NAMESPACE, PROV_KEY, &mut buf).ok()?;
        postcard::from_bytes(&buf[..len]).ok()
    }

    pub fn save(&self, nvs: &mut (impl StoragePort + ?Sized)) -> Result<(), StorageError> {
        let bytes = postcard::to_allocvec(self).map_err(|_| StorageError::IoError)?;
        nvs.write(PROV_NAMESPACE, PROV_KEY, &bytes)
    }

    /// DevEUI as shown to people: MSB first.
    pub fn dev_eui_msb_first(&self) -> [u8; 8] {
        let mut eui = self.dev_eui;
        eui.reverse();
        eui
    }
}
