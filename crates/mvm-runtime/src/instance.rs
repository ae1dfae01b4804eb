//! The runtime-side instance record. Distinct from
//! `mvm_core::instance::InstanceView`: this type carries the cancellation
//! handle, key material, and on-disk paths that only ever live inside the
//! inventory, never projected out to a caller.

use std::path::PathBuf;

use mvm_core::instance::{BootMode, InstanceView};
use tokio_util::sync::CancellationToken;

use crate::ssh_keys::SshKeyPair;

pub struct Instance {
    pub name: String,
    pub slot: u8,
    pub tap_device: String,
    pub host_tap_ip: String,
    pub guest_tap_ip: String,
    pub mac: String,
    pub mode: BootMode,
    pub ssh_key: Option<SshKeyPair>,
    pub overlay_path: Option<PathBuf>,
    pub user_data_path: PathBuf,
    pub cancel: CancellationToken,
}

impl Instance {
    pub fn view(&self) -> InstanceView {
        InstanceView {
            name: self.name.clone(),
            slot: self.slot,
            tap_device: self.tap_device.clone(),
            host_tap_ip: self.host_tap_ip.clone(),
            guest_tap_ip: self.guest_tap_ip.clone(),
            mac: self.mac.clone(),
        }
    }
}
