use serde::{Deserialize, Serialize};

/// Which cloud-init profile an instance is booted with. The
/// prebuild VM never receives an SSH key and shuts itself down once its
/// extra commands have run; a worker is what `ConnectInfo` hands back to
/// the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootMode {
    Worker,
    Prebuild,
}

impl BootMode {
    pub fn is_worker(self) -> bool {
        matches!(self, BootMode::Worker)
    }
}

/// Read-only projection of a live instance, used by the packet-filter
/// renderer and the façade's status queries. Does not carry the
/// cancellation handle or key material — those stay inside the inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceView {
    pub name: String,
    pub slot: u8,
    pub tap_device: String,
    pub host_tap_ip: String,
    pub guest_tap_ip: String,
    pub mac: String,
}

/// What `ConnectInfo` hands back to the external autoscaling runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectInfo {
    pub guest_ip: String,
    pub ssh_port: u16,
    pub username: String,
    pub private_key_pem: String,
    pub keepalive_secs: u64,
    pub timeout_secs: u64,
}

/// Heartbeat result for a single instance, reported by `update`. Never an
/// error to the caller — a closed SSH port is `Creating`, not a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatStatus {
    Running,
    Creating,
}

/// Identity record returned from `init`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub name: String,
    pub max_size: u32,
}
