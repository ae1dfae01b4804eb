//! Provider façade: maps external control calls onto the inventory. This
//! is the surface the CLI's serve loop and any RPC transport wire up to —
//! the wire framing itself is out of scope.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mvm_core::instance::{ConnectInfo, HeartbeatStatus, ProviderIdentity};
use mvm_core::{Config, FleetingError};
use tokio::net::TcpStream;
use tracing::{info, instrument, warn};

use crate::host_tools;
use crate::inventory::Inventory;

const SSH_PROBE_TIMEOUT: Duration = Duration::from_secs(1);
const SSH_PORT: u16 = 22;
pub const MAX_SIZE: u32 = mvm_core::naming::MAX_SLOTS as u32;

pub struct Facade {
    inventory: Arc<Inventory>,
}

impl Facade {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        Ok(Self {
            inventory: Inventory::new(config)?,
        })
    }

    pub fn from_inventory(inventory: Arc<Inventory>) -> Self {
        Self { inventory }
    }

    /// Verifies the required host tools are on `PATH` and the work
    /// directory is writable, then returns the fixed capacity.
    #[instrument(skip(self))]
    pub fn init(&self) -> Result<ProviderIdentity, FleetingError> {
        host_tools::check_tools_present().map_err(|source| FleetingError::Config {
            message: source.to_string(),
        })?;
        self.inventory.config().ensure_workdir_writable()?;
        Ok(ProviderIdentity {
            name: "fleetingd".to_string(),
            max_size: MAX_SIZE,
        })
    }

    /// Probes each live instance's SSH port with a 1 s TCP connect. Never
    /// mutates inventory state; a closed port is `Creating`, not a fault.
    #[instrument(skip(self))]
    pub async fn update(&self) -> Vec<(String, HeartbeatStatus)> {
        let targets = self.inventory.heartbeat_targets().await;
        let mut results = Vec::with_capacity(targets.len());
        for (name, guest_ip) in targets {
            let status = probe_ssh(&guest_ip, SSH_PORT).await;
            results.push((name, status));
        }
        results
    }

    /// Calls `boot_worker` up to `n` times, stopping at the first error.
    /// Returns the count actually booted, the error that stopped it early
    /// (if any), and the most recent non-fatal packet-filter-apply warning
    /// (a boot that succeeds but fails to re-apply the filter is still a
    /// booted instance, not a stopping error).
    #[instrument(skip(self))]
    pub async fn increase(&self, n: u32) -> (u32, Option<FleetingError>, Option<FleetingError>) {
        let mut booted = 0;
        let mut filter_warning = None;
        for _ in 0..n {
            match self.inventory.boot_worker().await {
                Ok(warning) => {
                    booted += 1;
                    if warning.is_some() {
                        filter_warning = warning;
                    }
                }
                Err(e) => return (booted, Some(e), filter_warning),
            }
        }
        (booted, None, filter_warning)
    }

    /// Destroys each named instance; individual failures are logged and
    /// skipped rather than aborting the whole call. Returns the names
    /// actually destroyed.
    #[instrument(skip(self, names))]
    pub async fn decrease(&self, names: &[String]) -> Vec<String> {
        let mut destroyed = Vec::with_capacity(names.len());
        for name in names {
            match self.inventory.destroy(name).await {
                Ok(()) => destroyed.push(name.clone()),
                Err(e) => warn!(instance = %name, error = %e, "decrease: failed to destroy instance"),
            }
        }
        destroyed
    }

    pub async fn connect_info(&self, name: &str) -> Result<ConnectInfo, FleetingError> {
        self.inventory.connect_info(name).await
    }

    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Vec<String> {
        info!("shutdown requested, destroying all instances");
        self.inventory.destroy_all().await
    }

    pub async fn list_names(&self) -> Vec<String> {
        self.inventory.list_names().await
    }
}

async fn probe_ssh(guest_ip: &str, port: u16) -> HeartbeatStatus {
    let addr: SocketAddr = match format!("{guest_ip}:{port}").parse() {
        Ok(addr) => addr,
        Err(_) => return HeartbeatStatus::Creating,
    };
    match tokio::time::timeout(SSH_PROBE_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => HeartbeatStatus::Running,
        _ => HeartbeatStatus::Creating,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_ssh_rejects_malformed_address() {
        assert_eq!(probe_ssh("not-an-ip", SSH_PORT).await, HeartbeatStatus::Creating);
    }

    #[tokio::test]
    async fn probe_ssh_reports_creating_when_nothing_listens() {
        // 192.0.2.0/24 is TEST-NET-1 (RFC 5737); nothing routes there.
        assert_eq!(probe_ssh("192.0.2.1", SSH_PORT).await, HeartbeatStatus::Creating);
    }

    #[tokio::test]
    async fn probe_ssh_reports_running_once_the_port_is_listening() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accept in the background so the connecting side completes its
        // handshake instead of hitting a connection reset.
        tokio::task::spawn_blocking(move || {
            let _ = listener.accept();
        });
        assert_eq!(probe_ssh("127.0.0.1", port).await, HeartbeatStatus::Running);
    }
}
