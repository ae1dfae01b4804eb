//! Hypervisor command-line construction and the TAP-appearance poll. Kept
//! free of inventory/locking concerns: this module only knows how to
//! start one hypervisor child and wait for its TAP to show up.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::{Child, Command};

use crate::host_tools::{self, HYPERVISOR_BIN};

const TAP_POLL_INTERVAL: Duration = Duration::from_millis(100);
const TAP_POLL_ATTEMPTS: usize = 100;

pub struct TapSpec {
    pub device_name: String,
    pub mac: String,
    pub host_ip: String,
}

pub struct HypervisorSpec {
    pub kernel: PathBuf,
    /// `(overlay-or-base rw, user-data ro)` in worker mode; in prebuild
    /// mode there is only the base disk, rw, and no user-data disk pair —
    /// the caller passes just the one path twice is wrong, so prebuild
    /// passes `(base, None)`.
    pub rw_disk: PathBuf,
    pub ro_disk: Option<PathBuf>,
    pub cpus: u32,
    pub memory_mb: u32,
    pub tap: TapSpec,
    pub console_path: Option<PathBuf>,
}

const KERNEL_CMDLINE: &str = "console=hvc0 root=/dev/vda1 rw";

/// Builds (but does not spawn) the hypervisor command line: kernel, disks,
/// CPU/memory, a TAP netdev bound to the assigned MAC/IP/mask, a balloon
/// device with free-page reporting, and the fixed kernel cmdline. Attaches
/// a file-backed virtio console when configured.
pub fn build_command(spec: &HypervisorSpec) -> Command {
    let mut cmd = Command::new(HYPERVISOR_BIN);
    cmd.arg("--kernel").arg(&spec.kernel);
    cmd.arg("--cmdline").arg(KERNEL_CMDLINE);
    cmd.arg("--cpus").arg(format!("boot={}", spec.cpus));
    cmd.arg("--memory")
        .arg(format!("size={}M", spec.memory_mb));

    let mut disk_arg = format!("path={}", spec.rw_disk.display());
    cmd.arg("--disk").arg(disk_arg.clone());
    if let Some(ro) = &spec.ro_disk {
        disk_arg = format!("path={},readonly=on", ro.display());
        cmd.arg("--disk").arg(disk_arg);
    }

    cmd.arg("--net").arg(format!(
        "tap={},mac={},ip={},mask=255.255.255.252",
        spec.tap.device_name, spec.tap.mac, spec.tap.host_ip
    ));
    cmd.arg("--balloon").arg("size=0,free_page_reporting=on");

    if let Some(console) = &spec.console_path {
        cmd.arg("--console").arg(format!("file={}", console.display()));
    } else {
        cmd.arg("--console").arg("off");
    }

    cmd.kill_on_drop(true);
    cmd
}

pub fn spawn(spec: &HypervisorSpec) -> Result<Child> {
    build_command(spec)
        .spawn()
        .with_context(|| format!("failed to spawn {HYPERVISOR_BIN} for tap {}", spec.tap.device_name))
}

/// Polls the host's interface list every 100 ms for `tap_name` to appear,
/// up to 100 attempts (≈10 s). Never errors — whether the TAP shows up or
/// the budget elapses, the caller proceeds either way.
pub async fn wait_for_tap(tap_name: &str) -> bool {
    for _ in 0..TAP_POLL_ATTEMPTS {
        if let Ok(names) = host_tools::list_interface_names() {
            if names.iter().any(|n| n == tap_name) {
                return true;
            }
        }
        tokio::time::sleep(TAP_POLL_INTERVAL).await;
    }
    false
}

pub fn console_path(work_dir: &Path, instance_name: &str) -> PathBuf {
    work_dir.join(format!("{instance_name}_console"))
}
