//! Thin async wrappers around the three host binaries the core depends on:
//! a hypervisor (`cloud-hypervisor`), a disk-image tool (`qemu-img`), and a
//! packet-filter tool (`nft`). None of their internals are our concern —
//! the scope boundary is drawn right at the process invocation.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use tokio::process::Command;

pub const HYPERVISOR_BIN: &str = "cloud-hypervisor";
pub const DISK_IMAGE_BIN: &str = "qemu-img";
pub const PACKET_FILTER_BIN: &str = "nft";
pub const MKFS_VFAT_BIN: &str = "mkfs.vfat";
pub const MCOPY_BIN: &str = "mcopy";

/// Verify the three host binaries are on `PATH`. Called from `init`;
/// failure is fatal and reported as `FleetingError::Config` by the caller.
pub fn check_tools_present() -> Result<()> {
    for bin in [
        HYPERVISOR_BIN,
        DISK_IMAGE_BIN,
        PACKET_FILTER_BIN,
        MKFS_VFAT_BIN,
        MCOPY_BIN,
    ] {
        which::which(bin).with_context(|| format!("required host tool {bin:?} not found on PATH"))?;
    }
    Ok(())
}

async fn run_checked(mut cmd: Command, what: &str) -> Result<()> {
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("failed to spawn {what}"))?;
    if !output.status.success() {
        bail!(
            "{what} failed (exit {:?}): {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

/// `qemu-img convert -f qcow2 -O qcow2 <src> <dst>` — decompression step of
/// the image store; qcow2-in, qcow2-out, no compression.
pub async fn disk_convert(src: &Path, dst: &Path) -> Result<()> {
    let mut cmd = Command::new(DISK_IMAGE_BIN);
    cmd.args(["convert", "-f", "qcow2", "-O", "qcow2"])
        .arg(src)
        .arg(dst);
    run_checked(cmd, "qemu-img convert").await
}

/// `qemu-img resize <path> <size>G`.
pub async fn disk_resize(path: &Path, size_gb: u32) -> Result<()> {
    let mut cmd = Command::new(DISK_IMAGE_BIN);
    cmd.arg("resize").arg(path).arg(format!("{size_gb}G"));
    run_checked(cmd, "qemu-img resize").await
}

/// `qemu-img create -b <base> -f qcow2 -F qcow2 <overlay>` — the per-instance
/// copy-on-write overlay against the decompressed base disk.
pub async fn disk_create_overlay(base: &Path, overlay: &Path) -> Result<()> {
    let mut cmd = Command::new(DISK_IMAGE_BIN);
    cmd.arg("create")
        .arg("-b")
        .arg(base)
        .args(["-f", "qcow2", "-F", "qcow2"])
        .arg(overlay);
    run_checked(cmd, "qemu-img create (overlay)").await
}

/// `nft -f <ruleset>` — apply the rendered ruleset wholesale.
pub async fn nft_apply(ruleset_path: &Path) -> Result<()> {
    let mut cmd = Command::new(PACKET_FILTER_BIN);
    cmd.arg("-f").arg(ruleset_path);
    run_checked(cmd, "nft apply").await
}

/// `mkfs.vfat -C -n CIDATA <image> <size_kib>` — create a blank FAT32 image
/// labelled for cloud-init no-cloud discovery.
pub async fn mkfs_vfat(image_path: &Path, size_kib: u64) -> Result<()> {
    let mut cmd = Command::new(MKFS_VFAT_BIN);
    cmd.args(["-C", "-n", "CIDATA"])
        .arg(image_path)
        .arg(size_kib.to_string());
    run_checked(cmd, "mkfs.vfat").await
}

/// `mcopy -i <image> <file> ::<name>` — copy one file to the FAT32 root.
pub async fn mcopy(image_path: &Path, file: &Path, name_in_image: &str) -> Result<()> {
    let mut cmd = Command::new(MCOPY_BIN);
    cmd.arg("-i")
        .arg(image_path)
        .arg(file)
        .arg(format!("::{name_in_image}"));
    run_checked(cmd, "mcopy").await
}

/// List the host's current network interface names — used by the TAP-wait
/// poll in the instance supervisor. Reads `/sys/class/net` directly rather
/// than shelling out, since that directory is always present on Linux and
/// this runs on a tight 100 ms cadence.
pub fn list_interface_names() -> Result<Vec<String>> {
    let mut names = Vec::new();
    let entries = std::fs::read_dir("/sys/class/net")
        .context("reading /sys/class/net to poll for TAP interfaces")?;
    for entry in entries {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}
