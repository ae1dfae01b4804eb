use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::FleetingError;

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_kernel_url() -> String {
    "https://s3.amazonaws.com/spec.ccfc.min/firecracker-ci/v1.10/x86_64/vmlinux-5.10.bin"
        .to_string()
}

/// No default: the image-prep pipeline always runs `qemu-img convert -f
/// qcow2 -O qcow2` over whatever this points to, so the one asset the
/// public Firecracker CI bucket ships (a raw ext4 rootfs) is not a valid
/// default here. Operators must supply a qcow2 base image; `validate`
/// rejects the empty default with a message saying so.
fn default_disk_image_url() -> String {
    String::new()
}

/// Paired with `disk_image_url`: the `SHA256SUMS` listing must contain an
/// entry for whatever filename that URL ends in. No default for the same
/// reason `disk_image_url` has none.
fn default_checksum_url() -> String {
    String::new()
}

fn default_enable_console() -> bool {
    false
}

/// Immutable configuration read once at startup. The `vm_*` keys describe
/// the pool itself; `log_format` and the asset URLs are the operational
/// keys a standalone binary needs on top of that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub egress_interface: String,
    pub vm_disk_directory: PathBuf,
    /// Must end in `.`, e.g. `"172.16.120."` — the `/24` base.
    pub vm_subnet: String,
    pub vm_num_cpu_cores: u32,
    pub vm_memory_mb: u32,
    pub vm_disk_size_gb: u32,
    #[serde(default)]
    pub vm_prebuild_cloudinit_extra_cmds: Vec<String>,
    #[serde(default = "default_enable_console")]
    pub vm_enable_virtio_console: bool,

    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_kernel_url")]
    pub kernel_url: String,
    #[serde(default = "default_disk_image_url")]
    pub disk_image_url: String,
    #[serde(default = "default_checksum_url")]
    pub checksum_url: String,
}

impl Config {
    /// Load from a TOML file, then apply `FLEETINGD_*` environment overrides.
    /// Env vars take priority over file defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        let mut cfg: Config = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("FLEETINGD_EGRESS_INTERFACE") {
            self.egress_interface = v;
        }
        if let Ok(v) = std::env::var("FLEETINGD_VM_DISK_DIRECTORY") {
            self.vm_disk_directory = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FLEETINGD_VM_SUBNET") {
            self.vm_subnet = v;
        }
        if let Ok(v) = std::env::var("FLEETINGD_LOG_FORMAT") {
            self.log_format = v;
        }
    }

    /// Reject malformed subnets, non-writable work directories, and zero
    /// resource values. Warns (does not fail) about subnet overlap with
    /// host networks, since that's genuinely unverifiable from here.
    pub fn validate(&self) -> Result<(), FleetingError> {
        if !self.vm_subnet.ends_with('.') || self.vm_subnet.matches('.').count() != 3 {
            return Err(FleetingError::Config {
                message: format!(
                    "vm_subnet must be a /24 base of the form \"A.B.C.\", got {:?}",
                    self.vm_subnet
                ),
            });
        }
        for octet in self.vm_subnet.trim_end_matches('.').split('.') {
            if octet.parse::<u8>().is_err() {
                return Err(FleetingError::Config {
                    message: format!("vm_subnet octet {:?} is not a valid u8", octet),
                });
            }
        }
        if self.vm_num_cpu_cores == 0 {
            return Err(FleetingError::Config {
                message: "vm_num_cpu_cores must be >= 1".to_string(),
            });
        }
        if self.vm_memory_mb == 0 {
            return Err(FleetingError::Config {
                message: "vm_memory_mb must be >= 1".to_string(),
            });
        }
        if self.vm_disk_size_gb == 0 {
            return Err(FleetingError::Config {
                message: "vm_disk_size_gb must be >= 1".to_string(),
            });
        }
        if self.disk_image_url.is_empty() {
            return Err(FleetingError::Config {
                message: "disk_image_url has no default: image prep always converts its \
                          target with `qemu-img convert -f qcow2`, so it must be set to a \
                          qcow2 base image"
                    .to_string(),
            });
        }
        if self.checksum_url.is_empty() {
            return Err(FleetingError::Config {
                message: "checksum_url has no default: it must point to a SHA256SUMS listing \
                          covering both kernel_url and disk_image_url"
                    .to_string(),
            });
        }
        tracing::warn!(
            subnet = %self.vm_subnet,
            "vm_subnet is not validated against host networks for overlap; misconfiguration \
             can shadow real routes"
        );
        Ok(())
    }

    pub fn ensure_workdir_writable(&self) -> Result<(), FleetingError> {
        std::fs::create_dir_all(&self.vm_disk_directory).map_err(|e| FleetingError::Config {
            message: format!(
                "vm_disk_directory {} is not writable: {e}",
                self.vm_disk_directory.display()
            ),
        })?;
        let probe = self.vm_disk_directory.join(".fleetingd-write-probe");
        std::fs::write(&probe, b"ok").map_err(|e| FleetingError::Config {
            message: format!(
                "vm_disk_directory {} is not writable: {e}",
                self.vm_disk_directory.display()
            ),
        })?;
        let _ = std::fs::remove_file(&probe);
        Ok(())
    }

    pub fn instance_data_dir(&self) -> PathBuf {
        self.vm_disk_directory.join(".instance_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            egress_interface: "eth0".to_string(),
            vm_disk_directory: std::env::temp_dir(),
            vm_subnet: "10.0.0.".to_string(),
            vm_num_cpu_cores: 2,
            vm_memory_mb: 512,
            vm_disk_size_gb: 4,
            vm_prebuild_cloudinit_extra_cmds: vec![],
            vm_enable_virtio_console: false,
            log_format: default_log_format(),
            kernel_url: default_kernel_url(),
            disk_image_url: "https://example.invalid/disk.qcow2".to_string(),
            checksum_url: "https://example.invalid/SHA256SUMS".to_string(),
        }
    }

    #[test]
    fn validate_accepts_well_formed_subnet() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn validate_rejects_subnet_without_trailing_dot() {
        let mut cfg = sample();
        cfg.vm_subnet = "10.0.0".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_resources() {
        let mut cfg = sample();
        cfg.vm_num_cpu_cores = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_missing_disk_image_url() {
        let mut cfg = sample();
        cfg.disk_image_url = default_disk_image_url();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_missing_checksum_url() {
        let mut cfg = sample();
        cfg.checksum_url = default_checksum_url();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_applies_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleetingd.toml");
        std::fs::write(
            &path,
            r#"
            egress_interface = "eth0"
            vm_disk_directory = "/var/lib/fleetingd"
            vm_subnet = "172.16.120."
            vm_num_cpu_cores = 2
            vm_memory_mb = 1024
            vm_disk_size_gb = 8
            disk_image_url = "https://example.invalid/disk.qcow2"
            checksum_url = "https://example.invalid/SHA256SUMS"
            "#,
        )
        .unwrap();

        // SAFETY: single-threaded test process, no concurrent env access.
        unsafe { std::env::set_var("FLEETINGD_EGRESS_INTERFACE", "wlan0") };
        let cfg = Config::load(&path).unwrap();
        unsafe { std::env::remove_var("FLEETINGD_EGRESS_INTERFACE") };

        assert_eq!(cfg.egress_interface, "wlan0");
        assert_eq!(cfg.vm_subnet, "172.16.120.");
    }
}
