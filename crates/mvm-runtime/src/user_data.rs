//! Builds the per-instance cloud-init seed disk: a ~10 MiB FAT32
//! image labelled `CIDATA` containing `meta-data`, `user-data`, and
//! `network-config`. Two modes — worker (SSH + UFW) and prebuild (extra
//! commands, then shutdown) — share the network-config template.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tera::{Context as TeraContext, Tera};

use crate::host_tools;

const META_DATA_TEMPLATE: &str = include_str!("templates/meta-data.tera");
const NETWORK_CONFIG_TEMPLATE: &str = include_str!("templates/network-config.tera");
const USER_DATA_WORKER_TEMPLATE: &str = include_str!("templates/user-data-worker.tera");
const USER_DATA_PREBUILD_TEMPLATE: &str = include_str!("templates/user-data-prebuild.tera");

/// ~10 MiB, in KiB, for the `mkfs.vfat` size argument.
const IMAGE_SIZE_KIB: u64 = 10 * 1024;

pub struct UserDataParams<'a> {
    pub instance_name: &'a str,
    pub mac: &'a str,
    pub ip: &'a str,
    pub gateway: &'a str,
    /// CIDR suffix, e.g. `"/30"`.
    pub netmask: &'a str,
    /// Present => worker mode. Absent => prebuild mode.
    pub ssh_pubkey: Option<&'a str>,
    pub extra_cmds: &'a [String],
}

pub struct UserDataBuilder {
    tera: Tera,
}

impl UserDataBuilder {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template("meta-data", META_DATA_TEMPLATE)?;
        tera.add_raw_template("network-config", NETWORK_CONFIG_TEMPLATE)?;
        tera.add_raw_template("user-data-worker", USER_DATA_WORKER_TEMPLATE)?;
        tera.add_raw_template("user-data-prebuild", USER_DATA_PREBUILD_TEMPLATE)?;
        Ok(Self { tera })
    }

    /// Renders the three cloud-init files and packs them into a FAT32 image
    /// at `<dest_dir>/<instance_name>_userdata.img`.
    pub async fn build(&self, params: &UserDataParams<'_>, dest_dir: &Path) -> Result<PathBuf> {
        let mut ctx = TeraContext::new();
        ctx.insert("instance_name", params.instance_name);
        ctx.insert("mac", params.mac);
        ctx.insert("ip", params.ip);
        ctx.insert("gateway", params.gateway);
        ctx.insert("netmask", params.netmask);

        let meta_data = self
            .tera
            .render("meta-data", &ctx)
            .context("rendering meta-data")?;
        let network_config = self
            .tera
            .render("network-config", &ctx)
            .context("rendering network-config")?;

        let user_data = match params.ssh_pubkey {
            Some(pubkey) => {
                ctx.insert("ssh_pubkey", pubkey);
                self.tera
                    .render("user-data-worker", &ctx)
                    .context("rendering worker user-data")?
            }
            None => {
                ctx.insert("extra_cmds", params.extra_cmds);
                self.tera
                    .render("user-data-prebuild", &ctx)
                    .context("rendering prebuild user-data")?
            }
        };

        let staging = tempfile::tempdir().context("creating staging dir for cloud-init files")?;
        let meta_data_path = staging.path().join("meta-data");
        let user_data_path = staging.path().join("user-data");
        let network_config_path = staging.path().join("network-config");
        tokio::fs::write(&meta_data_path, &meta_data).await?;
        tokio::fs::write(&user_data_path, &user_data).await?;
        tokio::fs::write(&network_config_path, &network_config).await?;

        tokio::fs::create_dir_all(dest_dir).await?;
        let image_path = dest_dir.join(format!("{}_userdata.img", params.instance_name));
        if image_path.exists() {
            tokio::fs::remove_file(&image_path).await?;
        }

        host_tools::mkfs_vfat(&image_path, IMAGE_SIZE_KIB).await?;
        host_tools::mcopy(&image_path, &meta_data_path, "meta-data").await?;
        host_tools::mcopy(&image_path, &user_data_path, "user-data").await?;
        host_tools::mcopy(&image_path, &network_config_path, "network-config").await?;

        Ok(image_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_user_data_contains_authorized_key() {
        let builder = UserDataBuilder::new().unwrap();
        let mut ctx = TeraContext::new();
        ctx.insert("instance_name", "pool0");
        ctx.insert("gateway", "10.0.0.1");
        ctx.insert("ssh_pubkey", "ssh-ed25519 AAAA test");
        let rendered = builder.tera.render("user-data-worker", &ctx).unwrap();
        assert!(rendered.contains("ssh-ed25519 AAAA test"));
        assert!(rendered.contains("ufw"));
    }

    #[test]
    fn prebuild_user_data_appends_extra_commands_and_shuts_down() {
        let builder = UserDataBuilder::new().unwrap();
        let mut ctx = TeraContext::new();
        ctx.insert("instance_name", "pool0");
        ctx.insert("extra_cmds", &vec!["echo hi".to_string()]);
        let rendered = builder.tera.render("user-data-prebuild", &ctx).unwrap();
        assert!(rendered.contains("echo hi"));
        assert!(rendered.contains("shutdown"));
    }

    #[test]
    fn network_config_binds_nic_by_mac() {
        let builder = UserDataBuilder::new().unwrap();
        let mut ctx = TeraContext::new();
        ctx.insert("mac", "de:51:00:00:00:01");
        ctx.insert("ip", "10.0.0.2");
        ctx.insert("netmask", "/30");
        ctx.insert("gateway", "10.0.0.1");
        let rendered = builder.tera.render("network-config", &ctx).unwrap();
        assert!(rendered.contains("de:51:00:00:00:01"));
        assert!(rendered.contains("10.0.0.2/30"));
    }
}
