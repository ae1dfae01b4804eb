//! Renders the complete nftables ruleset from the current instance set and
//! atomically swaps it in. Invoked on every membership change —
//! successful boot and supervisor-observed exit alike — so the ruleset is
//! always a pure function of the inventory at the moment it's applied.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mvm_core::instance::InstanceView;
use tera::{Context as TeraContext, Tera};

const NFTABLES_TEMPLATE: &str = include_str!("templates/nftables.tera");
const RULESET_FILENAME: &str = "ruleset.nft";

pub struct PacketFilter {
    tera: Tera,
    ruleset_path: PathBuf,
}

impl PacketFilter {
    pub fn new(work_dir: &Path) -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template("nftables", NFTABLES_TEMPLATE)
            .context("compiling nftables template")?;
        Ok(Self {
            tera,
            ruleset_path: work_dir.join(RULESET_FILENAME),
        })
    }

    /// Renders the ruleset text for the given instances. Pure — no I/O —
    /// so it can be unit-tested for idempotence and content directly.
    pub fn render(&self, instances: &[InstanceView], egress_interface: &str, vm_subnet: &str) -> Result<String> {
        let mut ctx = TeraContext::new();
        ctx.insert("instances", instances);
        ctx.insert("egress", egress_interface);
        ctx.insert("vm_subnet_cidr", &format!("{vm_subnet}0/24"));
        self.tera
            .render("nftables", &ctx)
            .context("rendering nftables ruleset")
    }

    /// Writes the rendered ruleset to its stable path, then applies it via
    /// the packet-filter host tool. The `delete table` prelude in the
    /// template makes this idempotent and guarantees a failed apply never
    /// leaves the host more permissive than before.
    pub async fn apply(
        &self,
        instances: &[InstanceView],
        egress_interface: &str,
        vm_subnet: &str,
    ) -> Result<()> {
        let rendered = self.render(instances, egress_interface, vm_subnet)?;
        tokio::fs::write(&self.ruleset_path, &rendered)
            .await
            .with_context(|| format!("writing ruleset to {}", self.ruleset_path.display()))?;
        crate::host_tools::nft_apply(&self.ruleset_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_instance() -> InstanceView {
        InstanceView {
            name: "pool0".to_string(),
            slot: 0,
            tap_device: "pool0".to_string(),
            host_tap_ip: "10.0.0.1".to_string(),
            guest_tap_ip: "10.0.0.2".to_string(),
            mac: "de:51:00:00:00:01".to_string(),
        }
    }

    #[test]
    fn render_is_idempotent() {
        let pf = PacketFilter::new(Path::new("/tmp")).unwrap();
        let instances = vec![sample_instance()];
        let a = pf.render(&instances, "eth0", "10.0.0.").unwrap();
        let b = pf.render(&instances, "eth0", "10.0.0.").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn render_contains_one_ingress_chain_per_instance() {
        let pf = PacketFilter::new(Path::new("/tmp")).unwrap();
        let instances = vec![sample_instance()];
        let rendered = pf.render(&instances, "eth0", "10.0.0.").unwrap();
        assert!(rendered.contains("chain ingress_pool0"));
        assert_eq!(rendered.matches("chain ingress_").count(), 1);
    }

    #[test]
    fn render_with_empty_instances_has_zero_ingress_chains() {
        let pf = PacketFilter::new(Path::new("/tmp")).unwrap();
        let rendered = pf.render(&[], "eth0", "10.0.0.").unwrap();
        assert_eq!(rendered.matches("chain ingress_").count(), 0);
    }

    #[test]
    fn render_leads_each_table_with_delete_prelude() {
        let pf = PacketFilter::new(Path::new("/tmp")).unwrap();
        let rendered = pf.render(&[], "eth0", "10.0.0.").unwrap();
        assert!(rendered.contains("delete table ip fleetingdforwarding"));
        assert!(rendered.contains("delete table netdev fleetingdfilter"));
        assert!(rendered.contains("delete table ip fleetingdsnat"));
    }
}
