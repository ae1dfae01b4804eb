//! Slot arithmetic: the pure functions that turn an allocated `/30` base
//! octet into the instance's name, addresses, and TAP device name. Kept
//! free of any I/O so name determinism — the same slot always yields the
//! same name, addresses, and MAC-OUI prefix — is checkable without a
//! running inventory.

/// Every usable base in the configured `/24`; 63 of them.
pub const SLOT_STRIDE: u8 = 4;
pub const MAX_SLOTS: usize = 63;

/// Stable short name for the slot's base octet: `"pool" + (slot / 4)`.
pub fn instance_name(slot: u8) -> String {
    format!("pool{}", slot / SLOT_STRIDE)
}

/// Host-side TAP IP: `prefix + (slot + 1)`.
pub fn host_tap_ip(prefix: &str, slot: u8) -> String {
    format!("{prefix}{}", slot as u16 + 1)
}

/// Guest-side TAP IP: `prefix + (slot + 2)`.
pub fn guest_tap_ip(prefix: &str, slot: u8) -> String {
    format!("{prefix}{}", slot as u16 + 2)
}

/// Network address of the `/30`: `prefix + slot`.
pub fn network_address(prefix: &str, slot: u8) -> String {
    format!("{prefix}{slot}")
}

/// Broadcast address of the `/30`: `prefix + (slot + 3)`.
pub fn broadcast_address(prefix: &str, slot: u8) -> String {
    format!("{prefix}{}", slot as u16 + 3)
}

/// TAP device name: the instance's own name (`pool<i>`), valid as a Linux
/// interface name (well under IFNAMSIZ for the slot range we support).
pub fn tap_device_name(slot: u8) -> String {
    instance_name(slot)
}

/// Generate a guest MAC: locally-administered OUI `de:51` followed by four
/// random octets.
pub fn generate_mac() -> String {
    use rand::RngCore;
    let mut octets = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut octets);
    format!(
        "de:51:{:02x}:{:02x}:{:02x}:{:02x}",
        octets[0], octets[1], octets[2], octets[3]
    )
}

/// Validate the configured `/24` base: three dot-separated octets followed
/// by a trailing dot, e.g. `"172.16.120."`.
pub fn validate_subnet_prefix(prefix: &str) -> anyhow::Result<()> {
    if !prefix.ends_with('.') {
        anyhow::bail!("subnet prefix {:?} must end with '.'", prefix);
    }
    let octets: Vec<&str> = prefix.trim_end_matches('.').split('.').collect();
    if octets.len() != 3 {
        anyhow::bail!("subnet prefix {:?} must have exactly 3 octets", prefix);
    }
    for o in octets {
        o.parse::<u8>()
            .map_err(|_| anyhow::anyhow!("subnet prefix {:?} has a non-octet component", prefix))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_determinism() {
        assert_eq!(instance_name(0), "pool0");
        assert_eq!(instance_name(4), "pool1");
        assert_eq!(instance_name(252), "pool63");
    }

    #[test]
    fn ip_determinism() {
        assert_eq!(host_tap_ip("10.0.0.", 0), "10.0.0.1");
        assert_eq!(guest_tap_ip("10.0.0.", 0), "10.0.0.2");
        assert_eq!(network_address("10.0.0.", 4), "10.0.0.4");
        assert_eq!(broadcast_address("10.0.0.", 4), "10.0.0.7");
    }

    #[test]
    fn mac_has_locally_administered_oui() {
        let mac = generate_mac();
        assert!(mac.starts_with("de:51:"));
        assert_eq!(mac.len(), 17);
    }

    #[test]
    fn mac_is_randomized() {
        assert_ne!(generate_mac(), generate_mac());
    }

    #[test]
    fn validate_subnet_prefix_accepts_well_formed() {
        assert!(validate_subnet_prefix("172.16.120.").is_ok());
    }

    #[test]
    fn validate_subnet_prefix_rejects_missing_dot() {
        assert!(validate_subnet_prefix("172.16.120").is_err());
    }
}
