use thiserror::Error;

/// Error taxonomy for the fleetingd core: each variant names a failure
/// boundary a caller needs to branch on, everything else is wrapped as an
/// opaque source.
#[derive(Debug, Error)]
pub enum FleetingError {
    /// Missing host tool, unwritable work directory, or malformed subnet.
    /// Reported from `init`; fatal.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// IPAM is full, or the inventory is shutting down. Caller may retry
    /// later (capacity) but never after shutdown.
    #[error("address space exhausted")]
    AddressSpaceExhausted,

    /// Download / checksum / convert / resize failure during image
    /// preparation. Fatal to the current prebuild attempt; the prebuild
    /// state machine returns to `Failed` so the next `boot_worker` retries.
    #[error("image preparation failed: {source}")]
    ImagePrep {
        #[source]
        source: anyhow::Error,
    },

    /// Hypervisor failed to spawn, or overlay/user-data creation failed.
    #[error("boot failed: {source}")]
    Boot {
        #[source]
        source: anyhow::Error,
    },

    /// Child did not exit within the destroy-wait budget.
    #[error("instance {name} did not exit within the destroy timeout")]
    DestroyTimeout { name: String },

    /// Packet-filter tool rejected the rendered ruleset.
    #[error("packet-filter apply failed: {source}")]
    FilterApply {
        #[source]
        source: anyhow::Error,
    },

    /// SSH probe failed; reported as `Creating`, never surfaced as an error
    /// to the façade caller.
    #[error("heartbeat probe failed: {source}")]
    Heartbeat {
        #[source]
        source: anyhow::Error,
    },

    /// `connect_info` / `destroy` referencing an unknown instance name.
    #[error("no such instance: {name}")]
    NotFound { name: String },
}

pub type Result<T> = std::result::Result<T, FleetingError>;
