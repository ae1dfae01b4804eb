//! Runtime engine for fleetingd: IPAM, image store, cloud-init and
//! packet-filter rendering, the per-instance supervisor, the inventory
//! controller, and the provider façade built on top of them.

pub mod facade;
pub mod host_tools;
pub mod image_store;
pub mod instance;
pub mod inventory;
pub mod ipam;
pub mod packet_filter;
pub mod ssh_keys;
pub mod supervisor;
pub mod user_data;

pub use facade::Facade;
pub use inventory::Inventory;
