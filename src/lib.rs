//! # fleetingd — disposable-VM pool manager
//!
//! Facade crate that re-exports the workspace libraries so consumers can
//! depend on a single `fleetingd` library.
//!
//! | Module | Crate | Purpose |
//! |--------|-------|---------|
//! | [`core`] | mvm-core | Types, config, error taxonomy, slot naming |
//! | [`runtime`] | mvm-runtime | IPAM, image store, supervisor, inventory, façade |
//! | [`cli`] | mvm-cli | Config loading, tracing init, the `serve` harness |

pub use mvm_cli as cli;
pub use mvm_core as core;
pub use mvm_runtime as runtime;
