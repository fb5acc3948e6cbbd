//! Core network rule management
//!
//! - [`mapping`]: Port mapping types
//! - [`store`]: Rule store trait, JSON and in-memory stores, settings
//! - [`applier`]: Kernel rule applier (iptables)
//! - [`sync`]: Store-to-kernel reconciliation
//! - [`manager`]: Facade used by the HTTP surface and the CLI
//! - [`dhcp`]: Static DHCP assignments for lxc-net
//! - [`container`]: Container address lookup
//! - [`error`]: Error types

pub mod applier;
pub mod container;
pub mod dhcp;
pub mod error;
pub mod manager;
pub mod mapping;
pub mod store;
pub mod sync;

#[cfg(test)]
pub mod test_helpers;
