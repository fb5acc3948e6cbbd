//! lxcm - LXC host network manager
//!
//! Keeps iptables DNAT rules for containers in line with a persisted rule
//! store, manages lxc-net's static DHCP assignments, and exposes both over a
//! small HTTP API.
//!
//! # Architecture
//!
//! - [`core`] - Rule store, kernel applier, sync engine and rule manager
//! - [`http`] - axum router and handlers
//! - [`audit`] - Audit logging for every state-changing operation
//! - [`validators`] - Input validation and sanitization
//! - [`config`] - Configuration loading
//! - [`elevation`] - Running system commands as root
//! - [`utils`] - XDG directories and atomic file writes
//!
//! # Safety Features
//!
//! - Only the dedicated NAT chain is ever flushed; built-in chains are not touched
//! - Commands are argument vectors, never shell strings
//! - Every external command has a timeout
//! - Atomic file operations with secure permissions

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::needless_lifetimes)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod elevation;
pub mod http;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use core::error::{Error, Result};
pub use core::manager::RuleManager;
pub use core::mapping::{InterfaceFilter, NewPortMapping, PortMapping, Protocol};
