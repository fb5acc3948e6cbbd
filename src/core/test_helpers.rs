//! Shared test utilities for core module tests
//!
//! Provides common test helpers to avoid duplication across test suites.
//! This module is only compiled in test mode.

use crate::core::applier::Applier;
use crate::core::error::{Error, Result};
use crate::core::mapping::{InterfaceFilter, NewPortMapping, PortMapping, Protocol};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

/// Creates a valid TCP mapping to 10.0.3.5 on all interfaces.
///
/// This is the canonical helper for creating unsaved mappings in tests.
pub fn new_mapping(external_port: u16, internal_port: u16) -> NewPortMapping {
    NewPortMapping {
        interface: InterfaceFilter::All,
        protocol: Protocol::Tcp,
        external_port,
        internal_ip: Ipv4Addr::new(10, 0, 3, 5),
        internal_port,
        comment: None,
    }
}

/// Creates a stored TCP mapping with an explicit id and target.
pub fn mapping(id: u64, external_port: u16, internal_ip: &str, internal_port: u16) -> PortMapping {
    PortMapping {
        id,
        interface: InterfaceFilter::All,
        protocol: Protocol::Tcp,
        external_port,
        internal_ip: internal_ip.parse().unwrap(),
        internal_port,
        comment: None,
    }
}

#[derive(Debug, Default)]
struct KernelState {
    chains: BTreeMap<String, Vec<PortMapping>>,
    /// Jump targets in PREROUTING, in order
    entry_jumps: Vec<String>,
    failing_ports: BTreeSet<u16>,
    fail_flush: bool,
    fail_ensure: bool,
    calls: Vec<String>,
}

/// In-memory stand-in for the NAT table
///
/// Behaves like iptables for the primitives the sync engine uses, and lets a
/// test inject failures. Clones share the same kernel state, so a test can
/// keep one handle for assertions and give another to the code under test.
#[derive(Debug, Clone, Default)]
pub struct FakeApplier {
    state: Arc<Mutex<KernelState>>,
}

impl FakeApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `apply` for `external_port` fail like a rejected rule.
    pub fn fail_port(&self, external_port: u16) {
        self.state.lock().unwrap().failing_ports.insert(external_port);
    }

    pub fn set_fail_flush(&self, fail: bool) {
        self.state.lock().unwrap().fail_flush = fail;
    }

    pub fn set_fail_ensure(&self, fail: bool) {
        self.state.lock().unwrap().fail_ensure = fail;
    }

    /// External ports currently installed in `chain`, in chain order.
    pub fn ports_in(&self, chain: &str) -> Vec<u16> {
        self.state
            .lock()
            .unwrap()
            .chains
            .get(chain)
            .map(|rules| rules.iter().map(|r| r.external_port).collect())
            .unwrap_or_default()
    }

    /// Rules currently installed in `chain`.
    pub fn rules_in(&self, chain: &str) -> Vec<PortMapping> {
        self.state
            .lock()
            .unwrap()
            .chains
            .get(chain)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_chain(&self, chain: &str) -> bool {
        self.state.lock().unwrap().chains.contains_key(chain)
    }

    /// Number of jumps to `chain` in the entry point.
    pub fn jump_count(&self, chain: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .entry_jumps
            .iter()
            .filter(|j| *j == chain)
            .count()
    }

    /// Simulates someone adding a rule to the chain by hand.
    pub fn inject_rule(&self, chain: &str, rule: PortMapping) {
        self.state
            .lock()
            .unwrap()
            .chains
            .entry(chain.to_string())
            .or_default()
            .push(rule);
    }

    /// Primitive calls made so far, e.g. `"flush LXC_MANAGER"`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

fn rejected(message: &str) -> Error {
    Error::Applier {
        message: message.to_string(),
        stderr: Some(message.to_string()),
        exit_code: Some(1),
    }
}

impl Applier for FakeApplier {
    async fn ensure_chain(&self, chain: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("ensure {chain}"));
        if state.fail_ensure {
            return Err(rejected("iptables v1.8.9: Permission denied (you must be root)"));
        }
        state.chains.entry(chain.to_string()).or_default();
        Ok(())
    }

    async fn jump_exists(&self, chain: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("check {chain}"));
        Ok(state.entry_jumps.iter().any(|j| j == chain))
    }

    async fn install_jump(&self, chain: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("jump {chain}"));
        state.entry_jumps.insert(0, chain.to_string());
        Ok(())
    }

    async fn flush_chain(&self, chain: &str) -> Result<()> {
        // Suspend like a real child process would, so concurrent passes can interleave
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("flush {chain}"));
        if state.fail_flush {
            return Err(rejected("iptables: Resource temporarily unavailable."));
        }
        match state.chains.get_mut(chain) {
            Some(rules) => {
                rules.clear();
                Ok(())
            }
            None => Err(rejected("iptables: No chain/target/match by that name.")),
        }
    }

    async fn apply(&self, chain: &str, rule: &PortMapping) -> Result<()> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("apply {chain} {}", rule.external_port));
        if state.failing_ports.contains(&rule.external_port) {
            return Err(rejected("iptables v1.8.9: invalid port/service specified"));
        }
        match state.chains.get_mut(chain) {
            Some(rules) => {
                rules.push(rule.clone());
                Ok(())
            }
            None => Err(rejected("iptables: No chain/target/match by that name.")),
        }
    }
}
