//! Kernel rule applier
//!
//! The [`Applier`] trait is the capability set the sync engine needs from the
//! firewall: create the dedicated chain, probe and install the jump into it,
//! flush it, and append one DNAT rule. [`IptablesApplier`] implements it by
//! running `iptables` once per primitive; nothing is batched.
//!
//! Each primitive is idempotent or guarded by a probe, so a full
//! flush-and-reapply can always be run again from a clean slate.

use crate::core::error::{Error, Result};
use crate::core::mapping::{PortMapping, Protocol};
use crate::elevation::{self, ElevationMode};
use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::debug;

/// Default name of the chain owned by lxcm
pub const DEFAULT_CHAIN: &str = "LXC_MANAGER";

/// Built-in chain the jump rule is inserted into
pub const ENTRY_CHAIN: &str = "PREROUTING";

/// Table holding the dedicated chain
pub const NAT_TABLE: &str = "nat";

/// Default per-invocation timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Firewall primitives used by the sync engine
pub trait Applier: Send + Sync + 'static {
    /// Creates `chain` in the NAT table. An existing chain is success.
    fn ensure_chain(&self, chain: &str) -> impl Future<Output = Result<()>> + Send;

    /// Whether the entry point already jumps to `chain`. Never mutates.
    fn jump_exists(&self, chain: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Inserts the jump to `chain` as the first rule of the entry point.
    fn install_jump(&self, chain: &str) -> impl Future<Output = Result<()>> + Send;

    /// Removes every rule in `chain`, keeping the chain itself.
    fn flush_chain(&self, chain: &str) -> impl Future<Output = Result<()>> + Send;

    /// Appends the DNAT rule for `rule` to `chain`.
    fn apply(&self, chain: &str, rule: &PortMapping) -> impl Future<Output = Result<()>> + Send;
}

/// A single DNAT rule, as it is handed to iptables
///
/// Built from named fields and rendered in a fixed order, so optional matches
/// (the inbound interface) can never land in the wrong position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnatRule<'a> {
    pub chain: &'a str,
    pub in_interface: Option<&'a str>,
    pub protocol: Protocol,
    pub destination_port: u16,
    pub to_address: Ipv4Addr,
    pub to_port: u16,
}

impl<'a> DnatRule<'a> {
    pub fn for_mapping(chain: &'a str, rule: &'a PortMapping) -> Self {
        Self {
            chain,
            in_interface: rule.interface.name(),
            protocol: rule.protocol,
            destination_port: rule.external_port,
            to_address: rule.internal_ip,
            to_port: rule.internal_port,
        }
    }

    /// Renders the `-A` invocation (without the program name).
    pub fn append_args(&self) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            NAT_TABLE.to_string(),
            "-A".to_string(),
            self.chain.to_string(),
        ];

        if let Some(interface) = self.in_interface {
            args.push("-i".to_string());
            args.push(interface.to_string());
        }

        args.extend([
            "-p".to_string(),
            self.protocol.as_str().to_string(),
            "--dport".to_string(),
            self.destination_port.to_string(),
            "-j".to_string(),
            "DNAT".to_string(),
            "--to-destination".to_string(),
            format!("{}:{}", self.to_address, self.to_port),
        ]);

        args
    }
}

/// Captured result of one iptables invocation
#[derive(Debug)]
struct Invocation {
    success: bool,
    exit_code: Option<i32>,
    stderr: String,
}

/// Returns true if iptables refused `-N` only because the chain exists.
fn is_chain_exists_error(stderr: &str) -> bool {
    stderr.to_lowercase().contains("chain already exists")
}

fn nat_args(rest: &[&str]) -> Vec<String> {
    ["-t", NAT_TABLE]
        .iter()
        .chain(rest)
        .map(|s| (*s).to_string())
        .collect()
}

/// [`Applier`] that shells out to `iptables`
#[derive(Debug, Clone)]
pub struct IptablesApplier {
    program: String,
    timeout: Duration,
    elevation: ElevationMode,
}

impl Default for IptablesApplier {
    fn default() -> Self {
        Self::new("iptables")
    }
}

impl IptablesApplier {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_TIMEOUT,
            elevation: ElevationMode::Auto,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_elevation(mut self, elevation: ElevationMode) -> Self {
        self.elevation = elevation;
        self
    }

    /// Runs iptables with `args`, bounded by the configured timeout.
    ///
    /// A non-zero exit is returned as an [`Invocation`], not an error; the
    /// caller decides what a failure means for its primitive.
    async fn run(&self, args: &[String]) -> Result<Invocation> {
        debug!("{} {}", self.program, args.join(" "));

        let cmd = elevation::build_command(&self.program, args, self.elevation).map_err(|e| {
            Error::Applier {
                message: format!("cannot run {}: {e}", self.program),
                stderr: None,
                exit_code: None,
            }
        })?;

        let output = elevation::run_captured(cmd, self.timeout)
            .await
            .map_err(|e| Error::Applier {
                message: format!("{} failed: {e}", self.program),
                stderr: None,
                exit_code: None,
            })?;

        Ok(Invocation {
            success: output.status.success(),
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    /// Runs iptables and turns any non-zero exit into `Error::Applier`.
    async fn run_checked(&self, args: &[String]) -> Result<()> {
        let invocation = self.run(args).await?;
        if invocation.success {
            Ok(())
        } else {
            Err(self.failure(args, invocation))
        }
    }

    fn failure(&self, args: &[String], invocation: Invocation) -> Error {
        let message = if invocation.stderr.is_empty() {
            format!(
                "{} {} exited with status {}",
                self.program,
                args.join(" "),
                invocation
                    .exit_code
                    .map_or_else(|| "unknown".to_string(), |c| c.to_string())
            )
        } else {
            invocation.stderr.clone()
        };

        Error::Applier {
            message,
            stderr: Some(invocation.stderr),
            exit_code: invocation.exit_code,
        }
    }
}

impl Applier for IptablesApplier {
    async fn ensure_chain(&self, chain: &str) -> Result<()> {
        let args = nat_args(&["-N", chain]);
        let invocation = self.run(&args).await?;

        if invocation.success || is_chain_exists_error(&invocation.stderr) {
            Ok(())
        } else {
            Err(self.failure(&args, invocation))
        }
    }

    async fn jump_exists(&self, chain: &str) -> Result<bool> {
        let args = nat_args(&["-C", ENTRY_CHAIN, "-j", chain]);
        let invocation = self.run(&args).await?;

        match (invocation.success, invocation.exit_code) {
            (true, _) => Ok(true),
            // iptables -C exits 1 when the rule is simply not there
            (false, Some(1)) => Ok(false),
            _ => Err(self.failure(&args, invocation)),
        }
    }

    async fn install_jump(&self, chain: &str) -> Result<()> {
        self.run_checked(&nat_args(&["-I", ENTRY_CHAIN, "1", "-j", chain]))
            .await
    }

    async fn flush_chain(&self, chain: &str) -> Result<()> {
        self.run_checked(&nat_args(&["-F", chain])).await
    }

    async fn apply(&self, chain: &str, rule: &PortMapping) -> Result<()> {
        self.run_checked(&DnatRule::for_mapping(chain, rule).append_args())
            .await
    }
}
