//! Static DHCP assignments
//!
//! lxc-net's dnsmasq reads `dhcp-host=<name>,<ip>` lines from a config file.
//! [`DhcpLeases`] owns that file: it is parsed on every read, rewritten in
//! full on every change, and dnsmasq is asked to reload afterwards.

use crate::audit::{AuditEvent, AuditLog, EventType};
use crate::core::error::{Error, Result};
use crate::elevation::{self, ElevationMode};
use crate::validators;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const DEFAULT_DHCP_CONFIG: &str = "/etc/lxc/dhcp.conf";

const HOST_PREFIX: &str = "dhcp-host=";

/// Mode for a lease file that does not exist yet; dnsmasq must be able to read it
const DEFAULT_FILE_MODE: u32 = 0o644;

/// Default command run after the file changes
pub fn default_reload_command() -> Vec<String> {
    vec![
        "systemctl".to_string(),
        "reload".to_string(),
        "lxc-net".to_string(),
    ]
}

/// Parses `dhcp-host=` lines into a name → address map. Other lines are ignored.
pub fn parse_leases(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .filter_map(|line| line.trim().strip_prefix(HOST_PREFIX))
        .filter_map(|entry| {
            let mut fields = entry.split(',');
            let name = fields.next()?.trim();
            let ip = fields.next()?.trim();
            Some((name.to_string(), ip.to_string()))
        })
        .collect()
}

pub fn render_leases(leases: &BTreeMap<String, String>) -> String {
    leases.iter().fold(String::new(), |mut out, (name, ip)| {
        let _ = writeln!(out, "{HOST_PREFIX}{name},{ip}");
        out
    })
}

#[derive(Debug)]
pub struct DhcpLeases {
    path: PathBuf,
    reload_command: Option<Vec<String>>,
    elevation: ElevationMode,
    timeout: Duration,
    /// Serializes read-modify-write cycles on the file
    lock: Mutex<()>,
    audit: Option<Arc<AuditLog>>,
}

impl DhcpLeases {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reload_command: Some(default_reload_command()),
            elevation: ElevationMode::Auto,
            timeout: crate::core::applier::DEFAULT_TIMEOUT,
            lock: Mutex::new(()),
            audit: None,
        }
    }

    /// Command to run after each change, or `None` to skip reloading.
    pub fn with_reload_command(mut self, command: Option<Vec<String>>) -> Self {
        self.reload_command = command.filter(|c| !c.is_empty());
        self
    }

    pub fn with_elevation(mut self, elevation: ElevationMode) -> Self {
        self.elevation = elevation;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<BTreeMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(parse_leases(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, leases: &BTreeMap<String, String>) -> Result<()> {
        crate::utils::write_atomic_preserving_mode(
            &self.path,
            render_leases(leases).as_bytes(),
            DEFAULT_FILE_MODE,
        )
        .await?;
        self.reload().await;
        Ok(())
    }

    /// Asks dnsmasq to pick up the new file. Failure only warns.
    async fn reload(&self) {
        let Some((program, args)) = self.reload_command.as_deref().and_then(<[String]>::split_first)
        else {
            return;
        };

        let cmd = match elevation::build_command(program, args, self.elevation) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!("Cannot reload DHCP configuration: {e}");
                return;
            }
        };

        match elevation::run_captured(cmd, self.timeout).await {
            Ok(output) if output.status.success() => {
                info!("Reloaded DHCP configuration");
            }
            Ok(output) => warn!(
                "DHCP reload `{}` exited with {}: {}",
                self.reload_command.as_deref().unwrap_or_default().join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => warn!("DHCP reload failed: {e}"),
        }
    }

    async fn record(&self, event_type: EventType, details: serde_json::Value, result: &Result<bool>) {
        if let Some(audit) = &self.audit {
            audit
                .log(AuditEvent::from_result(event_type, details, result))
                .await;
        }
    }

    /// Current assignments, container name → address
    pub async fn list(&self) -> Result<BTreeMap<String, String>> {
        self.read().await
    }

    /// Inserts or replaces the assignment for `name`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for a bad name or address, otherwise
    /// file errors. A failed reload is not an error.
    pub async fn set(&self, name: &str, ip: &str) -> Result<()> {
        let result = self.try_set(name, ip).await.map(|()| true);
        self.record(
            EventType::SetStaticIp,
            json!({ "name": name, "ip": ip }),
            &result,
        )
        .await;
        result.map(|_| ())
    }

    async fn try_set(&self, name: &str, ip: &str) -> Result<()> {
        let name = validators::validate_container_name(name).map_err(|e| Error::validation("name", e))?;
        let ip = validators::validate_target_ip(ip).map_err(|e| Error::validation("ip", e))?;

        let _guard = self.lock.lock().await;
        let mut leases = self.read().await?;
        leases.insert(name.clone(), ip.to_string());
        self.write(&leases).await?;
        info!("Static address {ip} assigned to {name}");
        Ok(())
    }

    /// Removes the assignment for `name`. Returns whether one existed.
    pub async fn remove(&self, name: &str) -> Result<bool> {
        let result = self.try_remove(name).await;
        self.record(EventType::RemoveStaticIp, json!({ "name": name }), &result)
            .await;
        result
    }

    async fn try_remove(&self, name: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut leases = self.read().await?;
        if leases.remove(name).is_none() {
            return Ok(false);
        }
        self.write(&leases).await?;
        info!("Static address for {name} removed");
        Ok(true)
    }
}
