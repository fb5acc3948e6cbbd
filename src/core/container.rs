//! Container address lookup via `lxc-info`

use crate::core::error::{Error, Result};
use crate::elevation::{self, ElevationMode};
use crate::validators;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::debug;

/// First IPv4 address in `lxc-info -iH` output.
///
/// The output lists one address per line, IPv6 included.
pub fn first_ipv4(output: &str) -> Option<Ipv4Addr> {
    output
        .lines()
        .find_map(|line| line.trim().parse::<Ipv4Addr>().ok())
}

/// Resolves container names to their current IPv4 address
#[derive(Debug, Clone)]
pub struct ContainerResolver {
    program: String,
    elevation: ElevationMode,
    timeout: Duration,
}

impl Default for ContainerResolver {
    fn default() -> Self {
        Self::new("lxc-info")
    }
}

impl ContainerResolver {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            elevation: ElevationMode::Auto,
            timeout: crate::core::applier::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_elevation(mut self, elevation: ElevationMode) -> Self {
        self.elevation = elevation;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the container's first IPv4 address.
    ///
    /// `Ok(None)` covers both a stopped container and one that does not
    /// exist; `lxc-info` does not tell them apart reliably.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for a malformed name, or `Error::Io` if
    /// `lxc-info` cannot be run.
    pub async fn resolve(&self, name: &str) -> Result<Option<Ipv4Addr>> {
        let name = validators::validate_container_name(name)
            .map_err(|e| Error::validation("container", e))?;

        let args = vec!["-n".to_string(), name.clone(), "-iH".to_string()];
        let cmd = elevation::build_command(&self.program, &args, self.elevation)
            .map_err(|e| Error::Internal(e.to_string()))?;
        let output = elevation::run_captured(cmd, self.timeout).await?;

        if !output.status.success() {
            debug!(
                "{} for {name} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(None);
        }

        Ok(first_ipv4(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Like [`resolve`](Self::resolve), but a missing address is
    /// `Error::ContainerNotFound`.
    pub async fn require(&self, name: &str) -> Result<Ipv4Addr> {
        self.resolve(name)
            .await?
            .ok_or_else(|| Error::ContainerNotFound(name.to_string()))
    }
}
