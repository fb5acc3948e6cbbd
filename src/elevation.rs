//! Privilege elevation for system commands
//!
//! lxcm normally runs as root under systemd, in which case every command is
//! executed directly. When it runs unprivileged (development, or a service
//! user with a sudoers entry) the firewall, lease-reload and `lxc-info`
//! commands are wrapped in a non-interactive elevation helper.
//!
//! # Elevation Strategy
//!
//! - [`ElevationMode::None`]: never wrap (tests, or binaries with file capabilities)
//! - [`ElevationMode::Sudo`]: `sudo -n <program>`, fails instead of prompting
//! - [`ElevationMode::Run0`]: `run0 <program>` (systemd v256+, no SUID)
//! - [`ElevationMode::Auto`]: direct when root, else `run0` when available, else `sudo -n`
//!
//! # Security
//!
//! - Commands are constructed as argument vectors, never through a shell
//! - Callers validate every user-supplied argument before it gets here
//! - Helper binaries are checked for availability before use

use serde::{Deserialize, Serialize};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

/// Error type for privilege elevation operations
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// Requested elevation method is not available (binary not found)
    #[error("Elevation method '{0}' is not available (binary not found)")]
    MethodNotAvailable(String),

    /// Running unprivileged and neither run0 nor sudo is installed
    #[error("Not running as root and no elevation helper (run0, sudo) was found")]
    NoHelper,
}

/// How commands that need root are launched
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ElevationMode {
    #[default]
    Auto,
    None,
    Sudo,
    Run0,
}

/// Checks if a binary exists in PATH
fn binary_exists(name: &str) -> bool {
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if full_path.is_file() {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}

fn wrapped(helper: &str, helper_args: &[&str], program: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(helper);
    cmd.args(helper_args).arg(program).args(args);
    cmd
}

fn direct(program: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd
}

/// Builds a command for `program` with `args`, elevated according to `mode`.
///
/// The returned command has no stdio configuration; callers decide what to
/// capture.
///
/// # Errors
///
/// Returns `Err` if the requested helper (or, in `Auto` mode, any helper) is
/// not installed.
pub fn build_command(
    program: &str,
    args: &[String],
    mode: ElevationMode,
) -> Result<Command, ElevationError> {
    match mode {
        ElevationMode::None => Ok(direct(program, args)),
        ElevationMode::Sudo => {
            if !binary_exists("sudo") {
                return Err(ElevationError::MethodNotAvailable("sudo".into()));
            }
            Ok(wrapped("sudo", &["-n"], program, args))
        }
        ElevationMode::Run0 => {
            if !binary_exists("run0") {
                return Err(ElevationError::MethodNotAvailable("run0".into()));
            }
            Ok(wrapped("run0", &[], program, args))
        }
        ElevationMode::Auto => {
            if nix::unistd::getuid().is_root() {
                return Ok(direct(program, args));
            }
            if binary_exists("run0") {
                return Ok(wrapped("run0", &[], program, args));
            }
            if binary_exists("sudo") {
                return Ok(wrapped("sudo", &["-n"], program, args));
            }
            Err(ElevationError::NoHelper)
        }
    }
}

/// Runs `cmd` with stdout and stderr captured, killing it after `timeout`.
///
/// A non-zero exit status is not an error here; inspect `Output::status`.
///
/// # Errors
///
/// Returns `Err` if the process cannot be spawned, or with
/// `ErrorKind::TimedOut` if it does not finish in time.
pub async fn run_captured(mut cmd: Command, timeout: Duration) -> std::io::Result<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn()?;
    tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("timed out after {}s", timeout.as_secs_f32()),
            )
        })?
}
