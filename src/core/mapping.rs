//! Port mapping data structures
//!
//! A [`PortMapping`] is one persisted DNAT rule: traffic arriving on
//! `external_port` (optionally only on one interface) is forwarded to
//! `internal_ip:internal_port`, usually a container on the LXC bridge.
//!
//! # Example
//!
//! ```
//! use lxcm::core::mapping::{InterfaceFilter, NewPortMapping, Protocol};
//! use std::net::Ipv4Addr;
//!
//! let rule = NewPortMapping {
//!     interface: InterfaceFilter::All,
//!     protocol: Protocol::Tcp,
//!     external_port: 8080,
//!     internal_ip: Ipv4Addr::new(10, 0, 3, 5),
//!     internal_port: 80,
//!     comment: Some("web".to_string()),
//! };
//! assert!(rule.validated().is_ok());
//! ```

use crate::core::error::{Error, Result};
use crate::validators;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Sentinel interface value meaning "match every inbound interface"
pub const ALL_INTERFACES: &str = "all";

/// Transport protocol of a forwarded port
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// Inbound interface restriction of a mapping
///
/// Serialized as the plain interface name, or `"all"` for [`InterfaceFilter::All`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum InterfaceFilter {
    #[default]
    All,
    Named(String),
}

impl InterfaceFilter {
    /// Interface name to pass to `-i`, or `None` when every interface matches.
    pub fn name(&self) -> Option<&str> {
        match self {
            InterfaceFilter::All => None,
            InterfaceFilter::Named(name) => Some(name),
        }
    }
}

impl TryFrom<String> for InterfaceFilter {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(ALL_INTERFACES) {
            return Ok(InterfaceFilter::All);
        }
        validators::validate_interface(trimmed).map(InterfaceFilter::Named)
    }
}

impl From<InterfaceFilter> for String {
    fn from(value: InterfaceFilter) -> Self {
        match value {
            InterfaceFilter::All => ALL_INTERFACES.to_string(),
            InterfaceFilter::Named(name) => name,
        }
    }
}

impl fmt::Display for InterfaceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name().unwrap_or(ALL_INTERFACES))
    }
}

/// A stored port forwarding rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Store-assigned identity
    pub id: u64,
    #[serde(default)]
    pub interface: InterfaceFilter,
    pub protocol: Protocol,
    pub external_port: u16,
    pub internal_ip: Ipv4Addr,
    pub internal_port: u16,
    #[serde(default)]
    pub comment: Option<String>,
}

impl PortMapping {
    pub fn from_new(id: u64, rule: NewPortMapping) -> Self {
        Self {
            id,
            interface: rule.interface,
            protocol: rule.protocol,
            external_port: rule.external_port,
            internal_ip: rule.internal_ip,
            internal_port: rule.internal_port,
            comment: rule.comment,
        }
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} on {} -> {}:{}",
            self.protocol, self.external_port, self.interface, self.internal_ip, self.internal_port
        )
    }
}

/// A port forwarding rule that has not been stored yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPortMapping {
    #[serde(default)]
    pub interface: InterfaceFilter,
    pub protocol: Protocol,
    pub external_port: u16,
    pub internal_ip: Ipv4Addr,
    pub internal_port: u16,
    #[serde(default)]
    pub comment: Option<String>,
}

impl NewPortMapping {
    /// Checks ports and target address, and sanitizes the comment.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` naming the offending field.
    pub fn validated(mut self) -> Result<Self> {
        validators::validate_port(self.external_port)
            .map_err(|e| Error::validation("external_port", e))?;
        validators::validate_port(self.internal_port)
            .map_err(|e| Error::validation("internal_port", e))?;
        validators::validate_target_ip(&self.internal_ip.to_string())
            .map_err(|e| Error::validation("internal_ip", e))?;
        if let InterfaceFilter::Named(name) = &self.interface {
            validators::validate_interface(name).map_err(|e| Error::validation("interface", e))?;
        }

        self.comment = self
            .comment
            .as_deref()
            .map(validators::sanitize_comment)
            .filter(|c| !c.is_empty());

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn web_rule() -> NewPortMapping {
        NewPortMapping {
            interface: InterfaceFilter::All,
            protocol: Protocol::Tcp,
            external_port: 8080,
            internal_ip: Ipv4Addr::new(10, 0, 3, 5),
            internal_port: 80,
            comment: None,
        }
    }

    #[test]
    fn test_protocol_strings() {
        assert_eq!(Protocol::Tcp.to_string(), "tcp");
        assert_eq!(Protocol::from_str("UDP").unwrap(), Protocol::Udp);
        assert!(Protocol::from_str("icmp").is_err());
        assert_eq!(serde_json::to_string(&Protocol::Udp).unwrap(), "\"udp\"");
    }

    #[test]
    fn test_interface_all_sentinel() {
        let all: InterfaceFilter = serde_json::from_str("\"ALL\"").unwrap();
        assert_eq!(all, InterfaceFilter::All);
        let empty: InterfaceFilter = serde_json::from_str("\"\"").unwrap();
        assert_eq!(empty, InterfaceFilter::All);
        assert_eq!(serde_json::to_string(&all).unwrap(), "\"all\"");
    }

    #[test]
    fn test_interface_named() {
        let named: InterfaceFilter = serde_json::from_str("\"enp6s0f1\"").unwrap();
        assert_eq!(named.name(), Some("enp6s0f1"));
        assert!(serde_json::from_str::<InterfaceFilter>("\"eth0;reboot\"").is_err());
    }

    #[test]
    fn test_new_mapping_deserializes_without_optional_fields() {
        let json = r#"{"protocol":"tcp","external_port":8080,"internal_ip":"10.0.3.5","internal_port":80}"#;
        let rule: NewPortMapping = serde_json::from_str(json).unwrap();
        assert_eq!(rule, web_rule());
    }

    #[test]
    fn test_validated_rejects_zero_ports() {
        let mut rule = web_rule();
        rule.external_port = 0;
        assert!(matches!(
            rule.validated(),
            Err(Error::Validation { field, .. }) if field == "external_port"
        ));

        let mut rule = web_rule();
        rule.internal_port = 0;
        assert!(matches!(
            rule.validated(),
            Err(Error::Validation { field, .. }) if field == "internal_port"
        ));
    }

    #[test]
    fn test_validated_sanitizes_comment() {
        let mut rule = web_rule();
        rule.comment = Some("nginx \"front\"".to_string());
        assert_eq!(
            rule.validated().unwrap().comment.as_deref(),
            Some("nginx front")
        );

        let mut rule = web_rule();
        rule.comment = Some("$$$".to_string());
        assert_eq!(rule.validated().unwrap().comment, None);
    }

    #[test]
    fn test_display() {
        let mapping = PortMapping::from_new(1, web_rule());
        assert_eq!(mapping.to_string(), "tcp/8080 on all -> 10.0.3.5:80");
    }
}
