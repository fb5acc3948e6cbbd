//! Input validation and sanitization functions for lxcm
//!
//! Everything that ends up in an iptables argument vector, the DHCP lease file,
//! or an `lxc-info` invocation passes through here first.

use std::net::Ipv4Addr;

/// Maximum length of a rule comment after sanitization
pub const MAX_COMMENT_LEN: usize = 64;

/// Sanitizes a free-text rule comment.
///
/// Keeps ASCII alphanumerics and a small set of punctuation; drops control
/// characters, quotes and shell metacharacters. Truncated to
/// [`MAX_COMMENT_LEN`] characters.
///
/// # Examples
///
/// ```
/// use lxcm::validators::sanitize_comment;
///
/// assert_eq!(sanitize_comment("web (nginx)"), "web (nginx)");
/// assert_eq!(sanitize_comment("a\"b`c$d"), "abcd");
/// ```
pub fn sanitize_comment(input: &str) -> String {
    input
        .chars()
        .filter(|c| {
            // SECURITY: ASCII only, no quoting or expansion characters
            c.is_ascii_alphanumeric()
                || matches!(c, ' ' | '-' | '_' | '.' | ':' | '/' | ',' | '(' | ')' | '#')
        })
        .take(MAX_COMMENT_LEN)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Validates a single port number.
///
/// # Errors
///
/// Returns `Err` if port is 0 (reserved).
pub fn validate_port(port: u16) -> Result<u16, String> {
    if port == 0 {
        Err("Port must be between 1 and 65535".to_string())
    } else {
        Ok(port)
    }
}

/// Validates a network interface name.
///
/// Linux kernel interface name rules:
/// - 1 to 15 characters (IFNAMSIZ - 1)
/// - Alphanumeric, dot, dash, underscore only
/// - Cannot be "." or ".."
///
/// # Errors
///
/// Returns `Err` if interface name violates kernel constraints.
pub fn validate_interface(name: &str) -> Result<String, String> {
    if name.is_empty() {
        return Err("Interface name cannot be empty (use \"all\")".to_string());
    }

    if name.len() > 15 {
        return Err("Interface name too long (max 15 characters)".to_string());
    }

    if name == "." || name == ".." {
        return Err("Invalid interface name".to_string());
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err("Interface name contains invalid characters".to_string());
    }

    Ok(name.to_string())
}

/// Validates an LXC container name.
///
/// Constraints:
/// - 1 to 64 characters
/// - ASCII alphanumeric, dash, underscore, dot
/// - Must not start with `-` (would be read as an option by `lxc-info`)
/// - Rejects "." and ".."
///
/// # Errors
///
/// Returns `Err` describing the first violated constraint.
pub fn validate_container_name(name: &str) -> Result<String, String> {
    if name.is_empty() {
        return Err("Container name cannot be empty".to_string());
    }

    if name.len() > 64 {
        return Err("Container name too long (max 64 characters)".to_string());
    }

    if name == "." || name == ".." || name.starts_with('-') {
        return Err("Invalid container name".to_string());
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err("Container name contains invalid characters".to_string());
    }

    Ok(name.to_string())
}

/// Parses a DNAT target address.
///
/// Unspecified (`0.0.0.0`) and broadcast addresses cannot be forwarded to.
///
/// # Errors
///
/// Returns `Err` if the string is not a usable IPv4 address.
pub fn validate_target_ip(input: &str) -> Result<Ipv4Addr, String> {
    let ip: Ipv4Addr = input
        .trim()
        .parse()
        .map_err(|_| format!("'{input}' is not a valid IPv4 address"))?;

    if ip.is_unspecified() || ip.is_broadcast() {
        return Err(format!("{ip} cannot be used as a forwarding target"));
    }

    Ok(ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_comment_normal() {
        assert_eq!(sanitize_comment("Normal Comment"), "Normal Comment");
        assert_eq!(sanitize_comment("web/80 -> nginx"), "web/80 - nginx");
    }

    #[test]
    fn test_sanitize_comment_removes_control_chars() {
        assert_eq!(sanitize_comment("Test\nNewline"), "TestNewline");
        assert_eq!(sanitize_comment("Test\0Null"), "TestNull");
        assert_eq!(sanitize_comment("Test\tTab"), "TestTab");
    }

    #[test]
    fn test_sanitize_comment_removes_shell_metacharacters() {
        assert_eq!(sanitize_comment("Test$Dollar"), "TestDollar");
        assert_eq!(sanitize_comment("Test`Backtick"), "TestBacktick");
        assert_eq!(sanitize_comment("Test|Pipe"), "TestPipe");
        assert_eq!(sanitize_comment("Test;Semicolon"), "TestSemicolon");
        assert_eq!(sanitize_comment("Test\"Quote'"), "TestQuote");
    }

    #[test]
    fn test_sanitize_comment_length_limit() {
        let long = "a".repeat(100);
        assert_eq!(sanitize_comment(&long).len(), MAX_COMMENT_LEN);
    }

    #[test]
    fn test_validate_port() {
        assert!(validate_port(0).is_err());
        assert_eq!(validate_port(1).unwrap(), 1);
        assert_eq!(validate_port(65535).unwrap(), 65535);
    }

    #[test]
    fn test_validate_interface_valid() {
        assert!(validate_interface("eth0").is_ok());
        assert!(validate_interface("br0.100").is_ok());
        assert!(validate_interface("enp6s0f1").is_ok());
        assert!(validate_interface("lxcbr0").is_ok());
    }

    #[test]
    fn test_validate_interface_invalid() {
        assert!(validate_interface("").is_err());
        assert!(validate_interface(".").is_err());
        assert!(validate_interface("..").is_err());
        assert!(validate_interface("eth0 ; rm -rf /").is_err());
        assert!(validate_interface(&"a".repeat(16)).is_err());
    }

    #[test]
    fn test_validate_container_name() {
        assert!(validate_container_name("web-01").is_ok());
        assert!(validate_container_name("db_main.2").is_ok());
        assert!(validate_container_name("").is_err());
        assert!(validate_container_name("-n").is_err());
        assert!(validate_container_name("a b").is_err());
        assert!(validate_container_name(&"c".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_target_ip() {
        assert_eq!(
            validate_target_ip("10.0.3.5").unwrap(),
            Ipv4Addr::new(10, 0, 3, 5)
        );
        assert_eq!(
            validate_target_ip(" 10.0.3.6 ").unwrap(),
            Ipv4Addr::new(10, 0, 3, 6)
        );
        assert!(validate_target_ip("0.0.0.0").is_err());
        assert!(validate_target_ip("255.255.255.255").is_err());
        assert!(validate_target_ip("10.0.3").is_err());
        assert!(validate_target_ip("fe80::1").is_err());
    }
}
