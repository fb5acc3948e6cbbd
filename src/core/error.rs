use thiserror::Error;

/// Core error types for lxcm
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A mapping for this external port is already stored
    #[error("Port {0} is already mapped")]
    DuplicatePort(u16),

    /// Firewall tool invocation failed or timed out
    #[error("iptables error: {message}")]
    Applier {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    /// Input validation failed
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    /// Container has no reachable IPv4 address (or does not exist)
    #[error("Container '{0}' has no reachable IPv4 address")]
    ContainerNotFound(String),

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Diagnostic text from the firewall tool, if this error carries any.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::Applier {
                stderr: Some(stderr),
                ..
            } if !stderr.is_empty() => Some(stderr),
            Self::Applier { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Known iptables diagnostics and the operator hints that go with them
pub struct IptablesErrorPattern;

impl IptablesErrorPattern {
    /// Matches an iptables error message against known patterns.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        if lower.contains("permission denied")
            || lower.contains("operation not permitted")
            || lower.contains("you must be root")
        {
            return ErrorTranslation::new("Insufficient permissions to modify NAT rules")
                .with_suggestion("Run lxcm as root or with CAP_NET_ADMIN")
                .with_suggestion("Or set \"elevation\": \"sudo\" with a NOPASSWD sudoers entry");
        }

        if lower.contains("no such file") || lower.contains("command not found") {
            return ErrorTranslation::new("iptables is not installed or not found in PATH")
                .with_suggestion("Install iptables: sudo apt install iptables  (Debian/Ubuntu)")
                .with_suggestion("Or point \"iptables_command\" in the config at the binary");
        }

        if lower.contains("xtables lock") || lower.contains("resource temporarily unavailable") {
            return ErrorTranslation::new("Another process holds the xtables lock")
                .with_suggestion("Wait a moment and run `lxcm rules apply` again")
                .with_suggestion("Check for other firewall managers: systemctl status firewalld ufw");
        }

        if lower.contains("couldn't load target") || lower.contains("no chain/target/match") {
            return ErrorTranslation::new("NAT chain or target not found")
                .with_suggestion("The managed chain may have been deleted by hand")
                .with_suggestion("Restart `lxcm serve` to recreate the chain and jump rule");
        }

        if lower.contains("bad argument") || lower.contains("invalid port") {
            return ErrorTranslation::new("iptables rejected a rule argument")
                .with_suggestion("Check the interface name and port numbers of the failing rule")
                .with_suggestion("Remove and re-add the rule with corrected values");
        }

        if lower.contains("timed out") {
            return ErrorTranslation::new("iptables did not finish in time")
                .with_suggestion("Check system load: uptime")
                .with_suggestion("Raise \"command_timeout_secs\" in the config");
        }

        ErrorTranslation::new(format!("Firewall error: {msg}"))
            .with_suggestion("Inspect the chain: sudo iptables -t nat -L -n -v")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
