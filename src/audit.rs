/// Audit logging for state-changing operations
///
/// Every rule, lease and settings mutation (and every sync pass) is recorded
/// as one JSON object per line. Writing the audit log never fails the
/// operation being audited; write errors are logged as warnings instead.
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Types of auditable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    InitializeNetwork,
    SyncRules,
    AddRule,
    RemoveRule,
    SetStaticIp,
    RemoveStaticIp,
    UpdateSettings,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Type of event
    pub event_type: EventType,

    /// Whether the operation succeeded
    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    /// Creates a new audit event
    pub fn new(
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            success,
            details,
            error,
        }
    }

    /// Builds an event from the outcome of an operation.
    pub fn from_result<T, E: std::fmt::Display>(
        event_type: EventType,
        details: serde_json::Value,
        result: &Result<T, E>,
    ) -> Self {
        Self::new(
            event_type,
            result.is_ok(),
            details,
            result.as_ref().err().map(ToString::to_string),
        )
    }
}

/// Audit log writer
#[derive(Debug)]
pub struct AuditLog {
    log_path: PathBuf,
    /// Keeps concurrent appends from interleaving
    write_lock: Mutex<()>,
}

impl AuditLog {
    /// Audit log at `path`. The file is created on first append.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Appends an event to the audit log
    ///
    /// Events are written as JSON-lines format (one JSON object per line)
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be opened or written
    pub async fn append(&self, event: &AuditEvent) -> std::io::Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        crate::utils::ensure_parent_dir(&self.log_path).await?;

        #[cfg(unix)]
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o600)
            .open(&self.log_path)
            .await?;

        #[cfg(not(unix))]
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Appends `event`, downgrading a write failure to a warning.
    pub async fn log(&self, event: AuditEvent) {
        if let Err(e) = self.append(&event).await {
            tracing::warn!(
                "Failed to write audit log {} ({}): {}",
                self.log_path.display(),
                event.event_type,
                e
            );
        }
    }

    /// Reads the most recent events from the log, newest first
    ///
    /// Lines that fail to parse are skipped. A missing log has no events.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file exists but cannot be read
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = match tokio::fs::read_to_string(&self.log_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let events: Vec<AuditEvent> = content
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str(line).ok())
            .take(count)
            .collect();

        Ok(events)
    }
}
