//! Durable storage for port mappings and settings
//!
//! The [`RuleStore`] trait is the only way the rest of the crate touches
//! stored mappings. Two implementations are provided:
//!
//! - [`JsonRuleStore`]: a single local JSON file, rewritten atomically on
//!   every mutation
//! - [`MemoryRuleStore`]: the same semantics without persistence
//!
//! Both enforce external-port uniqueness with the check and the insert under
//! one lock, so concurrent `insert` calls for the same port cannot both win.

use crate::core::error::{Error, Result};
use crate::core::mapping::{NewPortMapping, PortMapping};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Persistence contract for port mappings
pub trait RuleStore: Send + Sync + 'static {
    /// All mappings in insertion order.
    fn list(&self) -> impl Future<Output = Result<Vec<PortMapping>>> + Send;

    /// Stores a new mapping and assigns its id.
    ///
    /// Fails with [`Error::DuplicatePort`] if the external port is taken.
    fn insert(&self, rule: NewPortMapping) -> impl Future<Output = Result<PortMapping>> + Send;

    /// Removes the mapping for `external_port`. Returns whether one existed.
    fn delete(&self, external_port: u16) -> impl Future<Output = Result<bool>> + Send;
}

/// On-disk and in-memory table layout
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RuleTable {
    #[serde(default = "first_id")]
    next_id: u64,
    #[serde(default)]
    rules: Vec<PortMapping>,
}

fn first_id() -> u64 {
    1
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::empty()
    }
}

impl RuleTable {
    fn empty() -> Self {
        Self {
            next_id: first_id(),
            rules: Vec::new(),
        }
    }

    /// Returns the table with `rule` appended, leaving `self` untouched.
    fn with_inserted(&self, rule: NewPortMapping) -> Result<(Self, PortMapping)> {
        if self
            .rules
            .iter()
            .any(|r| r.external_port == rule.external_port)
        {
            return Err(Error::DuplicatePort(rule.external_port));
        }

        let mapping = PortMapping::from_new(self.next_id, rule);
        let mut next = self.clone();
        next.next_id = self
            .next_id
            .checked_add(1)
            .ok_or_else(|| Error::Internal("rule ids exhausted".to_string()))?;
        next.rules.push(mapping.clone());
        Ok((next, mapping))
    }

    /// Checks a table read from disk and makes `next_id` safe to hand out.
    ///
    /// Rejects tables with two rows for the same external port.
    fn validate_loaded(&mut self) -> std::result::Result<(), String> {
        let mut ports = BTreeSet::new();
        if let Some(duplicate) = self.rules.iter().find(|r| !ports.insert(r.external_port)) {
            return Err(format!(
                "more than one mapping for external port {}",
                duplicate.external_port
            ));
        }

        // Never hand out an id that is already in the file
        let max_id = self.rules.iter().map(|r| r.id).max().unwrap_or(0);
        let after_max = max_id
            .checked_add(1)
            .ok_or_else(|| format!("mapping id {max_id} is out of range"))?;
        self.next_id = self.next_id.max(after_max);
        Ok(())
    }

    /// Returns the table without `external_port`, or `None` if absent.
    fn without_port(&self, external_port: u16) -> Option<Self> {
        let position = self
            .rules
            .iter()
            .position(|r| r.external_port == external_port)?;
        let mut next = self.clone();
        next.rules.remove(position);
        Some(next)
    }
}

/// Non-persistent rule store
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    table: Mutex<RuleTable>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(RuleTable::empty()),
        }
    }
}

impl RuleStore for MemoryRuleStore {
    async fn list(&self) -> Result<Vec<PortMapping>> {
        Ok(self.table.lock().await.rules.clone())
    }

    async fn insert(&self, rule: NewPortMapping) -> Result<PortMapping> {
        let mut table = self.table.lock().await;
        let (next, mapping) = table.with_inserted(rule)?;
        *table = next;
        Ok(mapping)
    }

    async fn delete(&self, external_port: u16) -> Result<bool> {
        let mut table = self.table.lock().await;
        match table.without_port(external_port) {
            Some(next) => {
                *table = next;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Rule store backed by a single JSON file
///
/// The whole table is cached in memory; every mutation writes the new table to
/// disk first and only then replaces the cached copy, so a failed write leaves
/// both unchanged.
#[derive(Debug)]
pub struct JsonRuleStore {
    path: PathBuf,
    table: Mutex<RuleTable>,
}

impl JsonRuleStore {
    /// Opens the store at `path`. A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file exists but cannot be read or parsed, or
    /// holds two mappings for the same external port.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let table = if tokio::fs::try_exists(&path).await? {
            let json = tokio::fs::read_to_string(&path).await?;
            let mut table: RuleTable = serde_json::from_str(&json)?;
            table
                .validate_loaded()
                .map_err(|reason| Error::Internal(format!("rule store {}: {reason}", path.display())))?;
            info!("Loaded {} port mappings from {}", table.rules.len(), path.display());
            table
        } else {
            debug!("Rule store {} does not exist yet, starting empty", path.display());
            RuleTable::empty()
        };

        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, table: &RuleTable) -> Result<()> {
        let json = serde_json::to_string_pretty(table)?;
        crate::utils::write_atomic(&self.path, json.as_bytes()).await?;
        Ok(())
    }
}

impl RuleStore for JsonRuleStore {
    async fn list(&self) -> Result<Vec<PortMapping>> {
        Ok(self.table.lock().await.rules.clone())
    }

    async fn insert(&self, rule: NewPortMapping) -> Result<PortMapping> {
        let mut table = self.table.lock().await;
        let (next, mapping) = table.with_inserted(rule)?;
        self.persist(&next).await?;
        *table = next;
        Ok(mapping)
    }

    async fn delete(&self, external_port: u16) -> Result<bool> {
        let mut table = self.table.lock().await;
        let Some(next) = table.without_port(external_port) else {
            return Ok(false);
        };
        self.persist(&next).await?;
        *table = next;
        Ok(true)
    }
}

/// Setting key for the container backup directory
pub const BACKUP_PATH_KEY: &str = "backup_path";

/// Default container backup directory
pub const DEFAULT_BACKUP_PATH: &str = "/tmp/lxc_backups";

/// Key-value settings persisted as a JSON object (last write wins)
#[derive(Debug)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    values: Mutex<BTreeMap<String, String>>,
}

impl SettingsStore {
    /// Opens the settings file at `path`. A missing file means no settings.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file exists but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if tokio::fs::try_exists(&path).await? {
            let json = tokio::fs::read_to_string(&path).await?;
            serde_json::from_str(&json)?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: Some(path),
            values: Mutex::new(values),
        })
    }

    /// Settings that live only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Mutex::new(BTreeMap::new()),
        }
    }

    pub async fn get(&self, key: &str, default: &str) -> String {
        self.values
            .lock()
            .await
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the settings file cannot be written; the in-memory
    /// value is left unchanged in that case.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().await;
        let mut next = values.clone();
        next.insert(key.to_string(), value.to_string());

        if let Some(path) = &self.path {
            let json = serde_json::to_string_pretty(&next)?;
            crate::utils::write_atomic(path, json.as_bytes()).await?;
        }

        *values = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::new_mapping;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_memory_insert_assigns_ids() {
        let store = MemoryRuleStore::new();
        let a = store.insert(new_mapping(8080, 80)).await.unwrap();
        let b = store.insert(new_mapping(2222, 22)).await.unwrap();

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        let ports: Vec<u16> = store
            .list()
            .await
            .unwrap()
            .iter()
            .map(|r| r.external_port)
            .collect();
        assert_eq!(ports, vec![8080, 2222]);
    }

    #[tokio::test]
    async fn test_duplicate_port_leaves_store_unchanged() {
        let store = MemoryRuleStore::new();
        store.insert(new_mapping(8080, 80)).await.unwrap();

        let err = store.insert(new_mapping(8080, 8080)).await.unwrap_err();
        assert!(matches!(err, Error::DuplicatePort(8080)));

        let rules = store.list().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].internal_port, 80);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryRuleStore::new();
        store.insert(new_mapping(8080, 80)).await.unwrap();

        assert!(store.delete(8080).await.unwrap());
        assert!(!store.delete(8080).await.unwrap());
        assert!(!store.delete(9999).await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_delete() {
        let store = MemoryRuleStore::new();
        store.insert(new_mapping(1000, 80)).await.unwrap();
        store.delete(1000).await.unwrap();
        let again = store.insert(new_mapping(1000, 80)).await.unwrap();
        assert_eq!(again.id, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_same_port() {
        let store = Arc::new(MemoryRuleStore::new());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.insert(new_mapping(8080, 1000 + i)).await })
            })
            .collect();

        let mut wins = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(Error::DuplicatePort(8080)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(wins, 1);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_json_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");

        {
            let store = JsonRuleStore::open(&path).await.unwrap();
            store.insert(new_mapping(8080, 80)).await.unwrap();
            store.insert(new_mapping(5353, 53)).await.unwrap();
            store.delete(8080).await.unwrap();
        }

        let store = JsonRuleStore::open(&path).await.unwrap();
        let rules = store.list().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].external_port, 5353);
        assert_eq!(rules[0].id, 2);

        let next = store.insert(new_mapping(8443, 443)).await.unwrap();
        assert_eq!(next.id, 3);
    }

    #[tokio::test]
    async fn test_json_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRuleStore::open(dir.path().join("absent.json"))
            .await
            .unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_json_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        assert!(matches!(
            JsonRuleStore::open(&path).await,
            Err(Error::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_json_store_recovers_next_id_from_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        tokio::fs::write(
            &path,
            r#"{"rules":[{"id":7,"interface":"all","protocol":"tcp","external_port":80,"internal_ip":"10.0.3.2","internal_port":80}]}"#,
        )
        .await
        .unwrap();

        let store = JsonRuleStore::open(&path).await.unwrap();
        let next = store.insert(new_mapping(81, 81)).await.unwrap();
        assert_eq!(next.id, 8);
    }

    #[tokio::test]
    async fn test_json_store_rejects_duplicate_ports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        tokio::fs::write(
            &path,
            r#"{"next_id":3,"rules":[
                {"id":1,"interface":"all","protocol":"tcp","external_port":80,"internal_ip":"10.0.3.2","internal_port":80},
                {"id":2,"interface":"all","protocol":"udp","external_port":80,"internal_ip":"10.0.3.3","internal_port":8080}
            ]}"#,
        )
        .await
        .unwrap();

        match JsonRuleStore::open(&path).await {
            Err(Error::Internal(message)) => assert!(message.contains("port 80"), "{message}"),
            other => panic!("expected duplicate port error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_json_store_rejects_exhausted_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        tokio::fs::write(
            &path,
            format!(
                r#"{{"rules":[{{"id":{},"interface":"all","protocol":"tcp","external_port":80,"internal_ip":"10.0.3.2","internal_port":80}}]}}"#,
                u64::MAX
            ),
        )
        .await
        .unwrap();

        assert!(matches!(
            JsonRuleStore::open(&path).await,
            Err(Error::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_json_store_last_id_is_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        tokio::fs::write(&path, format!(r#"{{"next_id":{},"rules":[]}}"#, u64::MAX))
            .await
            .unwrap();

        let store = JsonRuleStore::open(&path).await.unwrap();
        assert!(matches!(
            store.insert(new_mapping(80, 80)).await,
            Err(Error::Internal(_))
        ));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settings_default_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let settings = SettingsStore::open(&path).await.unwrap();
        assert_eq!(
            settings.get(BACKUP_PATH_KEY, DEFAULT_BACKUP_PATH).await,
            DEFAULT_BACKUP_PATH
        );

        settings.set(BACKUP_PATH_KEY, "/srv/backups").await.unwrap();
        settings.set(BACKUP_PATH_KEY, "/srv/lxc").await.unwrap();

        let reopened = SettingsStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.get(BACKUP_PATH_KEY, DEFAULT_BACKUP_PATH).await,
            "/srv/lxc"
        );
    }
}
