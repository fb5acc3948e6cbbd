//! Rule manager facade
//!
//! Every externally visible rule operation goes through [`RuleManager`]: it
//! validates input, mutates the store, and follows each mutation with a full
//! sync pass so the kernel converges on the new store contents.

use crate::audit::{AuditEvent, AuditLog, EventType};
use crate::core::applier::Applier;
use crate::core::error::Result;
use crate::core::mapping::{NewPortMapping, PortMapping};
use crate::core::store::RuleStore;
use crate::core::sync::{SyncEngine, SyncReport};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct RuleManager<S, A> {
    store: Arc<S>,
    engine: SyncEngine<S, A>,
    audit: Option<Arc<AuditLog>>,
}

fn report_details(report: &Result<SyncReport>) -> serde_json::Value {
    match report {
        Ok(report) => json!({
            "applied": report.applied,
            "failed_ports": report.failures.iter().map(|f| f.external_port).collect::<Vec<_>>(),
        }),
        Err(_) => json!({}),
    }
}

impl<S: RuleStore, A: Applier> RuleManager<S, A> {
    pub fn new(store: Arc<S>, applier: A, chain: impl Into<String>) -> Self {
        Self {
            engine: SyncEngine::new(Arc::clone(&store), applier, chain),
            store,
            audit: None,
        }
    }

    /// Records every operation in `audit`.
    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn chain(&self) -> &str {
        self.engine.chain()
    }

    async fn record(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.log(event).await;
        }
    }

    pub async fn list_rules(&self) -> Result<Vec<PortMapping>> {
        self.store.list().await
    }

    /// Validates and stores `rule`, then syncs.
    ///
    /// # Errors
    ///
    /// - `Error::Validation` / `Error::DuplicatePort`: nothing was changed
    /// - any sync error: the rule stays stored and the kernel may lag behind
    ///   until the next successful sync
    pub async fn add_rule(&self, rule: NewPortMapping) -> Result<PortMapping> {
        let external_port = rule.external_port;
        let result = self.try_add(rule).await;

        let details = match &result {
            Ok(mapping) => json!({
                "id": mapping.id,
                "external_port": mapping.external_port,
                "protocol": mapping.protocol,
                "interface": mapping.interface,
                "target": format!("{}:{}", mapping.internal_ip, mapping.internal_port),
            }),
            Err(_) => json!({ "external_port": external_port }),
        };
        self.record(AuditEvent::from_result(EventType::AddRule, details, &result))
            .await;

        result
    }

    async fn try_add(&self, rule: NewPortMapping) -> Result<PortMapping> {
        let rule = rule.validated()?;
        let mapping = self.store.insert(rule).await?;
        info!("Added mapping {mapping}");

        let report = self.engine.sync().await?;
        if let Some(failure) = report
            .failures
            .iter()
            .find(|f| f.external_port == mapping.external_port)
        {
            warn!(
                "Mapping {mapping} is stored but the kernel rejected it: {}",
                failure.message
            );
        }
        Ok(mapping)
    }

    /// Deletes the mapping for `external_port` and syncs, even if nothing
    /// was deleted. Returns whether a mapping existed.
    pub async fn remove_rule(&self, external_port: u16) -> Result<bool> {
        let result = self.try_remove(external_port).await;

        let details = match &result {
            Ok(existed) => json!({ "external_port": external_port, "existed": existed }),
            Err(_) => json!({ "external_port": external_port }),
        };
        self.record(AuditEvent::from_result(EventType::RemoveRule, details, &result))
            .await;

        result
    }

    async fn try_remove(&self, external_port: u16) -> Result<bool> {
        let existed = self.store.delete(external_port).await?;
        if existed {
            info!("Removed mapping for port {external_port}");
        }
        self.engine.sync().await?;
        Ok(existed)
    }

    /// Rebuilds the kernel chain from the store.
    pub async fn force_apply(&self) -> Result<SyncReport> {
        let result = self.engine.sync().await;
        self.record(AuditEvent::from_result(
            EventType::SyncRules,
            report_details(&result),
            &result,
        ))
        .await;
        result
    }

    /// Creates the chain and jump if needed and performs the first sync.
    pub async fn initialize(&self) -> Result<SyncReport> {
        let result = self.engine.initialize().await;
        self.record(AuditEvent::from_result(
            EventType::InitializeNetwork,
            report_details(&result),
            &result,
        ))
        .await;
        result
    }
}
