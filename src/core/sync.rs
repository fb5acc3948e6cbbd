//! Store-to-kernel reconciliation
//!
//! The kernel chain is always rebuilt from scratch: flush, then append every
//! stored mapping in store order. After a pass the chain mirrors the store
//! except for the rules reported in [`SyncReport::failures`]; anything added
//! to the chain by hand is gone.
//!
//! Passes are serialized. Two overlapping passes would interleave their
//! flushes and appends and leave duplicates behind.

use crate::core::applier::Applier;
use crate::core::error::Result;
use crate::core::store::RuleStore;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// A stored rule the kernel refused during a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleFailure {
    pub external_port: u16,
    pub message: String,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Number of rules now present in the chain
    pub applied: usize,
    pub failures: Vec<RuleFailure>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Keeps the managed chain in line with the rule store
#[derive(Debug)]
pub struct SyncEngine<S, A> {
    store: Arc<S>,
    applier: A,
    chain: String,
    pass: Mutex<()>,
}

impl<S: RuleStore, A: Applier> SyncEngine<S, A> {
    pub fn new(store: Arc<S>, applier: A, chain: impl Into<String>) -> Self {
        Self {
            store,
            applier,
            chain: chain.into(),
            pass: Mutex::new(()),
        }
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Creates the chain and the entry jump if needed, then syncs.
    ///
    /// Safe to call any number of times: the jump is only inserted when the
    /// probe says it is missing.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the chain cannot be created, the jump cannot be
    /// probed or installed, or the chain cannot be flushed.
    pub async fn initialize(&self) -> Result<SyncReport> {
        let _pass = self.pass.lock().await;

        self.applier.ensure_chain(&self.chain).await?;
        if self.applier.jump_exists(&self.chain).await? {
            info!("Jump to {} already present", self.chain);
        } else {
            self.applier.install_jump(&self.chain).await?;
            info!("Installed jump to {}", self.chain);
        }

        self.rebuild().await
    }

    /// Flushes the chain and re-appends every stored mapping.
    ///
    /// A rule the kernel rejects is logged, recorded in the report, and
    /// skipped; the rest are still applied.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the store cannot be read or the flush fails. Nothing
    /// is appended in that case.
    pub async fn sync(&self) -> Result<SyncReport> {
        let _pass = self.pass.lock().await;
        self.rebuild().await
    }

    async fn rebuild(&self) -> Result<SyncReport> {
        let rules = self.store.list().await?;
        self.applier.flush_chain(&self.chain).await?;

        let mut report = SyncReport::default();
        for rule in &rules {
            match self.applier.apply(&self.chain, rule).await {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    let message = e.diagnostic().map_or_else(|| e.to_string(), str::to_string);
                    warn!("Failed to apply rule {rule}: {message}");
                    report.failures.push(RuleFailure {
                        external_port: rule.external_port,
                        message,
                    });
                }
            }
        }

        info!(
            "Synced {} of {} rules into {}",
            report.applied,
            rules.len(),
            self.chain
        );
        Ok(report)
    }
}
