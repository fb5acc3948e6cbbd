use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::audit::AuditLog;
use crate::core::container::ContainerResolver;
use crate::core::dhcp::DhcpLeases;
use crate::core::manager::RuleManager;
use crate::core::store::SettingsStore;

/// Shared application state for all HTTP handlers.
pub struct AppState<S, A> {
    pub manager: Arc<RuleManager<S, A>>,
    pub dhcp: Arc<DhcpLeases>,
    pub settings: Arc<SettingsStore>,
    pub resolver: ContainerResolver,
    pub audit: Option<Arc<AuditLog>>,
    /// Set once the NAT chain and jump have been installed.
    pub network_ready: AtomicBool,
}

impl<S, A> AppState<S, A> {
    pub fn new(
        manager: Arc<RuleManager<S, A>>,
        dhcp: Arc<DhcpLeases>,
        settings: Arc<SettingsStore>,
        resolver: ContainerResolver,
    ) -> Self {
        Self {
            manager,
            dhcp,
            settings,
            resolver,
            audit: None,
            network_ready: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn set_network_ready(&self, ready: bool) {
        self.network_ready.store(ready, Ordering::Relaxed);
    }

    pub fn is_network_ready(&self) -> bool {
        self.network_ready.load(Ordering::Relaxed)
    }
}
