pub mod correlation;
pub mod driver;
pub mod hooks;
pub mod ops;
pub mod scanner;

use std::sync::Arc;

use common::config::OrchestratorConfig;
use inventory::audit::AuditLog;
use inventory::maintenance::MaintenanceRegistry;
use inventory::repository::InstanceRepository;

use crate::driver::InstanceDriver;
use crate::scanner::LogScanner;

/// The replication topology manipulation core. Holds the collaborators every
/// operation needs: the driver surface to live servers, the log-scanning
/// oracles, the instance inventory, the maintenance registry and the audit
/// sink. Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct Topology {
    driver: Arc<dyn InstanceDriver>,
    scanner: Arc<dyn LogScanner>,
    repository: Arc<InstanceRepository>,
    maintenance: Arc<MaintenanceRegistry>,
    audit: Arc<AuditLog>,
    config: Arc<OrchestratorConfig>,
}

impl Topology {
    pub fn new(
        driver: Arc<dyn InstanceDriver>,
        scanner: Arc<dyn LogScanner>,
        repository: Arc<InstanceRepository>,
        maintenance: Arc<MaintenanceRegistry>,
        audit: Arc<AuditLog>,
        config: OrchestratorConfig,
    ) -> Self {
        Topology {
            driver,
            scanner,
            repository,
            maintenance,
            audit,
            config: Arc::new(config),
        }
    }

    pub fn repository(&self) -> &InstanceRepository {
        &self.repository
    }

    pub fn maintenance(&self) -> &MaintenanceRegistry {
        &self.maintenance
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }
}
