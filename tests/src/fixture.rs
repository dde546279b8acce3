use std::sync::Arc;

use common::config::OrchestratorConfig;
use inventory::audit::AuditLog;
use inventory::coordinates::BinlogCoordinates;
use inventory::instance::Instance;
use inventory::key::InstanceKey;
use inventory::maintenance::MaintenanceRegistry;
use inventory::repository::InstanceRepository;
use topology::driver::mock::{MockDriver, MockScanner};
use topology::Topology;

pub struct Fleet {
    pub topology: Topology,
    pub driver: Arc<MockDriver>,
    pub scanner: Arc<MockScanner>,
    pub repository: Arc<InstanceRepository>,
    pub maintenance: Arc<MaintenanceRegistry>,
    pub audit: Arc<AuditLog>,
}

pub fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    // keep retry gaps and poll intervals out of test wall time
    config.retry_interval_secs = 0;
    config.replication_state_poll_interval_ms = 1;
    config
}

pub fn fleet() -> Fleet {
    fleet_with_config(test_config())
}

pub fn fleet_with_config(config: OrchestratorConfig) -> Fleet {
    common::log::init_test_log();
    let repository = Arc::new(InstanceRepository::new());
    let driver = Arc::new(MockDriver::with_repository(repository.clone()));
    let scanner = Arc::new(MockScanner::new());
    let maintenance = Arc::new(MaintenanceRegistry::new());
    let audit = Arc::new(AuditLog::new());
    let topology = Topology::new(
        driver.clone(),
        scanner.clone(),
        repository.clone(),
        maintenance.clone(),
        audit.clone(),
        config,
    );
    Fleet {
        topology,
        driver,
        scanner,
        repository,
        maintenance,
        audit,
    }
}

pub fn key(host: &str) -> InstanceKey {
    InstanceKey::new(host, 3306)
}

/// A healthy main writing its own binary log.
pub fn main_instance(host: &str) -> Instance {
    Instance {
        key: key(host),
        version: String::from("8.0.32"),
        binlog_format: String::from("ROW"),
        cluster_name: String::from("main-cluster"),
        self_binlog_coordinates: BinlogCoordinates::new(format!("{}-bin.000001", host), 1000),
        log_bin_enabled: true,
        log_replica_updates_enabled: true,
        is_last_check_valid: true,
        is_recently_checked: true,
        ..Instance::default()
    }
}

/// A replica of `main_host`, applied up to `exec_pos` of the main's binlog.
pub fn replica_of(host: &str, main_host: &str, exec_pos: u64) -> Instance {
    let mut instance = main_instance(host);
    instance.read_only = true;
    instance.main_key = key(main_host);
    instance.replica_running = true;
    instance.exec_binlog_coordinates =
        BinlogCoordinates::new(format!("{}-bin.000001", main_host), exec_pos);
    instance.read_binlog_coordinates = instance.exec_binlog_coordinates.clone();
    instance.relaylog_coordinates =
        BinlogCoordinates::relay(format!("{}-relay.000002", host), exec_pos);
    instance.self_binlog_coordinates =
        BinlogCoordinates::new(format!("{}-bin.000001", host), 500 + exec_pos);
    instance
}

/// A binlog server under `main_host`: transparent on position, mirroring
/// the main's own binlog, relaying without applying.
pub fn binlog_server_of(host: &str, main_host: &str, exec_pos: u64) -> Instance {
    let mut instance = replica_of(host, main_host, exec_pos);
    instance.is_binlog_server = true;
    instance.log_replica_updates_enabled = false;
    instance.self_binlog_coordinates = instance.exec_binlog_coordinates.clone();
    instance
}

pub fn with_gtid(mut instance: Instance) -> Instance {
    instance.using_oracle_gtid = true;
    instance.supports_oracle_gtid = true;
    instance
}

pub fn with_pseudo_gtid(mut instance: Instance) -> Instance {
    instance.using_pseudo_gtid = true;
    instance
}
