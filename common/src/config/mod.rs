use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::err::{TResult, TopoError};

/// Knobs consumed by the topology manipulation core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub base: BaseConfig,

    /// Cap on concurrently running per-replica operations in bulk moves.
    pub max_concurrent_replica_operations: usize,

    /// Bound on waiting for replicas to stop nicely before sorting them.
    pub bulk_stop_replicas_timeout_secs: u64,

    /// A replica lagging beyond this is relocated out-of-band.
    pub reasonable_replication_lag_secs: u32,

    /// A replica whose last discovery took longer than this is relocated
    /// out-of-band.
    pub reasonable_discovery_latency_ms: u64,

    pub replication_state_poll_timeout_secs: u64,
    pub replication_state_poll_interval_ms: u64,

    /// Attempts for destructive main resets and purge updates.
    pub main_reset_retries: u32,

    /// Gap between such attempts.
    pub retry_interval_secs: u64,

    /// Hostnames matching any of these patterns are never promoted.
    pub promotion_ignore_hostname_filters: Vec<String>,

    /// Preferred data center when ranking promotion candidates.
    pub promotion_data_center_hint: String,

    /// Assume pseudo-GTID entries ascend monotonically within the binary log.
    pub pseudo_gtid_monotonic_hint: bool,

    /// Commands executed after a successful take-main.
    pub post_take_main_processes: Vec<String>,

    pub maintenance_owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BaseConfig {
    /// Log output directory; logging goes to stdout when unset.
    log_dir: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            base: BaseConfig::default(),
            max_concurrent_replica_operations: 5,
            bulk_stop_replicas_timeout_secs: 10,
            reasonable_replication_lag_secs: 10,
            reasonable_discovery_latency_ms: 500,
            replication_state_poll_timeout_secs: 10,
            replication_state_poll_interval_ms: 400,
            main_reset_retries: 5,
            retry_interval_secs: 5,
            promotion_ignore_hostname_filters: vec![],
            promotion_data_center_hint: String::from(""),
            pseudo_gtid_monotonic_hint: false,
            post_take_main_processes: vec![],
            maintenance_owner: String::from("topology-orchestrator"),
        }
    }
}

impl BaseConfig {
    pub fn get_log_dir(&self) -> Option<String> {
        self.log_dir.clone()
    }
}

/// Reads the configuration file at the given path.
pub fn read_config<P: AsRef<Path>>(path: P) -> TResult<OrchestratorConfig> {
    let mut file = File::open(path.as_ref())?;
    let mut s = String::new();

    file.read_to_string(&mut s)?;
    toml::from_str(s.as_str()).map_err(|e| TopoError::ConfigParse(e.to_string()))
}
