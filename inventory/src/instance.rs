use std::time::Duration;

use serde::{Deserialize, Serialize};

use common::err::{TResult, TopoError};

use crate::coordinates::BinlogCoordinates;
use crate::gtid::GtidSet;
use crate::key::InstanceKey;
use crate::promotion::PromotionRule;

/// Cached snapshot of one database server, produced by discovery and
/// consumed by topology operations. Operations act on live servers and
/// return freshly read snapshots; this struct itself is inert data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Instance {
    pub key: InstanceKey,
    pub server_id: u32,
    pub server_uuid: String,
    pub version: String,
    pub binlog_format: String,
    pub cluster_name: String,
    pub data_center: String,
    pub promotion_rule: PromotionRule,

    pub main_key: InstanceKey,
    pub is_co_main: bool,
    pub replication_credentials_available: bool,
    pub allow_tls: bool,

    /// Position on the main's binary log that the IO thread has fetched.
    pub read_binlog_coordinates: BinlogCoordinates,
    /// Position on the main's binary log that the SQL thread has applied.
    pub exec_binlog_coordinates: BinlogCoordinates,
    pub relaylog_coordinates: BinlogCoordinates,
    /// Latest write position of this instance's own binary log.
    pub self_binlog_coordinates: BinlogCoordinates,
    pub sql_delay: u32,
    pub replica_running: bool,

    pub log_bin_enabled: bool,
    pub log_replica_updates_enabled: bool,
    pub is_binlog_server: bool,
    pub using_oracle_gtid: bool,
    pub supports_oracle_gtid: bool,
    pub using_mariadb_gtid: bool,
    pub using_pseudo_gtid: bool,

    pub read_only: bool,
    pub gtid_purged: GtidSet,
    pub executed_gtid_set: GtidSet,
    pub gtid_errant: GtidSet,

    pub is_last_check_valid: bool,
    pub is_recently_checked: bool,
    pub last_discovery_latency: Duration,
    pub replica_hosts: Vec<InstanceKey>,
}

impl Instance {
    pub fn is_replica(&self) -> bool {
        self.main_key.is_valid()
    }

    pub fn using_gtid(&self) -> bool {
        self.using_oracle_gtid || self.using_mariadb_gtid
    }

    pub fn is_mariadb(&self) -> bool {
        self.version.contains("MariaDB")
    }

    /// True when the SQL thread has applied everything the IO thread fetched.
    pub fn sql_thread_up_to_date(&self) -> bool {
        self.exec_binlog_coordinates
            .equals(&self.read_binlog_coordinates)
    }

    /// Leading numeric components of the version, e.g. [8, 0] for "8.0.32".
    pub fn major_version(&self) -> Vec<u32> {
        self.version
            .split('.')
            .take(2)
            .filter_map(|part| {
                part.chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect::<String>()
                    .parse()
                    .ok()
            })
            .collect()
    }

    pub fn is_smaller_major_version(&self, other: &Instance) -> bool {
        self.major_version() < other.major_version()
    }

    fn binlog_format_rank(format: &str) -> i32 {
        match format {
            "STATEMENT" => 0,
            "MIXED" => 1,
            "ROW" => 2,
            _ => -1,
        }
    }

    pub fn is_smaller_binlog_format(&self, other: &Instance) -> bool {
        Self::binlog_format_rank(&self.binlog_format)
            < Self::binlog_format_rank(&other.binlog_format)
    }

    /// Checks whether this instance could be configured to replicate from
    /// the given one. Reads snapshot fields only.
    pub fn can_replicate_from(&self, other: &Instance) -> TResult<()> {
        if self.key == other.key {
            return Err(TopoError::PreconditionViolated(format!(
                "{} cannot replicate from itself",
                self.key
            )));
        }
        if other.server_id != 0 && self.server_id == other.server_id {
            return Err(TopoError::PreconditionViolated(format!(
                "{} and {} share server id {}",
                self.key, other.key, self.server_id
            )));
        }
        if !other.log_bin_enabled {
            return Err(TopoError::PreconditionViolated(format!(
                "binary logs are disabled on {}",
                other.key
            )));
        }
        if other.is_replica() && !other.log_replica_updates_enabled && !other.is_binlog_server {
            return Err(TopoError::PreconditionViolated(format!(
                "{} does not log replica updates",
                other.key
            )));
        }
        if self.is_smaller_major_version(other) && !other.is_binlog_server {
            return Err(TopoError::PreconditionViolated(format!(
                "version of {} ({}) is older than {} ({})",
                self.key, self.version, other.key, other.version
            )));
        }
        if self.log_bin_enabled
            && self.log_replica_updates_enabled
            && self.is_smaller_binlog_format(other)
        {
            return Err(TopoError::PreconditionViolated(format!(
                "binlog format of {} ({}) cannot relay events of {} ({})",
                self.key, self.binlog_format, other.key, other.binlog_format
            )));
        }
        Ok(())
    }
}
