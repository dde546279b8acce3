#[cfg(any(test, feature = "mock_api"))]
pub mod mock;

use std::time::Duration;

use async_trait::async_trait;

use common::err::TResult;
use inventory::coordinates::BinlogCoordinates;
use inventory::gtid::{Gtid, GtidSet};
use inventory::instance::Instance;
use inventory::key::InstanceKey;

/// Whether a reparenting call should switch the replica's identity mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GtidHint {
    #[default]
    Neutral,

    Force,

    Deny,
}

/// Typed control surface against one live database instance. Every call may
/// fail with a remote failure which must propagate to the caller; calls
/// block for network I/O and return a refreshed snapshot on success.
#[async_trait]
pub trait InstanceDriver: Send + Sync {
    /// Fetches live state, refreshing the inventory as a side effect.
    async fn read_topology_instance(&self, key: &InstanceKey) -> TResult<Instance>;

    async fn stop_replica(&self, key: &InstanceKey) -> TResult<Instance>;

    /// Stops the IO thread first and waits, bounded, for the SQL thread to
    /// drain the relay log.
    async fn stop_replica_nicely(&self, key: &InstanceKey, timeout: Duration) -> TResult<Instance>;

    async fn start_replica(&self, key: &InstanceKey) -> TResult<Instance>;

    /// Runs replication until the given coordinates on the main are reached,
    /// then leaves it stopped there.
    async fn start_replica_until_main_coordinates(
        &self,
        key: &InstanceKey,
        coordinates: &BinlogCoordinates,
    ) -> TResult<Instance>;

    async fn reset_replica(&self, key: &InstanceKey) -> TResult<Instance>;

    async fn reset_main(&self, key: &InstanceKey) -> TResult<Instance>;

    /// The single point of reparenting. `unresolve_hostname` tells the
    /// driver to trust a cached hostname, for a new parent that was not
    /// live-read.
    async fn change_main_to(
        &self,
        key: &InstanceKey,
        new_main: &InstanceKey,
        coordinates: &BinlogCoordinates,
        unresolve_hostname: bool,
        gtid_hint: GtidHint,
    ) -> TResult<Instance>;

    async fn change_main_credentials(
        &self,
        key: &InstanceKey,
        user: &str,
        password: &str,
    ) -> TResult<Instance>;

    async fn read_replication_credentials(&self, key: &InstanceKey)
        -> TResult<(String, String)>;

    async fn enable_main_ssl(&self, key: &InstanceKey) -> TResult<Instance>;

    async fn set_read_only(&self, key: &InstanceKey, read_only: bool) -> TResult<Instance>;

    async fn show_binary_logs(&self, key: &InstanceKey) -> TResult<Vec<BinlogCoordinates>>;

    async fn show_main_status(&self, key: &InstanceKey) -> TResult<BinlogCoordinates>;

    async fn get_previous_gtids(&self, key: &InstanceKey, log_file: &str) -> TResult<GtidSet>;

    /// Server-side GTID set arithmetic.
    async fn gtid_subtract(
        &self,
        key: &InstanceKey,
        minuend: &str,
        subtrahend: &str,
    ) -> TResult<GtidSet>;

    async fn inject_empty_gtid_transaction(&self, key: &InstanceKey, gtid: &Gtid) -> TResult<()>;

    async fn set_gtid_purged(&self, key: &InstanceKey, gtid_purged: &GtidSet) -> TResult<Instance>;
}
