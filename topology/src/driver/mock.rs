//! In-memory driver and scanner used by tests: a small fleet of snapshots
//! mutated the way live servers would be, with call recording for ordering
//! and cleanup assertions, and failure injection by operation name.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use common::err::{TResult, TopoError};
use inventory::coordinates::BinlogCoordinates;
use inventory::gtid::{Gtid, GtidSet};
use inventory::instance::Instance;
use inventory::key::InstanceKey;
use inventory::repository::InstanceRepository;

use crate::driver::{GtidHint, InstanceDriver};
use crate::scanner::{LogScanner, PseudoGtidEntry};

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverCall {
    pub operation: String,
    pub key: InstanceKey,
    pub detail: String,
}

#[derive(Default)]
pub struct MockDriver {
    fleet: DashMap<InstanceKey, Instance>,
    repository: Option<Arc<InstanceRepository>>,
    calls: Mutex<Vec<DriverCall>>,
    failures: DashMap<String, usize>,
    unreachable: DashMap<InstanceKey, ()>,
}

impl MockDriver {
    pub fn new() -> Self {
        MockDriver::default()
    }

    /// A driver that refreshes the given repository on every read, the way
    /// discovery would.
    pub fn with_repository(repository: Arc<InstanceRepository>) -> Self {
        MockDriver {
            repository: Some(repository),
            ..MockDriver::default()
        }
    }

    pub fn add_instance(&self, instance: Instance) {
        if let Some(repository) = &self.repository {
            repository.write_instance(&instance);
        }
        self.fleet.insert(instance.key.clone(), instance);
    }

    /// Current live state of one instance.
    pub fn instance(&self, key: &InstanceKey) -> Option<Instance> {
        self.fleet.get(key).map(|entry| entry.value().clone())
    }

    pub fn set_unreachable(&self, key: &InstanceKey) {
        self.unreachable.insert(key.clone(), ());
    }

    /// The next `times` calls of the named operation fail.
    pub fn fail_operation(&self, operation: &str, times: usize) {
        self.failures.insert(operation.to_string(), times);
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, operation: &str) -> Vec<DriverCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.operation == operation)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, operation: &str, key: &InstanceKey, detail: impl Into<String>) -> TResult<()> {
        self.calls.lock().unwrap().push(DriverCall {
            operation: operation.to_string(),
            key: key.clone(),
            detail: detail.into(),
        });
        if self.unreachable.contains_key(key) {
            return Err(TopoError::Unreachable(key.to_string()));
        }
        if let Some(mut remaining) = self.failures.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TopoError::RemoteOperationFailed(format!(
                    "injected failure: {} on {}",
                    operation, key
                )));
            }
        }
        Ok(())
    }

    fn get(&self, key: &InstanceKey) -> TResult<Instance> {
        self.fleet
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TopoError::Unreachable(key.to_string()))
    }

    fn put(&self, instance: Instance) -> Instance {
        if let Some(repository) = &self.repository {
            repository.write_instance(&instance);
        }
        self.fleet.insert(instance.key.clone(), instance.clone());
        instance
    }
}

#[async_trait]
impl InstanceDriver for MockDriver {
    async fn read_topology_instance(&self, key: &InstanceKey) -> TResult<Instance> {
        self.record("read-topology-instance", key, "")?;
        let instance = self.get(key)?;
        if let Some(repository) = &self.repository {
            repository.write_instance(&instance);
        }
        Ok(instance)
    }

    async fn stop_replica(&self, key: &InstanceKey) -> TResult<Instance> {
        self.record("stop-replica", key, "")?;
        let mut instance = self.get(key)?;
        instance.replica_running = false;
        Ok(self.put(instance))
    }

    async fn stop_replica_nicely(&self, key: &InstanceKey, _timeout: Duration) -> TResult<Instance> {
        self.record("stop-replica-nicely", key, "")?;
        let mut instance = self.get(key)?;
        // the SQL thread drains the relay log before stopping
        instance.exec_binlog_coordinates = instance.read_binlog_coordinates.clone();
        instance.replica_running = false;
        Ok(self.put(instance))
    }

    async fn start_replica(&self, key: &InstanceKey) -> TResult<Instance> {
        self.record("start-replica", key, "")?;
        let mut instance = self.get(key)?;
        instance.replica_running = instance.is_replica();
        Ok(self.put(instance))
    }

    async fn start_replica_until_main_coordinates(
        &self,
        key: &InstanceKey,
        coordinates: &BinlogCoordinates,
    ) -> TResult<Instance> {
        self.record("start-replica-until", key, format!("until {}", coordinates))?;
        let mut instance = self.get(key)?;
        instance.exec_binlog_coordinates = coordinates.clone();
        if instance
            .read_binlog_coordinates
            .smaller_than(coordinates)
        {
            instance.read_binlog_coordinates = coordinates.clone();
        }
        instance.replica_running = false;
        Ok(self.put(instance))
    }

    async fn reset_replica(&self, key: &InstanceKey) -> TResult<Instance> {
        self.record("reset-replica", key, "")?;
        let mut instance = self.get(key)?;
        instance.main_key = InstanceKey::default();
        instance.replica_running = false;
        instance.read_binlog_coordinates = BinlogCoordinates::default();
        instance.exec_binlog_coordinates = BinlogCoordinates::default();
        instance.relaylog_coordinates = BinlogCoordinates::default();
        Ok(self.put(instance))
    }

    async fn reset_main(&self, key: &InstanceKey) -> TResult<Instance> {
        self.record("reset-main", key, "")?;
        let mut instance = self.get(key)?;
        instance.executed_gtid_set = GtidSet::default();
        instance.gtid_purged = GtidSet::default();
        instance.self_binlog_coordinates =
            BinlogCoordinates::new(format!("{}-bin.000001", instance.key.hostname), 4);
        Ok(self.put(instance))
    }

    async fn change_main_to(
        &self,
        key: &InstanceKey,
        new_main: &InstanceKey,
        coordinates: &BinlogCoordinates,
        unresolve_hostname: bool,
        gtid_hint: GtidHint,
    ) -> TResult<Instance> {
        self.record(
            "change-main-to",
            key,
            format!(
                "below {} at {} unresolve={} hint={:?}",
                new_main, coordinates, unresolve_hostname, gtid_hint
            ),
        )?;
        let mut instance = self.get(key)?;
        instance.main_key = new_main.clone();
        instance.exec_binlog_coordinates = coordinates.clone();
        instance.read_binlog_coordinates = coordinates.clone();
        match gtid_hint {
            GtidHint::Force => {
                if instance.supports_oracle_gtid {
                    instance.using_oracle_gtid = true;
                }
            }
            GtidHint::Deny => {
                instance.using_oracle_gtid = false;
                instance.using_mariadb_gtid = false;
            }
            GtidHint::Neutral => {}
        }
        Ok(self.put(instance))
    }

    async fn change_main_credentials(
        &self,
        key: &InstanceKey,
        _user: &str,
        _password: &str,
    ) -> TResult<Instance> {
        self.record("change-main-credentials", key, "")?;
        let mut instance = self.get(key)?;
        instance.replication_credentials_available = true;
        Ok(self.put(instance))
    }

    async fn read_replication_credentials(
        &self,
        key: &InstanceKey,
    ) -> TResult<(String, String)> {
        self.record("read-replication-credentials", key, "")?;
        self.get(key)?;
        Ok((String::from("replication"), String::from("mock-password")))
    }

    async fn enable_main_ssl(&self, key: &InstanceKey) -> TResult<Instance> {
        self.record("enable-main-ssl", key, "")?;
        self.get(key)
    }

    async fn set_read_only(&self, key: &InstanceKey, read_only: bool) -> TResult<Instance> {
        self.record("set-read-only", key, format!("read_only={}", read_only))?;
        let mut instance = self.get(key)?;
        instance.read_only = read_only;
        Ok(self.put(instance))
    }

    async fn show_binary_logs(&self, key: &InstanceKey) -> TResult<Vec<BinlogCoordinates>> {
        self.record("show-binary-logs", key, "")?;
        Ok(vec![self.get(key)?.self_binlog_coordinates])
    }

    async fn show_main_status(&self, key: &InstanceKey) -> TResult<BinlogCoordinates> {
        self.record("show-main-status", key, "")?;
        Ok(self.get(key)?.self_binlog_coordinates)
    }

    async fn get_previous_gtids(&self, key: &InstanceKey, _log_file: &str) -> TResult<GtidSet> {
        self.record("get-previous-gtids", key, "")?;
        Ok(self.get(key)?.gtid_purged)
    }

    async fn gtid_subtract(
        &self,
        key: &InstanceKey,
        minuend: &str,
        subtrahend: &str,
    ) -> TResult<GtidSet> {
        self.record("gtid-subtract", key, "")?;
        let minuend = GtidSet::parse(minuend)?;
        let subtrahend = GtidSet::parse(subtrahend)?;
        Ok(minuend.subtract(&subtrahend))
    }

    async fn inject_empty_gtid_transaction(
        &self,
        key: &InstanceKey,
        gtid: &Gtid,
    ) -> TResult<()> {
        self.record("inject-empty-gtid", key, gtid.to_string())?;
        let mut instance = self.get(key)?;
        instance.executed_gtid_set.add_gtid(gtid);
        instance.self_binlog_coordinates.log_pos += 1;
        self.put(instance);
        Ok(())
    }

    async fn set_gtid_purged(&self, key: &InstanceKey, gtid_purged: &GtidSet) -> TResult<Instance> {
        self.record("set-gtid-purged", key, gtid_purged.to_string())?;
        let mut instance = self.get(key)?;
        instance.gtid_purged = gtid_purged.clone();
        Ok(self.put(instance))
    }
}

/// Scanner whose markers always correlate to the target's own binlog write
/// position, unless told to find nothing.
#[derive(Default)]
pub struct MockScanner {
    zero_match: DashMap<InstanceKey, ()>,
}

impl MockScanner {
    pub fn new() -> Self {
        MockScanner::default()
    }

    /// Correlation for the given instance will match zero events.
    pub fn set_zero_match(&self, key: &InstanceKey) {
        self.zero_match.insert(key.clone(), ());
    }
}

#[async_trait]
impl LogScanner for MockScanner {
    async fn find_last_pseudo_gtid_entry(
        &self,
        instance: &Instance,
        recorded_coordinates: &BinlogCoordinates,
        max_coordinates: Option<&BinlogCoordinates>,
        _exhaustive: bool,
        _expected_binlog_format: Option<&str>,
    ) -> TResult<PseudoGtidEntry> {
        let coordinates = max_coordinates
            .cloned()
            .unwrap_or_else(|| recorded_coordinates.clone());
        Ok(PseudoGtidEntry {
            text: format!("pseudo-gtid:{}", instance.key),
            coordinates,
        })
    }

    async fn search_entry_in_instance_binlogs(
        &self,
        other: &Instance,
        _entry_text: &str,
        _monotonic: bool,
        _min_coordinates: Option<&BinlogCoordinates>,
    ) -> TResult<BinlogCoordinates> {
        Ok(other.self_binlog_coordinates.clone())
    }

    async fn get_next_binlog_coordinates_to_match(
        &self,
        instance: &Instance,
        _instance_coordinates: &BinlogCoordinates,
        _reference_coordinates: &BinlogCoordinates,
        other: &Instance,
        other_coordinates: &BinlogCoordinates,
    ) -> TResult<(BinlogCoordinates, u64)> {
        if self.zero_match.contains_key(&instance.key) {
            return Ok((other_coordinates.clone(), 0));
        }
        Ok((other.self_binlog_coordinates.clone(), 1))
    }
}
