use std::collections::HashSet;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::{sleep, Instant};
use tracing::warn;

use common::err::{TResult, TopoError};
use inventory::instance::Instance;
use inventory::key::InstanceKey;

use crate::Topology;

/// How (and whether) to stop replicas before inspecting their coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReplicationMethod {
    NoStop,

    Normal,

    /// Stop the IO thread, let the SQL thread drain the relay log.
    Nicely,
}

pub(crate) fn instances_are_siblings(a: &Instance, b: &Instance) -> bool {
    a.key != b.key && a.is_replica() && b.is_replica() && a.main_key == b.main_key
}

impl Topology {
    /// Restarts replication on everything the operation stopped, in reverse
    /// stop order. Failures are logged and never mask the operation's own
    /// result; this runs on every exit path.
    pub(crate) async fn restart_stopped(&self, stopped: &mut Vec<InstanceKey>) {
        while let Some(key) = stopped.pop() {
            if let Err(e) = self.driver.start_replica(&key).await {
                warn!("failed restarting replication on {}: {}", key, e);
            }
        }
    }

    /// Polls until replication on the instance is running (or stopped),
    /// within the configured deadline.
    pub async fn wait_for_replication_state(
        &self,
        key: &InstanceKey,
        running: bool,
    ) -> TResult<Instance> {
        let deadline =
            Instant::now() + Duration::from_secs(self.config.replication_state_poll_timeout_secs);
        loop {
            let instance = self.driver.read_topology_instance(key).await?;
            if instance.replica_running == running {
                return Ok(instance);
            }
            if Instant::now() >= deadline {
                return Err(TopoError::Timeout(format!(
                    "waiting for replication {} on {}",
                    if running { "running" } else { "stopped" },
                    key
                )));
            }
            sleep(Duration::from_millis(
                self.config.replication_state_poll_interval_ms,
            ))
            .await;
        }
    }

    /// Stops the given replicas in parallel, within a bounded wait. An
    /// instance that fails to stop keeps its stale snapshot in the result.
    pub async fn stop_replicas(
        &self,
        replicas: &[Instance],
        method: StopReplicationMethod,
        timeout: Duration,
    ) -> Vec<Instance> {
        join_all(replicas.iter().map(|replica| async move {
            let stopped = match method {
                StopReplicationMethod::NoStop => return replica.clone(),
                StopReplicationMethod::Normal => self.driver.stop_replica(&replica.key).await,
                StopReplicationMethod::Nicely => {
                    self.driver.stop_replica_nicely(&replica.key, timeout).await
                }
            };
            match stopped {
                Ok(instance) => instance,
                Err(e) => {
                    warn!("failed stopping replication on {}: {}", replica.key, e);
                    replica.clone()
                }
            }
        }))
        .await
    }

    /// Starts the given replicas in parallel; failures are logged only.
    pub async fn start_replicas(&self, replicas: &[Instance]) {
        join_all(replicas.iter().map(|replica| async move {
            if let Err(e) = self.driver.start_replica(&replica.key).await {
                warn!("failed starting replication on {}: {}", replica.key, e);
            }
        }))
        .await;
    }

    /// Walks the inventory upward from `maybe_descendant` looking for
    /// `ancestor_key`. Co-main cycles terminate the walk.
    pub(crate) fn is_descendant_of(
        &self,
        maybe_descendant: &Instance,
        ancestor_key: &InstanceKey,
    ) -> bool {
        let mut visited: HashSet<InstanceKey> = HashSet::new();
        let mut current = maybe_descendant.clone();
        loop {
            if !current.is_replica() {
                return false;
            }
            if current.main_key == *ancestor_key {
                return true;
            }
            if !visited.insert(current.key.clone()) {
                return false;
            }
            current = match self.repository.read_instance(&current.main_key) {
                Some(instance) => instance,
                None => return false,
            };
        }
    }
}
