use dashmap::DashMap;

use crate::coordinates::BinlogCoordinates;
use crate::instance::Instance;
use crate::key::InstanceKey;

/// In-memory inventory of instance snapshots, refreshed out-of-band by
/// discovery. Reads are cheap and consistent within one call; the map is
/// shared safely across operations.
#[derive(Debug, Default)]
pub struct InstanceRepository {
    instances: DashMap<InstanceKey, Instance>,

    /// Known equivalences between (main, coordinates) pairs, keyed by the
    /// pair they were recorded for.
    equivalences: DashMap<(InstanceKey, String), Vec<(InstanceKey, BinlogCoordinates)>>,
}

impl InstanceRepository {
    pub fn new() -> Self {
        InstanceRepository::default()
    }

    pub fn write_instance(&self, instance: &Instance) {
        self.instances.insert(instance.key.clone(), instance.clone());
    }

    pub fn forget_instance(&self, key: &InstanceKey) {
        self.instances.remove(key);
    }

    pub fn read_instance(&self, key: &InstanceKey) -> Option<Instance> {
        self.instances.get(key).map(|entry| entry.value().clone())
    }

    /// Direct replicas of the given instance, ordered by key.
    pub fn read_replica_instances(&self, parent: &InstanceKey) -> Vec<Instance> {
        let mut replicas: Vec<Instance> = self
            .instances
            .iter()
            .filter(|entry| entry.value().main_key == *parent)
            .map(|entry| entry.value().clone())
            .collect();
        replicas.sort_by(|a, b| a.key.cmp(&b.key));
        replicas
    }

    pub fn read_binlog_server_replica_instances(&self, parent: &InstanceKey) -> Vec<Instance> {
        self.read_replica_instances(parent)
            .into_iter()
            .filter(|replica| replica.is_binlog_server)
            .collect()
    }

    /// Direct replicas plus, recursively, the replicas hanging under any
    /// binlog server found along the way.
    pub fn read_replica_instances_including_binlog_server_sub_replicas(
        &self,
        parent: &InstanceKey,
    ) -> Vec<Instance> {
        let mut all = vec![];
        let mut pending = vec![parent.clone()];
        while let Some(key) = pending.pop() {
            for replica in self.read_replica_instances(&key) {
                if replica.is_binlog_server {
                    pending.push(replica.key.clone());
                }
                all.push(replica);
            }
        }
        all
    }

    /// The writable main of the given cluster, if any.
    pub fn read_cluster_writeable_main(&self, cluster_name: &str) -> Option<Instance> {
        let mut mains: Vec<Instance> = self
            .instances
            .iter()
            .filter(|entry| {
                let instance = entry.value();
                instance.cluster_name == cluster_name
                    && !instance.read_only
                    && (!instance.is_replica() || instance.is_co_main)
            })
            .map(|entry| entry.value().clone())
            .collect();
        mains.sort_by(|a, b| a.key.cmp(&b.key));
        mains.into_iter().next()
    }

    pub fn replace_alias_cluster_name(&self, old_name: &str, new_name: &str) {
        for mut entry in self.instances.iter_mut() {
            if entry.value().cluster_name == old_name {
                entry.value_mut().cluster_name = new_name.to_string();
            }
        }
    }

    /// Remembers that `coordinates1` on a replica of `main1` corresponds to
    /// `coordinates2` on a replica of `main2`, in both directions.
    pub fn record_binlog_coordinates_equivalence(
        &self,
        main1: &InstanceKey,
        coordinates1: &BinlogCoordinates,
        main2: &InstanceKey,
        coordinates2: &BinlogCoordinates,
    ) {
        let record = |from: &InstanceKey, at: &BinlogCoordinates, to: &InstanceKey, equal: &BinlogCoordinates| {
            let mut entry = self
                .equivalences
                .entry((from.clone(), at.to_string()))
                .or_default();
            entry.retain(|(key, _)| key != to);
            entry.push((to.clone(), equal.clone()));
        };
        record(main1, coordinates1, main2, coordinates2);
        record(main2, coordinates2, main1, coordinates1);
    }

    /// Looks up coordinates below `target` equivalent to the given position
    /// below `main`.
    pub fn read_equivalent_binlog_coordinates(
        &self,
        main: &InstanceKey,
        coordinates: &BinlogCoordinates,
        target: &InstanceKey,
    ) -> Option<BinlogCoordinates> {
        self.equivalences
            .get(&(main.clone(), coordinates.to_string()))
            .and_then(|entry| {
                entry
                    .iter()
                    .find(|(key, _)| key == target)
                    .map(|(_, coords)| coords.clone())
            })
    }
}
