use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;

use regex::Regex;
use tracing::debug;

use common::err::{TResult, TopoError};
use inventory::instance::Instance;
use inventory::key::InstanceKey;

use crate::ops::StopReplicationMethod;
use crate::Topology;

/// The chosen promotion candidate and the rest of the fleet classified
/// relative to it: ahead replicas are lost for rematch, equal ones are
/// cheapest to attach, later ones must be matched by replay.
#[derive(Debug, Default)]
pub struct ReplicaClassification {
    pub candidate: Instance,
    pub ahead: Vec<Instance>,
    pub equal: Vec<Instance>,
    pub later: Vec<Instance>,
    pub cannot_replicate: Vec<Instance>,
}

/// Valid as a replication source for ordinary replicas.
pub fn is_valid_binlog_source(replica: &Instance) -> bool {
    replica.is_last_check_valid && replica.log_bin_enabled && replica.log_replica_updates_enabled
}

/// Valid as the source feeding a binlog server topology, where the candidate
/// must not relay writes of its own.
pub fn is_valid_binlog_server_topology_source(replica: &Instance) -> bool {
    replica.is_last_check_valid
        && replica.log_bin_enabled
        && !replica.log_replica_updates_enabled
        && !replica.is_binlog_server
}

fn binlog_format_rank(format: &str) -> i32 {
    match format {
        "STATEMENT" => 0,
        "MIXED" => 1,
        "ROW" => 2,
        _ => -1,
    }
}

fn majority<T: Eq + std::hash::Hash + Ord + Clone>(values: impl Iterator<Item = T>) -> Option<T> {
    let mut counts: HashMap<T, usize> = HashMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)))
        .map(|(value, _)| value)
}

impl Topology {
    /// A replica lagging badly, or slow to discover, is processed
    /// out-of-band rather than holding up the main operation.
    pub fn should_postpone_relocating_replica(&self, replica: &Instance) -> bool {
        if replica.sql_delay > self.config.reasonable_replication_lag_secs {
            debug!(
                "postponing {}: sql delay {} exceeds {}",
                replica.key, replica.sql_delay, self.config.reasonable_replication_lag_secs
            );
            return true;
        }
        if replica.last_discovery_latency
            > Duration::from_millis(self.config.reasonable_discovery_latency_ms)
        {
            debug!("postponing {}: discovery is slow", replica.key);
            return true;
        }
        false
    }

    /// Banned by promotion rule or by a configured hostname filter.
    pub fn is_banned_from_promotion(&self, replica: &Instance) -> bool {
        if replica.promotion_rule.is_banned() {
            return true;
        }
        for pattern in &self.config.promotion_ignore_hostname_filters {
            if let Ok(re) = Regex::new(pattern) {
                if re.is_match(&replica.key.hostname) {
                    return true;
                }
            }
        }
        false
    }

    /// Sorts replicas most-promotable first: by executed position
    /// descending, then promotion rule, then the configured data center
    /// hint, then key for determinism.
    pub fn sort_replicas_for_promotion(&self, replicas: &mut [Instance]) {
        let hint = self.config.promotion_data_center_hint.clone();
        replicas.sort_by(|a, b| {
            if a.exec_binlog_coordinates
                .smaller_than(&b.exec_binlog_coordinates)
            {
                return Ordering::Greater;
            }
            if b.exec_binlog_coordinates
                .smaller_than(&a.exec_binlog_coordinates)
            {
                return Ordering::Less;
            }
            let by_rule = a
                .promotion_rule
                .preference_order()
                .cmp(&b.promotion_rule.preference_order());
            if by_rule != Ordering::Equal {
                return by_rule;
            }
            if !hint.is_empty() {
                let by_data_center = (b.data_center == hint).cmp(&(a.data_center == hint));
                if by_data_center != Ordering::Equal {
                    return by_data_center;
                }
            }
            a.key.cmp(&b.key)
        });
    }

    /// Picks the single best promotion target out of replicas already sorted
    /// by [`Topology::sort_replicas_for_promotion`], and classifies the rest
    /// relative to it. The first pass refuses candidates below the majority
    /// version or binlog format; when nothing passes, the first non-banned
    /// replica is taken regardless.
    pub fn choose_candidate_replica(&self, replicas: &[Instance]) -> TResult<ReplicaClassification> {
        if replicas.is_empty() {
            return Err(TopoError::NotFound(String::from(
                "no replicas to choose a candidate from",
            )));
        }
        let priority_version = majority(replicas.iter().map(|r| r.major_version()));
        let priority_format =
            majority(replicas.iter().map(|r| binlog_format_rank(&r.binlog_format)));

        let mut candidate = replicas.iter().find(|&replica| {
            if !is_valid_binlog_source(replica) || self.is_banned_from_promotion(replica) {
                return false;
            }
            if let Some(priority_version) = &priority_version {
                if replica.major_version() < *priority_version {
                    return false;
                }
            }
            if let Some(priority_format) = priority_format {
                if binlog_format_rank(&replica.binlog_format) < priority_format {
                    return false;
                }
            }
            true
        });
        if candidate.is_none() {
            candidate = replicas
                .iter()
                .find(|&replica| !self.is_banned_from_promotion(replica));
        }
        let candidate = candidate
            .cloned()
            .ok_or_else(|| {
                TopoError::PreconditionViolated(String::from(
                    "all replicas are banned from promotion",
                ))
            })?;

        let mut classification = ReplicaClassification {
            candidate: candidate.clone(),
            ..ReplicaClassification::default()
        };
        for replica in replicas {
            if replica.key == candidate.key {
                continue;
            }
            if replica
                .exec_binlog_coordinates
                .equals(&candidate.exec_binlog_coordinates)
            {
                classification.equal.push(replica.clone());
            } else if replica
                .exec_binlog_coordinates
                .smaller_than(&candidate.exec_binlog_coordinates)
            {
                if replica.can_replicate_from(&candidate).is_ok() {
                    classification.later.push(replica.clone());
                } else {
                    classification.cannot_replicate.push(replica.clone());
                }
            } else {
                classification.ahead.push(replica.clone());
            }
        }
        Ok(classification)
    }

    /// Reads the replicas of the given main, freshens their positions under
    /// a bounded stop, and chooses the promotion candidate among them.
    pub async fn get_candidate_replica(
        &self,
        main_key: &InstanceKey,
        stop_method: StopReplicationMethod,
    ) -> TResult<ReplicaClassification> {
        let mut replicas: Vec<Instance> = self
            .repository
            .read_replica_instances(main_key)
            .into_iter()
            .filter(|replica| !replica.is_binlog_server)
            .collect();
        if replicas.is_empty() {
            return Err(TopoError::NotFound(format!(
                "no replicas found for {}",
                main_key
            )));
        }
        replicas = self
            .stop_replicas(
                &replicas,
                stop_method,
                Duration::from_secs(self.config.bulk_stop_replicas_timeout_secs),
            )
            .await;
        self.sort_replicas_for_promotion(&mut replicas);
        self.choose_candidate_replica(&replicas)
    }
}
