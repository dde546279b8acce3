use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use common::err::{TResult, TopoError};
use common::structure::postponed::PostponedFunctionsContainer;
use inventory::instance::Instance;
use inventory::key::InstanceKey;

use crate::correlation::check_move_via_gtid;
use crate::driver::GtidHint;
use crate::ops::instances_are_siblings;
use crate::ops::BulkOutcome;
use crate::Topology;

impl Topology {
    /// Moves an instance below the given target using the cheapest strategy
    /// that applies: structural repoints first, then GTID, then pseudo-GTID
    /// matching, then the classic sibling and grandparent moves. Moving an
    /// instance under one of its own descendants is refused outright,
    /// before any driver mutation.
    pub async fn relocate_below(
        &self,
        key: &InstanceKey,
        other_key: &InstanceKey,
    ) -> TResult<Instance> {
        let instance = self.driver.read_topology_instance(key).await?;
        let other = self.driver.read_topology_instance(other_key).await?;
        if self.is_descendant_of(&other, key) {
            return Err(TopoError::PreconditionViolated(format!(
                "cannot relocate {} below its own descendant {}",
                key, other_key
            )));
        }
        let relocated = self.relocate_below_internal(&instance, &other).await?;
        self.audit.audit_operation(
            "relocate-below",
            Some(key),
            format!("relocated below {}", other_key),
        );
        Ok(relocated)
    }

    fn relocate_below_internal<'a>(
        &'a self,
        instance: &'a Instance,
        other: &'a Instance,
    ) -> Pin<Box<dyn Future<Output = TResult<Instance>> + Send + 'a>> {
        Box::pin(async move {
            // already wired correctly: reassert the wiring, cheaply
            if instance.main_key == other.key {
                return self.repoint(&instance.key, Some(&other.key), GtidHint::Neutral).await;
            }
            // a recorded equivalence makes the move free of log scans
            if self
                .repository
                .read_equivalent_binlog_coordinates(
                    &instance.main_key,
                    &instance.exec_binlog_coordinates,
                    &other.key,
                )
                .is_some()
            {
                match self.move_equivalent(&instance.key, &other.key).await {
                    Ok(moved) => return Ok(moved),
                    Err(e) => {
                        // a stale equivalence is not fatal; try other strategies
                        debug!(
                            "move by equivalence of {} below {} failed: {}",
                            instance.key, other.key, e
                        );
                    }
                }
            }
            if instances_are_siblings(instance, other) && other.is_binlog_server {
                return self.move_below(&instance.key, &other.key).await;
            }
            let instance_main = self.repository.read_instance(&instance.main_key);
            if let Some(instance_main) = &instance_main {
                // hanging under a binlog server whose main is the target
                if instance_main.is_binlog_server && instance_main.main_key == other.key {
                    return self.repoint(&instance.key, Some(&other.key), GtidHint::Deny).await;
                }
            }
            if other.is_binlog_server {
                if let Some(instance_main) = &instance_main {
                    if instance_main.is_binlog_server
                        && instances_are_siblings(instance_main, other)
                    {
                        // sibling binlog servers are interchangeable
                        return self
                            .repoint(&instance.key, Some(&other.key), GtidHint::Deny)
                            .await;
                    }
                }
                // go below the binlog server's main first, then step down
                let other_main = self.driver.read_topology_instance(&other.main_key).await?;
                let relocated = self.relocate_below_internal(instance, &other_main).await?;
                return self
                    .repoint(&relocated.key, Some(&other.key), GtidHint::Deny)
                    .await;
            }
            if instance.is_binlog_server {
                return Err(TopoError::PreconditionViolated(format!(
                    "relocating binlog server {} below {} is too complex; repoint it instead",
                    instance.key, other.key
                )));
            }
            if check_move_via_gtid(instance, other).is_ok() {
                return self.move_instance_below_via_gtid(instance, other).await;
            }
            if instance.using_pseudo_gtid && other.using_pseudo_gtid {
                return self
                    .match_below(&instance.key, &other.key, true)
                    .await
                    .map(|(moved, _)| moved);
            }
            if instances_are_siblings(instance, other) && (!other.read_only || other.is_co_main) {
                return self.move_below(&instance.key, &other.key).await;
            }
            if let Some(instance_main) = &instance_main {
                // target is the grandparent
                if instance_main.main_key == other.key {
                    return self.move_up(&instance.key).await;
                }
                // step over an intermediate binlog server and retry
                if instance_main.is_binlog_server {
                    let stepped = self.move_up(&instance.key).await?;
                    return self.relocate_below_internal(&stepped, other).await;
                }
            }
            Err(TopoError::PreconditionViolated(format!(
                "relocating {} below {} is too complex; no applicable strategy",
                instance.key, other.key
            )))
        })
    }

    /// Moves the replicas of one instance below the given target, preferring
    /// a single bulk repoint when the structure allows it, then GTID, then
    /// pseudo-GTID matching.
    pub async fn relocate_replicas(
        &self,
        key: &InstanceKey,
        other_key: &InstanceKey,
        pattern: &str,
        postponed: Option<&PostponedFunctionsContainer>,
    ) -> TResult<BulkOutcome> {
        // the instance may well be dead; its cached record suffices
        let instance = match self.driver.read_topology_instance(key).await {
            Ok(instance) => instance,
            Err(_) => self
                .repository
                .read_instance(key)
                .ok_or_else(|| TopoError::NotFound(format!("instance not found: {}", key)))?,
        };
        let other = self.driver.read_topology_instance(other_key).await?;

        let replicas = self.filter_by_pattern(
            self.repository.read_replica_instances(key),
            pattern,
        )?;
        let mut eligible = vec![];
        let mut errors = vec![];
        for replica in replicas {
            if replica.key == *other_key {
                continue;
            }
            if self.is_descendant_of(&other, &replica.key) {
                errors.push(TopoError::PreconditionViolated(format!(
                    "cannot relocate {} below its own descendant {}",
                    replica.key, other_key
                )));
                continue;
            }
            eligible.push(replica);
        }
        if eligible.is_empty() {
            return Ok(BulkOutcome {
                moved: vec![],
                errors,
                postponed: 0,
            });
        }
        // nothing to do when everything already replicates from the target
        if eligible.iter().all(|replica| replica.main_key == *other_key) {
            return Ok(BulkOutcome {
                moved: eligible,
                errors,
                postponed: 0,
            });
        }

        let mut outcome = self
            .relocate_replicas_internal(eligible, &instance, &other, postponed)
            .await?;
        outcome.errors.extend(errors);
        self.audit.audit_operation(
            "relocate-replicas",
            Some(key),
            format!(
                "relocated {} replicas below {}; {} failed, {} postponed",
                outcome.moved.len(),
                other_key,
                outcome.errors.len(),
                outcome.postponed
            ),
        );
        Ok(outcome)
    }

    async fn relocate_replicas_internal(
        &self,
        replicas: Vec<Instance>,
        instance: &Instance,
        other: &Instance,
        postponed: Option<&PostponedFunctionsContainer>,
    ) -> TResult<BulkOutcome> {
        // replicas of a binlog server repoint freely to its own main
        if instance.is_binlog_server && instance.main_key == other.key {
            return self.repoint_to(replicas, Some(&other.key)).await;
        }
        // sibling binlog servers are position-interchangeable
        if instance.is_binlog_server
            && other.is_binlog_server
            && instances_are_siblings(instance, other)
        {
            return self.repoint_to(replicas, Some(&other.key)).await;
        }
        if replicas
            .iter()
            .all(|replica| check_move_via_gtid(replica, other).is_ok())
        {
            return self.move_replicas_via_gtid(replicas, other, postponed).await;
        }
        if other.using_pseudo_gtid
            && replicas.iter().all(|replica| replica.using_pseudo_gtid)
        {
            return self.multi_match_below(&replicas, &other.key, postponed).await;
        }
        Err(TopoError::PreconditionViolated(format!(
            "relocating {} replicas of {} below {} is too complex; please relocate them individually",
            replicas.len(),
            instance.key,
            other.key
        )))
    }
}
