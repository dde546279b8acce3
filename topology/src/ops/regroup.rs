use tracing::info;

use common::err::{TResult, TopoError};
use common::structure::postponed::PostponedFunctionsContainer;
use inventory::instance::Instance;
use inventory::key::InstanceKey;

use crate::driver::GtidHint;
use crate::ops::candidate::ReplicaClassification;
use crate::ops::StopReplicationMethod;
use crate::Topology;

impl Topology {
    /// Inspects the replicas of the given main and regroups them under the
    /// best candidate, dispatching on how their positions can be matched:
    /// via GTID, among binlog servers, via pseudo-GTID, or the mixed form
    /// that walks through binlog server subtrees.
    pub async fn regroup_replicas(
        &self,
        main_key: &InstanceKey,
        postponed: Option<&PostponedFunctionsContainer>,
    ) -> TResult<ReplicaClassification> {
        let replicas = self.repository.read_replica_instances(main_key);
        if replicas.is_empty() {
            return Err(TopoError::NotFound(format!(
                "no replicas found for {}",
                main_key
            )));
        }
        if replicas.iter().all(|r| r.using_gtid()) {
            return self.regroup_replicas_gtid(main_key, postponed).await;
        }
        if replicas.iter().all(|r| r.is_binlog_server) {
            return self.regroup_replicas_binlog_servers(main_key).await;
        }
        if replicas.iter().all(|r| r.using_pseudo_gtid) {
            return self.regroup_replicas_pseudo_gtid(main_key, postponed).await;
        }
        self.regroup_replicas_pseudo_gtid_including_sub_replicas_of_binlog_servers(
            main_key, postponed,
        )
        .await
    }

    /// Regroups GTID replicas: the candidate resumes replication and every
    /// equal-or-later sibling is moved below it via GTID. Ahead replicas are
    /// lost for rematch.
    pub async fn regroup_replicas_gtid(
        &self,
        main_key: &InstanceKey,
        postponed: Option<&PostponedFunctionsContainer>,
    ) -> TResult<ReplicaClassification> {
        let mut classification = self
            .get_candidate_replica(main_key, StopReplicationMethod::Nicely)
            .await?;
        let candidate = classification.candidate.clone();
        info!("regroup via gtid: promoting {}", candidate.key);

        self.driver.start_replica(&candidate.key).await?;

        let mut to_move = classification.equal.clone();
        to_move.extend(classification.later.iter().cloned());
        if !to_move.is_empty() {
            self.move_replicas_via_gtid(to_move, &candidate, postponed)
                .await?;
        }
        self.refresh_classified(&mut classification);

        self.audit.audit_operation(
            "regroup-replicas-gtid",
            Some(main_key),
            format!(
                "promoted {}; {} lost as ahead",
                candidate.key,
                classification.ahead.len()
            ),
        );
        Ok(classification)
    }

    /// Regroups a fleet of binlog servers: the most advanced one takes over
    /// and the others are repointed below it.
    pub async fn regroup_replicas_binlog_servers(
        &self,
        main_key: &InstanceKey,
    ) -> TResult<ReplicaClassification> {
        let mut binlog_servers = self.repository.read_binlog_server_replica_instances(main_key);
        if binlog_servers.is_empty() {
            return Err(TopoError::NotFound(format!(
                "no binlog server replicas found for {}",
                main_key
            )));
        }
        binlog_servers.sort_by(|a, b| {
            if a.exec_binlog_coordinates
                .smaller_than(&b.exec_binlog_coordinates)
            {
                std::cmp::Ordering::Greater
            } else if b
                .exec_binlog_coordinates
                .smaller_than(&a.exec_binlog_coordinates)
            {
                std::cmp::Ordering::Less
            } else {
                a.key.cmp(&b.key)
            }
        });
        let promoted = binlog_servers.remove(0);

        let outcome = self
            .repoint_to(binlog_servers.clone(), Some(&promoted.key))
            .await?;
        let mut classification = ReplicaClassification {
            candidate: promoted.clone(),
            ..ReplicaClassification::default()
        };
        for binlog_server in binlog_servers {
            if binlog_server
                .exec_binlog_coordinates
                .equals(&promoted.exec_binlog_coordinates)
            {
                classification.equal.push(binlog_server);
            } else {
                classification.later.push(binlog_server);
            }
        }
        self.refresh_classified(&mut classification);

        self.audit.audit_operation(
            "regroup-replicas-bls",
            Some(main_key),
            format!(
                "promoted binlog server {}; {} repointed",
                promoted.key,
                outcome.moved.len()
            ),
        );
        Ok(classification)
    }

    /// Regroups pseudo-GTID replicas: equal replicas attach to the candidate
    /// at its own binlog position with no log scan at all, later replicas go
    /// through independent matching, and everything restarts in parallel.
    pub async fn regroup_replicas_pseudo_gtid(
        &self,
        main_key: &InstanceKey,
        postponed: Option<&PostponedFunctionsContainer>,
    ) -> TResult<ReplicaClassification> {
        let mut classification = self
            .get_candidate_replica(main_key, StopReplicationMethod::Nicely)
            .await?;
        let candidate = classification.candidate.clone();
        info!("regroup via pseudo-gtid: promoting {}", candidate.key);

        // equal replicas hold the exact same position; no scan needed
        let this = self;
        let candidate_ref = &candidate;
        let (_, equal_errors) = self
            .apply_to_replicas(classification.equal.clone(), move |replica| async move {
                this.driver
                    .change_main_to(
                        &replica.key,
                        &candidate_ref.key,
                        &candidate_ref.self_binlog_coordinates,
                        false,
                        GtidHint::Deny,
                    )
                    .await
            })
            .await;
        if !equal_errors.is_empty() {
            info!(
                "regroup of {}: {} equal replicas failed to attach",
                main_key,
                equal_errors.len()
            );
        }

        if !classification.later.is_empty() {
            self.multi_match_below(&classification.later, &candidate.key, postponed)
                .await?;
        }

        // the candidate and the repointed equals resume together
        let mut to_start = classification.equal.clone();
        to_start.push(candidate.clone());
        self.start_replicas(&to_start).await;
        self.refresh_classified(&mut classification);

        self.audit.audit_operation(
            "regroup-replicas",
            Some(main_key),
            format!(
                "promoted {}; {} equal, {} later, {} ahead",
                candidate.key,
                classification.equal.len(),
                classification.later.len(),
                classification.ahead.len()
            ),
        );
        Ok(classification)
    }

    /// The mixed form: some replicas of the main are binlog servers with
    /// subtrees of their own. A binlog server ahead of the candidate first
    /// donates its lead (the candidate temporarily replicates through it),
    /// then every binlog server subtree is matched below the candidate, and
    /// finally the ordinary pseudo-GTID regroup runs.
    pub async fn regroup_replicas_pseudo_gtid_including_sub_replicas_of_binlog_servers(
        &self,
        main_key: &InstanceKey,
        postponed: Option<&PostponedFunctionsContainer>,
    ) -> TResult<ReplicaClassification> {
        let preliminary = self
            .get_candidate_replica(main_key, StopReplicationMethod::Nicely)
            .await?;
        let candidate = preliminary.candidate;

        let binlog_servers = self.repository.read_binlog_server_replica_instances(main_key);
        let most_advanced = binlog_servers.iter().max_by(|a, b| {
            if a.exec_binlog_coordinates
                .smaller_than(&b.exec_binlog_coordinates)
            {
                std::cmp::Ordering::Less
            } else if b
                .exec_binlog_coordinates
                .smaller_than(&a.exec_binlog_coordinates)
            {
                std::cmp::Ordering::Greater
            } else {
                b.key.cmp(&a.key)
            }
        });
        if let Some(most_advanced) = most_advanced {
            if candidate
                .exec_binlog_coordinates
                .smaller_than(&most_advanced.exec_binlog_coordinates)
            {
                // drain the binlog server's lead into the candidate
                info!(
                    "advancing candidate {} through binlog server {}",
                    candidate.key, most_advanced.key
                );
                self.repoint(&candidate.key, Some(&most_advanced.key), GtidHint::Deny)
                    .await?;
                self.driver
                    .start_replica_until_main_coordinates(
                        &candidate.key,
                        &most_advanced.exec_binlog_coordinates,
                    )
                    .await?;
                self.repoint(&candidate.key, Some(main_key), GtidHint::Deny)
                    .await?;
            }
        }

        for binlog_server in &binlog_servers {
            let sub_replicas = self.repository.read_replica_instances(&binlog_server.key);
            if sub_replicas.is_empty() {
                continue;
            }
            self.multi_match_below(&sub_replicas, &candidate.key, postponed)
                .await?;
        }

        let classification = self
            .regroup_replicas_pseudo_gtid(main_key, postponed)
            .await?;
        self.audit.audit_operation(
            "regroup-replicas-including-bls",
            Some(main_key),
            format!(
                "promoted {} over {} binlog server subtrees",
                classification.candidate.key,
                binlog_servers.len()
            ),
        );
        Ok(classification)
    }

    /// Replaces classified snapshots with their freshest inventory records,
    /// so callers observe post-move wiring.
    fn refresh_classified(&self, classification: &mut ReplicaClassification) {
        let refresh = |replicas: &mut Vec<Instance>| {
            for replica in replicas.iter_mut() {
                if let Some(fresh) = self.repository.read_instance(&replica.key) {
                    *replica = fresh;
                }
            }
        };
        refresh(&mut classification.equal);
        refresh(&mut classification.later);
        refresh(&mut classification.ahead);
        refresh(&mut classification.cannot_replicate);
        if let Some(fresh) = self.repository.read_instance(&classification.candidate.key) {
            classification.candidate = fresh;
        }
    }
}
