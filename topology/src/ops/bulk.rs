use std::future::Future;
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tracing::warn;

use common::err::{TResult, TopoError};
use common::structure::postponed::PostponedFunctionsContainer;
use inventory::instance::Instance;
use inventory::key::InstanceKey;

use crate::driver::GtidHint;
use crate::Topology;

/// Result of a bulk move. Per-replica failures land in `errors`; the
/// operation as a whole errors only when every replica failed.
#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub moved: Vec<Instance>,
    pub errors: Vec<TopoError>,
    pub postponed: usize,
}

impl BulkOutcome {
    fn into_result(self, context: &str) -> TResult<BulkOutcome> {
        if self.moved.is_empty() && self.postponed == 0 && !self.errors.is_empty() {
            return Err(TopoError::RemoteOperationFailed(format!(
                "all {} replicas failed: {}",
                self.errors.len(),
                context
            )));
        }
        Ok(self)
    }
}

impl Topology {
    /// Fans one task out per replica, capped by the configured concurrency.
    /// Waits on completion of all tasks before returning; results and
    /// errors are aggregated under one mutex.
    pub(crate) async fn apply_to_replicas<F, Fut>(
        &self,
        replicas: Vec<Instance>,
        operation: F,
    ) -> (Vec<Instance>, Vec<TopoError>)
    where
        F: Fn(Instance) -> Fut,
        Fut: Future<Output = TResult<Instance>>,
    {
        let semaphore = Arc::new(Semaphore::new(
            self.config.max_concurrent_replica_operations.max(1),
        ));
        let moved: Mutex<Vec<Instance>> = Mutex::new(vec![]);
        let errors: Mutex<Vec<TopoError>> = Mutex::new(vec![]);

        let tasks = replicas.into_iter().map(|replica| {
            let semaphore = semaphore.clone();
            let key = replica.key.clone();
            let task = operation(replica);
            let moved = &moved;
            let errors = &errors;
            async move {
                // the semaphore is never closed
                let _permit = semaphore.acquire_owned().await.ok();
                match task.await {
                    Ok(instance) => moved.lock().unwrap().push(instance),
                    Err(e) => {
                        warn!("bulk operation failed on {}: {}", key, e);
                        errors.lock().unwrap().push(e);
                    }
                }
            }
        });
        // barrier: never abandon a running task
        join_all(tasks).await;

        (moved.into_inner().unwrap(), errors.into_inner().unwrap())
    }

    /// Moves all replicas of the given parent up below their grandparent.
    /// The parent is stopped once for the duration and restarted when every
    /// child task has completed.
    pub async fn move_up_replicas(
        &self,
        parent_key: &InstanceKey,
        pattern: &str,
    ) -> TResult<BulkOutcome> {
        let parent = self.driver.read_topology_instance(parent_key).await?;
        if !parent.is_replica() {
            return Err(TopoError::PreconditionViolated(format!(
                "{} has no main to move its replicas up to",
                parent_key
            )));
        }
        if parent.is_binlog_server {
            return Err(TopoError::PreconditionViolated(format!(
                "{} is a binlog server; repoint its replicas instead",
                parent_key
            )));
        }
        let replicas = self.filter_by_pattern(
            self.repository.read_replica_instances(parent_key),
            pattern,
        )?;
        if replicas.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let _maintenance = self.maintenance.begin_maintenance(
            parent_key,
            &self.config.maintenance_owner,
            &format!("moving up replicas of {}", parent_key),
        )?;

        let mut stopped_parent: Vec<InstanceKey> = Vec::new();
        let result: TResult<BulkOutcome> = async {
            let parent = self.driver.stop_replica(parent_key).await?;
            stopped_parent.push(parent.key.clone());

            let grandparent_key = parent.main_key.clone();
            let until_coordinates = parent.self_binlog_coordinates.clone();
            let reparent_coordinates = parent.exec_binlog_coordinates.clone();
            let this = self;

            let (moved, errors) = self
                .apply_to_replicas(replicas, move |replica| {
                    let grandparent_key = grandparent_key.clone();
                    let until_coordinates = until_coordinates.clone();
                    let reparent_coordinates = reparent_coordinates.clone();
                    async move {
                        if replica.is_binlog_server {
                            // transparent on position; no advancement needed
                            return this
                                .repoint(&replica.key, Some(&grandparent_key), GtidHint::Deny)
                                .await;
                        }
                        let mut stopped: Vec<InstanceKey> = Vec::new();
                        let result: TResult<Instance> = async {
                            this.driver.stop_replica(&replica.key).await?;
                            stopped.push(replica.key.clone());
                            this.driver
                                .start_replica_until_main_coordinates(
                                    &replica.key,
                                    &until_coordinates,
                                )
                                .await?;
                            this.driver
                                .change_main_to(
                                    &replica.key,
                                    &grandparent_key,
                                    &reparent_coordinates,
                                    false,
                                    GtidHint::Deny,
                                )
                                .await
                        }
                        .await;
                        this.restart_stopped(&mut stopped).await;
                        result
                    }
                })
                .await;

            BulkOutcome {
                moved,
                errors,
                postponed: 0,
            }
            .into_result(&format!("moving up replicas of {}", parent_key))
        }
        .await;
        self.restart_stopped(&mut stopped_parent).await;

        if let Ok(outcome) = &result {
            self.audit.audit_operation(
                "move-up-replicas",
                Some(parent_key),
                format!(
                    "moved up {} replicas; {} failed",
                    outcome.moved.len(),
                    outcome.errors.len()
                ),
            );
        }
        result
    }

    /// Moves each given replica below the target via GTID. Lagging replicas
    /// are registered on the postponement container, when one is provided,
    /// instead of being moved now.
    pub async fn move_replicas_via_gtid(
        &self,
        replicas: Vec<Instance>,
        other: &Instance,
        postponed: Option<&PostponedFunctionsContainer>,
    ) -> TResult<BulkOutcome> {
        let replicas: Vec<Instance> = replicas
            .into_iter()
            .filter(|replica| replica.key != other.key)
            .collect();
        if replicas.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let mut now = vec![];
        let mut postponed_count = 0;
        for replica in replicas {
            if let Some(container) = postponed {
                if self.should_postpone_relocating_replica(&replica) {
                    let this = self.clone();
                    let other = other.clone();
                    let description =
                        format!("move {} below {} via gtid", replica.key, other.key);
                    container.add(description, async move {
                        if let Err(e) = this.move_instance_below_via_gtid(&replica, &other).await
                        {
                            warn!(
                                "postponed gtid move of {} below {} failed: {}",
                                replica.key, other.key, e
                            );
                        }
                    });
                    postponed_count += 1;
                    continue;
                }
            }
            now.push(replica);
        }

        let this = self;
        let (moved, errors) = self
            .apply_to_replicas(now, move |replica| {
                let other = other.clone();
                async move { this.move_instance_below_via_gtid(&replica, &other).await }
            })
            .await;

        let outcome = BulkOutcome {
            moved,
            errors,
            postponed: postponed_count,
        }
        .into_result(&format!("moving replicas below {} via gtid", other.key))?;
        self.audit.audit_operation(
            "move-replicas-gtid",
            Some(&other.key),
            format!(
                "moved {} replicas below {}; {} failed, {} postponed",
                outcome.moved.len(),
                other.key,
                outcome.errors.len(),
                outcome.postponed
            ),
        );
        Ok(outcome)
    }

    /// Matches each given replica below the target independently, by
    /// pseudo-GTID correlation. Binlog servers cannot be matched and land in
    /// the error list; lagging replicas are postponed when a container is
    /// provided.
    pub async fn multi_match_below(
        &self,
        replicas: &[Instance],
        below_key: &InstanceKey,
        postponed: Option<&PostponedFunctionsContainer>,
    ) -> TResult<BulkOutcome> {
        // ensure the target exists before fanning out
        let below = self.driver.read_topology_instance(below_key).await?;

        let mut eligible = vec![];
        let mut errors = vec![];
        let mut postponed_count = 0;
        for replica in replicas {
            if replica.key == below.key {
                continue;
            }
            if replica.is_binlog_server {
                errors.push(TopoError::PreconditionViolated(format!(
                    "cannot match binlog server {} below {}",
                    replica.key, below_key
                )));
                continue;
            }
            if let Some(container) = postponed {
                if self.should_postpone_relocating_replica(replica) {
                    let this = self.clone();
                    let replica_key = replica.key.clone();
                    let below_key = below_key.clone();
                    let description = format!("match {} below {}", replica_key, below_key);
                    container.add(description, async move {
                        if let Err(e) = this.match_below(&replica_key, &below_key, false).await {
                            warn!(
                                "postponed match of {} below {} failed: {}",
                                replica_key, below_key, e
                            );
                        }
                    });
                    postponed_count += 1;
                    continue;
                }
            }
            eligible.push(replica.clone());
        }

        let this = self;
        let (moved, mut match_errors) = self
            .apply_to_replicas(eligible, move |replica| {
                let below_key = below_key.clone();
                async move {
                    this.match_below(&replica.key, &below_key, false)
                        .await
                        .map(|(instance, _)| instance)
                }
            })
            .await;
        errors.append(&mut match_errors);

        let outcome = BulkOutcome {
            moved,
            errors,
            postponed: postponed_count,
        }
        .into_result(&format!("matching replicas below {}", below_key))?;
        self.audit.audit_operation(
            "multi-match-below-independent",
            Some(below_key),
            format!(
                "matched {} replicas below {}; {} failed, {} postponed",
                outcome.moved.len(),
                below_key,
                outcome.errors.len(),
                outcome.postponed
            ),
        );
        Ok(outcome)
    }

    /// Matches all replicas of one instance below another. When the target
    /// is a binlog server sharing the replicas' main, a plain repoint does.
    pub async fn multi_match_replicas(
        &self,
        main_key: &InstanceKey,
        below_key: &InstanceKey,
        postponed: Option<&PostponedFunctionsContainer>,
    ) -> TResult<BulkOutcome> {
        if main_key == below_key {
            return Err(TopoError::PreconditionViolated(format!(
                "cannot match replicas of {} below itself",
                main_key
            )));
        }
        let below = self.driver.read_topology_instance(below_key).await?;
        let replicas = self.repository.read_replica_instances(main_key);
        if replicas.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let outcome = if below.is_binlog_server && below.main_key == *main_key {
            self.repoint_to(replicas, Some(below_key)).await?
        } else {
            self.multi_match_below(&replicas, below_key, postponed).await?
        };
        self.audit.audit_operation(
            "multi-match-replicas",
            Some(below_key),
            format!(
                "matched {} replicas of {} below {}; {} failed",
                outcome.moved.len(),
                main_key,
                below_key,
                outcome.errors.len()
            ),
        );
        Ok(outcome)
    }

    /// Repoints each given replica; a nil target means each replica's own
    /// current main.
    pub async fn repoint_to(
        &self,
        replicas: Vec<Instance>,
        target: Option<&InstanceKey>,
    ) -> TResult<BulkOutcome> {
        let replicas: Vec<Instance> = replicas
            .into_iter()
            .filter(|replica| Some(&replica.key) != target)
            .collect();
        if replicas.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let this = self;
        let (moved, errors) = self
            .apply_to_replicas(replicas, move |replica| async move {
                this.repoint(&replica.key, target, GtidHint::Neutral).await
            })
            .await;

        let outcome = BulkOutcome {
            moved,
            errors,
            postponed: 0,
        }
        .into_result("repointing replicas")?;
        self.audit.audit_operation(
            "repoint-to",
            target,
            format!(
                "repointed {} replicas; {} failed",
                outcome.moved.len(),
                outcome.errors.len()
            ),
        );
        Ok(outcome)
    }

    /// Repoints all replicas of the given parent, to an explicit target or
    /// back to the parent they already have.
    pub async fn repoint_replicas_to(
        &self,
        parent_key: &InstanceKey,
        target: Option<&InstanceKey>,
    ) -> TResult<BulkOutcome> {
        let replicas = self.repository.read_replica_instances(parent_key);
        self.repoint_to(replicas, target).await
    }

    pub(crate) fn filter_by_pattern(
        &self,
        replicas: Vec<Instance>,
        pattern: &str,
    ) -> TResult<Vec<Instance>> {
        if pattern.is_empty() {
            return Ok(replicas);
        }
        let re = regex::Regex::new(pattern).map_err(|e| {
            TopoError::PreconditionViolated(format!("invalid filter pattern {}: {}", pattern, e))
        })?;
        Ok(replicas
            .into_iter()
            .filter(|replica| re.is_match(&replica.key.hostname))
            .collect())
    }
}
