use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use common::err::{TResult, TopoError};
use inventory::coordinates::BinlogCoordinates;
use inventory::instance::Instance;
use inventory::key::InstanceKey;

use crate::correlation::check_move_via_gtid;
use crate::driver::GtidHint;
use crate::hooks;
use crate::ops::instances_are_siblings;
use crate::Topology;

/// Placeholder log file handed to the driver when a replica has no executed
/// coordinates yet; the driver refuses an empty file name.
pub(crate) const EMPTY_EXEC_LOG_FILE: &str = "_empty-binlog.000000";

impl Topology {
    /// Moves a replica up the topology: it leaves its main and attaches to
    /// its grandparent instead.
    pub async fn move_up(&self, key: &InstanceKey) -> TResult<Instance> {
        let instance = self.driver.read_topology_instance(key).await?;
        if !instance.is_replica() {
            return Err(TopoError::PreconditionViolated(format!(
                "{} is not a replica",
                key
            )));
        }
        let main = self.driver.read_topology_instance(&instance.main_key).await?;
        if !main.is_replica() {
            return Err(TopoError::PreconditionViolated(format!(
                "main {} has no main of its own; cannot move {} up",
                main.key, key
            )));
        }
        if main.is_binlog_server {
            // a binlog server is transparent on position
            return self.repoint(key, Some(&main.main_key), GtidHint::Deny).await;
        }
        let grandparent = self.repository.read_instance(&main.main_key).ok_or_else(|| {
            TopoError::NotFound(format!("instance not found: {}", main.main_key))
        })?;
        instance.can_replicate_from(&grandparent)?;

        let _maintenance = self.maintenance.begin_maintenance_sorted(
            &[&instance.key, &main.key],
            &self.config.maintenance_owner,
            &format!("moving {} up below {}", instance.key, grandparent.key),
        )?;

        let grandparent_key = grandparent.key.clone();
        let mut stopped: Vec<InstanceKey> = Vec::new();
        let result: TResult<Instance> = async {
            let mut main = main;
            let mut instance = instance;
            if !instance.using_mariadb_gtid {
                main = self.driver.stop_replica(&main.key).await?;
                stopped.push(main.key.clone());
            }
            instance = self.driver.stop_replica(&instance.key).await?;
            stopped.push(instance.key.clone());
            if !instance.using_mariadb_gtid {
                instance = self
                    .driver
                    .start_replica_until_main_coordinates(
                        &instance.key,
                        &main.self_binlog_coordinates,
                    )
                    .await?;
            }
            self.driver
                .change_main_to(
                    &instance.key,
                    &main.main_key,
                    &main.exec_binlog_coordinates,
                    true,
                    GtidHint::Deny,
                )
                .await
        }
        .await;
        self.restart_stopped(&mut stopped).await;

        if result.is_ok() {
            self.audit.audit_operation(
                "move-up",
                Some(key),
                format!("moved up below {}", grandparent_key),
            );
        }
        result
    }

    /// Moves a replica below one of its siblings. The two are first aligned
    /// on the same executed position; alignment only ever advances the one
    /// that is behind.
    pub async fn move_below(&self, key: &InstanceKey, sibling_key: &InstanceKey) -> TResult<Instance> {
        let instance = self.driver.read_topology_instance(key).await?;
        let other = self.driver.read_topology_instance(sibling_key).await?;
        if other.is_binlog_server {
            // binlog server coordinates mirror the main's; a plain repoint does
            return self.repoint(key, Some(sibling_key), GtidHint::Deny).await;
        }
        if !instances_are_siblings(&instance, &other) {
            return Err(TopoError::PreconditionViolated(format!(
                "{} and {} are not siblings",
                key, sibling_key
            )));
        }
        instance.can_replicate_from(&other)?;

        let _maintenance = self.maintenance.begin_maintenance_sorted(
            &[key, sibling_key],
            &self.config.maintenance_owner,
            &format!("moving {} below {}", key, sibling_key),
        )?;

        let mut stopped: Vec<InstanceKey> = Vec::new();
        let result: TResult<Instance> = async {
            let mut instance = self.driver.stop_replica(key).await?;
            stopped.push(instance.key.clone());
            let mut other = self.driver.stop_replica(sibling_key).await?;
            stopped.push(other.key.clone());

            // both positions live in the shared main's binlog
            if instance
                .exec_binlog_coordinates
                .smaller_than(&other.exec_binlog_coordinates)
            {
                instance = self
                    .driver
                    .start_replica_until_main_coordinates(key, &other.exec_binlog_coordinates)
                    .await?;
            } else if other
                .exec_binlog_coordinates
                .smaller_than(&instance.exec_binlog_coordinates)
            {
                other = self
                    .driver
                    .start_replica_until_main_coordinates(
                        sibling_key,
                        &instance.exec_binlog_coordinates,
                    )
                    .await?;
            }
            self.driver
                .change_main_to(
                    key,
                    sibling_key,
                    &other.self_binlog_coordinates,
                    false,
                    GtidHint::Deny,
                )
                .await
        }
        .await;
        self.restart_stopped(&mut stopped).await;

        if result.is_ok() {
            self.audit.audit_operation(
                "move-below",
                Some(key),
                format!("moved below {}", sibling_key),
            );
        }
        result
    }

    /// Reparents using previously recorded coordinate equivalence, with no
    /// log scanning at all. Aborts when the replica advanced past the
    /// recorded position while being stopped.
    pub async fn move_equivalent(&self, key: &InstanceKey, other_key: &InstanceKey) -> TResult<Instance> {
        let instance = self.driver.read_topology_instance(key).await?;
        if !instance.is_replica() {
            return Err(TopoError::PreconditionViolated(format!(
                "{} is not a replica",
                key
            )));
        }
        if instance.key == *other_key {
            return Err(TopoError::PreconditionViolated(format!(
                "{} cannot replicate from itself",
                key
            )));
        }
        let equivalent_coordinates = self
            .repository
            .read_equivalent_binlog_coordinates(
                &instance.main_key,
                &instance.exec_binlog_coordinates,
                other_key,
            )
            .ok_or_else(|| {
                TopoError::NotFound(format!(
                    "no equivalent coordinates known for {} below {}",
                    key, other_key
                ))
            })?;

        let _maintenance = self.maintenance.begin_maintenance(
            key,
            &self.config.maintenance_owner,
            &format!("moving {} below {} by equivalence", key, other_key),
        )?;

        let recorded_at = instance.exec_binlog_coordinates.clone();
        let mut stopped: Vec<InstanceKey> = Vec::new();
        let result: TResult<Instance> = async {
            let refreshed = self.driver.stop_replica(key).await?;
            stopped.push(refreshed.key.clone());
            if !refreshed.exec_binlog_coordinates.equals(&recorded_at) {
                return Err(TopoError::PreconditionViolated(format!(
                    "{} advanced to {} while stopping; the known equivalence is stale",
                    key, refreshed.exec_binlog_coordinates
                )));
            }
            self.driver
                .change_main_to(key, other_key, &equivalent_coordinates, false, GtidHint::Neutral)
                .await
        }
        .await;
        self.restart_stopped(&mut stopped).await;

        if result.is_ok() {
            self.audit.audit_operation(
                "move-equivalent",
                Some(key),
                format!(
                    "moved below {} at {}",
                    other_key, equivalent_coordinates
                ),
            );
        }
        result
    }

    /// Re-issues the replication wiring of a replica, keeping its executed
    /// position. With no explicit target, the replica reconnects to its own
    /// current main (which rebuilds corrupted relay logs). The target is
    /// allowed to be unreachable: its cached record is used instead.
    pub async fn repoint(
        &self,
        key: &InstanceKey,
        main_key: Option<&InstanceKey>,
        gtid_hint: GtidHint,
    ) -> TResult<Instance> {
        let instance = self.driver.read_topology_instance(key).await?;
        if !instance.is_replica() {
            return Err(TopoError::PreconditionViolated(format!(
                "{} is not a replica",
                key
            )));
        }
        let main_key = main_key.unwrap_or(&instance.main_key).clone();
        if main_key == instance.key {
            return Err(TopoError::PreconditionViolated(format!(
                "{} cannot replicate from itself",
                key
            )));
        }

        let (main, main_alive) = match self.driver.read_topology_instance(&main_key).await {
            Ok(main) => (main, true),
            Err(e) => {
                warn!("repoint target {} is not live ({}); using its cached record", main_key, e);
                let cached = self.repository.read_instance(&main_key).ok_or_else(|| {
                    TopoError::NotFound(format!("instance not found: {}", main_key))
                })?;
                (cached, false)
            }
        };
        if main.is_binlog_server
            && !instance
                .exec_binlog_coordinates
                .smaller_or_equal(&main.self_binlog_coordinates)
        {
            return Err(TopoError::PreconditionViolated(format!(
                "{} is ahead of binlog server {}",
                key, main_key
            )));
        }

        let _maintenance = self.maintenance.begin_maintenance(
            key,
            &self.config.maintenance_owner,
            &format!("repointing {} below {}", key, main_key),
        )?;

        let mut stopped: Vec<InstanceKey> = Vec::new();
        let result: TResult<Instance> = async {
            let instance = self.driver.stop_replica(key).await?;
            stopped.push(instance.key.clone());

            let mut coordinates = instance.exec_binlog_coordinates.clone();
            if coordinates.is_empty() {
                coordinates.log_file = EMPTY_EXEC_LOG_FILE.to_string();
                coordinates.log_pos = 4;
            }
            self.driver
                .change_main_to(key, &main_key, &coordinates, !main_alive, gtid_hint)
                .await
        }
        .await;
        self.restart_stopped(&mut stopped).await;

        if result.is_ok() {
            self.audit.audit_operation(
                "repoint",
                Some(key),
                format!("repointed below {}", main_key),
            );
        }
        result
    }

    /// Moves a replica below an unrelated target by GTID.
    pub async fn move_below_gtid(&self, key: &InstanceKey, other_key: &InstanceKey) -> TResult<Instance> {
        let instance = self.driver.read_topology_instance(key).await?;
        let other = self.driver.read_topology_instance(other_key).await?;
        let moved = self.move_instance_below_via_gtid(&instance, &other).await?;
        self.audit.audit_operation(
            "move-below-gtid",
            Some(key),
            format!("moved below {} via gtid", other_key),
        );
        Ok(moved)
    }

    pub(crate) async fn move_instance_below_via_gtid(
        &self,
        instance: &Instance,
        other: &Instance,
    ) -> TResult<Instance> {
        check_move_via_gtid(instance, other)?;
        instance.can_replicate_from(other)?;

        let _maintenance = self.maintenance.begin_maintenance(
            &instance.key,
            &self.config.maintenance_owner,
            &format!("moving {} below {} via gtid", instance.key, other.key),
        )?;

        let mut stopped: Vec<InstanceKey> = Vec::new();
        let result: TResult<Instance> = async {
            let refreshed = self.driver.stop_replica(&instance.key).await?;
            stopped.push(refreshed.key.clone());
            self.driver
                .change_main_to(
                    &instance.key,
                    &other.key,
                    &other.self_binlog_coordinates,
                    false,
                    GtidHint::Force,
                )
                .await
        }
        .await;
        self.restart_stopped(&mut stopped).await;
        result
    }

    /// Moves a replica below an unrelated target by pseudo-GTID correlation.
    /// Returns the moved replica together with the coordinates it was
    /// matched at.
    pub async fn match_below(
        &self,
        key: &InstanceKey,
        other_key: &InstanceKey,
        require_maintenance: bool,
    ) -> TResult<(Instance, BinlogCoordinates)> {
        let instance = self.driver.read_topology_instance(key).await?;
        let other = self.driver.read_topology_instance(other_key).await?;
        if !instance.is_replica() {
            return Err(TopoError::PreconditionViolated(format!(
                "{} is not a replica",
                key
            )));
        }
        if instance.key == other.key {
            return Err(TopoError::PreconditionViolated(format!(
                "{} cannot be matched below itself",
                key
            )));
        }
        if !(instance.using_pseudo_gtid && other.using_pseudo_gtid) {
            return Err(TopoError::IdentityModeIncompatible(format!(
                "pseudo-gtid is not enabled on both {} and {}",
                key, other_key
            )));
        }
        if other.is_binlog_server {
            return Err(TopoError::PreconditionViolated(format!(
                "cannot match below binlog server {}; repoint instead",
                other_key
            )));
        }
        instance.can_replicate_from(&other)?;

        let _maintenance = if require_maintenance {
            Some(self.maintenance.begin_maintenance_sorted(
                &[key, other_key],
                &self.config.maintenance_owner,
                &format!("matching {} below {}", key, other_key),
            )?)
        } else {
            None
        };

        let mut stopped: Vec<InstanceKey> = Vec::new();
        let result = async {
            let refreshed = self
                .driver
                .stop_replica_nicely(
                    key,
                    Duration::from_secs(self.config.bulk_stop_replicas_timeout_secs),
                )
                .await?;
            stopped.push(refreshed.key.clone());

            let (match_coordinates, matched_events) = self
                .correlate_binlog_coordinates(&refreshed, None, &other)
                .await?;
            let moved = self
                .driver
                .change_main_to(key, other_key, &match_coordinates, false, GtidHint::Deny)
                .await?;
            // remember the correlation; future moves over the same positions
            // need no log scan
            self.repository.record_binlog_coordinates_equivalence(
                &refreshed.main_key,
                &refreshed.exec_binlog_coordinates,
                other_key,
                &match_coordinates,
            );
            Ok((moved, match_coordinates, matched_events))
        }
        .await;
        self.restart_stopped(&mut stopped).await;

        match result {
            Ok((moved, match_coordinates, matched_events)) => {
                self.audit.audit_operation(
                    "match-below",
                    Some(key),
                    format!(
                        "matched below {} at {} after {} events",
                        other_key, match_coordinates, matched_events
                    ),
                );
                Ok((moved, match_coordinates))
            }
            Err(e) => Err(e),
        }
    }

    /// Matches the instance below its grandparent, using the inventory
    /// records of itself and its main rather than live reads.
    pub async fn match_up(
        &self,
        key: &InstanceKey,
    ) -> TResult<(Instance, BinlogCoordinates)> {
        let instance = self
            .repository
            .read_instance(key)
            .ok_or_else(|| TopoError::NotFound(format!("instance not found: {}", key)))?;
        if !instance.is_replica() {
            return Err(TopoError::PreconditionViolated(format!(
                "{} is not a replica",
                key
            )));
        }
        let main = self
            .repository
            .read_instance(&instance.main_key)
            .ok_or_else(|| {
                TopoError::NotFound(format!("instance not found: {}", instance.main_key))
            })?;
        if !main.is_replica() {
            return Err(TopoError::PreconditionViolated(format!(
                "main {} has no main of its own; cannot match {} up",
                main.key, key
            )));
        }
        self.match_below(key, &main.main_key, true).await
    }

    /// Turns a read-only replica and its main into a writable co-main pair.
    pub async fn make_co_main(&self, key: &InstanceKey) -> TResult<Instance> {
        let instance = self.driver.read_topology_instance(key).await?;
        if !instance.is_replica() {
            return Err(TopoError::PreconditionViolated(format!(
                "{} is not a replica",
                key
            )));
        }
        if !instance.read_only {
            return Err(TopoError::PreconditionViolated(format!(
                "{} must be read-only to become co-main",
                key
            )));
        }
        let main = self.driver.read_topology_instance(&instance.main_key).await?;
        if main.is_co_main && main.main_key == instance.key {
            return Err(TopoError::PreconditionViolated(format!(
                "{} and {} are already co-mains",
                key, main.key
            )));
        }
        if main.is_replica() && !main.is_co_main {
            return Err(TopoError::PreconditionViolated(format!(
                "main {} already replicates from {}; will not create a co-main loop",
                main.key, main.main_key
            )));
        }
        if main.is_co_main {
            // the about-to-be-demoted partner must not be writable
            match self.driver.read_topology_instance(&main.main_key).await {
                Ok(partner) if !partner.read_only => {
                    return Err(TopoError::PreconditionViolated(format!(
                        "co-main partner {} of {} is writable",
                        partner.key, main.key
                    )));
                }
                _ => {}
            }
        }
        main.can_replicate_from(&instance)?;

        let _maintenance = self.maintenance.begin_maintenance_sorted(
            &[key, &main.key],
            &self.config.maintenance_owner,
            &format!("making {} co-main of {}", key, main.key),
        )?;

        let main_key = main.key.clone();
        let mut stopped: Vec<InstanceKey> = Vec::new();
        let result: TResult<Instance> = async {
            let main = if main.replica_running {
                let stopped_main = self.driver.stop_replica(&main.key).await?;
                stopped.push(stopped_main.key.clone());
                stopped_main
            } else {
                main
            };
            if !main.replication_credentials_available {
                let (user, password) =
                    self.driver.read_replication_credentials(&instance.key).await?;
                self.driver
                    .change_main_credentials(&main.key, &user, &password)
                    .await?;
            }
            if instance.allow_tls {
                self.driver.enable_main_ssl(&main.key).await?;
            }
            let gtid_hint = if instance.using_oracle_gtid {
                GtidHint::Force
            } else {
                GtidHint::Neutral
            };
            self.driver
                .change_main_to(
                    &main.key,
                    &instance.key,
                    &instance.self_binlog_coordinates,
                    false,
                    gtid_hint,
                )
                .await
        }
        .await;
        self.restart_stopped(&mut stopped).await;

        if result.is_ok() {
            self.audit.audit_operation(
                "make-co-main",
                Some(key),
                format!("{} is now a co-main of {}", main_key, key),
            );
        }
        result
    }

    /// Swaps a replica with its own main: the replica catches up fully and
    /// the two exchange roles.
    pub async fn take_main(&self, key: &InstanceKey) -> TResult<Instance> {
        let instance = self.driver.read_topology_instance(key).await?;
        if !instance.is_replica() {
            return Err(TopoError::PreconditionViolated(format!(
                "{} is not a replica",
                key
            )));
        }
        let main = self.driver.read_topology_instance(&instance.main_key).await?;
        main.can_replicate_from(&instance)?;

        let _maintenance = self.maintenance.begin_maintenance_sorted(
            &[key, &main.key],
            &self.config.maintenance_owner,
            &format!("{} taking over {}", key, main.key),
        )?;

        let main_key = main.key.clone();
        let mut stopped: Vec<InstanceKey> = Vec::new();
        let result: TResult<Instance> = async {
            let main = self.driver.stop_replica(&main.key).await?;
            stopped.push(main.key.clone());
            let instance = self.driver.stop_replica(key).await?;
            stopped.push(instance.key.clone());

            let instance = self
                .driver
                .start_replica_until_main_coordinates(key, &main.self_binlog_coordinates)
                .await?;
            // the two have identical data now; exchange roles
            let instance = if main.is_replica() {
                self.driver
                    .change_main_to(
                        key,
                        &main.main_key,
                        &main.exec_binlog_coordinates,
                        true,
                        GtidHint::Neutral,
                    )
                    .await?
            } else {
                // the old main was a root; the replica becomes one
                self.driver.reset_replica(key).await?
            };
            self.driver
                .change_main_to(
                    &main.key,
                    &instance.key,
                    &instance.self_binlog_coordinates,
                    false,
                    GtidHint::Neutral,
                )
                .await?;
            Ok(instance)
        }
        .await;
        self.restart_stopped(&mut stopped).await;

        match result {
            Ok(instance) => {
                self.audit.audit_operation(
                    "take-main",
                    Some(key),
                    format!("{} took over {}", key, main_key),
                );
                if !self.config.post_take_main_processes.is_empty() {
                    hooks::execute_processes(
                        &self.config.post_take_main_processes,
                        &instance.key,
                        &main_key,
                    )
                    .await;
                }
                Ok(instance)
            }
            Err(e) => Err(e),
        }
    }

    /// Promotes the candidate to main of its siblings and makes it writable.
    /// Its previous main must be out of the picture, and no sibling may be
    /// ahead of the candidate.
    pub async fn make_main(&self, candidate_key: &InstanceKey) -> TResult<Instance> {
        self.promote_among_siblings(candidate_key).await?;
        self.driver.set_read_only(candidate_key, false).await?;
        let refreshed = self.driver.read_topology_instance(candidate_key).await?;
        self.audit.audit_operation(
            "make-main",
            Some(candidate_key),
            format!("{} is the new main, writable", candidate_key),
        );
        Ok(refreshed)
    }

    /// Like [`Topology::make_main`], but the candidate stays read-only; used
    /// for promotions local to an intermediate subtree.
    pub async fn make_local_main(&self, candidate_key: &InstanceKey) -> TResult<Instance> {
        let candidate = self.promote_among_siblings(candidate_key).await?;
        self.audit.audit_operation(
            "make-local-main",
            Some(candidate_key),
            format!("{} is the new local main", candidate_key),
        );
        Ok(candidate)
    }

    async fn promote_among_siblings(&self, candidate_key: &InstanceKey) -> TResult<Instance> {
        let candidate = self.driver.read_topology_instance(candidate_key).await?;
        if !candidate.is_replica() {
            return Err(TopoError::PreconditionViolated(format!(
                "{} is not a replica",
                candidate_key
            )));
        }
        let main_key = candidate.main_key.clone();
        if let Ok(main) = self.driver.read_topology_instance(&main_key).await {
            if main.replica_running {
                return Err(TopoError::PreconditionViolated(format!(
                    "main {} is accessible and replicating; will not promote {}",
                    main_key, candidate_key
                )));
            }
        }

        let mut siblings = self.repository.read_replica_instances(&main_key);
        siblings.retain(|sibling| sibling.key != candidate.key);
        for sibling in &siblings {
            if candidate
                .exec_binlog_coordinates
                .smaller_than(&sibling.exec_binlog_coordinates)
            {
                return Err(TopoError::PreconditionViolated(format!(
                    "{} is behind its sibling {}; will not promote it",
                    candidate_key, sibling.key
                )));
            }
        }

        if !siblings.is_empty() {
            let outcome = self.multi_match_below(&siblings, candidate_key, None).await?;
            info!(
                "promoted {}: {} siblings matched below it, {} failed",
                candidate_key,
                outcome.moved.len(),
                outcome.errors.len()
            );
        }
        self.driver.read_topology_instance(candidate_key).await
    }

    /// Parks a replica: its main hostname is rewritten to an unresolvable,
    /// reversible form so replication cannot accidentally resume.
    pub async fn detach_replica_main_host(&self, key: &InstanceKey) -> TResult<Instance> {
        let instance = self.driver.read_topology_instance(key).await?;
        if !instance.is_replica() {
            return Err(TopoError::PreconditionViolated(format!(
                "{} is not a replica",
                key
            )));
        }
        if instance.main_key.is_detached() {
            return Err(TopoError::PreconditionViolated(format!(
                "{} is already detached from {}",
                key, instance.main_key
            )));
        }
        let detached_key = instance.main_key.detached();

        let _maintenance = self.maintenance.begin_maintenance(
            key,
            &self.config.maintenance_owner,
            &format!("detaching {} from {}", key, instance.main_key),
        )?;

        let mut stopped: Vec<InstanceKey> = Vec::new();
        let result: TResult<Instance> = async {
            let refreshed = self.driver.stop_replica(key).await?;
            stopped.push(refreshed.key.clone());
            self.driver
                .change_main_to(
                    key,
                    &detached_key,
                    &refreshed.exec_binlog_coordinates,
                    true,
                    GtidHint::Neutral,
                )
                .await
        }
        .await;
        self.restart_stopped(&mut stopped).await;

        if result.is_ok() {
            self.audit.audit_operation(
                "detach-replica-main-host",
                Some(key),
                format!("main host detached as {}", detached_key),
            );
        }
        result
    }

    /// Reverses [`Topology::detach_replica_main_host`].
    pub async fn reattach_replica_main_host(&self, key: &InstanceKey) -> TResult<Instance> {
        let instance = self.driver.read_topology_instance(key).await?;
        if !instance.main_key.is_detached() {
            return Err(TopoError::PreconditionViolated(format!(
                "{} is not detached",
                key
            )));
        }
        let reattached_key = instance.main_key.reattached();

        let _maintenance = self.maintenance.begin_maintenance(
            key,
            &self.config.maintenance_owner,
            &format!("reattaching {} to {}", key, reattached_key),
        )?;

        let mut stopped: Vec<InstanceKey> = Vec::new();
        let result: TResult<Instance> = async {
            let refreshed = self.driver.stop_replica(key).await?;
            stopped.push(refreshed.key.clone());
            self.driver
                .change_main_to(
                    key,
                    &reattached_key,
                    &refreshed.exec_binlog_coordinates,
                    true,
                    GtidHint::Neutral,
                )
                .await
        }
        .await;
        self.restart_stopped(&mut stopped).await;

        if result.is_ok() {
            self.audit.audit_operation(
                "reattach-replica-main-host",
                Some(key),
                format!("main host reattached as {}", reattached_key),
            );
        }
        result
    }

    /// Switches a replica onto GTID-based replication.
    pub async fn enable_gtid(&self, key: &InstanceKey) -> TResult<Instance> {
        let instance = self.driver.read_topology_instance(key).await?;
        if !instance.supports_oracle_gtid {
            return Err(TopoError::PreconditionViolated(format!(
                "{} does not support oracle gtid",
                key
            )));
        }
        if instance.using_gtid() {
            return Err(TopoError::PreconditionViolated(format!(
                "{} already uses gtid",
                key
            )));
        }
        let moved = self.repoint(key, None, GtidHint::Force).await?;
        if !moved.using_gtid() {
            return Err(TopoError::RemoteOperationFailed(format!(
                "gtid not in use on {} after repoint",
                key
            )));
        }
        self.audit
            .audit_operation("enable-gtid", Some(key), "now using gtid");
        Ok(moved)
    }

    /// Switches a replica back to binlog-coordinate replication.
    pub async fn disable_gtid(&self, key: &InstanceKey) -> TResult<Instance> {
        let instance = self.driver.read_topology_instance(key).await?;
        if !instance.using_gtid() {
            return Err(TopoError::PreconditionViolated(format!(
                "{} is not using gtid",
                key
            )));
        }
        let moved = self.repoint(key, None, GtidHint::Deny).await?;
        if moved.using_gtid() {
            return Err(TopoError::RemoteOperationFailed(format!(
                "gtid still in use on {} after repoint",
                key
            )));
        }
        self.audit
            .audit_operation("disable-gtid", Some(key), "no longer using gtid");
        Ok(moved)
    }

    /// Destructive recovery from errant transactions: resets the instance's
    /// own binary logs and re-declares everything but the errant entries as
    /// purged. Refuses to touch an instance that feeds replicas.
    pub async fn errant_gtid_reset_main(&self, key: &InstanceKey) -> TResult<Instance> {
        let instance = self.driver.read_topology_instance(key).await?;
        if instance.gtid_errant.is_empty() {
            return Err(TopoError::PreconditionViolated(format!(
                "no errant gtid on {}",
                key
            )));
        }
        if !instance.supports_oracle_gtid {
            return Err(TopoError::PreconditionViolated(format!(
                "{} does not support oracle gtid",
                key
            )));
        }
        if !instance.replica_hosts.is_empty() {
            return Err(TopoError::PreconditionViolated(format!(
                "{} has {} replicas; will not reset its binary logs",
                key,
                instance.replica_hosts.len()
            )));
        }
        let gtid_purged = instance.executed_gtid_set.subtract(&instance.gtid_errant);

        let _maintenance = self.maintenance.begin_maintenance(
            key,
            &self.config.maintenance_owner,
            &format!("resetting main on {} to remove errant gtid", key),
        )?;

        let retries = self.config.main_reset_retries;
        let retry_gap = Duration::from_secs(self.config.retry_interval_secs);
        let mut stopped: Vec<InstanceKey> = Vec::new();
        let result: TResult<Instance> = async {
            if instance.is_replica() {
                self.driver.stop_replica(key).await?;
                stopped.push(key.clone());
                self.wait_for_replication_state(key, false).await?;
            }

            let mut attempt = 0;
            let reset = loop {
                attempt += 1;
                match self.driver.reset_main(key).await {
                    Ok(reset) => break reset,
                    Err(e) if attempt < retries => {
                        warn!("reset main attempt {} failed on {}: {}", attempt, key, e);
                        sleep(retry_gap).await;
                    }
                    Err(e) => return Err(e),
                }
            };
            if !reset.executed_gtid_set.is_empty() {
                return Err(TopoError::RemoteOperationFailed(format!(
                    "executed gtid set is not empty on {} after reset",
                    key
                )));
            }

            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.driver.set_gtid_purged(key, &gtid_purged).await {
                    Ok(purged) => break Ok(purged),
                    Err(e) if attempt < retries => {
                        warn!("set gtid_purged attempt {} failed on {}: {}", attempt, key, e);
                        sleep(retry_gap).await;
                    }
                    Err(e) => break Err(e),
                }
            }
        }
        .await;
        self.restart_stopped(&mut stopped).await;

        if result.is_ok() {
            self.audit.audit_operation(
                "gtid-errant-reset-main",
                Some(key),
                format!("errant entries dropped; gtid_purged set to {}", gtid_purged),
            );
        }
        result
    }

    /// Heals errant transactions non-destructively: injects one empty
    /// transaction per errant identifier on the cluster's writable main, so
    /// the entries stop being errant everywhere downstream.
    pub async fn errant_gtid_inject_empty(&self, key: &InstanceKey) -> TResult<Instance> {
        let instance = self.driver.read_topology_instance(key).await?;
        if instance.gtid_errant.is_empty() {
            return Err(TopoError::PreconditionViolated(format!(
                "no errant gtid on {}",
                key
            )));
        }
        let cluster_main = self
            .repository
            .read_cluster_writeable_main(&instance.cluster_name)
            .ok_or_else(|| {
                TopoError::NotFound(format!(
                    "no writeable main found for cluster {}",
                    instance.cluster_name
                ))
            })?;
        if !cluster_main.supports_oracle_gtid {
            return Err(TopoError::PreconditionViolated(format!(
                "cluster main {} does not support oracle gtid",
                cluster_main.key
            )));
        }

        let errant = instance.gtid_errant.clone();
        for gtid in errant.explode() {
            self.driver
                .inject_empty_gtid_transaction(&cluster_main.key, &gtid)
                .await?;
        }
        self.audit.audit_operation(
            "gtid-errant-inject-empty",
            Some(key),
            format!("injected {} on cluster main {}", errant, cluster_main.key),
        );
        self.driver.read_topology_instance(key).await
    }

    /// Stops and fully unconfigures replication on an instance.
    pub async fn reset_replica_operation(&self, key: &InstanceKey) -> TResult<Instance> {
        let instance = self.driver.read_topology_instance(key).await?;

        let _maintenance = self.maintenance.begin_maintenance(
            key,
            &self.config.maintenance_owner,
            &format!("resetting replica {}", key),
        )?;

        let mut stopped: Vec<InstanceKey> = Vec::new();
        let result: TResult<Instance> = async {
            if instance.is_replica() {
                self.driver.stop_replica(key).await?;
                stopped.push(key.clone());
            }
            let reset = self.driver.reset_replica(key).await?;
            // reset went through: there is no replication left to restart
            stopped.clear();
            Ok(reset)
        }
        .await;
        self.restart_stopped(&mut stopped).await;

        if result.is_ok() {
            self.audit
                .audit_operation("reset-subordinate", Some(key), "replication unconfigured");
        }
        result
    }
}
