use common::err::{TResult, TopoError};
use inventory::coordinates::BinlogCoordinates;
use inventory::instance::Instance;

use crate::Topology;

/// Verifies that the instance can be moved below the other using global
/// transaction identifiers: either both speak oracle GTID, or the instance
/// uses MariaDB GTID and the other is MariaDB. On top of mode compatibility,
/// everything the instance has purged must already be executed on the
/// target, or the move would lose transactions.
pub fn check_move_via_gtid(instance: &Instance, other: &Instance) -> TResult<()> {
    let oracle_gtid = instance.using_oracle_gtid && other.supports_oracle_gtid;
    let mariadb_gtid = instance.using_mariadb_gtid && other.is_mariadb();
    if !oracle_gtid && !mariadb_gtid {
        return Err(TopoError::IdentityModeIncompatible(format!(
            "no shared gtid mode between {} and {}",
            instance.key, other.key
        )));
    }
    if !instance
        .gtid_purged
        .subtract(&other.executed_gtid_set)
        .is_empty()
    {
        return Err(TopoError::PreconditionViolated(format!(
            "gtid entries purged on {} are not found on {}; the move is unsafe",
            instance.key, other.key
        )));
    }
    Ok(())
}

impl Topology {
    /// Finds the coordinates on `other` corresponding to the instance's
    /// executed position (or an explicitly given one), via pseudo-GTID
    /// marker correlation. Classifies but never retries; retry policy
    /// belongs to the caller.
    pub async fn correlate_binlog_coordinates(
        &self,
        instance: &Instance,
        binlog_coordinates: Option<&BinlogCoordinates>,
        other: &Instance,
    ) -> TResult<(BinlogCoordinates, u64)> {
        let reference = binlog_coordinates.unwrap_or(&instance.exec_binlog_coordinates);

        let entry = self
            .scanner
            .find_last_pseudo_gtid_entry(
                instance,
                &instance.relaylog_coordinates,
                Some(reference),
                true,
                Some(&other.binlog_format),
            )
            .await?;
        let other_entry_coordinates = self
            .scanner
            .search_entry_in_instance_binlogs(
                other,
                &entry.text,
                self.config.pseudo_gtid_monotonic_hint,
                None,
            )
            .await?;
        let (next_coordinates, matched_events) = self
            .scanner
            .get_next_binlog_coordinates_to_match(
                instance,
                &entry.coordinates,
                reference,
                other,
                &other_entry_coordinates,
            )
            .await?;
        if matched_events == 0 {
            return Err(TopoError::PositionMismatch(format!(
                "correlation matched zero events between {} and {}",
                instance.key, other.key
            )));
        }
        Ok((next_coordinates, matched_events))
    }
}
