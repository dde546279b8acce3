use async_trait::async_trait;

use common::err::TResult;
use inventory::coordinates::BinlogCoordinates;
use inventory::instance::Instance;

/// A pseudo-GTID marker found in a log stream.
#[derive(Debug, Clone)]
pub struct PseudoGtidEntry {
    pub text: String,
    pub coordinates: BinlogCoordinates,
}

/// Oracles over remote binary and relay log streams. Implementations scan
/// the actual server logs; the correlation engine only interprets results.
#[async_trait]
pub trait LogScanner: Send + Sync {
    /// The latest marker at-or-before `max_coordinates`. Searches the binary
    /// log when the instance logs replica updates in the expected format,
    /// the relay log otherwise.
    async fn find_last_pseudo_gtid_entry(
        &self,
        instance: &Instance,
        recorded_coordinates: &BinlogCoordinates,
        max_coordinates: Option<&BinlogCoordinates>,
        exhaustive: bool,
        expected_binlog_format: Option<&str>,
    ) -> TResult<PseudoGtidEntry>;

    /// Locates the given marker in the other instance's binary logs.
    async fn search_entry_in_instance_binlogs(
        &self,
        other: &Instance,
        entry_text: &str,
        monotonic: bool,
        min_coordinates: Option<&BinlogCoordinates>,
    ) -> TResult<BinlogCoordinates>;

    /// Scans forward from both markers in lock step, matching events, and
    /// returns the coordinates on `other` corresponding to the instance's
    /// position together with the number of events matched along the way.
    async fn get_next_binlog_coordinates_to_match(
        &self,
        instance: &Instance,
        instance_coordinates: &BinlogCoordinates,
        reference_coordinates: &BinlogCoordinates,
        other: &Instance,
        other_coordinates: &BinlogCoordinates,
    ) -> TResult<(BinlogCoordinates, u64)>;
}
