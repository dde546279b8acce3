use std::io;

use thiserror::Error;

/// Error kinds surfaced by the topology core. Every message names the
/// affected instance key.
#[derive(Debug, Error)]
pub enum TopoError {
    /// Inventory miss.
    #[error("instance not found: {0}")]
    NotFound(String),

    /// The driver could not contact the instance.
    #[error("instance unreachable: {0}")]
    Unreachable(String),

    /// A predicate check failed before any driver mutation.
    #[error("precondition violated: {0}")]
    PreconditionViolated(String),

    /// Correlation found no match, or matched zero events.
    #[error("position mismatch: {0}")]
    PositionMismatch(String),

    /// Neither the global- nor the pseudo-identifier strategy applies.
    #[error("identity mode incompatible: {0}")]
    IdentityModeIncompatible(String),

    /// The driver returned an error.
    #[error("remote operation failed: {0}")]
    RemoteOperationFailed(String),

    /// A poll deadline was exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Expected idle state, distinguished from a failure.
    #[error("replication not running: {0}")]
    ReplicationNotRunning(String),

    #[error("cannot parse configuration: {0}")]
    ConfigParse(String),

    #[error("cannot parse gtid set: {0}")]
    GtidParse(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
