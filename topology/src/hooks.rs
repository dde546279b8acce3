use tokio::process::Command;
use tracing::{info, warn};

use inventory::key::InstanceKey;

pub const SUCCESSOR_HOST_ENV: &str = "ORC_SUCCESSOR_HOST";
pub const FAILED_HOST_ENV: &str = "ORC_FAILED_HOST";

/// Runs the configured post-operation commands with the hook environment and
/// the successor and demoted keys as positional arguments. Non-zero exits
/// and spawn failures are logged; they never fail the enclosing operation.
pub async fn execute_processes(commands: &[String], successor: &InstanceKey, demoted: &InstanceKey) {
    for command in commands {
        let status = Command::new("bash")
            .arg("-c")
            .arg(command)
            .arg("hook")
            .arg(successor.displayable())
            .arg(demoted.displayable())
            .env(SUCCESSOR_HOST_ENV, &successor.hostname)
            .env(FAILED_HOST_ENV, &demoted.hostname)
            .status()
            .await;
        match status {
            Ok(status) if status.success() => info!("hook done: {}", command),
            Ok(status) => warn!("hook exited with {}: {}", status, command),
            Err(e) => warn!("hook failed to spawn: {}: {}", command, e),
        }
    }
}
