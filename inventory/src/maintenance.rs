use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use common::err::{TResult, TopoError};

use crate::key::InstanceKey;

#[derive(Debug, Clone)]
pub struct MaintenanceEntry {
    pub token_id: u64,
    pub owner: String,
    pub reason: String,
    pub begun: DateTime<Utc>,
}

/// Advisory per-instance locks. At most one token is outstanding per key;
/// a second acquisition fails until the first token is released.
#[derive(Debug, Default)]
pub struct MaintenanceRegistry {
    entries: Arc<DashMap<InstanceKey, MaintenanceEntry>>,
    next_token: AtomicU64,
}

/// Held for the duration of one operation. Dropping the token releases the
/// lock, so every exit path ends maintenance.
#[derive(Debug)]
pub struct MaintenanceToken {
    key: InstanceKey,
    token_id: u64,
    entries: Arc<DashMap<InstanceKey, MaintenanceEntry>>,
}

impl MaintenanceToken {
    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    pub fn token_id(&self) -> u64 {
        self.token_id
    }
}

impl Drop for MaintenanceToken {
    fn drop(&mut self) {
        let token_id = self.token_id;
        self.entries
            .remove_if(&self.key, |_, entry| entry.token_id == token_id);
        debug!("maintenance ended on {}", self.key);
    }
}

impl MaintenanceRegistry {
    pub fn new() -> Self {
        MaintenanceRegistry::default()
    }

    pub fn begin_maintenance(
        &self,
        key: &InstanceKey,
        owner: &str,
        reason: &str,
    ) -> TResult<MaintenanceToken> {
        let token_id = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        let mut acquired = false;
        self.entries.entry(key.clone()).or_insert_with(|| {
            acquired = true;
            MaintenanceEntry {
                token_id,
                owner: owner.to_string(),
                reason: reason.to_string(),
                begun: Utc::now(),
            }
        });
        if !acquired {
            return Err(TopoError::PreconditionViolated(format!(
                "{} is already under maintenance",
                key
            )));
        }
        debug!("maintenance begun on {} by {}: {}", key, owner, reason);
        Ok(MaintenanceToken {
            key: key.clone(),
            token_id,
            entries: self.entries.clone(),
        })
    }

    /// Acquires tokens for all the given keys in a deterministic
    /// (hostname, port) order. When any acquisition fails, tokens already
    /// taken are released before the error returns.
    pub fn begin_maintenance_sorted(
        &self,
        keys: &[&InstanceKey],
        owner: &str,
        reason: &str,
    ) -> TResult<Vec<MaintenanceToken>> {
        let mut sorted: Vec<&InstanceKey> = keys.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut tokens = vec![];
        for key in sorted {
            // earlier tokens drop, and thereby release, on failure
            tokens.push(self.begin_maintenance(key, owner, reason)?);
        }
        Ok(tokens)
    }

    pub fn in_maintenance(&self, key: &InstanceKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn read_entry(&self, key: &InstanceKey) -> Option<MaintenanceEntry> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn end_maintenance(&self, token: MaintenanceToken) {
        drop(token);
    }
}
