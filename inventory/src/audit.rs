use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::key::InstanceKey;

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub key: Option<InstanceKey>,
    pub message: String,
}

/// Append-only sink of operation outcomes. Entries also go to the tracing
/// log as they are appended.
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        AuditLog::default()
    }

    pub fn audit_operation(
        &self,
        operation: &str,
        key: Option<&InstanceKey>,
        message: impl Into<String>,
    ) {
        let message = message.into();
        match key {
            Some(key) => info!("audit {}: {} {}", operation, key, message),
            None => info!("audit {}: {}", operation, message),
        }
        self.entries.lock().unwrap().push(AuditEntry {
            timestamp: Utc::now(),
            operation: operation.to_string(),
            key: key.cloned(),
            message,
        });
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn entries_for(&self, operation: &str) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.operation == operation)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}
