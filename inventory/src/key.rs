use std::fmt;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use common::err::{TResult, TopoError};

/// Prefix used to mangle the hostname of a detached main, reversibly.
pub const DETACH_HOST_PREFIX: &str = "//";

/// Host and port of one database instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    pub hostname: String,
    pub port: u16,
}

impl InstanceKey {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        InstanceKey {
            hostname: hostname.into(),
            port,
        }
    }

    /// Parses a "hostname:port" pair.
    pub fn parse(s: &str) -> TResult<InstanceKey> {
        let (hostname, port) = s
            .rsplit_once(':')
            .ok_or_else(|| TopoError::NotFound(format!("invalid instance key: {}", s)))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| TopoError::NotFound(format!("invalid port in instance key {}: {}", s, e)))?;
        Ok(InstanceKey::new(hostname, port))
    }

    pub fn is_valid(&self) -> bool {
        !self.hostname.is_empty() && self.port > 0
    }

    /// Mangles the hostname so that a parked replica cannot accidentally
    /// resume replication. The original key is recoverable via
    /// [`InstanceKey::reattached`].
    pub fn detached(&self) -> InstanceKey {
        if self.is_detached() {
            return self.clone();
        }
        InstanceKey {
            hostname: format!("{}{}", DETACH_HOST_PREFIX, self.hostname),
            port: self.port,
        }
    }

    /// Recovers the original key of a detached one.
    pub fn reattached(&self) -> InstanceKey {
        match self.hostname.strip_prefix(DETACH_HOST_PREFIX) {
            Some(hostname) => InstanceKey {
                hostname: hostname.to_string(),
                port: self.port,
            },
            None => self.clone(),
        }
    }

    pub fn is_detached(&self) -> bool {
        self.hostname.starts_with(DETACH_HOST_PREFIX)
    }

    pub fn displayable(&self) -> String {
        self.to_string()
    }
}

impl Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}
