use std::fmt;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinlogType {
    #[default]
    Binary,

    Relay,
}

/// A position within a binary (or relay) log. Totally ordered within one log
/// file; across files, names compare by their numeric suffix when the
/// prefixes agree, lexically otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinlogCoordinates {
    pub log_file: String,
    pub log_pos: u64,
    pub kind: BinlogType,
}

impl BinlogCoordinates {
    pub fn new(log_file: impl Into<String>, log_pos: u64) -> Self {
        BinlogCoordinates {
            log_file: log_file.into(),
            log_pos,
            kind: BinlogType::Binary,
        }
    }

    pub fn relay(log_file: impl Into<String>, log_pos: u64) -> Self {
        BinlogCoordinates {
            log_file: log_file.into(),
            log_pos,
            kind: BinlogType::Relay,
        }
    }

    /// Numeric suffix of the log file name, e.g. 327 for "mysql-bin.000327".
    pub fn file_number(&self) -> Option<u64> {
        self.log_file
            .rsplit_once('.')
            .and_then(|(_, suffix)| suffix.parse::<u64>().ok())
    }

    fn file_smaller_than(&self, other: &BinlogCoordinates) -> bool {
        let self_prefix = self.log_file.rsplit_once('.').map(|(p, _)| p);
        let other_prefix = other.log_file.rsplit_once('.').map(|(p, _)| p);
        if self_prefix.is_some() && self_prefix == other_prefix {
            if let (Some(a), Some(b)) = (self.file_number(), other.file_number()) {
                return a < b;
            }
        }
        self.log_file < other.log_file
    }

    pub fn smaller_than(&self, other: &BinlogCoordinates) -> bool {
        if self.log_file == other.log_file {
            return self.log_pos < other.log_pos;
        }
        self.file_smaller_than(other)
    }

    pub fn smaller_or_equal(&self, other: &BinlogCoordinates) -> bool {
        self.equals(other) || self.smaller_than(other)
    }

    /// Position equality, regardless of log kind.
    pub fn equals(&self, other: &BinlogCoordinates) -> bool {
        self.log_file == other.log_file && self.log_pos == other.log_pos
    }

    pub fn is_empty(&self) -> bool {
        self.log_file.is_empty()
    }
}

impl Display for BinlogCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.log_file, self.log_pos)
    }
}
