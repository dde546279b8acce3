use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::err::{TResult, TopoError};

/// A single global transaction identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gtid {
    pub server_uuid: String,
    pub transaction_id: u64,
}

impl Gtid {
    pub fn new(server_uuid: impl Into<String>, transaction_id: u64) -> Self {
        Gtid {
            server_uuid: server_uuid.into(),
            transaction_id,
        }
    }
}

impl Display for Gtid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.server_uuid, self.transaction_id)
    }
}

/// Inclusive interval of transaction sequence numbers for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GnoInterval {
    pub start: u64,
    pub end: u64,
}

impl GnoInterval {
    pub fn new(start: u64, end: u64) -> Self {
        GnoInterval { start, end }
    }

    pub fn contains(&self, transaction_id: u64) -> bool {
        transaction_id >= self.start && transaction_id <= self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// A set of (source uuid, interval list) pairs. Intervals per source are
/// kept normalized: sorted, non-overlapping, adjacent runs coalesced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GtidSet {
    intervals: BTreeMap<String, Vec<GnoInterval>>,
}

impl FromStr for GtidSet {
    type Err = TopoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = GtidSet::default();
        for entry in s.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (uuid, intervals) = entry
                .split_once(':')
                .ok_or_else(|| TopoError::GtidParse(format!("missing intervals in {}", entry)))?;
            let uuid = Uuid::parse_str(uuid.trim())
                .map_err(|e| TopoError::GtidParse(format!("invalid uuid in {}: {}", entry, e)))?
                .to_string();
            for interval in intervals.split(':') {
                set.add_interval(&uuid, GnoInterval::parse(interval)?);
            }
        }
        Ok(set)
    }
}

impl GnoInterval {
    fn parse(s: &str) -> TResult<GnoInterval> {
        let parse_num = |n: &str| {
            n.trim()
                .parse::<u64>()
                .map_err(|e| TopoError::GtidParse(format!("invalid interval {}: {}", s, e)))
        };
        let interval = match s.split_once('-') {
            Some((start, end)) => GnoInterval::new(parse_num(start)?, parse_num(end)?),
            None => {
                let n = parse_num(s)?;
                GnoInterval::new(n, n)
            }
        };
        if interval.start == 0 || interval.end < interval.start {
            return Err(TopoError::GtidParse(format!("invalid interval: {}", s)));
        }
        Ok(interval)
    }
}

impl GtidSet {
    pub fn parse(s: &str) -> TResult<GtidSet> {
        s.parse()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.values().all(|ivs| ivs.is_empty())
    }

    pub fn server_uuids(&self) -> Vec<String> {
        self.intervals.keys().cloned().collect()
    }

    fn add_interval(&mut self, uuid: &str, interval: GnoInterval) {
        let intervals = self.intervals.entry(uuid.to_string()).or_default();
        intervals.push(interval);
        Self::normalize(intervals);
    }

    fn normalize(intervals: &mut Vec<GnoInterval>) {
        intervals.sort_by_key(|iv| iv.start);
        let mut merged: Vec<GnoInterval> = Vec::with_capacity(intervals.len());
        for iv in intervals.iter() {
            match merged.last_mut() {
                // coalesce overlapping or adjacent runs
                Some(last) if iv.start <= last.end.saturating_add(1) => {
                    last.end = last.end.max(iv.end);
                }
                _ => merged.push(*iv),
            }
        }
        *intervals = merged;
    }

    pub fn add_gtid(&mut self, gtid: &Gtid) {
        self.add_interval(
            &gtid.server_uuid,
            GnoInterval::new(gtid.transaction_id, gtid.transaction_id),
        );
    }

    /// Set union.
    pub fn union(&self, other: &GtidSet) -> GtidSet {
        let mut merged = self.clone();
        for (uuid, intervals) in &other.intervals {
            for iv in intervals {
                merged.add_interval(uuid, *iv);
            }
        }
        merged
    }

    /// True when every transaction in this set also appears in `other`.
    pub fn contained_in(&self, other: &GtidSet) -> bool {
        self.subtract(other).is_empty()
    }

    /// Set difference: transactions in this set that are not in `other`.
    pub fn subtract(&self, other: &GtidSet) -> GtidSet {
        let mut result = GtidSet::default();
        for (uuid, intervals) in &self.intervals {
            let remaining = match other.intervals.get(uuid) {
                Some(theirs) => Self::subtract_intervals(intervals, theirs),
                None => intervals.clone(),
            };
            if !remaining.is_empty() {
                result.intervals.insert(uuid.clone(), remaining);
            }
        }
        result
    }

    fn subtract_intervals(ours: &[GnoInterval], theirs: &[GnoInterval]) -> Vec<GnoInterval> {
        let mut remaining = ours.to_vec();
        for their in theirs {
            let mut next = Vec::with_capacity(remaining.len() + 1);
            for seg in remaining {
                if their.end < seg.start || their.start > seg.end {
                    next.push(seg);
                    continue;
                }
                if their.start > seg.start {
                    next.push(GnoInterval::new(seg.start, their.start - 1));
                }
                if their.end < seg.end {
                    next.push(GnoInterval::new(their.end + 1, seg.end));
                }
            }
            remaining = next;
        }
        remaining
    }

    /// Expands the set into one identifier per transaction.
    pub fn explode(&self) -> Vec<Gtid> {
        let mut singles = vec![];
        for (uuid, intervals) in &self.intervals {
            for iv in intervals {
                for transaction_id in iv.start..=iv.end {
                    singles.push(Gtid::new(uuid.clone(), transaction_id));
                }
            }
        }
        singles
    }
}

impl Display for GtidSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for (uuid, intervals) in &self.intervals {
            if intervals.is_empty() {
                continue;
            }
            if !first {
                write!(f, ",")?;
            }
            first = false;
            write!(f, "{}", uuid)?;
            for iv in intervals {
                if iv.start == iv.end {
                    write!(f, ":{}", iv.start)?;
                } else {
                    write!(f, ":{}-{}", iv.start, iv.end)?;
                }
            }
        }
        Ok(())
    }
}
