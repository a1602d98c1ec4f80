//! Per-key flow histories
//!
//! A history holds every record ever inserted for one [`FlowKey`] and knows how
//! to reduce them to a single aggregate for an hour. Implementations differ in
//! how much work they do at read time.

use flowd_shared::{FlowKey, FlowRecord, Hour};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Failure local to one record (on append) or one key (on aggregate).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    #[error("hour {0} cannot be indexed, must be greater than 0")]
    UnindexableHour(Hour),

    #[error("byte counter overflow while aggregating hour {hour}")]
    CounterOverflow { hour: Hour },
}

/// Storage strategy used for newly created histories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HistoryKind {
    /// Unordered list, full scan on every query.
    #[default]
    List,
    /// Records bucketed by hour, queries only touch the requested bucket.
    HourIndexed,
}

impl HistoryKind {
    pub fn build(self) -> Box<dyn FlowHistory> {
        match self {
            HistoryKind::List => Box::<ListHistory>::default(),
            HistoryKind::HourIndexed => Box::<HourIndexedHistory>::default(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::List => "list",
            HistoryKind::HourIndexed => "hour-indexed",
        }
    }
}

impl std::str::FromStr for HistoryKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "list" => Ok(HistoryKind::List),
            "hour-indexed" | "hour_indexed" => Ok(HistoryKind::HourIndexed),
            _ => anyhow::bail!("Invalid history kind: {}", s),
        }
    }
}

impl fmt::Display for HistoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only collection of the records sharing one flow key.
pub trait FlowHistory: Send + Sync + fmt::Debug {
    /// Append a record. Records are never modified or removed afterwards.
    fn append(&mut self, flow: FlowRecord) -> Result<(), HistoryError>;

    /// Sum the counters of every record at `hour`.
    ///
    /// Returns `Ok(None)` when no record matched, so callers can tell an empty
    /// hour apart from an hour whose traffic summed to zero.
    fn aggregate(&self, key: &FlowKey, hour: Hour) -> Result<Option<FlowRecord>, HistoryError>;

    /// Number of records held.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Running byte totals for one aggregation.
#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    bytes_tx: u64,
    bytes_rx: u64,
}

impl Totals {
    fn add(&mut self, bytes_tx: u64, bytes_rx: u64, hour: Hour) -> Result<(), HistoryError> {
        self.bytes_tx = self
            .bytes_tx
            .checked_add(bytes_tx)
            .ok_or(HistoryError::CounterOverflow { hour })?;
        self.bytes_rx = self
            .bytes_rx
            .checked_add(bytes_rx)
            .ok_or(HistoryError::CounterOverflow { hour })?;
        Ok(())
    }
}

/// Records kept in arrival order and scanned in full on every aggregation.
///
/// Appends are O(1) and accept any hour; aggregation is O(n) in the number of
/// records for the key.
#[derive(Debug, Default)]
pub struct ListHistory {
    flows: Vec<FlowRecord>,
}

impl FlowHistory for ListHistory {
    fn append(&mut self, flow: FlowRecord) -> Result<(), HistoryError> {
        self.flows.push(flow);
        Ok(())
    }

    fn aggregate(&self, key: &FlowKey, hour: Hour) -> Result<Option<FlowRecord>, HistoryError> {
        let mut found = false;
        let mut totals = Totals::default();

        for flow in self.flows.iter().filter(|f| f.hour == hour) {
            found = true;
            totals.add(flow.bytes_tx, flow.bytes_rx, hour)?;
        }

        if !found {
            return Ok(None);
        }
        Ok(Some(key.record(totals.bytes_tx, totals.bytes_rx, hour)))
    }

    fn len(&self) -> usize {
        self.flows.len()
    }
}

/// Counters bucketed by hour.
///
/// Each bucket is still append-only; aggregation only walks the bucket for the
/// requested hour. Hours below 1 are rejected since they can never be queried.
#[derive(Debug, Default)]
pub struct HourIndexedHistory {
    buckets: HashMap<Hour, Vec<(u64, u64)>>,
    len: usize,
}

impl FlowHistory for HourIndexedHistory {
    fn append(&mut self, flow: FlowRecord) -> Result<(), HistoryError> {
        if flow.hour <= 0 {
            return Err(HistoryError::UnindexableHour(flow.hour));
        }
        self.buckets
            .entry(flow.hour)
            .or_default()
            .push((flow.bytes_tx, flow.bytes_rx));
        self.len += 1;
        Ok(())
    }

    fn aggregate(&self, key: &FlowKey, hour: Hour) -> Result<Option<FlowRecord>, HistoryError> {
        let Some(bucket) = self.buckets.get(&hour) else {
            return Ok(None);
        };

        let mut totals = Totals::default();
        for &(bytes_tx, bytes_rx) in bucket {
            totals.add(bytes_tx, bytes_rx, hour)?;
        }
        Ok(Some(key.record(totals.bytes_tx, totals.bytes_rx, hour)))
    }

    fn len(&self) -> usize {
        self.len
    }
}
