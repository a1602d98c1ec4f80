//! In-memory flow aggregation store

pub mod history;

use flowd_shared::{FlowKey, FlowRecord, Hour};
use history::{FlowHistory, HistoryError, HistoryKind};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

type FlowMap = HashMap<FlowKey, Box<dyn FlowHistory>>;

/// Call-level store failures. Failures local to one record or one key are
/// logged and absorbed instead.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("flow store unavailable: lock poisoned")]
    Unavailable,
}

/// Outcome of one insert batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InsertSummary {
    pub accepted: usize,
    pub skipped: usize,
}

/// Size of the store at one instant.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Distinct flow keys
    pub keys: usize,
    /// Records across all keys
    pub records: usize,
}

/// Locked store state. `records` is kept alongside the map so the write
/// path never has to walk every history to report the store size.
#[derive(Debug, Default)]
struct Inner {
    flows: FlowMap,
    records: usize,
}

/// Flow histories keyed by flow tuple. Thread-safe.
///
/// A single reader/writer lock guards the whole map: each insert batch is
/// applied atomically, and every query sees a consistent snapshot.
#[derive(Debug)]
pub struct FlowStore {
    kind: HistoryKind,
    inner: RwLock<Inner>,
}

impl Default for FlowStore {
    fn default() -> Self {
        Self::new(HistoryKind::default())
    }
}

impl FlowStore {
    /// Create an empty store whose histories use the given strategy.
    pub fn new(kind: HistoryKind) -> Self {
        Self {
            kind,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn history_kind(&self) -> HistoryKind {
        self.kind
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner.read().map_err(|_| StoreError::Unavailable)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner.write().map_err(|_| StoreError::Unavailable)
    }

    /// Append a batch of flows, each to the history of its own key.
    ///
    /// A record that cannot be appended is logged and skipped; the rest of the
    /// batch is still applied. Only an unavailable store fails the call.
    pub fn insert<I>(&self, flows: I) -> Result<InsertSummary, StoreError>
    where
        I: IntoIterator<Item = FlowRecord>,
    {
        let mut inner = self.write()?;
        let mut summary = InsertSummary::default();

        for flow in flows {
            match self.append(&mut inner.flows, flow) {
                Ok(()) => summary.accepted += 1,
                Err(e) => {
                    tracing::error!("unable to insert flow: {}", e);
                    summary.skipped += 1;
                }
            }
        }
        inner.records += summary.accepted;

        crate::metrics::FLOWSTORE_KEYS.set(inner.flows.len() as f64);
        crate::metrics::FLOWSTORE_SIZE.set(inner.records as f64);
        if summary.skipped > 0 {
            crate::metrics::INSERT_FAILURES.inc_by(summary.skipped as f64);
        }

        Ok(summary)
    }

    /// A key only enters the map once its first record has been appended, so
    /// a rejected record never leaves an empty history behind.
    fn append(&self, flows: &mut FlowMap, flow: FlowRecord) -> Result<(), HistoryError> {
        let key = flow.key();
        if let Some(history) = flows.get_mut(&key) {
            return history.append(flow);
        }

        let mut history = self.kind.build();
        history.append(flow)?;
        tracing::debug!(key = %key, kind = %self.kind, "new flow key");
        flows.insert(key, history);
        Ok(())
    }

    /// Aggregate every flow key for one hour.
    ///
    /// Keys without records at `hour` are left out, so an empty result means
    /// no traffic was reported for that hour. Order is unspecified.
    pub fn get(&self, hour: Hour) -> Result<Vec<FlowRecord>, StoreError> {
        if hour <= 0 {
            return Err(StoreError::InvalidArgument(format!(
                "hour must be greater than 0, got {hour}"
            )));
        }

        let inner = self.read()?;
        let mut out = Vec::new();
        let mut failures = 0u64;

        for (key, history) in inner.flows.iter() {
            match history.aggregate(key, hour) {
                Ok(Some(flow)) => out.push(flow),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(key = %key, "unable to retrieve aggregate flow: {}", e);
                    failures += 1;
                }
            }
        }

        if failures > 0 {
            crate::metrics::AGGREGATE_FAILURES.inc_by(failures as f64);
        }
        Ok(out)
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let inner = self.read()?;
        Ok(StoreStats {
            keys: inner.flows.len(),
            records: inner.records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> Vec<FlowRecord> {
        vec![
            FlowRecord::new("foo", "bar", "vpc-0", 100, 300, 1),
            FlowRecord::new("foo", "bar", "vpc-0", 200, 600, 1),
            FlowRecord::new("baz", "qux", "vpc-0", 100, 500, 1),
            FlowRecord::new("baz", "qux", "vpc-0", 100, 500, 2),
            FlowRecord::new("baz", "qux", "vpc-1", 100, 500, 2),
        ]
    }

    fn sorted(mut flows: Vec<FlowRecord>) -> Vec<FlowRecord> {
        flows.sort_by(|a, b| a.key().cmp(&b.key()).then(a.hour.cmp(&b.hour)));
        flows
    }

    #[test]
    fn test_flow_table() {
        struct Case {
            name: &'static str,
            insert: Vec<FlowRecord>,
            hour: Hour,
            expected: Vec<FlowRecord>,
        }

        let cases = vec![
            Case {
                name: "empty flow store",
                insert: vec![],
                hour: 1,
                expected: vec![],
            },
            Case {
                name: "no flows for hour",
                insert: scenario(),
                hour: 3,
                expected: vec![],
            },
            Case {
                name: "multiple flows returned",
                insert: scenario(),
                hour: 2,
                expected: vec![
                    FlowRecord::new("baz", "qux", "vpc-0", 100, 500, 2),
                    FlowRecord::new("baz", "qux", "vpc-1", 100, 500, 2),
                ],
            },
            Case {
                name: "multiple aggregated flows returned",
                insert: scenario(),
                hour: 1,
                expected: vec![
                    FlowRecord::new("foo", "bar", "vpc-0", 300, 900, 1),
                    FlowRecord::new("baz", "qux", "vpc-0", 100, 500, 1),
                ],
            },
        ];

        for kind in [HistoryKind::List, HistoryKind::HourIndexed] {
            for case in &cases {
                let store = FlowStore::new(kind);
                let summary = store.insert(case.insert.clone()).unwrap();
                assert_eq!(summary.accepted, case.insert.len(), "{kind}: {}", case.name);
                assert_eq!(summary.skipped, 0, "{kind}: {}", case.name);

                let flows = store.get(case.hour).unwrap();
                assert_eq!(
                    sorted(flows),
                    sorted(case.expected.clone()),
                    "{kind}: {}",
                    case.name
                );
            }
        }
    }

    #[test]
    fn test_invalid_hour() {
        let store = FlowStore::default();
        store.insert(scenario()).unwrap();
        let before = store.stats().unwrap();

        for hour in [0, -5] {
            let err = store.get(hour).unwrap_err();
            assert!(matches!(err, StoreError::InvalidArgument(_)), "hour {hour}");
        }
        assert_eq!(store.stats().unwrap(), before);
    }

    #[test]
    fn test_same_tuple_merges_into_one_aggregate() {
        let store = FlowStore::default();
        store
            .insert(vec![
                FlowRecord::new("a", "b", "vpc-0", 1, 2, 7),
                FlowRecord::new("a", "b", "vpc-0", 10, 20, 7),
                FlowRecord::new("a", "b", "vpc-0", 100, 200, 7),
            ])
            .unwrap();

        let flows = store.get(7).unwrap();
        assert_eq!(flows, vec![FlowRecord::new("a", "b", "vpc-0", 111, 222, 7)]);
    }

    #[test]
    fn test_inserts_accumulate_across_batches() {
        let store = FlowStore::default();
        store.insert(scenario()).unwrap();
        store.insert(scenario()).unwrap();

        let flows = sorted(store.get(1).unwrap());
        assert_eq!(
            flows,
            sorted(vec![
                FlowRecord::new("foo", "bar", "vpc-0", 600, 1800, 1),
                FlowRecord::new("baz", "qux", "vpc-0", 200, 1000, 1),
            ])
        );
        assert_eq!(store.stats().unwrap(), StoreStats { keys: 3, records: 10 });
    }

    #[test]
    fn test_stats() {
        let store = FlowStore::default();
        assert_eq!(store.stats().unwrap(), StoreStats::default());

        store.insert(scenario()).unwrap();
        assert_eq!(store.stats().unwrap(), StoreStats { keys: 3, records: 5 });

        store.insert(Vec::new()).unwrap();
        assert_eq!(store.stats().unwrap(), StoreStats { keys: 3, records: 5 });
    }

    #[test]
    fn test_list_store_accepts_non_positive_hour_on_insert() {
        let store = FlowStore::new(HistoryKind::List);
        let summary = store
            .insert(vec![FlowRecord::new("a", "b", "vpc-0", 1, 1, 0)])
            .unwrap();
        assert_eq!(summary, InsertSummary { accepted: 1, skipped: 0 });
        assert_eq!(store.stats().unwrap().records, 1);
    }

    #[test]
    fn test_skipped_record_does_not_abort_batch() {
        let store = FlowStore::new(HistoryKind::HourIndexed);
        let summary = store
            .insert(vec![
                FlowRecord::new("a", "b", "vpc-0", 1, 1, 1),
                FlowRecord::new("a", "b", "vpc-0", 5, 5, 0),
                FlowRecord::new("c", "d", "vpc-0", 2, 2, 1),
            ])
            .unwrap();
        assert_eq!(summary, InsertSummary { accepted: 2, skipped: 1 });

        let flows = sorted(store.get(1).unwrap());
        assert_eq!(
            flows,
            vec![
                FlowRecord::new("a", "b", "vpc-0", 1, 1, 1),
                FlowRecord::new("c", "d", "vpc-0", 2, 2, 1),
            ]
        );
    }

    #[test]
    fn test_record_count_tracks_accepted_appends() {
        let store = FlowStore::new(HistoryKind::HourIndexed);
        store
            .insert(vec![
                FlowRecord::new("a", "b", "vpc-0", 1, 1, 1),
                FlowRecord::new("a", "b", "vpc-0", 1, 1, -1),
            ])
            .unwrap();
        store
            .insert(vec![
                FlowRecord::new("a", "b", "vpc-0", 1, 1, 2),
                FlowRecord::new("c", "d", "vpc-0", 1, 1, 2),
                FlowRecord::new("c", "d", "vpc-0", 1, 1, 0),
            ])
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats, StoreStats { keys: 2, records: 3 });

        let inner = store.inner.read().unwrap();
        let walked: usize = inner.flows.values().map(|h| h.len()).sum();
        assert_eq!(walked, stats.records);
    }

    #[test]
    fn test_rejected_first_record_creates_no_key() {
        let store = FlowStore::new(HistoryKind::HourIndexed);
        let summary = store
            .insert(vec![FlowRecord::new("new", "key", "vpc-0", 1, 1, 0)])
            .unwrap();
        assert_eq!(summary, InsertSummary { accepted: 0, skipped: 1 });
        assert_eq!(store.stats().unwrap(), StoreStats::default());

        store
            .insert(vec![FlowRecord::new("new", "key", "vpc-0", 1, 1, 3)])
            .unwrap();
        assert_eq!(store.stats().unwrap(), StoreStats { keys: 1, records: 1 });
    }

    #[test]
    fn test_overflowing_key_is_omitted() {
        let store = FlowStore::default();
        store
            .insert(vec![
                FlowRecord::new("big", "b", "vpc-0", u64::MAX, 0, 1),
                FlowRecord::new("big", "b", "vpc-0", 1, 0, 1),
                FlowRecord::new("ok", "b", "vpc-0", 3, 4, 1),
            ])
            .unwrap();

        let flows = store.get(1).unwrap();
        assert_eq!(flows, vec![FlowRecord::new("ok", "b", "vpc-0", 3, 4, 1)]);
    }

    #[test]
    fn test_poisoned_lock_is_unavailable() {
        let store = std::sync::Arc::new(FlowStore::default());
        let poison = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poison.inner.write().unwrap();
            panic!("poison the flow store lock");
        })
        .join();

        assert!(matches!(store.get(1), Err(StoreError::Unavailable)));
        assert!(matches!(store.insert(Vec::new()), Err(StoreError::Unavailable)));
        assert!(matches!(store.stats(), Err(StoreError::Unavailable)));
    }
}
