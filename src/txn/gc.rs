//! MVCC garbage collection
//!
//! Commits register their id and state wrapper in a sorted transaction map.
//! The collector finds the longest contiguous prefix of resolved
//! (committed or reverted) transactions below a snapshot, then reclaims that
//! range from both the MVCC record queues and the operation log. A reclaimed
//! range is coalesced into its first surviving entry via `up_to_id`, so a
//! later pass still sees the range as contiguous.

use crate::txn::store::{MvccStore, TransactionState, TransactionStateWrapper};
use crate::{QuiverError, Result};
use crossbeam_skiplist::SkipMap;
use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Sorted transaction-id bookkeeping consumed by the collector.
pub type TransactionGcMap = SkipMap<u64, TransactionGcEntry>;

/// Collector view of one transaction: its resolution state and the inclusive
/// upper end of the range of previously coalesced ids it represents.
pub struct TransactionGcEntry {
    wrapper: Arc<TransactionStateWrapper>,
    up_to_id: AtomicU64,
}

impl TransactionGcEntry {
    pub fn new(tx_id: u64, wrapper: Arc<TransactionStateWrapper>) -> Self {
        Self {
            wrapper,
            up_to_id: AtomicU64::new(tx_id),
        }
    }

    /// Entry already in a final state, without a live transaction behind it.
    pub fn resolved(tx_id: u64, state: TransactionState) -> Self {
        Self::new(tx_id, Arc::new(TransactionStateWrapper::resolved(state)))
    }

    #[inline]
    pub fn state(&self) -> TransactionState {
        self.wrapper.state()
    }

    #[inline]
    pub fn up_to_id(&self) -> u64 {
        self.up_to_id.load(Ordering::Acquire)
    }

    fn set_up_to_id(&self, up_to_id: u64) {
        self.up_to_id.store(up_to_id, Ordering::Release);
    }
}

pub struct MvccGarbageCollector;

impl MvccGarbageCollector {
    /// Largest id of the contiguous fully-resolved prefix of `map` at or
    /// below `snapshot_id`, or `None` when the very first entry is still in
    /// progress. An entry is contiguous with its predecessor when its id is
    /// the successor or falls inside the predecessor's coalesced range.
    pub fn find_max_min_id(map: &TransactionGcMap, snapshot_id: u64) -> Option<u64> {
        let last_key = *map.back()?.key();
        let head = snapshot_id.min(last_key);

        let mut max_min_id = None;
        let mut prev: Option<(u64, u64)> = None; // (key, up_to_id)

        for entry in map.range((Bound::Unbounded, Bound::Included(head))) {
            let key = *entry.key();
            let state = entry.value().state();

            if state != TransactionState::Committed && state != TransactionState::Reverted {
                return max_min_id;
            }

            let contiguous = match prev {
                None => true,
                Some((prev_key, prev_up_to)) => key == prev_key + 1 || key - 1 <= prev_up_to,
            };
            if !contiguous {
                return max_min_id;
            }

            prev = Some((key, entry.value().up_to_id()));
            max_min_id = Some(key);
        }

        max_min_id
    }

    /// Ids in `(max_min_id, snapshot_id)` that block the resolved prefix from
    /// growing: absent from the map (and not covered by a coalesced range) or
    /// still in progress.
    pub fn find_missing_or_active_transaction_ids(
        map: &TransactionGcMap,
        max_min_id: u64,
        snapshot_id: u64,
    ) -> Result<BTreeSet<u64>> {
        if snapshot_id < max_min_id {
            return Err(QuiverError::Invariant(format!(
                "snapshot {snapshot_id} is behind the resolved prefix {max_min_id}"
            )));
        }

        let mut result = BTreeSet::new();
        for id in (max_min_id + 1)..snapshot_id {
            if let Some(entry) = map.get(&id) {
                if entry.value().state() == TransactionState::InProgress {
                    result.insert(id);
                }
            } else if !Self::covered_by_range(map, id) {
                result.insert(id);
            }
        }
        Ok(result)
    }

    /// Whether `id` falls inside the coalesced range of an earlier entry.
    fn covered_by_range(map: &TransactionGcMap, id: u64) -> bool {
        match map.upper_bound(Bound::Included(&id)) {
            Some(entry) => *entry.key() == id || entry.value().up_to_id() >= id,
            None => false,
        }
    }

    /// Reclaim `(start, end]` from the GC map and the store. With
    /// `up_to_max_min` the range start goes too; otherwise the start entry
    /// stays and absorbs the range via `up_to_id`.
    pub fn remove_transactions_range(
        map: &TransactionGcMap,
        store: &MvccStore,
        start: u64,
        end: u64,
        up_to_max_min: bool,
    ) {
        store.purge_transaction_range(start, end, up_to_max_min);

        let mut id = end;
        while id > start {
            map.remove(&id);
            id -= 1;
        }

        if up_to_max_min {
            map.remove(&start);
        } else if let Some(entry) = map.get(&start) {
            entry.value().set_up_to_id(end);
        }
    }

    /// Full sweep: reclaim everything from the first recorded transaction up
    /// to the resolved prefix below `snapshot_id`.
    pub fn remove_up_to_max_min_id(
        map: &TransactionGcMap,
        store: &MvccStore,
        snapshot_id: u64,
    ) -> Result<()> {
        let Some(max_min_id) = Self::find_max_min_id(map, snapshot_id) else {
            return Ok(());
        };
        if snapshot_id < max_min_id {
            return Err(QuiverError::Invariant(format!(
                "snapshot {snapshot_id} is behind the resolved prefix {max_min_id}"
            )));
        }

        let Some(first) = map.front().map(|e| *e.key()) else {
            return Ok(());
        };
        Self::remove_transactions_range(map, store, first, max_min_id, true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tx_id: u64, state: TransactionState) -> TransactionGcEntry {
        TransactionGcEntry::resolved(tx_id, state)
    }

    fn map_of(states: &[(u64, TransactionState)]) -> TransactionGcMap {
        let map = TransactionGcMap::new();
        for &(id, state) in states {
            map.insert(id, entry(id, state));
        }
        map
    }

    use TransactionState::{Committed, InProgress, Reverted};

    #[test]
    fn test_find_max_min_id_stops_at_in_progress() {
        let map = map_of(&[(1, Committed), (2, Committed), (3, InProgress), (4, Committed)]);
        assert_eq!(MvccGarbageCollector::find_max_min_id(&map, 4), Some(2));
    }

    #[test]
    fn test_find_max_min_id_none_when_first_unresolved() {
        let map = map_of(&[(1, InProgress), (2, Committed)]);
        assert_eq!(MvccGarbageCollector::find_max_min_id(&map, 2), None);
    }

    #[test]
    fn test_find_max_min_id_counts_reverted() {
        let map = map_of(&[(1, Committed), (2, Reverted), (3, Committed)]);
        assert_eq!(MvccGarbageCollector::find_max_min_id(&map, 3), Some(3));
    }

    #[test]
    fn test_find_max_min_id_respects_snapshot_bound() {
        let map = map_of(&[(1, Committed), (2, Committed), (3, Committed)]);
        assert_eq!(MvccGarbageCollector::find_max_min_id(&map, 2), Some(2));
    }

    #[test]
    fn test_find_max_min_id_stops_on_gap() {
        let map = map_of(&[(1, Committed), (2, Committed), (5, Committed)]);
        assert_eq!(MvccGarbageCollector::find_max_min_id(&map, 5), Some(2));
    }

    #[test]
    fn test_find_max_min_id_crosses_coalesced_range() {
        let map = TransactionGcMap::new();
        let first = entry(1, Committed);
        first.set_up_to_id(4);
        map.insert(1, first);
        map.insert(5, entry(5, Committed));

        assert_eq!(MvccGarbageCollector::find_max_min_id(&map, 5), Some(5));
    }

    #[test]
    fn test_coalescing_scenario() {
        let map = map_of(&[(1, Committed), (2, Committed), (3, InProgress), (4, Committed)]);
        let store = MvccStore::new();

        let max_min = MvccGarbageCollector::find_max_min_id(&map, 4).unwrap();
        assert_eq!(max_min, 2);

        MvccGarbageCollector::remove_transactions_range(&map, &store, 1, 2, false);

        assert!(map.get(&2).is_none());
        let first = map.get(&1).expect("range start survives");
        assert_eq!(first.value().up_to_id(), 2);

        // The coalesced range still reads as contiguous.
        assert!(MvccGarbageCollector::find_missing_or_active_transaction_ids(&map, 0, 3)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_missing_and_active_ids_reported() {
        let map = map_of(&[(1, Committed), (3, InProgress)]);
        let missing =
            MvccGarbageCollector::find_missing_or_active_transaction_ids(&map, 1, 6).unwrap();
        // 2 is absent, 3 in progress, 4 and 5 absent.
        assert_eq!(missing.into_iter().collect::<Vec<_>>(), vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_snapshot_behind_prefix_is_an_invariant_violation() {
        let map = map_of(&[(1, Committed)]);
        assert!(matches!(
            MvccGarbageCollector::find_missing_or_active_transaction_ids(&map, 5, 3),
            Err(QuiverError::Invariant(_))
        ));
    }

    #[test]
    fn test_sweep_reclaims_committed_state() {
        let store = MvccStore::new();

        for i in 0..3u32 {
            let mut tx = store.begin_write();
            store.put(&mut tx, format!("k{i}").as_bytes(), b"v").unwrap();
            store.commit(tx).unwrap();
        }
        assert_eq!(store.record_count(), 3);

        let snapshot = store.current_snapshot_id();
        MvccGarbageCollector::remove_up_to_max_min_id(store.transactions_gc(), &store, snapshot)
            .unwrap();

        assert_eq!(store.record_count(), 0, "record queues must be reclaimed");
        assert!(store.transactions_gc().is_empty());
    }

    #[test]
    fn test_sweep_never_reclaims_in_progress() {
        let store = MvccStore::new();

        let mut t1 = store.begin_write();
        store.put(&mut t1, b"committed", b"v").unwrap();
        store.commit(t1).unwrap();

        // A write transaction whose commit is still in flight: registered in
        // the GC map but unresolved.
        let stalled = store.begin_write();
        let stalled_id = stalled.snapshot_id();
        store.transactions_gc().insert(
            stalled_id,
            TransactionGcEntry::new(
                stalled_id,
                Arc::new(TransactionStateWrapper::resolved(InProgress)),
            ),
        );

        let mut t2 = store.begin_write();
        store.put(&mut t2, b"later", b"v").unwrap();
        store.commit(t2).unwrap();

        MvccGarbageCollector::remove_up_to_max_min_id(
            store.transactions_gc(),
            &store,
            store.current_snapshot_id(),
        )
        .unwrap();

        assert!(
            store.transactions_gc().get(&stalled_id).is_some(),
            "in-progress entry must survive the sweep"
        );
        // Transactions behind the stalled one stay reclaimable later, and
        // their data stays visible now.
        let t = store.begin_read();
        assert_eq!(store.read(&t, b"later").unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.read(&t, b"committed").unwrap(), None);
    }
}
