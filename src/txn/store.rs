//! MVCC operation log and snapshot-isolated reads
//!
//! Keys hash to 64-bit slots; each slot holds an `MvccRecord` with an atomic
//! `max_transaction_id` watermark and a queue of references into the
//! append-only operation log. Every shared map here is a lock-free skip list
//! keyed by a primitive 64-bit integer: the record map by key hash, the
//! operation log and each record's queue by operation address. Writers stage
//! operations privately inside their transaction and publish them during
//! commit under a shared state wrapper; readers bump the watermark to their
//! snapshot first, which is what blocks any slower writer with an earlier
//! snapshot from committing against the record afterwards.

use crate::txn::gc::TransactionGcEntry;
use crate::{QuiverError, Result};
use crossbeam_skiplist::SkipMap;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Fixed seed for key hashing; part of the on-log format.
const KEY_HASH_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// Commits touching more operations than this install a latch for waiting
/// readers instead of letting them spin.
const LATCH_OPERATION_THRESHOLD: usize = 10;

#[inline]
pub fn key_hash(key: &[u8]) -> u64 {
    xxhash_rust::xxh64::xxh64(key, KEY_HASH_SEED)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionState {
    InProgress = 0,
    Committed = 1,
    Reverted = 2,
}

/// One-shot latch released when a transaction resolves.
struct CompletionLatch {
    done: Mutex<bool>,
    signal: Condvar,
}

impl CompletionLatch {
    fn new() -> Self {
        Self {
            done: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.signal.wait(&mut done);
        }
    }

    fn release(&self) {
        *self.done.lock() = true;
        self.signal.notify_all();
    }
}

/// Shared holder for a transaction's resolution state. Every operation entry
/// published by one commit points at the same wrapper.
pub struct TransactionStateWrapper {
    state: AtomicU8,
    latch: Option<CompletionLatch>,
}

impl TransactionStateWrapper {
    fn new(with_latch: bool) -> Self {
        Self {
            state: AtomicU8::new(TransactionState::InProgress as u8),
            latch: with_latch.then(CompletionLatch::new),
        }
    }

    /// Wrapper already resolved to the given state; used by the collector
    /// bookkeeping and tests.
    pub(crate) fn resolved(state: TransactionState) -> Self {
        Self {
            state: AtomicU8::new(state as u8),
            latch: None,
        }
    }

    pub fn state(&self) -> TransactionState {
        match self.state.load(Ordering::Acquire) {
            0 => TransactionState::InProgress,
            1 => TransactionState::Committed,
            _ => TransactionState::Reverted,
        }
    }

    fn set_state(&self, state: TransactionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn release_latch(&self) {
        if let Some(latch) = &self.latch {
            latch.release();
        }
    }

    /// Block until the transaction resolves: wait on the latch when one was
    /// installed, otherwise spin-yield.
    fn wait_while_in_progress(&self) {
        while self.state() == TransactionState::InProgress {
            if let Some(latch) = &self.latch {
                latch.wait();
            } else {
                std::hint::spin_loop();
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Put,
    Remove,
}

/// Records in the dense, append-only operation log.
pub enum OperationLogRecord {
    Operation {
        key: Vec<u8>,
        value: Vec<u8>,
        kind: OperationKind,
    },
    Completion {
        aborted: bool,
    },
}

/// Reference from an `MvccRecord` queue into the operation log, published at
/// commit time and therefore always carrying a wrapper. The queue key is the
/// operation address.
struct OperationEntry {
    tx_id: u64,
    wrapper: Arc<TransactionStateWrapper>,
}

struct MvccRecord {
    max_transaction_id: AtomicU64,
    /// Operation address -> published entry. Addresses are allocated
    /// monotonically, so iteration yields entries in append order.
    operations: SkipMap<u64, OperationEntry>,
}

impl MvccRecord {
    fn new() -> Self {
        Self {
            max_transaction_id: AtomicU64::new(0),
            operations: SkipMap::new(),
        }
    }
}

/// Operation staged inside a transaction before commit.
struct OperationReference {
    address: u64,
    key_hash: u64,
}

pub struct Transaction {
    snapshot_id: u64,
    transaction_type: TransactionType,
    operations: Vec<OperationReference>,
}

impl Transaction {
    #[inline]
    pub fn snapshot_id(&self) -> u64 {
        self.snapshot_id
    }

    #[inline]
    pub fn transaction_type(&self) -> TransactionType {
        self.transaction_type
    }

    #[inline]
    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }
}

/// Authoritative store consulted for keys with no visible MVCC entry after a
/// hash collision re-scan.
pub trait FallbackLookup: Send + Sync {
    fn lookup(&self, key: &[u8]) -> Option<Vec<u8>>;
}

pub struct MvccStore {
    records: SkipMap<u64, Arc<MvccRecord>>,
    operation_log: SkipMap<u64, OperationLogRecord>,
    next_address: AtomicU64,
    snapshot_id: AtomicU64,
    transactions_gc: SkipMap<u64, TransactionGcEntry>,
    fallback: Option<Box<dyn FallbackLookup>>,
}

impl Default for MvccStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MvccStore {
    pub fn new() -> Self {
        Self {
            records: SkipMap::new(),
            operation_log: SkipMap::new(),
            next_address: AtomicU64::new(0),
            snapshot_id: AtomicU64::new(1),
            transactions_gc: SkipMap::new(),
            fallback: None,
        }
    }

    /// Install the authoritative fallback store for collision misses.
    pub fn with_fallback(mut self, fallback: Box<dyn FallbackLookup>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    #[inline]
    pub fn current_snapshot_id(&self) -> u64 {
        self.snapshot_id.load(Ordering::SeqCst)
    }

    /// Resolved-transaction bookkeeping consumed by the garbage collector.
    #[inline]
    pub fn transactions_gc(&self) -> &SkipMap<u64, TransactionGcEntry> {
        &self.transactions_gc
    }

    pub fn begin_read(&self) -> Transaction {
        Transaction {
            snapshot_id: self.snapshot_id.load(Ordering::SeqCst),
            transaction_type: TransactionType::Read,
            operations: Vec::new(),
        }
    }

    pub fn begin_write(&self) -> Transaction {
        Transaction {
            snapshot_id: self.snapshot_id.fetch_add(1, Ordering::SeqCst) + 1,
            transaction_type: TransactionType::Write,
            operations: Vec::new(),
        }
    }

    pub fn put(&self, tx: &mut Transaction, key: &[u8], value: &[u8]) -> Result<()> {
        self.append_operation(tx, key, value, OperationKind::Put)
    }

    pub fn remove(&self, tx: &mut Transaction, key: &[u8], value: &[u8]) -> Result<()> {
        self.append_operation(tx, key, value, OperationKind::Remove)
    }

    fn append_operation(
        &self,
        tx: &mut Transaction,
        key: &[u8],
        value: &[u8],
        kind: OperationKind,
    ) -> Result<()> {
        if tx.transaction_type != TransactionType::Write {
            return Err(QuiverError::Invariant(
                "write operation on a read-only transaction".to_string(),
            ));
        }

        let address = self.next_address.fetch_add(1, Ordering::SeqCst);
        tx.operations.push(OperationReference {
            address,
            key_hash: key_hash(key),
        });
        self.operation_log.insert(
            address,
            OperationLogRecord::Operation {
                key: key.to_vec(),
                value: value.to_vec(),
                kind,
            },
        );
        Ok(())
    }

    fn record_for(&self, key_hash: u64) -> Arc<MvccRecord> {
        self.records
            .get_or_insert_with(key_hash, || Arc::new(MvccRecord::new()))
            .value()
            .clone()
    }

    /// CAS-bump the record watermark up to `tx_id`, never down.
    fn advance_max_transaction_id(record: &MvccRecord, tx_id: u64) {
        loop {
            let current = record.max_transaction_id.load(Ordering::SeqCst);
            if current >= tx_id {
                return;
            }
            if record
                .max_transaction_id
                .compare_exchange(current, tx_id, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Snapshot-isolated read. `Ok(None)` covers both a REMOVE winner and an
    /// absent key; the caller disambiguates through the fallback store.
    pub fn read(&self, tx: &Transaction, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let hash = key_hash(key);
        let record = self.record_for(hash);
        Self::advance_max_transaction_id(&record, tx.snapshot_id);

        let max_tx_id = record.max_transaction_id.load(Ordering::SeqCst);

        let mut winner_address: Option<u64> = None;
        let mut winner_tx = 0u64;
        for entry in record.operations.iter() {
            let operation = entry.value();
            // Several entries may share one tx id; iteration runs in address
            // order, so the later append keeps replacing the candidate.
            if operation.tx_id <= max_tx_id && operation.tx_id >= winner_tx {
                operation.wrapper.wait_while_in_progress();
                if operation.wrapper.state() != TransactionState::Reverted {
                    winner_tx = operation.tx_id;
                    winner_address = Some(*entry.key());
                }
            }
        }

        let Some(winner_address) = winner_address else {
            return Ok(None);
        };

        let log_entry = self.operation_log.get(&winner_address).ok_or_else(|| {
            QuiverError::Invariant(format!(
                "operation log is missing address {winner_address}"
            ))
        })?;

        let OperationLogRecord::Operation {
            key: entry_key,
            value,
            kind,
        } = log_entry.value()
        else {
            return Err(QuiverError::Invariant(format!(
                "address {winner_address} holds a completion record"
            )));
        };

        if *kind == OperationKind::Remove {
            return Ok(None);
        }
        if entry_key == key {
            return Ok(Some(value.clone()));
        }

        // Hash collision: re-scan resolved entries below the watermark in
        // descending tx order for the first true key match.
        let mut colliding: Vec<(u64, u64)> = Vec::new();
        for entry in record.operations.iter() {
            let operation = entry.value();
            if operation.tx_id < max_tx_id {
                operation.wrapper.wait_while_in_progress();
                if operation.wrapper.state() != TransactionState::Reverted {
                    colliding.push((operation.tx_id, *entry.key()));
                }
            }
        }
        colliding.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, address) in colliding {
            let Some(log_entry) = self.operation_log.get(&address) else {
                continue;
            };
            if let OperationLogRecord::Operation {
                key: entry_key,
                value,
                kind,
            } = log_entry.value()
            {
                if entry_key == key {
                    return Ok(match kind {
                        OperationKind::Put => Some(value.clone()),
                        OperationKind::Remove => None,
                    });
                }
            }
        }

        Ok(self.fallback.as_ref().and_then(|f| f.lookup(key)))
    }

    /// Publish a write transaction. Fails with [`QuiverError::WriteConflict`]
    /// when any touched record already carries a later snapshot; the
    /// transaction is then marked reverted and its entries stay in place for
    /// readers to skip.
    pub fn commit(&self, tx: Transaction) -> Result<()> {
        if tx.transaction_type != TransactionType::Write || tx.operations.is_empty() {
            return Ok(());
        }

        let wrapper = Arc::new(TransactionStateWrapper::new(
            tx.operations.len() > LATCH_OPERATION_THRESHOLD,
        ));
        self.transactions_gc
            .insert(tx.snapshot_id, TransactionGcEntry::new(tx.snapshot_id, Arc::clone(&wrapper)));

        let mut touched: Vec<Arc<MvccRecord>> = Vec::with_capacity(tx.operations.len());
        for operation in &tx.operations {
            let record = self.record_for(operation.key_hash);
            record.operations.insert(
                operation.address,
                OperationEntry {
                    tx_id: tx.snapshot_id,
                    wrapper: Arc::clone(&wrapper),
                },
            );

            let max_seen = record.max_transaction_id.load(Ordering::SeqCst);
            if tx.snapshot_id < max_seen {
                // Lost to a reader (or writer) that already observed a later
                // snapshot on this record.
                wrapper.set_state(TransactionState::Reverted);
                let address = self.next_address.fetch_add(1, Ordering::SeqCst);
                self.operation_log
                    .insert(address, OperationLogRecord::Completion { aborted: true });
                wrapper.release_latch();
                return Err(QuiverError::WriteConflict {
                    snapshot_id: tx.snapshot_id,
                    max_seen,
                });
            }

            touched.push(record);
        }

        // Watermarks move only after every operation has passed its conflict
        // check; a transaction that reverts on a later key must leave the
        // records it touched earlier unchanged.
        for record in &touched {
            Self::advance_max_transaction_id(record, tx.snapshot_id);
        }

        loop {
            let current = self.snapshot_id.load(Ordering::SeqCst);
            if current >= tx.snapshot_id {
                break;
            }
            if self
                .snapshot_id
                .compare_exchange(current, tx.snapshot_id, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break;
            }
        }

        wrapper.set_state(TransactionState::Committed);
        wrapper.release_latch();
        let address = self.next_address.fetch_add(1, Ordering::SeqCst);
        self.operation_log
            .insert(address, OperationLogRecord::Completion { aborted: false });
        Ok(())
    }

    /// Drop the published entries (and their log records) of every resolved
    /// transaction with id in the range; `(start, end]`, or `[start, end]`
    /// when `include_start`. In-progress transactions are never touched.
    pub(crate) fn purge_transaction_range(&self, start: u64, end: u64, include_start: bool) {
        let in_range = |tx_id: u64| {
            tx_id <= end && (tx_id > start || (include_start && tx_id == start))
        };

        for record in self.records.iter() {
            let operations = &record.value().operations;
            for entry in operations.iter() {
                let operation = entry.value();
                if in_range(operation.tx_id)
                    && operation.wrapper.state() != TransactionState::InProgress
                {
                    self.operation_log.remove(entry.key());
                    entry.remove();
                }
            }

            if operations.is_empty() {
                record.remove();
            }
        }
    }

    /// Number of live records (test and introspection aid).
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Length of the operation log, including completion records.
    pub fn operation_log_len(&self) -> usize {
        self.operation_log.len()
    }
}
