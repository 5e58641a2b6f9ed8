//! MVCC transaction layer
//!
//! Snapshot-isolated reads and atomic commits over a lock-free-keyed
//! operation log, plus the garbage collector that reclaims resolved
//! transaction state.

pub mod gc;
pub mod store;

pub use gc::{MvccGarbageCollector, TransactionGcEntry, TransactionGcMap};
pub use store::{
    FallbackLookup, MvccStore, OperationKind, OperationLogRecord, Transaction, TransactionState,
    TransactionType,
};
