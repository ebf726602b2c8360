// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded in-memory operation journal.
//!
//! Diagnostics only: records are never replayed and are lost on restart.
//! When full, the oldest record is dropped.

use std::collections::VecDeque;
use parking_lot::Mutex;

use super::types::{OperationRecord, TxnId};

#[derive(Debug)]
pub struct Journal {
    capacity: usize,
    records: Mutex<VecDeque<OperationRecord>>,
}

impl Journal {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
        }
    }

    pub fn append(&self, record: OperationRecord) {
        if self.capacity == 0 {
            return;
        }
        let len = {
            let mut records = self.records.lock();
            while records.len() >= self.capacity {
                records.pop_front();
            }
            records.push_back(record);
            records.len()
        };
        crate::metrics::set_journal_len(len);
    }

    /// All retained records, oldest first.
    pub fn records(&self) -> Vec<OperationRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Retained records for one transaction, oldest first.
    pub fn for_txn(&self, txn: TxnId) -> Vec<OperationRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.txn_id == txn)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreTarget;
    use crate::transaction::types::{OperationKind, RecordPhase};
    use uuid::Uuid;

    fn record(txn: TxnId, id: &str) -> OperationRecord {
        OperationRecord {
            txn_id: txn,
            kind: OperationKind::Put,
            target: StoreTarget::Local,
            entity_id: id.to_string(),
            payload_snapshot: None,
            timestamp: 0,
            succeeded: true,
            phase: RecordPhase::Apply,
        }
    }

    #[test]
    fn test_fifo_eviction() {
        let journal = Journal::new(2);
        let txn = Uuid::new_v4();

        journal.append(record(txn, "a"));
        journal.append(record(txn, "b"));
        journal.append(record(txn, "c"));

        let ids: Vec<_> = journal.records().into_iter().map(|r| r.entity_id).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(journal.len(), 2);
    }

    #[test]
    fn test_filter_by_txn() {
        let journal = Journal::new(10);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        journal.append(record(first, "a"));
        journal.append(record(second, "b"));
        journal.append(record(first, "c"));

        let ids: Vec<_> = journal.for_txn(first).into_iter().map(|r| r.entity_id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let journal = Journal::new(0);
        journal.append(record(Uuid::new_v4(), "a"));
        assert!(journal.is_empty());
    }
}
