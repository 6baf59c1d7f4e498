//! In-memory hash-equality index (C9).
//!
//! Only equality predicates are served; range predicates and predicates on
//! unindexed columns always fall back to a full table scan (spec §2 scopes
//! range/B-tree indexes out entirely). The index itself is never persisted:
//! it is lazily rebuilt from a table scan the first time it's consulted, and
//! again from scratch on every `Open`.

use catalog::IndexId;
use common::RowRef;
use std::collections::HashMap;
use types::Value;

/// A queued insert/remove waiting for `end_batch` to apply it.
#[derive(Clone, Debug)]
enum PendingOp {
    Insert(Vec<Value>, RowRef),
    Remove(Vec<Value>, RowRef),
}

/// In-memory hash-equality index over one or more columns of a table.
pub struct HashIndex {
    pub index_id: IndexId,
    map: HashMap<Vec<Value>, Vec<RowRef>>,
    built: bool,
    deferred: bool,
    pending: Vec<PendingOp>,
}

impl HashIndex {
    /// Registers the index without building it; the first `lookup` (or an
    /// explicit `build`) triggers the full-table-scan build.
    pub fn new(index_id: IndexId) -> Self {
        Self {
            index_id,
            map: HashMap::new(),
            built: false,
            deferred: false,
            pending: Vec::new(),
        }
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Builds the index from a full scan of `pairs`, replacing any existing
    /// contents. This is the "single-pass build that amortises rehashing"
    /// the spec calls `bulk_insert`; it's also how both the lazy
    /// first-access build and index recovery after `Open` are implemented.
    pub fn build(&mut self, pairs: impl IntoIterator<Item = (Vec<Value>, RowRef)>) {
        self.map.clear();
        self.bulk_insert(pairs);
        self.built = true;
    }

    /// Single-pass insert of many pairs without the lazy-build bookkeeping;
    /// used by `build` and directly by batch sessions that already hold the
    /// full set of rows to index.
    pub fn bulk_insert(&mut self, pairs: impl IntoIterator<Item = (Vec<Value>, RowRef)>) {
        for (key, row_ref) in pairs {
            self.map.entry(key).or_default().push(row_ref);
        }
    }

    /// All row references whose indexed columns equal `key`.
    pub fn lookup(&self, key: &[Value]) -> Vec<RowRef> {
        self.map.get(key).cloned().unwrap_or_default()
    }

    /// Incrementally maintains the index for a single row. In deferred mode
    /// (inside a batch) this only queues the operation; `end_batch` applies
    /// every queued operation in one pass.
    pub fn insert(&mut self, key: Vec<Value>, row_ref: RowRef) {
        if self.deferred {
            self.pending.push(PendingOp::Insert(key, row_ref));
        } else {
            self.map.entry(key).or_default().push(row_ref);
        }
    }

    /// Removes one occurrence of `(key, row_ref)`. Returns whether an entry
    /// was found and removed — in deferred mode this always returns `true`
    /// since the removal is only queued, not yet verified against the map.
    pub fn remove(&mut self, key: &[Value], row_ref: RowRef) -> bool {
        if self.deferred {
            self.pending.push(PendingOp::Remove(key.to_vec(), row_ref));
            return true;
        }
        self.remove_now(key, row_ref)
    }

    fn remove_now(&mut self, key: &[Value], row_ref: RowRef) -> bool {
        let Some(entries) = self.map.get_mut(key) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|r| *r != row_ref);
        let removed = entries.len() < before;
        if entries.is_empty() {
            self.map.remove(key);
        }
        removed
    }

    /// Enters deferred-maintenance mode: further `insert`/`remove` calls are
    /// queued instead of applied. Called by the batch driver's
    /// `Table.begin_batch()` (§4.10).
    pub fn begin_batch(&mut self) {
        self.deferred = true;
        self.pending.clear();
    }

    /// Applies every queued operation in submission order and leaves
    /// deferred mode. Called once the batch's single WAL commit resolves.
    pub fn end_batch(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for op in pending {
            match op {
                PendingOp::Insert(key, row_ref) => {
                    self.map.entry(key).or_default().push(row_ref);
                }
                PendingOp::Remove(key, row_ref) => {
                    self.remove_now(&key, row_ref);
                }
            }
        }
        self.deferred = false;
    }

    /// Discards queued operations without applying them and leaves deferred
    /// mode — the batch's WAL commit failed, so the speculative index
    /// updates never happened.
    pub fn revert_batch(&mut self) {
        self.pending.clear();
        self.deferred = false;
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    pub fn len(&self) -> usize {
        self.map.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{PageId, RecordId, TableId};

    fn row_ref(slot: u16) -> RowRef {
        RowRef::encode(
            TableId(1),
            RecordId {
                page_id: PageId(0),
                slot,
            },
        )
    }

    #[test]
    fn lazily_unbuilt_index_returns_empty_lookups() {
        let index = HashIndex::new(IndexId(1));
        assert!(!index.is_built());
        assert_eq!(index.lookup(&[Value::Int(1)]), Vec::new());
    }

    #[test]
    fn build_from_scan_then_lookup() {
        let mut index = HashIndex::new(IndexId(1));
        index.build(vec![
            (vec![Value::Int(1)], row_ref(0)),
            (vec![Value::Int(2)], row_ref(1)),
            (vec![Value::Int(1)], row_ref(2)),
        ]);

        assert!(index.is_built());
        let mut hits = index.lookup(&[Value::Int(1)]);
        hits.sort_by_key(|r| r.0);
        assert_eq!(hits, vec![row_ref(0), row_ref(2)]);
    }

    #[test]
    fn insert_and_remove_maintain_incrementally() {
        let mut index = HashIndex::new(IndexId(1));
        index.insert(vec![Value::Text("a".into())], row_ref(0));
        index.insert(vec![Value::Text("a".into())], row_ref(1));
        assert_eq!(index.lookup(&[Value::Text("a".into())]).len(), 2);

        let removed = index.remove(&[Value::Text("a".into())], row_ref(0));
        assert!(removed);
        assert_eq!(index.lookup(&[Value::Text("a".into())]), vec![row_ref(1)]);
    }

    #[test]
    fn remove_missing_entry_returns_false() {
        let mut index = HashIndex::new(IndexId(1));
        assert!(!index.remove(&[Value::Int(9)], row_ref(0)));
    }

    #[test]
    fn deferred_mode_queues_until_end_batch() {
        let mut index = HashIndex::new(IndexId(1));
        index.begin_batch();
        index.insert(vec![Value::Int(1)], row_ref(0));
        index.insert(vec![Value::Int(2)], row_ref(1));

        // Not visible yet: the batch hasn't ended.
        assert_eq!(index.lookup(&[Value::Int(1)]), Vec::new());

        index.end_batch();
        assert!(!index.is_deferred());
        assert_eq!(index.lookup(&[Value::Int(1)]), vec![row_ref(0)]);
        assert_eq!(index.lookup(&[Value::Int(2)]), vec![row_ref(1)]);
    }

    #[test]
    fn revert_batch_discards_pending_updates() {
        let mut index = HashIndex::new(IndexId(1));
        index.begin_batch();
        index.insert(vec![Value::Int(1)], row_ref(0));
        index.revert_batch();

        assert!(!index.is_deferred());
        assert_eq!(index.lookup(&[Value::Int(1)]), Vec::new());
    }

    #[test]
    fn deferred_remove_applies_on_end_batch() {
        let mut index = HashIndex::new(IndexId(1));
        index.insert(vec![Value::Int(5)], row_ref(0));

        index.begin_batch();
        index.remove(&[Value::Int(5)], row_ref(0));
        assert_eq!(index.lookup(&[Value::Int(5)]).len(), 1);

        index.end_batch();
        assert_eq!(index.lookup(&[Value::Int(5)]), Vec::new());
    }

    #[test]
    fn bulk_insert_amortises_many_pairs() {
        let mut index = HashIndex::new(IndexId(1));
        let pairs: Vec<_> = (0..500)
            .map(|i| (vec![Value::Int(i)], row_ref((i % u16::MAX as i64) as u16)))
            .collect();
        index.bulk_insert(pairs);

        assert_eq!(index.len(), 500);
        assert_eq!(index.lookup(&[Value::Int(250)]).len(), 1);
    }

    #[test]
    fn composite_keys_distinguish_column_order() {
        let mut index = HashIndex::new(IndexId(1));
        index.insert(vec![Value::Int(1), Value::Text("x".into())], row_ref(0));
        index.insert(vec![Value::Text("x".into()), Value::Int(1)], row_ref(1));

        assert_eq!(
            index.lookup(&[Value::Int(1), Value::Text("x".into())]),
            vec![row_ref(0)]
        );
        assert_eq!(
            index.lookup(&[Value::Text("x".into()), Value::Int(1)]),
            vec![row_ref(1)]
        );
    }

    #[test]
    fn real_and_datetime_keys_hash_correctly() {
        let mut index = HashIndex::new(IndexId(1));
        index.insert(vec![Value::Real(3.25)], row_ref(0));
        index.insert(vec![Value::DateTime(1_700_000_000)], row_ref(1));

        assert_eq!(index.lookup(&[Value::Real(3.25)]), vec![row_ref(0)]);
        assert_eq!(
            index.lookup(&[Value::DateTime(1_700_000_000)]),
            vec![row_ref(1)]
        );
    }
}
